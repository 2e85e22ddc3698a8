//! Storage backends for readerfleet.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `redb` | ✅ | Persistent single-file backend |
//! | `memory` | ✅ | Non-persistent backend for tests and ephemeral runs |

pub mod backends;

pub use backends::{BackendKind, available_backends, create_backend};

#[cfg(feature = "memory")]
pub use backends::{MemoryBackend, MemoryBackendConfig};

#[cfg(feature = "redb")]
pub use backends::{RedbBackend, RedbBackendConfig};

pub use readerfleet_core::storage::{Result, StorageBackend, StorageError};
