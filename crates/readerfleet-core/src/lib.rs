//! Core traits and types for readerfleet.
//!
//! This crate defines the foundational abstractions shared by the fleet
//! pipeline crates: the unified error type, the keyed document store trait
//! and configuration defaults.

pub mod config;
pub mod error;
pub mod storage;

pub use error::{Error, Result};
pub use storage::{StorageBackend, StorageError};
