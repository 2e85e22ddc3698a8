//! readerfleet service assembly: configuration, logging and pipeline wiring.

pub mod config;
pub mod logging;
pub mod pipeline;

pub use config::{ConfigError, ServerConfig, StorageConfig};
pub use pipeline::Pipeline;
