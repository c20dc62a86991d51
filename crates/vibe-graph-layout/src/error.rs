//! Error types for layout configuration and scheduling.
//!
//! Control operations on the scheduler never fail; these errors only surface at
//! the edges where user input or the OS can reject a request.

use thiserror::Error;

/// Result type alias for layout operations.
pub type LayoutResult<T> = Result<T, LayoutError>;

/// Errors that can occur while configuring or starting layouts.
#[derive(Error, Debug)]
pub enum LayoutError {
    /// A setting referenced by name is not registered.
    #[error("unknown layout setting: {name}")]
    UnknownSetting { name: String },

    /// A setting was given a non-finite value.
    #[error("invalid value {value} for layout setting {name}")]
    InvalidSettingValue { name: String, value: f32 },

    /// The worker thread could not be spawned.
    #[error("failed to spawn layout worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// A configuration document could not be parsed.
    #[error("layout config error: {0}")]
    Config(#[from] serde_json::Error),

    /// A configuration file could not be read.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
