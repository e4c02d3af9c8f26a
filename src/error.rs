//! Error types for the playback engine.

use crate::time::Ticks;
use thiserror::Error;

/// Error type for playback operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid speed: {0}. Must be finite and positive")]
    InvalidSpeed(f64),

    #[error("Invalid playback bounds: start={start}, end={end}")]
    InvalidBounds { start: Ticks, end: Ticks },

    #[error("Invalid grid step: must be positive")]
    InvalidGridStep,

    #[error("Output sink failed: {0}")]
    Sink(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
