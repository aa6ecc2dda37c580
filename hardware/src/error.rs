use thiserror::Error;

/// Errors surfaced by actuator and polarimeter sessions.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Device did not answer in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Reply could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Channel number outside 1..=4.
    #[error("invalid channel {0}, expected 1-4")]
    InvalidChannel(u8),

    /// Session was closed or never opened.
    #[error("device disconnected")]
    Disconnected,
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
