use hardware::{Channel, DeviceError};
use thiserror::Error;

use crate::controller::ControllerState;

/// Configuration rejected before any device I/O.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Step schedule has no levels.
    #[error("step schedule is empty")]
    EmptySchedule,

    /// Step sizes and promote thresholds were given with different lengths.
    #[error("step schedule mismatch: {steps} step sizes but {thresholds} thresholds")]
    ScheduleLengthMismatch { steps: usize, thresholds: usize },

    /// A step size of zero.
    #[error("step size at level {index} must be positive")]
    NonPositiveStep { index: usize },

    /// Step sizes must strictly decrease from one level to the next.
    #[error("step size {step} at level {index} does not decrease from {previous}")]
    NonDecreasingSchedule {
        index: usize,
        previous: u16,
        step: u16,
    },

    /// Promote threshold is negative or not finite.
    #[error("invalid promote threshold {value} at level {index}")]
    InvalidThreshold { index: usize, value: f64 },

    /// Target azimuth outside (-90, 90].
    #[error("target azimuth {0}° outside (-90, 90]")]
    AzimuthOutOfRange(f64),

    /// Target ellipticity outside [-45, 45].
    #[error("target ellipticity {0}° outside [-45, 45]")]
    EllipticityOutOfRange(f64),

    /// Stop threshold must be positive and finite.
    #[error("invalid stop threshold {0}°")]
    InvalidStopThreshold(f64),

    /// Settle time must be non-negative and finite.
    #[error("invalid settle time {0} s")]
    InvalidSettle(f64),

    /// Code bounds with min above max.
    #[error("invalid code bounds [{min}, {max}]")]
    InvalidCodeBounds { min: u16, max: u16 },

    /// A run needs at least one round.
    #[error("max_rounds must be at least 1")]
    ZeroRounds,

    /// Config file could not be read or written.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for this schema.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Measurement log sink failure. Swallowed by the controller.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors that end a stabilization run.
#[derive(Error, Debug)]
pub enum StabilizerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Actuator write or polarimeter read failed. Fatal to the run.
    #[error("device error in {state}{}: {source}", channel_suffix(.channel))]
    Device {
        state: ControllerState,
        channel: Option<Channel>,
        #[source]
        source: DeviceError,
    },
}

fn channel_suffix(channel: &Option<Channel>) -> String {
    match channel {
        Some(ch) => format!(" (channel {ch})"),
        None => String::new(),
    }
}
