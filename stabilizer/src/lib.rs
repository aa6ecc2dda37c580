//! Closed-loop polarization stabilization.
//!
//! A [`StabilizationController`] drives the four channels of a piezo
//! polarization controller by coordinate descent until a polarimeter reports
//! a state within the stop threshold of the [`Target`]. Hardware is reached
//! only through the [`hardware::ActuatorPort`] and
//! [`hardware::PolarizationSensor`] traits; every read is recorded through a
//! [`MeasurementLog`].

pub mod angle;
pub mod config;
pub mod controller;
pub mod error;
pub mod log;

pub use angle::{angular_difference, distance, POLARIZATION_PERIOD_DEG};
pub use config::{StabilizerArgs, StabilizerConfig, StepLevel, StepSchedule, Target};
pub use controller::{ControllerState, RunOutcome, RunResult, StabilizationController, StopHandle};
pub use error::{ConfigError, LogError, StabilizerError};
pub use log::{CsvMeasurementLog, EventKind, LogRecord, MeasurementLog, MemoryLog, NullLog};
