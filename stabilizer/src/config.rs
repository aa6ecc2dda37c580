//! Stabilizer configuration
//!
//! [`StabilizerConfig`] is validated once, before the controller touches any
//! hardware. It persists as JSON and can also be assembled from command-line
//! flags via [`StabilizerArgs`].

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use hardware::{CodeBounds, Measurement};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Target polarization state.
///
/// The DOP only rides along into the log; it never enters the distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Azimuth in (-90, 90] degrees
    pub azimuth_deg: f64,
    /// Ellipticity in [-45, 45] degrees
    pub ellipticity_deg: f64,
    /// Optional DOP placeholder for logging
    #[serde(default)]
    pub dop: Option<f64>,
}

impl Default for Target {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl Target {
    pub fn new(azimuth_deg: f64, ellipticity_deg: f64) -> Self {
        Self {
            azimuth_deg,
            ellipticity_deg,
            dop: None,
        }
    }

    pub fn with_dop(mut self, dop: f64) -> Self {
        self.dop = Some(dop);
        self
    }

    /// The target viewed as a measurement (missing DOP becomes NaN).
    pub fn as_measurement(&self) -> Measurement {
        Measurement::new(
            self.dop.unwrap_or(f64::NAN),
            self.azimuth_deg,
            self.ellipticity_deg,
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.azimuth_deg > -90.0 && self.azimuth_deg <= 90.0) {
            return Err(ConfigError::AzimuthOutOfRange(self.azimuth_deg));
        }
        if !(-45.0..=45.0).contains(&self.ellipticity_deg) {
            return Err(ConfigError::EllipticityOutOfRange(self.ellipticity_deg));
        }
        Ok(())
    }
}

/// One level of the coarse-to-fine schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepLevel {
    /// Trial step in DAC codes
    pub step: u16,
    /// Round distance below which the next finer level is taken (degrees)
    pub promote_threshold_deg: f64,
}

impl StepLevel {
    pub fn new(step: u16, promote_threshold_deg: f64) -> Self {
        Self {
            step,
            promote_threshold_deg,
        }
    }
}

/// Ordered step levels with strictly decreasing step sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepSchedule(Vec<StepLevel>);

impl Default for StepSchedule {
    fn default() -> Self {
        Self(vec![
            StepLevel::new(256, 40.0),
            StepLevel::new(128, 25.0),
            StepLevel::new(64, 15.0),
            StepLevel::new(32, 5.0),
            StepLevel::new(8, 2.0),
            StepLevel::new(2, 0.5),
        ])
    }
}

impl StepSchedule {
    /// Build a validated schedule from levels.
    pub fn new(levels: Vec<StepLevel>) -> Result<Self, ConfigError> {
        let schedule = Self(levels);
        schedule.validate()?;
        Ok(schedule)
    }

    /// Build from parallel step-size and threshold lists.
    pub fn from_parts(steps: &[u16], thresholds: &[f64]) -> Result<Self, ConfigError> {
        if steps.len() != thresholds.len() {
            return Err(ConfigError::ScheduleLengthMismatch {
                steps: steps.len(),
                thresholds: thresholds.len(),
            });
        }
        Self::new(
            steps
                .iter()
                .zip(thresholds)
                .map(|(&step, &threshold)| StepLevel::new(step, threshold))
                .collect(),
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.0.is_empty() {
            return Err(ConfigError::EmptySchedule);
        }
        for (index, level) in self.0.iter().enumerate() {
            if level.step == 0 {
                return Err(ConfigError::NonPositiveStep { index });
            }
            if !level.promote_threshold_deg.is_finite() || level.promote_threshold_deg < 0.0 {
                return Err(ConfigError::InvalidThreshold {
                    index,
                    value: level.promote_threshold_deg,
                });
            }
            if index > 0 {
                let previous = self.0[index - 1].step;
                if level.step >= previous {
                    return Err(ConfigError::NonDecreasingSchedule {
                        index,
                        previous,
                        step: level.step,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn levels(&self) -> &[StepLevel] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn level(&self, index: usize) -> Option<&StepLevel> {
        self.0.get(index)
    }

    /// Index of the finest level.
    pub fn last_index(&self) -> usize {
        self.0.len().saturating_sub(1)
    }
}

/// Complete stabilizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    /// Polarization state to converge onto
    pub target: Target,
    /// Coarse-to-fine step schedule
    pub step_schedule: StepSchedule,
    /// Round distance below which the run has converged (degrees)
    pub stop_threshold_deg: f64,
    /// Dwell after each actuator write before reading (seconds)
    pub settle_s: f64,
    /// Code written to every channel at the start of a run
    pub init_code: u16,
    /// Clamp range for every channel
    pub bounds: CodeBounds,
    /// Round budget
    pub max_rounds: usize,
    /// CSV measurement log path
    pub log_path: Option<PathBuf>,
    /// Truncate the log at the start of each run
    pub reset_log: bool,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            target: Target::default(),
            step_schedule: StepSchedule::default(),
            stop_threshold_deg: 0.5,
            settle_s: 0.01,
            init_code: 2048,
            bounds: CodeBounds::default(),
            max_rounds: 400,
            log_path: None,
            reset_log: true,
        }
    }
}

impl StabilizerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target.validate()?;
        self.step_schedule.validate()?;
        if !self.stop_threshold_deg.is_finite() || self.stop_threshold_deg <= 0.0 {
            return Err(ConfigError::InvalidStopThreshold(self.stop_threshold_deg));
        }
        if !self.settle_s.is_finite() || self.settle_s < 0.0 {
            return Err(ConfigError::InvalidSettle(self.settle_s));
        }
        if self.bounds.min > self.bounds.max {
            return Err(ConfigError::InvalidCodeBounds {
                min: self.bounds.min,
                max: self.bounds.max,
            });
        }
        if self.max_rounds == 0 {
            return Err(ConfigError::ZeroRounds);
        }
        Ok(())
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs_f64(self.settle_s)
    }

    /// Initial code clamped into the bounds.
    pub fn clamped_init_code(&self) -> u16 {
        self.bounds.clamp(self.init_code as i32)
    }

    /// Load and validate a configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

/// Command-line arguments for the stabilizer.
///
/// Use with `#[command(flatten)]` in your CLI args struct.
#[derive(Args, Debug, Clone)]
pub struct StabilizerArgs {
    #[arg(
        long,
        default_value = "0.0",
        allow_hyphen_values = true,
        help = "Target azimuth in degrees, (-90, 90]"
    )]
    pub target_azimuth_deg: f64,

    #[arg(
        long,
        default_value = "0.0",
        allow_hyphen_values = true,
        help = "Target ellipticity in degrees, [-45, 45]"
    )]
    pub target_ellipticity_deg: f64,

    #[arg(long, help = "Target DOP, recorded in the log only")]
    pub target_dop: Option<f64>,

    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = [256u16, 128, 64, 32, 8, 2],
        help = "Trial step sizes in DAC codes, coarse to fine",
        long_help = "Comma-separated trial step sizes in DAC codes. Must strictly decrease \
            and have the same length as --thresholds."
    )]
    pub steps: Vec<u16>,

    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = [40.0f64, 25.0, 15.0, 5.0, 2.0, 0.5],
        help = "Promote thresholds in degrees, one per step size",
        long_help = "Comma-separated round distances (degrees). When a round ends below the \
            threshold of the current level, the next finer step size is used from then on."
    )]
    pub thresholds: Vec<f64>,

    #[arg(long, default_value = "0.5", help = "Convergence threshold in degrees")]
    pub stop_threshold_deg: f64,

    #[arg(
        long,
        default_value = "0.01",
        help = "Settle time after each actuator write, in seconds"
    )]
    pub settle_s: f64,

    #[arg(long, default_value = "2048", help = "Initial code for all channels")]
    pub init_code: u16,

    #[arg(long, default_value = "0", help = "Lowest DAC code")]
    pub min_code: u16,

    #[arg(long, default_value = "4095", help = "Highest DAC code")]
    pub max_code: u16,

    #[arg(long, default_value = "400", help = "Round budget")]
    pub max_rounds: usize,

    #[arg(
        long,
        help = "CSV measurement log path",
        long_help = "If provided, every baseline, trial, accept and round evaluation read is \
            appended to this CSV file with its codes and read latency."
    )]
    pub log_path: Option<PathBuf>,

    #[arg(
        long,
        default_value = "true",
        action = clap::ArgAction::Set,
        help = "Truncate the log before the run"
    )]
    pub reset_log: bool,
}

impl StabilizerArgs {
    /// Build and validate a configuration from the parsed flags.
    pub fn into_config(self) -> Result<StabilizerConfig, ConfigError> {
        let mut target = Target::new(self.target_azimuth_deg, self.target_ellipticity_deg);
        target.dop = self.target_dop;

        let config = StabilizerConfig {
            target,
            step_schedule: StepSchedule::from_parts(&self.steps, &self.thresholds)?,
            stop_threshold_deg: self.stop_threshold_deg,
            settle_s: self.settle_s,
            init_code: self.init_code,
            bounds: CodeBounds::new(self.min_code, self.max_code),
            max_rounds: self.max_rounds,
            log_path: self.log_path,
            reset_log: self.reset_log,
        };
        config.validate()?;
        Ok(config)
    }
}
