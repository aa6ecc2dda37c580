//! Coordinate-descent polarization controller
//!
//! Each round reads a baseline, then sweeps the four channels in order. For
//! every channel the controller tries `code + step` and `code - step`,
//! restores the accepted state, and commits whichever trial strictly beat the
//! baseline (`+step` first). A commit is followed by a refresh read that
//! becomes the new baseline for the remaining channels. The round ends with
//! the full accepted state re-asserted and one authoritative read.
//!
//! The step size walks down a coarse-to-fine schedule: once a round ends
//! below the promote threshold of the current level, the next finer level is
//! used for all later rounds. The index never moves back.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::Local;
use hardware::{ActuatorPort, Channel, DeviceError, Measurement, PolarizationSensor};
use tracing::{debug, info, warn};

use crate::angle::distance;
use crate::config::StabilizerConfig;
use crate::error::{ConfigError, StabilizerError};
use crate::log::{EventKind, LogRecord, MeasurementLog};

/// Where the controller currently is in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    /// No run started yet
    Idle,
    /// Writing the initial code to all channels
    Initializing,
    /// Taking the start-of-round reference read
    BaselineRead,
    /// Probing channels
    ChannelSweep,
    /// Re-asserting the accepted state and taking the round read
    RoundEval,
    /// Round distance fell below the stop threshold
    Converged,
    /// Round budget spent without converging
    Exhausted,
    /// Stop requested between rounds
    Cancelled,
    /// Run ended by an actuator or sensor failure
    Failed,
}

impl ControllerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ControllerState::Converged
                | ControllerState::Exhausted
                | ControllerState::Cancelled
                | ControllerState::Failed
        )
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ControllerState::Idle => "idle",
            ControllerState::Initializing => "initializing",
            ControllerState::BaselineRead => "baseline read",
            ControllerState::ChannelSweep => "channel sweep",
            ControllerState::RoundEval => "round evaluation",
            ControllerState::Converged => "converged",
            ControllerState::Exhausted => "exhausted",
            ControllerState::Cancelled => "cancelled",
            ControllerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Converged,
    Exhausted,
    Cancelled,
}

/// Result of one stabilization run
#[derive(Debug, Clone)]
pub struct RunResult {
    pub converged: bool,
    /// Distance of the last authoritative read (degrees)
    pub final_distance_deg: f64,
    pub final_measurement: Measurement,
    /// Accepted codes at the end of the run
    pub final_codes: [u16; 4],
    pub outcome: RunOutcome,
    /// Rounds completed
    pub rounds: usize,
    pub final_step_index: usize,
}

/// Cooperative stop flag, checked before each round.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
struct Reading {
    measured: Measurement,
    distance_deg: f64,
}

/// Stabilization controller owning its actuator, sensor and log.
pub struct StabilizationController<A, S, L>
where
    A: ActuatorPort,
    S: PolarizationSensor,
    L: MeasurementLog,
{
    actuator: A,
    sensor: S,
    log: L,
    config: StabilizerConfig,
    state: ControllerState,
    codes: [u16; 4],
    step_index: usize,
    stop: StopHandle,
}

impl<A, S, L> StabilizationController<A, S, L>
where
    A: ActuatorPort,
    S: PolarizationSensor,
    L: MeasurementLog,
{
    /// Create a controller. The configuration is validated here, before any
    /// device I/O.
    pub fn new(
        actuator: A,
        sensor: S,
        log: L,
        config: StabilizerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let init = config.clamped_init_code();
        Ok(Self {
            actuator,
            sensor,
            log,
            config,
            state: ControllerState::Idle,
            codes: [init; 4],
            step_index: 0,
            stop: StopHandle::new(),
        })
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Accepted codes, in channel order.
    pub fn codes(&self) -> [u16; 4] {
        self.codes
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Use an externally created stop handle, e.g. one shared with a signal handler.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Handle that can stop a run from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Release the collaborators.
    pub fn into_parts(self) -> (A, S, L) {
        (self.actuator, self.sensor, self.log)
    }

    /// Run the descent until convergence, budget exhaustion or a stop request.
    ///
    /// Any actuator or sensor failure ends the run immediately and leaves the
    /// controller in [`ControllerState::Failed`]; the error records the phase
    /// it happened in. Log sink failures are reported through `tracing` and
    /// otherwise ignored.
    pub fn run(&mut self) -> Result<RunResult, StabilizerError> {
        let result = self.descend();
        if result.is_err() {
            self.state = ControllerState::Failed;
        }
        result
    }

    fn descend(&mut self) -> Result<RunResult, StabilizerError> {
        self.stop.clear();
        self.step_index = 0;
        if self.config.reset_log {
            if let Err(e) = self.log.reset() {
                warn!("Failed to reset measurement log: {}", e);
            }
        }

        self.state = ControllerState::Initializing;
        let init = self.config.clamped_init_code();
        info!(
            "Starting stabilization: target psi={:.3}° chi={:.3}°, init code {}",
            self.config.target.azimuth_deg, self.config.target.ellipticity_deg, init
        );
        self.codes = self.write_all([init; 4])?;
        let mut last = self.read(EventKind::Init, None, 0)?;

        let mut rounds = 0;
        while rounds < self.config.max_rounds {
            if self.stop.is_stop_requested() {
                self.state = ControllerState::Cancelled;
                info!("Stop requested after {} rounds", rounds);
                return Ok(self.result(RunOutcome::Cancelled, last, rounds));
            }

            let round_start = Instant::now();
            let step = self.current_step();

            self.state = ControllerState::BaselineRead;
            let mut baseline = self.read(EventKind::Baseline, None, step)?.distance_deg;

            self.state = ControllerState::ChannelSweep;
            for channel in Channel::ALL {
                baseline = self.sweep_channel(channel, step, baseline)?;
            }

            self.state = ControllerState::RoundEval;
            self.codes = self.write_all(self.codes)?;
            last = self.read(EventKind::RoundEval, None, step)?;
            rounds += 1;

            info!(
                "Round {}: step {}, distance {:.3}°, codes {:?}, {:.1} ms",
                rounds,
                step,
                last.distance_deg,
                self.codes,
                round_start.elapsed().as_secs_f64() * 1e3
            );

            if last.distance_deg < self.config.stop_threshold_deg {
                self.state = ControllerState::Converged;
                info!(
                    "Converged after {} rounds: distance {:.3}°",
                    rounds, last.distance_deg
                );
                return Ok(self.result(RunOutcome::Converged, last, rounds));
            }

            self.maybe_promote(last.distance_deg);
        }

        self.state = ControllerState::Exhausted;
        let step = self.current_step();
        let final_read = self.read(EventKind::FinalRead, None, step)?;
        warn!(
            "Round budget of {} exhausted: distance {:.3}°",
            rounds, final_read.distance_deg
        );
        Ok(self.result(RunOutcome::Exhausted, final_read, rounds))
    }

    /// Try one channel in both directions and commit a strict improvement.
    ///
    /// Returns the baseline for the next channel.
    fn sweep_channel(
        &mut self,
        channel: Channel,
        step: u16,
        baseline: f64,
    ) -> Result<f64, StabilizerError> {
        let index = channel.index();
        let stored = self.codes[index] as i32;
        let step_codes = step as i32;

        let plus_code = self.write_channel(channel, stored + step_codes)?;
        let plus = self.read(EventKind::TrialPlus, Some(channel), step)?;

        let minus_code = self.write_channel(channel, stored - step_codes)?;
        let minus = self.read(EventKind::TrialMinus, Some(channel), step)?;

        debug!(
            "Channel {}: baseline {:.3}°, {} -> {:.3}°, {} -> {:.3}°",
            channel, baseline, plus_code, plus.distance_deg, minus_code, minus.distance_deg
        );

        self.write_all(self.codes)?;

        let accepted = if plus.distance_deg < baseline {
            Some((EventKind::AcceptPlus, plus_code))
        } else if minus.distance_deg < baseline {
            Some((EventKind::AcceptMinus, minus_code))
        } else {
            None
        };

        match accepted {
            Some((event, code)) => {
                self.codes[index] = self.write_channel(channel, i32::from(code))?;
                let refreshed = self.read(event, Some(channel), step)?;
                debug!(
                    "Channel {}: {} {} -> {}, baseline {:.3}° -> {:.3}°",
                    channel, event, stored, self.codes[index], baseline, refreshed.distance_deg
                );
                Ok(refreshed.distance_deg)
            }
            None => Ok(baseline),
        }
    }

    fn maybe_promote(&mut self, round_distance: f64) {
        let Some(level) = self.config.step_schedule.level(self.step_index) else {
            return;
        };
        if round_distance < level.promote_threshold_deg
            && self.step_index < self.config.step_schedule.last_index()
        {
            self.step_index += 1;
            info!(
                "Promoted to step level {} ({} codes)",
                self.step_index,
                self.current_step()
            );
        }
    }

    fn current_step(&self) -> u16 {
        self.config
            .step_schedule
            .level(self.step_index)
            .map(|level| level.step)
            .unwrap_or(0)
    }

    fn device_error(&self, channel: Option<Channel>, source: DeviceError) -> StabilizerError {
        StabilizerError::Device {
            state: self.state,
            channel,
            source,
        }
    }

    fn settle(&self) {
        let settle = self.config.settle();
        if !settle.is_zero() {
            thread::sleep(settle);
        }
    }

    /// Clamp a request into the configured bounds, write it and settle.
    /// Returns the applied code.
    fn write_channel(&mut self, channel: Channel, code: i32) -> Result<u16, StabilizerError> {
        let bounds = self.config.bounds;
        let result = self
            .actuator
            .set_channel(channel, i32::from(bounds.clamp(code)))
            .map_err(|e| self.device_error(Some(channel), e))?;
        debug_assert!(bounds.contains(result.applied));
        self.settle();
        Ok(result.applied)
    }

    /// Write all channels and settle. Returns the applied codes.
    fn write_all(&mut self, codes: [u16; 4]) -> Result<[u16; 4], StabilizerError> {
        let applied = self
            .actuator
            .set_all(codes.map(i32::from))
            .map_err(|e| self.device_error(None, e))?;
        self.settle();
        Ok(applied)
    }

    /// Read the sensor and log the reading against the accepted codes.
    fn read(
        &mut self,
        event: EventKind,
        channel: Option<Channel>,
        step: u16,
    ) -> Result<Reading, StabilizerError> {
        let start = Instant::now();
        let measured = self
            .sensor
            .read()
            .map_err(|e| self.device_error(channel, e))?;
        let read_latency_us = start.elapsed().as_secs_f64() * 1e6;
        let distance_deg = distance(&self.config.target, &measured);

        let record = LogRecord {
            event,
            channel: channel.map(|ch| ch.number()).unwrap_or(0),
            timestamp: Local::now(),
            target: self.config.target,
            measured,
            distance_deg,
            step_size: step,
            codes: self.codes,
            read_latency_us,
        };
        if let Err(e) = self.log.append(&record) {
            warn!("Failed to append {} record: {}", event, e);
        }

        Ok(Reading {
            measured,
            distance_deg,
        })
    }

    fn result(&self, outcome: RunOutcome, reading: Reading, rounds: usize) -> RunResult {
        RunResult {
            converged: outcome == RunOutcome::Converged,
            final_distance_deg: reading.distance_deg,
            final_measurement: reading.measured,
            final_codes: self.codes,
            outcome,
            rounds,
            final_step_index: self.step_index,
        }
    }
}
