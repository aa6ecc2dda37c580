//! Simulated polarization controller and polarimeter
//!
//! Models the bench optics on the Poincaré sphere: a fixed input polarization
//! passes through four fiber squeezers, each a linear retarder whose fast axis
//! sits at a fixed angle and whose retardance grows linearly with the DAC code.
//! A retarder at angle θ with retardance δ rotates the normalized Stokes vector
//! by δ about the equatorial axis `(cos 2θ, sin 2θ, 0)`.
//!
//! [`SimulatedBench::open`] starts a session; the actuator and polarimeter
//! handles it hands out share the bench state, the same way the two physical
//! instruments share one optical path. Dropping the bench closes the session
//! and any handle still in use starts returning [`DeviceError::Disconnected`].

use std::f64::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nalgebra::{Rotation3, Unit, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, info};

use crate::error::{DeviceError, DeviceResult};
use crate::piezo::{Channel, CodeBounds, SetResult};
use crate::polarimeter::{fold_azimuth, Measurement, Stokes};
use crate::{ActuatorPort, PolarizationSensor};

/// Simulated bench parameters
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Azimuth of the light entering the controller (degrees)
    pub input_azimuth_deg: f64,
    /// Ellipticity of the light entering the controller (degrees)
    pub input_ellipticity_deg: f64,
    /// Degree of polarization reported by the polarimeter
    pub dop: f64,
    /// DAC codes needed for one full wave (2π) of retardance
    pub codes_per_wave: f64,
    /// Fast-axis angle of each squeezer (degrees)
    pub retarder_angles_deg: [f64; 4],
    /// Standard deviation of Gaussian noise added to each reported angle (degrees)
    pub noise_deg: f64,
    /// Seed for the noise generator; `None` seeds from the OS
    pub seed: Option<u64>,
    /// Actuator clamp range
    pub bounds: CodeBounds,
    /// Fail every read after this many successful ones
    pub fail_after_reads: Option<usize>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            input_azimuth_deg: 30.0,
            input_ellipticity_deg: 10.0,
            dop: 0.98,
            codes_per_wave: 2048.0,
            retarder_angles_deg: [0.0, 45.0, 0.0, 45.0],
            noise_deg: 0.0,
            seed: None,
            bounds: CodeBounds::default(),
            fail_after_reads: None,
        }
    }
}

/// Retardance in radians produced by a DAC code.
pub fn retardance(code: u16, codes_per_wave: f64) -> f64 {
    2.0 * PI * code as f64 / codes_per_wave
}

/// Noiseless output polarization for a set of channel codes.
pub fn plant_output(config: &SimConfig, codes: [u16; 4]) -> Measurement {
    let input = Stokes::from_angles(1.0, config.input_azimuth_deg, config.input_ellipticity_deg);
    let mut s = input.polarized();

    for channel in Channel::ALL {
        let theta = config.retarder_angles_deg[channel.index()].to_radians();
        let axis = Unit::new_normalize(Vector3::new(
            (2.0 * theta).cos(),
            (2.0 * theta).sin(),
            0.0,
        ));
        let delta = retardance(codes[channel.index()], config.codes_per_wave);
        s = Rotation3::from_axis_angle(&axis, delta) * s;
    }

    let mut measurement = Stokes::new(1.0, s.x, s.y, s.z).to_measurement();
    measurement.dop = config.dop;
    measurement
}

struct BenchState {
    codes: [u16; 4],
    reads: usize,
    writes: usize,
    open: bool,
    rng: StdRng,
}

/// Shared simulated bench session
pub struct SimulatedBench {
    config: SimConfig,
    state: Arc<Mutex<BenchState>>,
}

impl SimulatedBench {
    /// Open a bench session. All channels start at code 0.
    pub fn open(config: SimConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        info!(
            "Simulated bench opened: input=({:.2}°, {:.2}°), {:.0} codes/wave, noise={:.3}°",
            config.input_azimuth_deg,
            config.input_ellipticity_deg,
            config.codes_per_wave,
            config.noise_deg
        );
        Self {
            config,
            state: Arc::new(Mutex::new(BenchState {
                codes: [0; 4],
                reads: 0,
                writes: 0,
                open: true,
                rng,
            })),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Handle for driving the piezo channels.
    pub fn actuator(&self) -> SimulatedActuator {
        SimulatedActuator {
            bounds: self.config.bounds,
            state: Arc::clone(&self.state),
        }
    }

    /// Handle for reading the polarimeter.
    pub fn polarimeter(&self) -> SimulatedPolarimeter {
        let noise = if self.config.noise_deg > 0.0 {
            Normal::new(0.0, self.config.noise_deg).ok()
        } else {
            None
        };
        SimulatedPolarimeter {
            config: self.config.clone(),
            noise,
            state: Arc::clone(&self.state),
        }
    }

    /// Codes currently applied to the channels.
    pub fn codes(&self) -> [u16; 4] {
        lock(&self.state).codes
    }

    /// Number of polarimeter reads served so far.
    pub fn reads(&self) -> usize {
        lock(&self.state).reads
    }

    /// Number of channel writes applied so far.
    pub fn writes(&self) -> usize {
        lock(&self.state).writes
    }

    /// Noiseless polarization currently leaving the controller.
    pub fn true_output(&self) -> Measurement {
        plant_output(&self.config, self.codes())
    }

    /// Close the session. Handles return `Disconnected` afterwards.
    pub fn close(&self) {
        let mut state = lock(&self.state);
        if state.open {
            state.open = false;
            info!(
                "Simulated bench closed after {} writes and {} reads",
                state.writes, state.reads
            );
        }
    }
}

impl Drop for SimulatedBench {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock(state: &Mutex<BenchState>) -> MutexGuard<'_, BenchState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Actuator handle onto a [`SimulatedBench`]
pub struct SimulatedActuator {
    bounds: CodeBounds,
    state: Arc<Mutex<BenchState>>,
}

impl ActuatorPort for SimulatedActuator {
    fn bounds(&self) -> CodeBounds {
        self.bounds
    }

    fn set_channel(&mut self, channel: Channel, code: i32) -> DeviceResult<SetResult> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(DeviceError::Disconnected);
        }
        let result = SetResult::new(code, self.bounds);
        if result.was_clamped() {
            debug!(
                "Channel {channel}: code {} clamped to {}",
                result.requested, result.applied
            );
        }
        state.codes[channel.index()] = result.applied;
        state.writes += 1;
        Ok(result)
    }
}

/// Polarimeter handle onto a [`SimulatedBench`]
pub struct SimulatedPolarimeter {
    config: SimConfig,
    noise: Option<Normal<f64>>,
    state: Arc<Mutex<BenchState>>,
}

impl PolarizationSensor for SimulatedPolarimeter {
    fn read(&mut self) -> DeviceResult<Measurement> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(DeviceError::Disconnected);
        }
        if let Some(limit) = self.config.fail_after_reads {
            if state.reads >= limit {
                return Err(DeviceError::Timeout(format!(
                    "polarimeter stopped answering after {limit} reads"
                )));
            }
        }
        state.reads += 1;

        let mut measurement = plant_output(&self.config, state.codes);
        if let Some(noise) = &self.noise {
            measurement.azimuth_deg =
                fold_azimuth(measurement.azimuth_deg + noise.sample(&mut state.rng));
            measurement.ellipticity_deg = (measurement.ellipticity_deg
                + noise.sample(&mut state.rng))
            .clamp(-45.0, 45.0);
        }
        Ok(measurement)
    }
}
