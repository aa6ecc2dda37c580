//! Synthetic bench for controller tests
//!
//! The actuator and sensor share one code array. The sensor reports an
//! azimuth proportional to the L1 distance of the codes from a fixed optimum,
//! so with a target of (0°, 0°) the controller sees a distance that falls
//! linearly as the codes approach the optimum.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use hardware::{
    ActuatorPort, Channel, CodeBounds, DeviceError, DeviceResult, Measurement,
    PolarizationSensor, SetResult,
};
use stabilizer::{LogError, LogRecord, MeasurementLog, StabilizerConfig, StopHandle, Target};

/// Degrees of azimuth per code of distance from the optimum
pub const DEGREES_PER_CODE: f64 = 0.01;

pub type SharedCodes = Arc<Mutex<[u16; 4]>>;

pub fn shared_codes() -> SharedCodes {
    Arc::new(Mutex::new([0; 4]))
}

/// Actuator that clamps and records codes.
pub struct SyntheticActuator {
    codes: SharedCodes,
    bounds: CodeBounds,
    pub writes: usize,
    /// Highest code ever written
    pub max_written: u16,
}

impl SyntheticActuator {
    pub fn new(codes: SharedCodes, bounds: CodeBounds) -> Self {
        Self {
            codes,
            bounds,
            writes: 0,
            max_written: 0,
        }
    }
}

impl ActuatorPort for SyntheticActuator {
    fn bounds(&self) -> CodeBounds {
        self.bounds
    }

    fn set_channel(&mut self, channel: Channel, code: i32) -> DeviceResult<SetResult> {
        let result = SetResult::new(code, self.bounds);
        self.codes.lock().unwrap()[channel.index()] = result.applied;
        self.writes += 1;
        self.max_written = self.max_written.max(result.applied);
        Ok(result)
    }
}

/// What a [`SyntheticSensor`] reports.
#[derive(Debug, Clone, Copy)]
pub enum Response {
    /// Azimuth grows linearly with the L1 code distance from the optimum
    Linear { optimum: [u16; 4] },
    /// Same reading regardless of codes
    Constant(Measurement),
}

/// Noiseless sensor with optional fault and stop injection.
pub struct SyntheticSensor {
    codes: SharedCodes,
    response: Response,
    reads: usize,
    fail_on_read: Option<usize>,
    stop_on_read: Option<(usize, StopHandle)>,
}

impl SyntheticSensor {
    pub fn new(codes: SharedCodes, response: Response) -> Self {
        Self {
            codes,
            response,
            reads: 0,
            fail_on_read: None,
            stop_on_read: None,
        }
    }

    /// Fail the n-th read (1-based) and every read after it.
    pub fn fail_on_read(mut self, n: usize) -> Self {
        self.fail_on_read = Some(n);
        self
    }

    /// Request a stop during the n-th read (1-based).
    pub fn stop_on_read(mut self, n: usize, handle: StopHandle) -> Self {
        self.stop_on_read = Some((n, handle));
        self
    }

    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl PolarizationSensor for SyntheticSensor {
    fn read(&mut self) -> DeviceResult<Measurement> {
        self.reads += 1;
        if let Some(n) = self.fail_on_read {
            if self.reads >= n {
                return Err(DeviceError::Timeout(format!("no reply to read {}", self.reads)));
            }
        }
        if let Some((n, handle)) = &self.stop_on_read {
            if self.reads == *n {
                handle.request_stop();
            }
        }

        let codes = *self.codes.lock().unwrap();
        Ok(match self.response {
            Response::Linear { optimum } => {
                Measurement::new(1.0, linear_distance(codes, optimum), 0.0)
            }
            Response::Constant(measurement) => measurement,
        })
    }
}

/// Distance the linear sensor reports for a set of codes.
pub fn linear_distance(codes: [u16; 4], optimum: [u16; 4]) -> f64 {
    let l1: i32 = codes
        .iter()
        .zip(optimum.iter())
        .map(|(&c, &o)| (c as i32 - o as i32).abs())
        .sum();
    DEGREES_PER_CODE * l1 as f64
}

/// Actuator and linear sensor sharing one code array.
pub fn linear_bench(optimum: [u16; 4]) -> (SyntheticActuator, SyntheticSensor) {
    bench(Response::Linear { optimum }, CodeBounds::default())
}

pub fn bench(response: Response, bounds: CodeBounds) -> (SyntheticActuator, SyntheticSensor) {
    let codes = shared_codes();
    (
        SyntheticActuator::new(codes.clone(), bounds),
        SyntheticSensor::new(codes, response),
    )
}

/// Default configuration aimed at (0°, 0°) without settling.
pub fn test_config() -> StabilizerConfig {
    StabilizerConfig {
        target: Target::new(0.0, 0.0),
        settle_s: 0.0,
        ..StabilizerConfig::default()
    }
}

/// Log sink that rejects everything.
pub struct FailingLog {
    pub attempts: usize,
}

impl FailingLog {
    pub fn new() -> Self {
        Self { attempts: 0 }
    }
}

impl MeasurementLog for FailingLog {
    fn append(&mut self, _record: &LogRecord) -> Result<(), LogError> {
        self.attempts += 1;
        Err(LogError::Io(io::Error::new(io::ErrorKind::Other, "disk full")))
    }

    fn reset(&mut self) -> Result<(), LogError> {
        Err(LogError::Io(io::Error::new(io::ErrorKind::Other, "disk full")))
    }
}
