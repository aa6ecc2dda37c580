//! Device-side contracts for the polarization stabilization bench.
//!
//! The stabilizer only ever talks to hardware through the two traits in this
//! crate. Real drivers (serial DAC bridge, USB polarimeter) implement them out
//! of tree; [`sim`] provides a physically motivated stand-in for development
//! and tests.

pub mod error;
pub mod piezo;
pub mod polarimeter;
pub mod sim;

pub use error::{DeviceError, DeviceResult};
pub use piezo::{Channel, CodeBounds, SetResult, DAC_FULL_SCALE};
pub use polarimeter::{Measurement, Stokes};

/// Discrete-code actuator driving the four piezo channels.
///
/// Implementations must clamp every requested code into [`bounds`](Self::bounds)
/// and report the code that was actually applied. Writes are idempotent.
pub trait ActuatorPort {
    /// Code range the actuator clamps requests into.
    fn bounds(&self) -> CodeBounds;

    /// Write a single channel, returning the code that was applied.
    fn set_channel(&mut self, channel: Channel, code: i32) -> DeviceResult<SetResult>;

    /// Write all four channels in channel order.
    fn set_all(&mut self, codes: [i32; 4]) -> DeviceResult<[u16; 4]> {
        let mut applied = [0u16; 4];
        for channel in Channel::ALL {
            applied[channel.index()] = self.set_channel(channel, codes[channel.index()])?.applied;
        }
        Ok(applied)
    }

    /// Drive a channel by voltage in `[0, vref]`, converted to a DAC code.
    fn set_channel_voltage(
        &mut self,
        channel: Channel,
        volts: f64,
        vref: f64,
    ) -> DeviceResult<SetResult> {
        self.set_channel(channel, piezo::voltage_to_code(volts, vref) as i32)
    }
}

/// Polarimeter returning one fresh physical sample per call.
pub trait PolarizationSensor {
    /// Take a new reading. Never served from a cache.
    fn read(&mut self) -> DeviceResult<Measurement>;
}

impl<T: ActuatorPort + ?Sized> ActuatorPort for &mut T {
    fn bounds(&self) -> CodeBounds {
        (**self).bounds()
    }

    fn set_channel(&mut self, channel: Channel, code: i32) -> DeviceResult<SetResult> {
        (**self).set_channel(channel, code)
    }

    fn set_all(&mut self, codes: [i32; 4]) -> DeviceResult<[u16; 4]> {
        (**self).set_all(codes)
    }
}

impl<T: PolarizationSensor + ?Sized> PolarizationSensor for &mut T {
    fn read(&mut self) -> DeviceResult<Measurement> {
        (**self).read()
    }
}
