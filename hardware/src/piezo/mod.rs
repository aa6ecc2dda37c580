//! Piezo DAC channel addressing and code handling
//!
//! The polarization controller is a 4-channel fiber-squeezer stack driven by a
//! parallel 12-bit DAC. Each channel accepts a code in `0..=4095`; the output
//! voltage is `code / 4095 * vref`.
//!
//! # Channels
//!
//! Channels are numbered 1 through 4 on the front panel and in every log.
//! [`Channel::index`] gives the 0-based slot used for `[u16; 4]` code arrays.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::EnumIter;

use crate::error::DeviceError;

/// Largest code a 12-bit DAC accepts.
pub const DAC_FULL_SCALE: u16 = 4095;

/// One of the four piezo channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
pub enum Channel {
    Ch1,
    Ch2,
    Ch3,
    Ch4,
}

impl Channel {
    /// All channels in sweep order.
    pub const ALL: [Channel; 4] = [Channel::Ch1, Channel::Ch2, Channel::Ch3, Channel::Ch4];

    /// 1-based channel number as printed on the controller.
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }

    /// 0-based slot into a code array.
    pub fn index(self) -> usize {
        match self {
            Channel::Ch1 => 0,
            Channel::Ch2 => 1,
            Channel::Ch3 => 2,
            Channel::Ch4 => 3,
        }
    }
}

impl TryFrom<u8> for Channel {
    type Error = DeviceError;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        match number {
            1 => Ok(Channel::Ch1),
            2 => Ok(Channel::Ch2),
            3 => Ok(Channel::Ch3),
            4 => Ok(Channel::Ch4),
            other => Err(DeviceError::InvalidChannel(other)),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Inclusive code range a channel is clamped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBounds {
    pub min: u16,
    pub max: u16,
}

impl Default for CodeBounds {
    fn default() -> Self {
        Self {
            min: 0,
            max: DAC_FULL_SCALE,
        }
    }
}

impl CodeBounds {
    pub fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    /// Clamp a requested (possibly out of range) code into the bounds.
    pub fn clamp(&self, requested: i32) -> u16 {
        requested.clamp(self.min as i32, self.max as i32) as u16
    }

    pub fn contains(&self, code: u16) -> bool {
        (self.min..=self.max).contains(&code)
    }
}

/// Result of a clamped channel write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetResult {
    /// Code the caller asked for.
    pub requested: i32,
    /// Code that was written to the DAC.
    pub applied: u16,
}

impl SetResult {
    pub fn new(requested: i32, bounds: CodeBounds) -> Self {
        Self {
            requested,
            applied: bounds.clamp(requested),
        }
    }

    /// Check if the request was clamped to the bounds.
    pub fn was_clamped(&self) -> bool {
        self.requested != self.applied as i32
    }
}

/// Convert a drive voltage to a DAC code, clamping to `[0, vref]`.
pub fn voltage_to_code(volts: f64, vref: f64) -> u16 {
    if vref <= 0.0 || !volts.is_finite() {
        return 0;
    }
    let v = volts.clamp(0.0, vref);
    ((v / vref) * DAC_FULL_SCALE as f64).round() as u16
}
