//! Polarimeter readings
//!
//! A polarimeter reports the Stokes vector `(S0, S1, S2, S3)`. The control loop
//! works in ellipse angles instead, so drivers convert each reading with
//! [`Stokes::to_measurement`]:
//!
//! ```text
//! dop = |(S1, S2, S3)| / S0
//! psi = ½ atan2(s2, s1)             folded into (-90°, 90°]
//! chi = ½ atan2(s3, √(s1² + s2²))   in [-45°, 45°]
//! ```
//!
//! where `s1..s3` are the components normalized onto the Poincaré sphere.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Below this magnitude a Stokes component is treated as zero.
const STOKES_EPSILON: f64 = 1e-12;

/// One polarization sample: degree of polarization and ellipse angles.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Measurement {
    /// Degree of polarization, 0..1
    pub dop: f64,
    /// Azimuth (psi) in degrees
    pub azimuth_deg: f64,
    /// Ellipticity (chi) in degrees
    pub ellipticity_deg: f64,
}

impl Measurement {
    pub fn new(dop: f64, azimuth_deg: f64, ellipticity_deg: f64) -> Self {
        Self {
            dop,
            azimuth_deg,
            ellipticity_deg,
        }
    }
}

/// Raw Stokes vector as reported by the instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stokes {
    pub s0: f64,
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
}

impl Stokes {
    pub fn new(s0: f64, s1: f64, s2: f64, s3: f64) -> Self {
        Self { s0, s1, s2, s3 }
    }

    /// Build a Stokes vector of unit intensity from ellipse angles.
    pub fn from_angles(dop: f64, azimuth_deg: f64, ellipticity_deg: f64) -> Self {
        let two_psi = 2.0 * azimuth_deg.to_radians();
        let two_chi = 2.0 * ellipticity_deg.to_radians();
        Self {
            s0: 1.0,
            s1: dop * two_chi.cos() * two_psi.cos(),
            s2: dop * two_chi.cos() * two_psi.sin(),
            s3: dop * two_chi.sin(),
        }
    }

    /// Polarized component `(S1, S2, S3)` as a vector.
    pub fn polarized(&self) -> Vector3<f64> {
        Vector3::new(self.s1, self.s2, self.s3)
    }

    /// Convert to degree of polarization, azimuth and ellipticity.
    ///
    /// A reading with no polarized power has undefined angles and maps to
    /// all zeros.
    pub fn to_measurement(&self) -> Measurement {
        let polarized = self.polarized();
        let norm = polarized.norm();
        if norm < STOKES_EPSILON {
            return Measurement::default();
        }

        let s0 = if self.s0.abs() > STOKES_EPSILON {
            self.s0
        } else {
            STOKES_EPSILON
        };
        let unit = polarized / norm;
        let dop = norm / s0;

        let psi_rad = 0.5 * unit.y.atan2(unit.x);
        let chi_rad = 0.5 * unit.z.atan2(unit.x.hypot(unit.y));

        Measurement {
            dop,
            azimuth_deg: fold_azimuth(psi_rad.to_degrees()),
            ellipticity_deg: chi_rad.to_degrees(),
        }
    }
}

/// Fold an azimuth into (-90°, 90°].
pub(crate) fn fold_azimuth(mut psi_deg: f64) -> f64 {
    if psi_deg <= -90.0 {
        psi_deg += 180.0;
    }
    if psi_deg > 90.0 {
        psi_deg -= 180.0;
    }
    psi_deg
}
