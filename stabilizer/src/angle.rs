//! Circular angle arithmetic for polarization ellipse angles
//!
//! Azimuth and ellipticity both repeat every 180°, so differences are taken
//! modulo the period and folded into `(-period/2, period/2]`.

use hardware::Measurement;

use crate::config::Target;

/// Period shared by azimuth and ellipticity (degrees).
pub const POLARIZATION_PERIOD_DEG: f64 = 180.0;

/// Signed minimal difference `a - b` on a circle of the given period.
///
/// The result lies in `(-period/2, period/2]`.
pub fn angular_difference(a: f64, b: f64, period: f64) -> f64 {
    let d = (a - b).rem_euclid(period);
    if d > period / 2.0 {
        d - period
    } else {
        d
    }
}

/// Angular distance in degrees between the target and a measured state.
///
/// Euclidean norm of the folded azimuth and ellipticity differences. DOP is
/// ignored.
pub fn distance(target: &Target, measured: &Measurement) -> f64 {
    let d_psi = angular_difference(
        measured.azimuth_deg,
        target.azimuth_deg,
        POLARIZATION_PERIOD_DEG,
    );
    let d_chi = angular_difference(
        measured.ellipticity_deg,
        target.ellipticity_deg,
        POLARIZATION_PERIOD_DEG,
    );
    d_psi.hypot(d_chi)
}
