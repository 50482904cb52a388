use super::{J2_EARTH, MU_EARTH, R_EARTH_KM};
use crate::error::PropagationError;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Below this eccentricity the argument of perigee is undefined and pinned to zero.
const CIRCULAR_TOLERANCE: f64 = 1e-9;
/// Below this node-vector ratio the orbit is treated as equatorial (RAAN pinned to zero).
const EQUATORIAL_TOLERANCE: f64 = 1e-11;

/// Classical elements with the true anomaly stored as the mean anomaly, matching the
/// near-circular approximation used by the analytical propagator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrbitalElements {
    pub semi_major_axis_km: f64,
    pub eccentricity: f64,
    pub inclination_rad: f64,
    pub raan_rad: f64,
    pub arg_perigee_rad: f64,
    pub mean_anomaly_rad: f64,
}

/// Secular drift rates (rad/s) from the J2 zonal harmonic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SecularRates {
    pub raan_dot: f64,
    pub arg_perigee_dot: f64,
    pub mean_anomaly_dot: f64,
}

impl OrbitalElements {
    pub fn from_cartesian(
        position: &Vector3<f64>,
        velocity: &Vector3<f64>,
    ) -> Result<Self, PropagationError> {
        let r = position.norm();
        let v2 = velocity.norm_squared();

        let energy = v2 / 2.0 - MU_EARTH / r;
        if energy >= 0.0 {
            return Err(PropagationError::InvalidState(format!(
                "unbound orbit (specific energy {energy:.6} km^2/s^2)"
            )));
        }
        // Vis-viva
        let semi_major_axis_km = -MU_EARTH / (2.0 * energy);

        let h = position.cross(velocity);
        let h_mag = h.norm();
        if h_mag <= f64::EPSILON {
            return Err(PropagationError::InvalidState(
                "rectilinear trajectory (zero angular momentum)".into(),
            ));
        }

        let e_vec = ((v2 - MU_EARTH / r) * position - position.dot(velocity) * velocity) / MU_EARTH;
        let eccentricity = e_vec.norm();

        let inclination_rad = (h.z / h_mag).clamp(-1.0, 1.0).acos();

        // Node vector k x h = (-h_y, h_x, 0)
        let node = Vector3::new(-h.y, h.x, 0.0);
        let raan_rad = if node.norm() > EQUATORIAL_TOLERANCE * h_mag {
            normalize_angle(node.y.atan2(node.x))
        } else {
            0.0
        };

        let (p_hat, q_hat) = orbital_basis(raan_rad, inclination_rad);
        let arg_latitude = position.dot(&q_hat).atan2(position.dot(&p_hat));

        let arg_perigee_rad = if eccentricity > CIRCULAR_TOLERANCE {
            normalize_angle(e_vec.dot(&q_hat).atan2(e_vec.dot(&p_hat)))
        } else {
            0.0
        };

        Ok(Self {
            semi_major_axis_km,
            eccentricity,
            inclination_rad,
            raan_rad,
            arg_perigee_rad,
            mean_anomaly_rad: normalize_angle(arg_latitude - arg_perigee_rad),
        })
    }

    pub fn mean_motion(&self) -> f64 {
        (MU_EARTH / self.semi_major_axis_km.powi(3)).sqrt()
    }

    pub fn period_s(&self) -> f64 {
        TAU / self.mean_motion()
    }

    pub fn semi_latus_rectum_km(&self) -> f64 {
        self.semi_major_axis_km * (1.0 - self.eccentricity * self.eccentricity)
    }

    pub fn j2_secular_rates(&self) -> SecularRates {
        let n = self.mean_motion();
        let p = self.semi_latus_rectum_km();
        let sin_i2 = self.inclination_rad.sin().powi(2);
        let k = 1.5 * n * J2_EARTH * (R_EARTH_KM / p).powi(2);
        let eta = (1.0 - self.eccentricity * self.eccentricity).sqrt();

        SecularRates {
            raan_dot: -k * self.inclination_rad.cos(),
            arg_perigee_dot: k * (2.0 - 2.5 * sin_i2),
            mean_anomaly_dot: n + k * eta * (1.0 - 1.5 * sin_i2),
        }
    }

    /// Elements advanced by `dt_s` seconds of secular drift.
    #[must_use]
    pub fn drifted(&self, rates: &SecularRates, dt_s: f64) -> Self {
        Self {
            raan_rad: normalize_angle(self.raan_rad + rates.raan_dot * dt_s),
            arg_perigee_rad: normalize_angle(self.arg_perigee_rad + rates.arg_perigee_dot * dt_s),
            mean_anomaly_rad: normalize_angle(self.mean_anomaly_rad + rates.mean_anomaly_dot * dt_s),
            ..*self
        }
    }

    /// ECI state, taking true anomaly equal to mean anomaly.
    pub fn to_cartesian(&self) -> (Vector3<f64>, Vector3<f64>) {
        let nu = self.mean_anomaly_rad;
        let e = self.eccentricity;
        let p = self.semi_latus_rectum_km();
        let radius = p / (1.0 + e * nu.cos());
        let sqrt_mu_p = (MU_EARTH / p).sqrt();
        let radial_speed = sqrt_mu_p * e * nu.sin();
        let transverse_speed = sqrt_mu_p * (1.0 + e * nu.cos());

        // RAAN -> inclination -> argument of latitude
        let (p_hat, q_hat) = orbital_basis(self.raan_rad, self.inclination_rad);
        let u = self.arg_perigee_rad + nu;
        let r_hat = u.cos() * p_hat + u.sin() * q_hat;
        let t_hat = -u.sin() * p_hat + u.cos() * q_hat;

        (radius * r_hat, radial_speed * r_hat + transverse_speed * t_hat)
    }
}

/// Unit vectors along the ascending node and 90 degrees ahead of it in the orbit plane.
fn orbital_basis(raan: f64, inclination: f64) -> (Vector3<f64>, Vector3<f64>) {
    let (sin_o, cos_o) = raan.sin_cos();
    let (sin_i, cos_i) = inclination.sin_cos();
    (
        Vector3::new(cos_o, sin_o, 0.0),
        Vector3::new(-sin_o * cos_i, cos_o * cos_i, sin_i),
    )
}

pub(crate) fn normalize_angle(angle: f64) -> f64 {
    angle.rem_euclid(TAU)
}
