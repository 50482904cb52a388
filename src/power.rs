//! Eclipse geometry and battery state-of-charge integration.
//!
//! Every consumer (the runner, the CLI report, tests) goes through [`PowerModel`], so the
//! shadow test and the generation formula exist exactly once.

use crate::config::PowerConfig;
use crate::propagation::{julian_date, seconds_between, EphemerisPoint, Epoch, R_EARTH_KM};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

const J2000_JD: f64 = 2_451_545.0;

/// Where the sun direction comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SunModel {
    /// Low-precision solar almanac evaluated at each epoch.
    Analytical,
    /// Fixed inertial direction (normalized on use).
    Fixed { direction: [f64; 3] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelMounting {
    /// Arrays articulated to face the sun: cos(sun angle) = 1 when lit.
    SunTracking,
    /// Arrays fixed on the zenith face: cos(sun angle) = r_hat . s_hat.
    BodyFixedZenith,
}

/// Cylindrical shadow test. `sun_direction` must be a unit vector.
pub fn is_in_shadow(position: &Vector3<f64>, sun_direction: &Vector3<f64>) -> bool {
    let along = position.dot(sun_direction);
    if along >= 0.0 {
        return false;
    }
    let perpendicular = position - along * sun_direction;
    perpendicular.norm() < R_EARTH_KM
}

/// Unit vector from Earth to the sun in the mean equatorial frame (~0.01 deg accuracy).
pub fn analytical_sun_direction(epoch: Epoch) -> Vector3<f64> {
    let n = julian_date(epoch) - J2000_JD;
    let mean_longitude = (280.460 + 0.985_647_4 * n).to_radians();
    let mean_anomaly = (357.528 + 0.985_600_3 * n).to_radians();
    let ecliptic_longitude = mean_longitude
        + 1.915_f64.to_radians() * mean_anomaly.sin()
        + 0.020_f64.to_radians() * (2.0 * mean_anomaly).sin();
    let obliquity = (23.439 - 4.0e-7 * n).to_radians();

    let (sin_l, cos_l) = ecliptic_longitude.sin_cos();
    Vector3::new(cos_l, obliquity.cos() * sin_l, obliquity.sin() * sin_l)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EclipseInterval {
    pub entry: Epoch,
    /// `None` when the ephemeris ends in shadow.
    pub exit: Option<Epoch>,
}

impl EclipseInterval {
    pub fn duration_s(&self) -> Option<f64> {
        self.exit.map(|exit| seconds_between(self.entry, exit))
    }
}

/// Energy balance over one ephemeris window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerIntegration {
    /// Signed change in state of charge, unclamped.
    pub soc_delta: f64,
    /// Cumulative SOC delta at every ephemeris point (first entry is 0).
    pub interval_soc: Vec<f64>,
    pub generated_wh: f64,
    pub consumed_wh: f64,
    /// Time-weighted fraction of the window spent in shadow.
    pub eclipse_fraction: f64,
}

#[derive(Debug, Clone)]
pub struct PowerModel {
    config: PowerConfig,
}

impl PowerModel {
    pub fn new(config: &PowerConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn battery_capacity_wh(&self) -> f64 {
        self.config.battery_capacity_wh
    }

    pub fn sun_direction(&self, epoch: Epoch) -> Vector3<f64> {
        match &self.config.sun_model {
            SunModel::Analytical => analytical_sun_direction(epoch),
            SunModel::Fixed { direction } => Vector3::from(*direction)
                .try_normalize(f64::EPSILON)
                .unwrap_or_else(Vector3::x),
        }
    }

    pub fn is_in_eclipse(&self, position: &Vector3<f64>, epoch: Epoch) -> bool {
        is_in_shadow(position, &self.sun_direction(epoch))
    }

    /// Array output (W) at one ephemeris point.
    pub fn generation_w(&self, point: &EphemerisPoint) -> f64 {
        let sun = self.sun_direction(point.epoch);
        if is_in_shadow(&point.position, &sun) {
            return 0.0;
        }
        let cos_angle = match self.config.panel_mounting {
            PanelMounting::SunTracking => 1.0,
            PanelMounting::BodyFixedZenith => point
                .position
                .try_normalize(f64::EPSILON)
                .map_or(0.0, |r_hat| r_hat.dot(&sun)),
        };
        self.config.solar_flux_w_m2
            * self.config.panel_area_m2
            * self.config.panel_efficiency
            * cos_angle.max(0.0)
    }

    /// Left-endpoint Riemann sum of (generation - load) over consecutive ephemeris pairs.
    pub fn integrate(&self, ephemeris: &[EphemerisPoint], load_w: f64) -> PowerIntegration {
        let capacity = self.config.battery_capacity_wh;
        let mut interval_soc = Vec::with_capacity(ephemeris.len());
        let mut generated_wh = 0.0;
        let mut consumed_wh = 0.0;
        let mut eclipse_s = 0.0;
        let mut total_s = 0.0;

        if !ephemeris.is_empty() {
            interval_soc.push(0.0);
        }
        for pair in ephemeris.windows(2) {
            let dt_s = seconds_between(pair[0].epoch, pair[1].epoch);
            let dt_h = dt_s / 3600.0;
            let generation = self.generation_w(&pair[0]);
            if self.is_in_eclipse(&pair[0].position, pair[0].epoch) {
                eclipse_s += dt_s;
            }
            total_s += dt_s;
            generated_wh += generation * dt_h;
            consumed_wh += load_w * dt_h;
            interval_soc.push((generated_wh - consumed_wh) / capacity);
        }

        PowerIntegration {
            soc_delta: (generated_wh - consumed_wh) / capacity,
            interval_soc,
            generated_wh,
            consumed_wh,
            eclipse_fraction: if total_s > 0.0 { eclipse_s / total_s } else { 0.0 },
        }
    }

    /// Shadow entry/exit pairs, sampled at the ephemeris resolution.
    pub fn eclipse_intervals(&self, ephemeris: &[EphemerisPoint]) -> Vec<EclipseInterval> {
        let mut intervals = Vec::new();
        let mut open: Option<Epoch> = None;

        for point in ephemeris {
            let shadowed = self.is_in_eclipse(&point.position, point.epoch);
            match (shadowed, open) {
                (true, None) => open = Some(point.epoch),
                (false, Some(entry)) => {
                    intervals.push(EclipseInterval {
                        entry,
                        exit: Some(point.epoch),
                    });
                    open = None;
                }
                _ => {}
            }
        }
        if let Some(entry) = open {
            intervals.push(EclipseInterval { entry, exit: None });
        }
        intervals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::{offset_epoch, MU_EARTH};
    use chrono::{TimeZone, Utc};

    fn fixed_sun_config() -> PowerConfig {
        PowerConfig {
            sun_model: SunModel::Fixed {
                direction: [1.0, 0.0, 0.0],
            },
            ..PowerConfig::default()
        }
    }

    /// Equatorial circular orbit sampled every `step_s` for one period.
    fn orbit(step_s: f64) -> Vec<EphemerisPoint> {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let r = R_EARTH_KM + 500.0;
        let n = (MU_EARTH / r.powi(3)).sqrt();
        let period = std::f64::consts::TAU / n;
        let count = (period / step_s).ceil() as usize;
        (0..=count)
            .map(|i| {
                let t = i as f64 * step_s;
                let (s, c) = (n * t).sin_cos();
                EphemerisPoint::new(
                    offset_epoch(t0, t),
                    Vector3::new(r * c, r * s, 0.0),
                    Vector3::new(-r * n * s, r * n * c, 0.0),
                )
            })
            .collect()
    }

    #[test]
    fn test_shadow_geometry() {
        let sun = Vector3::x();
        assert!(!is_in_shadow(&Vector3::new(7000.0, 0.0, 0.0), &sun));
        assert!(is_in_shadow(&Vector3::new(-7000.0, 0.0, 0.0), &sun));
        assert!(!is_in_shadow(&Vector3::new(-7000.0, 6500.0, 0.0), &sun));
        assert!(!is_in_shadow(&Vector3::new(0.0, 7000.0, 0.0), &sun));
    }

    #[test]
    fn test_sun_direction_near_june_solstice() {
        let solstice = Utc.with_ymd_and_hms(2025, 6, 21, 2, 42, 0).unwrap();
        let sun = analytical_sun_direction(solstice);
        assert!((sun.norm() - 1.0).abs() < 1e-12);
        // Declination at the solstice equals the obliquity.
        let declination = sun.z.asin().to_degrees();
        assert!((declination - 23.44).abs() < 0.1, "declination {declination}");
    }

    #[test]
    fn test_generation_zero_in_shadow() {
        let model = PowerModel::new(&fixed_sun_config());
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let lit = EphemerisPoint::new(t0, Vector3::new(7000.0, 0.0, 0.0), Vector3::zeros());
        let dark = EphemerisPoint::new(t0, Vector3::new(-7000.0, 0.0, 0.0), Vector3::zeros());

        let expected = 1361.0 * 3.5 * 0.29;
        assert!((model.generation_w(&lit) - expected).abs() < 1e-9);
        assert_eq!(model.generation_w(&dark), 0.0);
    }

    #[test]
    fn test_body_fixed_panels_follow_sun_angle() {
        let config = PowerConfig {
            panel_mounting: PanelMounting::BodyFixedZenith,
            ..fixed_sun_config()
        };
        let model = PowerModel::new(&config);
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let terminator = EphemerisPoint::new(t0, Vector3::new(0.0, 7000.0, 0.0), Vector3::zeros());
        assert!(model.generation_w(&terminator).abs() < 1e-9);
    }

    #[test]
    fn test_integration_over_orbit() {
        let model = PowerModel::new(&fixed_sun_config());
        let ephemeris = orbit(30.0);
        let result = model.integrate(&ephemeris, 200.0);

        assert_eq!(result.interval_soc.len(), ephemeris.len());
        assert!((result.interval_soc.last().copied().unwrap() - result.soc_delta).abs() < 1e-12);
        assert!(result.eclipse_fraction > 0.3 && result.eclipse_fraction < 0.45);
        assert!(result.generated_wh > 0.0);
    }

    #[test]
    fn test_zero_duration_window() {
        let model = PowerModel::new(&fixed_sun_config());
        let ephemeris = orbit(30.0);
        let result = model.integrate(&ephemeris[..1], 500.0);
        assert_eq!(result.soc_delta, 0.0);
        assert_eq!(result.eclipse_fraction, 0.0);
        assert!(model.integrate(&[], 500.0).interval_soc.is_empty());
    }

    #[test]
    fn test_one_eclipse_per_orbit() {
        let model = PowerModel::new(&fixed_sun_config());
        let intervals = model.eclipse_intervals(&orbit(10.0));

        assert_eq!(intervals.len(), 1);
        let duration = intervals[0].duration_s().unwrap();
        // 500 km equatorial orbit with the sun in-plane: roughly 36 minutes of shadow.
        assert!(duration > 2000.0 && duration < 2300.0, "duration {duration}");
    }
}
