//! Orbit propagation behind a single [`Propagator`] trait.
//!
//! Two interchangeable backends share the trait:
//!
//! - [`AnalyticalPropagator`] - secular J2 drift of near-circular mean elements. Always
//!   compiled in and used as the fallback.
//! - `NumericalPropagator` - fixed-step RK4 integration of two-body + J2 (+ drag at high
//!   fidelity). Only present with the `numerical` feature.
//!
//! Both keep a history of maneuver arcs so `propagate` answers for any epoch regardless
//! of call order.

pub mod analytical;
pub mod elements;
#[cfg(feature = "numerical")]
pub mod numerical;

pub use analytical::AnalyticalPropagator;
pub use elements::OrbitalElements;
#[cfg(feature = "numerical")]
pub use numerical::{ForceModel, NumericalPropagator};

use crate::config::SimulationConfig;
use crate::error::{PropagationError, SimError};
use chrono::{DateTime, TimeDelta, Utc};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

pub type Epoch = DateTime<Utc>;

/// Earth gravitational parameter (km^3/s^2)
pub const MU_EARTH: f64 = 398_600.441_8;
/// Earth equatorial radius (km)
pub const R_EARTH_KM: f64 = 6378.137;
/// Earth second zonal harmonic
pub const J2_EARTH: f64 = 1.082_626_68e-3;
/// Standard gravity (m/s^2)
pub const G0: f64 = 9.806_65;
/// Earth rotation rate (rad/s)
pub const OMEGA_EARTH: f64 = 7.292_115e-5;

const UNIX_EPOCH_JD: f64 = 2_440_587.5;

/// Seconds from `from` to `to` (negative when `to` is earlier).
pub fn seconds_between(from: Epoch, to: Epoch) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}

/// `epoch` shifted by `seconds`, rounded to the microsecond.
pub fn offset_epoch(epoch: Epoch, seconds: f64) -> Epoch {
    epoch + TimeDelta::microseconds((seconds * 1e6).round() as i64)
}

pub fn julian_date(epoch: Epoch) -> f64 {
    epoch.timestamp_micros() as f64 / 86_400e6 + UNIX_EPOCH_JD
}

/// A single trajectory sample. Only propagators create these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemerisPoint {
    pub epoch: Epoch,
    /// ECI position (km)
    pub position: Vector3<f64>,
    /// ECI velocity (km/s)
    pub velocity: Vector3<f64>,
    pub altitude_km: f64,
    /// Attitude quaternion [w, x, y, z], when an attitude model supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attitude: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angular_velocity: Option<Vector3<f64>>,
}

impl EphemerisPoint {
    pub(crate) fn new(epoch: Epoch, position: Vector3<f64>, velocity: Vector3<f64>) -> Self {
        Self {
            epoch,
            altitude_km: position.norm() - R_EARTH_KM,
            position,
            velocity,
            attitude: None,
            angular_velocity: None,
        }
    }

    /// Specific orbital energy (km^2/s^2). Negative for a bound orbit.
    pub fn specific_energy(&self) -> f64 {
        self.velocity.norm_squared() / 2.0 - MU_EARTH / self.position.norm()
    }
}

/// Cartesian state handed to [`Propagator::initialize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrbitState {
    pub epoch: Epoch,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub mass_kg: f64,
}

impl OrbitState {
    pub(crate) fn validate(&self) -> Result<(), PropagationError> {
        let finite = self.position.iter().chain(self.velocity.iter()).all(|c| c.is_finite());
        if !finite {
            return Err(PropagationError::InvalidState(
                "position/velocity contain non-finite components".into(),
            ));
        }
        if self.position.norm() <= f64::EPSILON {
            return Err(PropagationError::InvalidState("zero-radius position".into()));
        }
        if !(self.mass_kg.is_finite() && self.mass_kg > 0.0) {
            return Err(PropagationError::InvalidState(format!(
                "spacecraft mass must be positive, got {}",
                self.mass_kg
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManeuverResult {
    pub epoch: Epoch,
    pub delta_v_km_s: Vector3<f64>,
    pub propellant_used_kg: f64,
    pub mass_before_kg: f64,
    pub mass_after_kg: f64,
    pub post_maneuver: EphemerisPoint,
}

/// Ideal rocket equation: propellant burned for `delta_v_km_s` starting from `mass_kg`.
pub fn propellant_for_delta_v(mass_kg: f64, delta_v_km_s: f64, isp_s: f64) -> f64 {
    let exhaust_velocity_m_s = isp_s * G0;
    mass_kg * (1.0 - (-(delta_v_km_s * 1000.0).abs() / exhaust_velocity_m_s).exp())
}

/// Inverse of [`propellant_for_delta_v`]: the delta-v (km/s) bought by `propellant_kg`.
pub fn delta_v_for_propellant(mass_kg: f64, propellant_kg: f64, isp_s: f64) -> f64 {
    let propellant_kg = propellant_kg.clamp(0.0, mass_kg);
    if propellant_kg >= mass_kg {
        return f64::INFINITY;
    }
    isp_s * G0 * (mass_kg / (mass_kg - propellant_kg)).ln() / 1000.0
}

/// What should happen when the analytical propagator sees an orbit more eccentric than
/// its near-circular approximation supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EccentricityPolicy {
    Warn,
    Reject,
}

pub trait Propagator {
    fn name(&self) -> &'static str;

    /// Reset the propagator to `state`. Fails on non-finite or degenerate input.
    fn initialize(&mut self, state: &OrbitState) -> Result<(), PropagationError>;

    /// State at an arbitrary epoch. Independent of previous calls.
    fn propagate(&mut self, epoch: Epoch) -> Result<EphemerisPoint, PropagationError>;

    /// Samples from `start` to `end` inclusive, spaced by `step_s`.
    fn propagate_range(
        &mut self,
        start: Epoch,
        end: Epoch,
        step_s: f64,
    ) -> Result<Vec<EphemerisPoint>, PropagationError> {
        EpochSteps::new(start, end, step_s)?
            .map(|epoch| self.propagate(epoch))
            .collect()
    }

    /// Impulsive velocity change at `epoch`. Later epochs see the new orbit; earlier
    /// epochs keep the pre-maneuver trajectory.
    fn apply_maneuver(
        &mut self,
        delta_v_km_s: Vector3<f64>,
        epoch: Epoch,
    ) -> Result<ManeuverResult, PropagationError>;

    fn mass_kg(&self) -> f64;

    /// Advisory messages raised since the last call (e.g. validity boundary exceeded).
    fn drain_notices(&mut self) -> Vec<String> {
        Vec::new()
    }
}

/// Restartable epoch grid from `start` to `end`, both included, never past `end`.
#[derive(Debug, Clone)]
pub struct EpochSteps {
    start: Epoch,
    end: Epoch,
    step_s: f64,
    index: u64,
    finished: bool,
}

impl EpochSteps {
    pub fn new(start: Epoch, end: Epoch, step_s: f64) -> Result<Self, PropagationError> {
        if !(step_s.is_finite() && step_s > 0.0) {
            return Err(PropagationError::InvalidStep(format!(
                "step must be positive and finite, got {step_s}"
            )));
        }
        if end < start {
            return Err(PropagationError::InvalidStep(format!(
                "range end {end} precedes start {start}"
            )));
        }
        Ok(Self {
            start,
            end,
            step_s,
            index: 0,
            finished: false,
        })
    }
}

impl Iterator for EpochSteps {
    type Item = Epoch;

    fn next(&mut self) -> Option<Epoch> {
        if self.finished {
            return None;
        }
        // Offsets are computed from `start` so the grid never accumulates drift.
        let epoch = offset_epoch(self.start, self.index as f64 * self.step_s);
        self.index += 1;
        if epoch >= self.end {
            self.finished = true;
            return Some(self.end);
        }
        Some(epoch)
    }
}

/// Index of the arc governing `epoch`: the latest anchored at or before it, or the
/// first arc for epochs preceding all anchors.
pub(crate) fn select_arc<T>(arcs: &[T], epoch: Epoch, anchor: impl Fn(&T) -> Epoch) -> usize {
    arcs.iter().rposition(|arc| anchor(arc) <= epoch).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fidelity {
    /// Analytical J2 secular propagation.
    Low,
    /// Numerical two-body + J2.
    Medium,
    /// Numerical two-body + J2 + atmospheric drag.
    High,
}

impl Fidelity {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "low" | "analytical" => Some(Self::Low),
            "medium" | "numerical" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    fn needs_numerical(self) -> bool {
        !matches!(self, Self::Low)
    }
}

impl fmt::Display for Fidelity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(name)
    }
}

/// Record of running below the requested fidelity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDegradation {
    pub requested: Fidelity,
    pub used: Fidelity,
    pub reason: String,
}

pub struct PropagatorSelection {
    pub propagator: Box<dyn Propagator>,
    pub requested: Fidelity,
    pub used: Fidelity,
    pub degradation: Option<BackendDegradation>,
}

/// The propagator implementations a simulation context may choose from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagatorBackends {
    numerical: bool,
}

impl PropagatorBackends {
    /// Backends compiled into this build.
    pub fn detect() -> Self {
        Self {
            numerical: cfg!(feature = "numerical"),
        }
    }

    /// Only the analytical fallback, as when the numerical backend cannot be loaded.
    pub fn analytical_only() -> Self {
        Self { numerical: false }
    }

    pub fn numerical_available(&self) -> bool {
        self.numerical && cfg!(feature = "numerical")
    }

    /// Build a propagator for `fidelity`, degrading to the analytical backend when the
    /// numerical one is missing (or failing, under `strict_fidelity`).
    pub fn select(
        &self,
        fidelity: Fidelity,
        config: &SimulationConfig,
    ) -> Result<PropagatorSelection, SimError> {
        if fidelity.needs_numerical() {
            if let Some(propagator) = self.numerical_propagator(fidelity, config) {
                return Ok(PropagatorSelection {
                    propagator,
                    requested: fidelity,
                    used: fidelity,
                    degradation: None,
                });
            }

            let reason = if cfg!(feature = "numerical") {
                "numerical backend disabled for this context".to_string()
            } else {
                "numerical backend not compiled into this build".to_string()
            };
            if config.strict_fidelity {
                return Err(SimError::BackendUnavailable {
                    requested: fidelity,
                    reason,
                });
            }
            warn!(requested = %fidelity, %reason, "Falling back to analytical propagation");
            return Ok(PropagatorSelection {
                propagator: Box::new(AnalyticalPropagator::new(
                    &config.propagator,
                    config.spacecraft.isp_s,
                )),
                requested: fidelity,
                used: Fidelity::Low,
                degradation: Some(BackendDegradation {
                    requested: fidelity,
                    used: Fidelity::Low,
                    reason,
                }),
            });
        }

        Ok(PropagatorSelection {
            propagator: Box::new(AnalyticalPropagator::new(
                &config.propagator,
                config.spacecraft.isp_s,
            )),
            requested: fidelity,
            used: Fidelity::Low,
            degradation: None,
        })
    }

    #[cfg(feature = "numerical")]
    fn numerical_propagator(
        &self,
        fidelity: Fidelity,
        config: &SimulationConfig,
    ) -> Option<Box<dyn Propagator>> {
        if !self.numerical {
            return None;
        }
        let force_model = if fidelity == Fidelity::High {
            ForceModel::with_drag(config.propagator.ballistic_coefficient_kg_m2)
        } else {
            ForceModel::j2_only()
        };
        Some(Box::new(NumericalPropagator::new(
            force_model,
            config.propagator.integration_step_s,
            config.spacecraft.isp_s,
        )))
    }

    #[cfg(not(feature = "numerical"))]
    fn numerical_propagator(
        &self,
        _fidelity: Fidelity,
        _config: &SimulationConfig,
    ) -> Option<Box<dyn Propagator>> {
        None
    }
}

impl Default for PropagatorBackends {
    fn default() -> Self {
        Self::detect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> Epoch {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_epoch_steps_include_both_bounds() {
        let end = offset_epoch(t0(), 150.0);
        let epochs: Vec<_> = EpochSteps::new(t0(), end, 60.0).unwrap().collect();

        assert_eq!(epochs.len(), 4);
        assert_eq!(epochs[0], t0());
        assert_eq!(epochs[2], offset_epoch(t0(), 120.0));
        assert_eq!(*epochs.last().unwrap(), end);
        assert!(epochs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_epoch_steps_exact_multiple_has_no_duplicate() {
        let end = offset_epoch(t0(), 120.0);
        let epochs: Vec<_> = EpochSteps::new(t0(), end, 60.0).unwrap().collect();
        assert_eq!(epochs.len(), 3);
        assert_eq!(*epochs.last().unwrap(), end);
    }

    #[test]
    fn test_epoch_steps_restartable() {
        let steps = EpochSteps::new(t0(), offset_epoch(t0(), 600.0), 45.0).unwrap();
        let first: Vec<_> = steps.clone().collect();
        let second: Vec<_> = steps.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_epoch_steps_degenerate_range() {
        let epochs: Vec<_> = EpochSteps::new(t0(), t0(), 10.0).unwrap().collect();
        assert_eq!(epochs, vec![t0()]);
    }

    #[test]
    fn test_epoch_steps_reject_bad_step() {
        assert!(EpochSteps::new(t0(), offset_epoch(t0(), 10.0), 0.0).is_err());
        assert!(EpochSteps::new(t0(), offset_epoch(t0(), 10.0), f64::NAN).is_err());
        assert!(EpochSteps::new(offset_epoch(t0(), 10.0), t0(), 1.0).is_err());
    }

    #[test]
    fn test_rocket_equation_round_trip() {
        let used = propellant_for_delta_v(150.0, 0.05, 1600.0);
        assert!(used > 0.0 && used < 1.0);
        let dv = delta_v_for_propellant(150.0, used, 1600.0);
        assert!((dv - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_analytical_only_degrades() {
        let config = SimulationConfig::default();
        let selection = PropagatorBackends::analytical_only()
            .select(Fidelity::High, &config)
            .unwrap();
        assert_eq!(selection.used, Fidelity::Low);
        assert!(selection.degradation.is_some());

        let mut strict = SimulationConfig::default();
        strict.strict_fidelity = true;
        let result = PropagatorBackends::analytical_only().select(Fidelity::Medium, &strict);
        assert!(matches!(result, Err(SimError::BackendUnavailable { .. })));
    }
}
