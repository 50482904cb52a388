use crate::error::SimError;
use crate::modes::SpacecraftMode;
use crate::propagation::{seconds_between, Epoch, OrbitState, MU_EARTH, R_EARTH_KM};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Spacecraft state threaded through a run. Also the initial state of a chained run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerState {
    pub epoch: Epoch,
    /// ECI position (km)
    pub position: Vector3<f64>,
    /// ECI velocity (km/s)
    pub velocity: Vector3<f64>,
    /// Wet mass (kg)
    pub mass_kg: f64,
    pub propellant_kg: f64,
    pub battery_soc: f64,
    pub storage_used_gb: f64,
    pub mode: SpacecraftMode,
}

impl RunnerState {
    /// Equatorial circular orbit at `altitude_km`, battery at 90%, recorder empty, STANDBY.
    pub fn circular(epoch: Epoch, altitude_km: f64, mass_kg: f64, propellant_kg: f64) -> Self {
        let radius = R_EARTH_KM + altitude_km;
        Self {
            epoch,
            position: Vector3::new(radius, 0.0, 0.0),
            velocity: Vector3::new(0.0, (MU_EARTH / radius).sqrt(), 0.0),
            mass_kg,
            propellant_kg,
            battery_soc: 0.9,
            storage_used_gb: 0.0,
            mode: SpacecraftMode::Standby,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, SimError> {
        let state: Self = serde_json::from_str(json)?;
        state.validate()?;
        Ok(state)
    }

    /// Reject states no run can start from.
    pub fn validate(&self) -> Result<(), SimError> {
        let finite = self.position.iter().chain(self.velocity.iter()).all(|c| c.is_finite());
        if !finite {
            return Err(SimError::Initialization(
                "initial position/velocity contain non-finite components".into(),
            ));
        }
        if self.position.norm() <= R_EARTH_KM {
            return Err(SimError::Initialization(format!(
                "initial position radius {:.3} km is not above the Earth's surface",
                self.position.norm()
            )));
        }
        if !(self.mass_kg.is_finite() && self.mass_kg > 0.0) {
            return Err(SimError::Initialization(format!(
                "spacecraft mass must be positive, got {}",
                self.mass_kg
            )));
        }
        if !(self.propellant_kg >= 0.0 && self.propellant_kg < self.mass_kg) {
            return Err(SimError::Initialization(format!(
                "propellant {} kg must be non-negative and below total mass {} kg",
                self.propellant_kg, self.mass_kg
            )));
        }
        if !(0.0..=1.0).contains(&self.battery_soc) {
            return Err(SimError::Initialization(format!(
                "battery state of charge {} outside [0, 1]",
                self.battery_soc
            )));
        }
        if !(self.storage_used_gb.is_finite() && self.storage_used_gb >= 0.0) {
            return Err(SimError::Initialization(format!(
                "storage used {} GB must be non-negative",
                self.storage_used_gb
            )));
        }
        Ok(())
    }

    pub fn altitude_km(&self) -> f64 {
        self.position.norm() - R_EARTH_KM
    }

    pub fn specific_energy(&self) -> f64 {
        self.velocity.norm_squared() / 2.0 - MU_EARTH / self.position.norm()
    }

    pub fn orbit_state(&self) -> OrbitState {
        OrbitState {
            epoch: self.epoch,
            position: self.position,
            velocity: self.velocity,
            mass_kg: self.mass_kg,
        }
    }

    pub(crate) fn clamp_resources(&mut self, storage_capacity_gb: f64) {
        self.battery_soc = self.battery_soc.clamp(0.0, 1.0);
        self.storage_used_gb = self.storage_used_gb.clamp(0.0, storage_capacity_gb);
        self.propellant_kg = self.propellant_kg.max(0.0);
    }
}

/// Change in state across a segment or a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDeltas {
    pub duration_s: f64,
    pub altitude_km: f64,
    pub battery_soc: f64,
    pub storage_gb: f64,
    pub propellant_kg: f64,
    pub mass_kg: f64,
    /// Sum of applied impulse magnitudes (m/s).
    pub delta_v_m_s: f64,
}

impl StateDeltas {
    pub fn between(before: &RunnerState, after: &RunnerState, delta_v_m_s: f64) -> Self {
        Self {
            duration_s: seconds_between(before.epoch, after.epoch),
            altitude_km: after.altitude_km() - before.altitude_km(),
            battery_soc: after.battery_soc - before.battery_soc,
            storage_gb: after.storage_used_gb - before.storage_used_gb,
            propellant_kg: after.propellant_kg - before.propellant_kg,
            mass_kg: after.mass_kg - before.mass_kg,
            delta_v_m_s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t0() -> Epoch {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_circular_state_is_valid_and_bound() {
        let state = RunnerState::circular(t0(), 500.0, 150.0, 20.0);
        assert!(state.validate().is_ok());
        assert!((state.altitude_km() - 500.0).abs() < 1e-9);
        assert!(state.specific_energy() < 0.0);
    }

    #[test]
    fn test_invalid_initial_states() {
        let good = RunnerState::circular(t0(), 500.0, 150.0, 20.0);

        let mut state = good.clone();
        state.position = Vector3::zeros();
        assert!(matches!(state.validate(), Err(SimError::Initialization(_))));

        let mut state = good.clone();
        state.velocity.y = f64::INFINITY;
        assert!(state.validate().is_err());

        let mut state = good.clone();
        state.propellant_kg = 200.0;
        assert!(state.validate().is_err());

        let mut state = good;
        state.battery_soc = 1.2;
        assert!(state.validate().is_err());
    }

    #[test]
    fn test_clamp_resources() {
        let mut state = RunnerState::circular(t0(), 500.0, 150.0, 20.0);
        state.battery_soc = -0.3;
        state.storage_used_gb = 140.0;
        state.propellant_kg = -1.0;
        state.clamp_resources(100.0);

        assert_eq!(state.battery_soc, 0.0);
        assert_eq!(state.storage_used_gb, 100.0);
        assert_eq!(state.propellant_kg, 0.0);
    }
}
