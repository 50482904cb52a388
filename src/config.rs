use crate::error::SimError;
use crate::mappers::RfBand;
use crate::power::{PanelMounting, SunModel};
use crate::propagation::EccentricityPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

// Run-level defaults
pub const DEFAULT_SEED: u64 = 0x5A7_0001;
pub const DEFAULT_TIME_STEP_S: f64 = 60.0;

// Spacecraft bus defaults (small electric-propulsion LEO bus)
const DEFAULT_ISP_S: f64 = 1600.0;
const DEFAULT_THRUST_N: f64 = 0.1;
const DEFAULT_THRUSTER_POWER_W: f64 = 900.0;
const DEFAULT_BASE_LOAD_W: f64 = 80.0;

// Analytical propagator validity boundary
const DEFAULT_MAX_ECCENTRICITY: f64 = 0.1;
const DEFAULT_INTEGRATION_STEP_S: f64 = 10.0;
const DEFAULT_BALLISTIC_COEFFICIENT: f64 = 50.0;

const DEFAULT_SOLAR_FLUX_W_M2: f64 = 1361.0;
const DEFAULT_PANEL_AREA_M2: f64 = 3.5;
const DEFAULT_PANEL_EFFICIENCY: f64 = 0.29;
const DEFAULT_BATTERY_CAPACITY_WH: f64 = 1200.0;

const DEFAULT_STORAGE_CAPACITY_GB: f64 = 100.0;
const DEFAULT_STORAGE_RESERVED_GB: f64 = 1.0;
const DEFAULT_STORAGE_WARNING_FRACTION: f64 = 0.9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for every pseudo-random draw in a run. Set once; never re-seeded.
    pub seed: u64,
    /// Ephemeris sampling step for every segment.
    pub time_step_s: f64,
    /// Fail instead of falling back when the requested fidelity backend is missing.
    pub strict_fidelity: bool,
    pub spacecraft: SpacecraftConfig,
    pub propagator: PropagatorConfig,
    pub power: PowerConfig,
    pub storage: StorageConfig,
    pub mappers: MapperConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            time_step_s: DEFAULT_TIME_STEP_S,
            strict_fidelity: false,
            spacecraft: SpacecraftConfig::default(),
            propagator: PropagatorConfig::default(),
            power: PowerConfig::default(),
            storage: StorageConfig::default(),
            mappers: MapperConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, SimError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Reject configurations no run could use meaningfully.
    pub fn validate(&self) -> Result<(), SimError> {
        require_positive("time_step_s", self.time_step_s)?;
        require_positive("spacecraft.isp_s", self.spacecraft.isp_s)?;
        require_non_negative("spacecraft.thrust_n", self.spacecraft.thrust_n)?;
        require_non_negative("spacecraft.thruster_power_w", self.spacecraft.thruster_power_w)?;
        require_non_negative("spacecraft.base_load_w", self.spacecraft.base_load_w)?;

        require_positive("propagator.max_eccentricity", self.propagator.max_eccentricity)?;
        require_positive("propagator.integration_step_s", self.propagator.integration_step_s)?;
        require_positive(
            "propagator.ballistic_coefficient_kg_m2",
            self.propagator.ballistic_coefficient_kg_m2,
        )?;

        require_non_negative("power.solar_flux_w_m2", self.power.solar_flux_w_m2)?;
        require_non_negative("power.panel_area_m2", self.power.panel_area_m2)?;
        require_fraction("power.panel_efficiency", self.power.panel_efficiency)?;
        require_positive("power.battery_capacity_wh", self.power.battery_capacity_wh)?;

        require_positive("storage.capacity_gb", self.storage.capacity_gb)?;
        require_non_negative("storage.reserved_gb", self.storage.reserved_gb)?;
        if self.storage.reserved_gb >= self.storage.capacity_gb {
            return Err(SimError::Config(format!(
                "storage.reserved_gb ({}) must be below capacity ({})",
                self.storage.reserved_gb, self.storage.capacity_gb
            )));
        }
        require_fraction("storage.warning_fraction", self.storage.warning_fraction)?;

        let imaging = &self.mappers.imaging;
        require_positive("mappers.imaging.slew_rate_deg_s", imaging.slew_rate_deg_s)?;
        require_positive("mappers.imaging.reference_gsd_m", imaging.reference_gsd_m)?;
        require_positive("mappers.imaging.default_gsd_m", imaging.default_gsd_m)?;
        require_non_negative("mappers.imaging.base_data_rate_mbps", imaging.base_data_rate_mbps)?;

        let downlink = &self.mappers.downlink;
        require_fraction("mappers.downlink.acquisition_fraction", downlink.acquisition_fraction)?;
        require_non_negative("mappers.downlink.max_acquisition_s", downlink.max_acquisition_s)?;
        require_non_negative("mappers.downlink.signal_loss_margin_s", downlink.signal_loss_margin_s)?;

        require_positive("mappers.thrust.max_arc_s", self.mappers.thrust.max_arc_s)?;
        if self.mappers.thrust.max_arc_s < self.time_step_s {
            return Err(SimError::Config(format!(
                "mappers.thrust.max_arc_s ({}) must be at least time_step_s ({})",
                self.mappers.thrust.max_arc_s, self.time_step_s
            )));
        }
        require_non_negative("mappers.thrust.coast_s", self.mappers.thrust.coast_s)?;

        require_fraction(
            "mappers.station_keeping.thrust_fraction",
            self.mappers.station_keeping.thrust_fraction,
        )?;
        require_fraction(
            "mappers.station_keeping.duty_cycle",
            self.mappers.station_keeping.duty_cycle,
        )?;

        Ok(())
    }
}

fn require_positive(name: &str, value: f64) -> Result<(), SimError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SimError::Config(format!("{name} must be positive, got {value}")))
    }
}

fn require_non_negative(name: &str, value: f64) -> Result<(), SimError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SimError::Config(format!("{name} must be non-negative, got {value}")))
    }
}

fn require_fraction(name: &str, value: f64) -> Result<(), SimError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SimError::Config(format!("{name} must lie in [0, 1], got {value}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpacecraftConfig {
    pub isp_s: f64,
    pub thrust_n: f64,
    pub thruster_power_w: f64,
    /// Bus load present in every segment.
    pub base_load_w: f64,
    /// Altitude held by station keeping when the activity names none.
    pub reference_altitude_km: Option<f64>,
}

impl Default for SpacecraftConfig {
    fn default() -> Self {
        Self {
            isp_s: DEFAULT_ISP_S,
            thrust_n: DEFAULT_THRUST_N,
            thruster_power_w: DEFAULT_THRUSTER_POWER_W,
            base_load_w: DEFAULT_BASE_LOAD_W,
            reference_altitude_km: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagatorConfig {
    /// Eccentricity above which the analytical propagator's near-circular
    /// approximation no longer holds.
    pub max_eccentricity: f64,
    pub eccentricity_policy: EccentricityPolicy,
    /// Fixed RK4 step of the numerical backend.
    pub integration_step_s: f64,
    /// m / (Cd * A), used by the high-fidelity drag model.
    pub ballistic_coefficient_kg_m2: f64,
}

impl Default for PropagatorConfig {
    fn default() -> Self {
        Self {
            max_eccentricity: DEFAULT_MAX_ECCENTRICITY,
            eccentricity_policy: EccentricityPolicy::Warn,
            integration_step_s: DEFAULT_INTEGRATION_STEP_S,
            ballistic_coefficient_kg_m2: DEFAULT_BALLISTIC_COEFFICIENT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub solar_flux_w_m2: f64,
    pub panel_area_m2: f64,
    pub panel_efficiency: f64,
    pub battery_capacity_wh: f64,
    pub panel_mounting: PanelMounting,
    pub sun_model: SunModel,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            solar_flux_w_m2: DEFAULT_SOLAR_FLUX_W_M2,
            panel_area_m2: DEFAULT_PANEL_AREA_M2,
            panel_efficiency: DEFAULT_PANEL_EFFICIENCY,
            battery_capacity_wh: DEFAULT_BATTERY_CAPACITY_WH,
            panel_mounting: PanelMounting::SunTracking,
            sun_model: SunModel::Analytical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub capacity_gb: f64,
    /// Capacity held back from fills (file system overhead, safe-mode buffer).
    pub reserved_gb: f64,
    /// Fill fraction of total capacity above which a WARNING is raised.
    pub warning_fraction: f64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            capacity_gb: DEFAULT_STORAGE_CAPACITY_GB,
            reserved_gb: DEFAULT_STORAGE_RESERVED_GB,
            warning_fraction: DEFAULT_STORAGE_WARNING_FRACTION,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub imaging: ImagingConfig,
    pub downlink: DownlinkConfig,
    pub thrust: ThrustConfig,
    pub station_keeping: StationKeepingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagingConfig {
    pub slew_rate_deg_s: f64,
    pub default_off_nadir_deg: f64,
    /// GSD at which the payload produces `base_data_rate_mbps`.
    pub reference_gsd_m: f64,
    pub default_gsd_m: f64,
    pub base_data_rate_mbps: f64,
    pub payload_power_w: f64,
    pub slew_power_w: f64,
}

impl Default for ImagingConfig {
    fn default() -> Self {
        Self {
            slew_rate_deg_s: 1.0,
            default_off_nadir_deg: 20.0,
            reference_gsd_m: 1.0,
            default_gsd_m: 1.0,
            base_data_rate_mbps: 400.0,
            payload_power_w: 120.0,
            slew_power_w: 40.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownlinkConfig {
    pub default_band: RfBand,
    pub acquisition_fraction: f64,
    pub max_acquisition_s: f64,
    /// Tail of each pass left untransmitted for loss of signal.
    pub signal_loss_margin_s: f64,
    pub acquisition_power_w: f64,
}

impl Default for DownlinkConfig {
    fn default() -> Self {
        Self {
            default_band: RfBand::X,
            acquisition_fraction: 0.05,
            max_acquisition_s: 30.0,
            signal_loss_margin_s: 10.0,
            acquisition_power_w: 15.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrustConfig {
    pub max_arc_s: f64,
    pub coast_s: f64,
}

impl Default for ThrustConfig {
    fn default() -> Self {
        Self {
            max_arc_s: 1800.0,
            coast_s: 600.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationKeepingConfig {
    /// Fraction of nominal thrust used for station keeping.
    pub thrust_fraction: f64,
    pub duty_cycle: f64,
}

impl Default for StationKeepingConfig {
    fn default() -> Self {
        Self {
            thrust_fraction: 0.25,
            duty_cycle: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SimulationConfig::from_json_str(
            r#"{"seed": 7, "storage": {"capacity_gb": 250.0, "reserved_gb": 0.0}}"#,
        )
        .unwrap();

        assert_eq!(config.seed, 7);
        assert!((config.storage.capacity_gb - 250.0).abs() < f64::EPSILON);
        assert!((config.storage.warning_fraction - 0.9).abs() < f64::EPSILON);
        assert!((config.time_step_s - DEFAULT_TIME_STEP_S).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = SimulationConfig::default();
        config.time_step_s = 0.0;
        assert!(matches!(config.validate(), Err(SimError::Config(_))));

        let mut config = SimulationConfig::default();
        config.storage.reserved_gb = config.storage.capacity_gb;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.power.panel_efficiency = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_thrust_arc_shorter_than_time_step_rejected() {
        let mut config = SimulationConfig::default();
        config.mappers.thrust.max_arc_s = 1e-6;
        assert!(matches!(config.validate(), Err(SimError::Config(message)) if message.contains("max_arc_s")));

        config.mappers.thrust.max_arc_s = config.time_step_s;
        assert!(config.validate().is_ok());

        let json = r#"{"time_step_s": 120.0, "mappers": {"thrust": {"max_arc_s": 90.0, "coast_s": 0.0}}}"#;
        assert!(SimulationConfig::from_json_str(json).is_err());
    }
}
