//! Activity to segment mapping.
//!
//! Each registered [`ActivityKind`] has one mapper that expands an activity window into
//! ordered [`SegmentSpec`]s. Dispatch is an exhaustive match; unregistered kinds run
//! through the idle mapper.

pub mod downlink;
pub mod idle;
pub mod imaging;
pub mod station_keeping;
pub mod thrust;

pub use downlink::{DownlinkMapper, RfBand};
pub use idle::IdleMapper;
pub use imaging::ImagingMapper;
pub use station_keeping::StationKeepingMapper;
pub use thrust::ThrustMapper;

use crate::activity::{Activity, ActivityKind};
use crate::config::SimulationConfig;
use crate::events::{EventCategory, SimEvent};
use crate::propagation::{seconds_between, Epoch};
use crate::storage::DataPriority;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    Idle,
    Slew,
    Imaging,
    DownlinkAcquisition,
    Downlink,
    Thrust,
    Coast,
    StationKeeping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttitudeMode {
    NadirPointing,
    Slewing,
    TargetPointing,
    GroundStationTracking,
    ThrustVector,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerProfile {
    /// Total electrical load (W), bus load included.
    pub load_w: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrustDirection {
    Prograde,
    Retrograde,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrustGoal {
    /// Change the mean altitude by this many km over the whole activity.
    DeltaAltitude(f64),
    /// Hold this altitude (km); `None` holds the run's reference orbit.
    HoldAltitude(Option<f64>),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrustProfile {
    pub thrust_n: f64,
    pub duty_cycle: f64,
    pub direction: ThrustDirection,
    pub goal: ThrustGoal,
}

impl ThrustProfile {
    /// Largest delta-v (km/s) the thruster can deliver over `duration_s` at `mass_kg`.
    pub fn capability_km_s(&self, duration_s: f64, mass_kg: f64) -> f64 {
        if mass_kg <= 0.0 {
            return 0.0;
        }
        self.thrust_n * duration_s * self.duty_cycle / mass_kg / 1000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataDirection {
    /// Payload writes to the recorder.
    Generate,
    /// Recorder is downlinked.
    Transmit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataProfile {
    pub direction: DataDirection,
    pub rate_mbps: f64,
    pub priority: DataPriority,
    pub data_type: String,
    /// Drain most important data first (transmit only).
    pub priority_order: bool,
}

impl DataProfile {
    /// Volume (GB) moved over `duration_s`.
    pub fn volume_gb(&self, duration_s: f64) -> f64 {
        self.rate_mbps * duration_s.max(0.0) / 8000.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub start: Epoch,
    pub end: Epoch,
    pub segment_type: SegmentType,
    pub attitude: AttitudeMode,
    pub power: PowerProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thrust: Option<ThrustProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataProfile>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
}

impl SegmentSpec {
    pub fn new(
        start: Epoch,
        end: Epoch,
        segment_type: SegmentType,
        attitude: AttitudeMode,
        load_w: f64,
    ) -> Self {
        Self {
            start,
            end,
            segment_type,
            attitude,
            power: PowerProfile { load_w },
            thrust: None,
            data: None,
            parameters: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_thrust(mut self, thrust: ThrustProfile) -> Self {
        self.thrust = Some(thrust);
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: DataProfile) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn duration_s(&self) -> f64 {
        seconds_between(self.start, self.end)
    }
}

pub trait ActivityMapper {
    /// Expand `activity` into time-ordered, non-overlapping segments inside its window.
    fn map(&self, activity: &Activity, config: &SimulationConfig) -> Vec<SegmentSpec>;

    /// Report missing or unusable parameters. Mapping still succeeds with defaults.
    fn validate(&self, _activity: &Activity, _config: &SimulationConfig) -> Vec<SimEvent> {
        Vec::new()
    }
}

/// Numeric parameter or its default, with a validation warning when it had to be defaulted.
pub(crate) fn param_or_default(
    activity: &Activity,
    key: &str,
    default: f64,
    events: Option<&mut Vec<SimEvent>>,
) -> f64 {
    match activity.param_f64(key) {
        Some(value) if value.is_finite() => value,
        found => {
            if let Some(events) = events {
                let problem = if found.is_some() || activity.parameters.contains_key(key) {
                    "unusable"
                } else {
                    "missing"
                };
                events.push(
                    SimEvent::warning(
                        activity.start,
                        EventCategory::Validation,
                        format!("{}: {problem} parameter '{key}', using {default}", activity.id),
                    )
                    .with_activity(activity.id.clone()),
                );
            }
            default
        }
    }
}

/// One mapper per registered activity kind, built once per simulation context.
#[derive(Debug, Default)]
pub struct MapperRegistry {
    idle: IdleMapper,
    imaging: ImagingMapper,
    downlink: DownlinkMapper,
    thrust: ThrustMapper,
    station_keeping: StationKeepingMapper,
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mapper_for(&self, kind: &ActivityKind) -> &dyn ActivityMapper {
        match kind {
            ActivityKind::Idle | ActivityKind::Unregistered(_) => &self.idle,
            ActivityKind::Imaging => &self.imaging,
            ActivityKind::Downlink => &self.downlink,
            ActivityKind::ThrustLowering => &self.thrust,
            ActivityKind::StationKeeping => &self.station_keeping,
        }
    }

    pub fn map(&self, activity: &Activity, config: &SimulationConfig) -> Vec<SegmentSpec> {
        if activity.end <= activity.start {
            return Vec::new();
        }
        self.mapper_for(&activity.kind).map(activity, config)
    }

    pub fn validate(&self, activity: &Activity, config: &SimulationConfig) -> Vec<SimEvent> {
        let mut events = Vec::new();
        if activity.end <= activity.start {
            events.push(
                SimEvent::warning(
                    activity.start,
                    EventCategory::Validation,
                    format!("{}: activity window is empty or inverted", activity.id),
                )
                .with_activity(activity.id.clone()),
            );
        }
        events.extend(self.mapper_for(&activity.kind).validate(activity, config));
        events
    }
}
