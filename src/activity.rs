use crate::access::GroundStation;
use crate::error::SimError;
use crate::propagation::{seconds_between, Epoch};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Closed set of activity kinds the simulator knows how to map.
///
/// Anything else deserializes to [`ActivityKind::Unregistered`] and runs as idle time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityKind {
    Idle,
    Imaging,
    Downlink,
    ThrustLowering,
    StationKeeping,
    Unregistered(String),
}

impl ActivityKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle => "idle",
            Self::Imaging => "imaging",
            Self::Downlink => "downlink",
            Self::ThrustLowering => "thrust_lowering",
            Self::StationKeeping => "station_keeping",
            Self::Unregistered(name) => name,
        }
    }

    pub fn is_registered(&self) -> bool {
        !matches!(self, Self::Unregistered(_))
    }
}

impl From<String> for ActivityKind {
    fn from(name: String) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "idle" | "standby" => Self::Idle,
            "imaging" | "image" | "observation" => Self::Imaging,
            "downlink" | "ground_contact" => Self::Downlink,
            "thrust_lowering" | "orbit_lowering" | "thrust" => Self::ThrustLowering,
            "station_keeping" | "stationkeeping" => Self::StationKeeping,
            _ => Self::Unregistered(name),
        }
    }
}

impl From<ActivityKind> for String {
    fn from(kind: ActivityKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub start: Epoch,
    pub end: Epoch,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

impl Activity {
    pub fn new(id: impl Into<String>, kind: ActivityKind, start: Epoch, end: Epoch) -> Self {
        Self {
            id: id.into(),
            kind,
            start,
            end,
            parameters: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn duration_s(&self) -> f64 {
        seconds_between(self.start, self.end)
    }

    /// Numeric parameter; numeric strings are accepted too.
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        match self.parameters.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key)?.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub spacecraft_id: String,
    pub start: Epoch,
    pub end: Epoch,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub ground_stations: Vec<GroundStation>,
}

impl Plan {
    pub fn from_json_str(json: &str) -> Result<Self, SimError> {
        let plan: Self = serde_json::from_str(json)?;
        if plan.end < plan.start {
            return Err(SimError::Initialization(format!(
                "plan {} ends ({}) before it starts ({})",
                plan.plan_id, plan.end, plan.start
            )));
        }
        Ok(plan)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Activities ordered by start time; ties keep plan order.
    pub fn sorted_activities(&self) -> Vec<&Activity> {
        let mut sorted: Vec<&Activity> = self.activities.iter().collect();
        sorted.sort_by_key(|a| a.start);
        sorted
    }

    pub fn duration_s(&self) -> f64 {
        seconds_between(self.start, self.end)
    }
}
