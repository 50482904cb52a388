use super::{ActivityMapper, AttitudeMode, DataDirection, DataProfile, SegmentSpec, SegmentType};
use crate::activity::Activity;
use crate::config::SimulationConfig;
use crate::events::{EventCategory, SimEvent};
use crate::propagation::{offset_epoch, seconds_between};
use crate::storage::DataPriority;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RfBand {
    S,
    X,
    Ka,
}

impl RfBand {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "S" | "S-BAND" => Some(Self::S),
            "X" | "X-BAND" => Some(Self::X),
            "KA" | "KA-BAND" => Some(Self::Ka),
            _ => None,
        }
    }

    /// Transmitter draw while radiating (W).
    pub fn peak_power_w(self) -> f64 {
        match self {
            Self::S => 15.0,
            Self::X => 45.0,
            Self::Ka => 75.0,
        }
    }

    pub fn data_rate_mbps(self) -> f64 {
        match self {
            Self::S => 2.0,
            Self::X => 150.0,
            Self::Ka => 600.0,
        }
    }
}

impl fmt::Display for RfBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::S => "S",
            Self::X => "X",
            Self::Ka => "Ka",
        };
        f.write_str(name)
    }
}

/// Acquisition, then transmission up to the signal-loss margin.
///
/// The margin at the end of the pass is left unmapped; the runner covers it as idle time.
#[derive(Debug, Default, Clone, Copy)]
pub struct DownlinkMapper;

impl ActivityMapper for DownlinkMapper {
    fn map(&self, activity: &Activity, config: &SimulationConfig) -> Vec<SegmentSpec> {
        let downlink = &config.mappers.downlink;
        let base_load = config.spacecraft.base_load_w;
        let band = activity
            .param_str("band")
            .and_then(RfBand::parse)
            .unwrap_or(downlink.default_band);
        let rate_mbps = activity
            .param_f64("data_rate_mbps")
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or_else(|| band.data_rate_mbps());
        let priority_order = activity
            .parameters
            .get("priority_order")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);

        let duration = activity.duration_s();
        let acquisition_s = (duration * downlink.acquisition_fraction).min(downlink.max_acquisition_s);
        let acquired = offset_epoch(activity.start, acquisition_s);
        let loss_of_signal = offset_epoch(activity.end, -downlink.signal_loss_margin_s);

        let mut specs = Vec::with_capacity(2);
        if acquisition_s > 0.0 {
            specs.push(
                SegmentSpec::new(
                    activity.start,
                    acquired,
                    SegmentType::DownlinkAcquisition,
                    AttitudeMode::GroundStationTracking,
                    base_load + downlink.acquisition_power_w,
                )
                .with_parameter("band", band.to_string()),
            );
        }
        if loss_of_signal > acquired {
            specs.push(
                SegmentSpec::new(
                    acquired,
                    loss_of_signal,
                    SegmentType::Downlink,
                    AttitudeMode::GroundStationTracking,
                    base_load + band.peak_power_w(),
                )
                .with_data(DataProfile {
                    direction: DataDirection::Transmit,
                    rate_mbps,
                    priority: DataPriority::Critical,
                    data_type: "downlink".to_string(),
                    priority_order,
                })
                .with_parameter("band", band.to_string())
                .with_parameter("margin_s", seconds_between(loss_of_signal, activity.end)),
            );
        }
        specs
    }

    fn validate(&self, activity: &Activity, config: &SimulationConfig) -> Vec<SimEvent> {
        let mut events = Vec::new();
        let default_band = config.mappers.downlink.default_band;
        let problem = match activity.param_str("band") {
            None if !activity.parameters.contains_key("band") => Some("missing"),
            Some(name) if RfBand::parse(name).is_some() => None,
            _ => Some("unrecognized"),
        };
        if let Some(problem) = problem {
            events.push(
                SimEvent::warning(
                    activity.start,
                    EventCategory::Validation,
                    format!("{}: {problem} parameter 'band', using {default_band}", activity.id),
                )
                .with_activity(activity.id.clone()),
            );
        }
        if activity.duration_s() <= config.mappers.downlink.signal_loss_margin_s {
            events.push(
                SimEvent::warning(
                    activity.start,
                    EventCategory::Validation,
                    format!(
                        "{}: pass shorter than the signal-loss margin, nothing will be transmitted",
                        activity.id
                    ),
                )
                .with_activity(activity.id.clone()),
            );
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityKind;
    use chrono::{TimeZone, Utc};

    fn activity(duration_s: f64) -> Activity {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        Activity::new("dl-1", ActivityKind::Downlink, start, offset_epoch(start, duration_s))
    }

    #[test]
    fn test_short_pass_uses_five_percent_acquisition() {
        let config = SimulationConfig::default();
        let act = activity(400.0).with_parameter("band", "Ka");
        let specs = DownlinkMapper.map(&act, &config);

        assert_eq!(specs.len(), 2);
        assert!((specs[0].duration_s() - 20.0).abs() < 1e-9);
        assert_eq!(specs[1].end, offset_epoch(act.end, -10.0));
        assert!((specs[1].power.load_w - (80.0 + 75.0)).abs() < 1e-9);
        assert!((specs[1].data.as_ref().unwrap().rate_mbps - 600.0).abs() < 1e-9);
        assert!(DownlinkMapper.validate(&act, &config).is_empty());
    }

    #[test]
    fn test_long_pass_caps_acquisition() {
        let config = SimulationConfig::default();
        let specs = DownlinkMapper.map(&activity(900.0).with_parameter("band", "S"), &config);
        assert!((specs[0].duration_s() - 30.0).abs() < 1e-9);
        assert!((specs[1].duration_s() - 860.0).abs() < 1e-9);
    }

    #[test]
    fn test_band_defaults_with_warning() {
        let config = SimulationConfig::default();
        let act = activity(600.0).with_parameter("band", "L");
        let specs = DownlinkMapper.map(&act, &config);

        assert!((specs[1].power.load_w - (80.0 + RfBand::X.peak_power_w())).abs() < 1e-9);
        let events = DownlinkMapper.validate(&act, &config);
        assert_eq!(events.len(), 1);
        assert!(events[0].message.contains("unrecognized"));
    }

    #[test]
    fn test_pass_inside_margin_only_acquires() {
        let config = SimulationConfig::default();
        let specs = DownlinkMapper.map(&activity(8.0), &config);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].segment_type, SegmentType::DownlinkAcquisition);
    }
}
