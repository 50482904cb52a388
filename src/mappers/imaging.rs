use super::{
    param_or_default, ActivityMapper, AttitudeMode, DataDirection, DataProfile, SegmentSpec,
    SegmentType,
};
use crate::activity::Activity;
use crate::config::SimulationConfig;
use crate::events::{EventCategory, SimEvent};
use crate::propagation::offset_epoch;
use crate::storage::DataPriority;

const DEFAULT_PRIORITY: DataPriority = DataPriority::Medium;

/// Slew to the target, then collect.
///
/// Slew time is `off_nadir_deg / slew_rate`, capped at half the window so some imaging
/// always happens. The collection rate scales as `reference_gsd / gsd`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImagingMapper;

struct ImagingParams {
    off_nadir_deg: f64,
    gsd_m: f64,
    priority: DataPriority,
}

impl ImagingMapper {
    fn params(
        activity: &Activity,
        config: &SimulationConfig,
        events: Option<&mut Vec<SimEvent>>,
    ) -> ImagingParams {
        let defaults = &config.mappers.imaging;
        let mut scratch = Vec::new();
        let sink = events.unwrap_or(&mut scratch);

        let off_nadir_deg = param_or_default(
            activity,
            "off_nadir_deg",
            defaults.default_off_nadir_deg,
            Some(&mut *sink),
        )
        .abs();
        let mut gsd_m = param_or_default(activity, "gsd_m", defaults.default_gsd_m, Some(&mut *sink));
        if gsd_m <= 0.0 {
            sink.push(
                SimEvent::warning(
                    activity.start,
                    EventCategory::Validation,
                    format!("{}: gsd_m must be positive, using {}", activity.id, defaults.default_gsd_m),
                )
                .with_activity(activity.id.clone()),
            );
            gsd_m = defaults.default_gsd_m;
        }
        let priority = activity
            .param_str("priority")
            .and_then(DataPriority::parse)
            .unwrap_or(DEFAULT_PRIORITY);

        ImagingParams {
            off_nadir_deg,
            gsd_m,
            priority,
        }
    }
}

impl ActivityMapper for ImagingMapper {
    fn map(&self, activity: &Activity, config: &SimulationConfig) -> Vec<SegmentSpec> {
        let imaging = &config.mappers.imaging;
        let base_load = config.spacecraft.base_load_w;
        let params = Self::params(activity, config, None);

        let slew_s = (params.off_nadir_deg / imaging.slew_rate_deg_s).min(activity.duration_s() / 2.0);
        let mut specs = Vec::with_capacity(2);
        let mut collect_start = activity.start;

        if slew_s > 0.0 {
            collect_start = offset_epoch(activity.start, slew_s);
            specs.push(
                SegmentSpec::new(
                    activity.start,
                    collect_start,
                    SegmentType::Slew,
                    AttitudeMode::Slewing,
                    base_load + imaging.slew_power_w,
                )
                .with_parameter("off_nadir_deg", params.off_nadir_deg),
            );
        }

        let rate_mbps = imaging.base_data_rate_mbps * imaging.reference_gsd_m / params.gsd_m;
        specs.push(
            SegmentSpec::new(
                collect_start,
                activity.end,
                SegmentType::Imaging,
                AttitudeMode::TargetPointing,
                base_load + imaging.payload_power_w,
            )
            .with_data(DataProfile {
                direction: DataDirection::Generate,
                rate_mbps,
                priority: params.priority,
                data_type: "image".to_string(),
                priority_order: false,
            })
            .with_parameter("gsd_m", params.gsd_m),
        );
        specs
    }

    fn validate(&self, activity: &Activity, config: &SimulationConfig) -> Vec<SimEvent> {
        let mut events = Vec::new();
        Self::params(activity, config, Some(&mut events));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityKind;
    use crate::events::Severity;
    use chrono::{TimeZone, Utc};

    fn activity(duration_s: f64) -> Activity {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        Activity::new("img-1", ActivityKind::Imaging, start, offset_epoch(start, duration_s))
    }

    #[test]
    fn test_slew_then_collect() {
        let config = SimulationConfig::default();
        let act = activity(300.0).with_parameter("off_nadir_deg", 30.0).with_parameter("gsd_m", 0.5);
        let specs = ImagingMapper.map(&act, &config);

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].segment_type, SegmentType::Slew);
        assert!((specs[0].duration_s() - 30.0).abs() < 1e-9);
        assert_eq!(specs[1].start, specs[0].end);

        let data = specs[1].data.as_ref().unwrap();
        assert!((data.rate_mbps - 800.0).abs() < 1e-9);
        assert!(ImagingMapper.validate(&act, &config).is_empty());
    }

    #[test]
    fn test_nadir_imaging_has_no_slew() {
        let config = SimulationConfig::default();
        let act = activity(120.0).with_parameter("off_nadir_deg", 0.0).with_parameter("gsd_m", 1.0);
        let specs = ImagingMapper.map(&act, &config);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].segment_type, SegmentType::Imaging);
    }

    #[test]
    fn test_slew_capped_at_half_window() {
        let config = SimulationConfig::default();
        let act = activity(40.0).with_parameter("off_nadir_deg", 45.0).with_parameter("gsd_m", 1.0);
        let specs = ImagingMapper.map(&act, &config);
        assert!((specs[0].duration_s() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_parameters_warn_and_default() {
        let config = SimulationConfig::default();
        let act = activity(300.0);
        let events = ImagingMapper.validate(&act, &config);

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.severity == Severity::Warning));
        assert!(events.iter().all(|e| e.category == EventCategory::Validation));

        let specs = ImagingMapper.map(&act, &config);
        assert!((specs[0].duration_s() - 20.0).abs() < 1e-9);
    }
}
