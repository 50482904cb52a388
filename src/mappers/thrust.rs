use super::{
    param_or_default, ActivityMapper, AttitudeMode, SegmentSpec, SegmentType, ThrustDirection,
    ThrustGoal, ThrustProfile,
};
use crate::activity::Activity;
use crate::config::SimulationConfig;
use crate::events::SimEvent;
use crate::propagation::{offset_epoch, seconds_between};

/// Rounding slack below which the last arc is stretched to the window end.
const SNAP_TO_END_S: f64 = 1e-3;

/// Orbit-lowering (or raising) burn split into arcs.
///
/// The burn defaults to the whole window. It is split into `ceil(burn / max_arc)` equal
/// arcs separated by coasts; when arcs plus coasts do not fit, the arcs shrink so the
/// pattern ends with the window. Leftover time after the last arc is a trailing coast.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThrustMapper;

struct ThrustParams {
    delta_altitude_km: f64,
    burn_s: f64,
    duty_cycle: f64,
}

impl ThrustMapper {
    fn params(activity: &Activity, events: Option<&mut Vec<SimEvent>>) -> ThrustParams {
        let window = activity.duration_s();
        let delta_altitude_km = param_or_default(activity, "delta_altitude_km", 0.0, events);
        let burn_s = activity
            .param_f64("burn_duration_s")
            .filter(|b| b.is_finite() && *b > 0.0)
            .map_or(window, |b| b.min(window));
        let duty_cycle = activity
            .param_f64("duty_cycle")
            .filter(|d| (0.0..=1.0).contains(d))
            .unwrap_or(1.0);

        ThrustParams {
            delta_altitude_km,
            burn_s,
            duty_cycle,
        }
    }
}

impl ActivityMapper for ThrustMapper {
    fn map(&self, activity: &Activity, config: &SimulationConfig) -> Vec<SegmentSpec> {
        let limits = &config.mappers.thrust;
        let spacecraft = &config.spacecraft;
        let params = Self::params(activity, None);
        let window = activity.duration_s();

        let arc_count = (params.burn_s / limits.max_arc_s).ceil().max(1.0) as usize;
        let gaps = (arc_count - 1) as f64;
        let mut coast_s = limits.coast_s;
        let mut arc_s = params.burn_s / arc_count as f64;
        if params.burn_s + gaps * coast_s > window {
            arc_s = (window - gaps * coast_s) / arc_count as f64;
            if arc_s <= 0.0 {
                coast_s = 0.0;
                arc_s = window / arc_count as f64;
            }
        }

        let direction = if params.delta_altitude_km < 0.0 {
            ThrustDirection::Retrograde
        } else {
            ThrustDirection::Prograde
        };
        let profile = ThrustProfile {
            thrust_n: spacecraft.thrust_n,
            duty_cycle: params.duty_cycle,
            direction,
            goal: ThrustGoal::DeltaAltitude(params.delta_altitude_km),
        };
        let thrust_load = spacecraft.base_load_w + spacecraft.thruster_power_w * params.duty_cycle;

        let mut specs = Vec::with_capacity(2 * arc_count);
        let mut cursor = activity.start;
        for index in 0..arc_count {
            let mut arc_end = offset_epoch(cursor, arc_s).min(activity.end);
            if index + 1 == arc_count && seconds_between(arc_end, activity.end) < SNAP_TO_END_S {
                arc_end = activity.end;
            }
            specs.push(
                SegmentSpec::new(
                    cursor,
                    arc_end,
                    SegmentType::Thrust,
                    AttitudeMode::ThrustVector,
                    thrust_load,
                )
                .with_thrust(profile)
                .with_parameter("arc_index", index as u64)
                .with_parameter("arc_count", arc_count as u64),
            );
            cursor = arc_end;

            let coast_end = if index + 1 < arc_count {
                offset_epoch(cursor, coast_s).min(activity.end)
            } else {
                activity.end
            };
            if coast_end > cursor {
                specs.push(SegmentSpec::new(
                    cursor,
                    coast_end,
                    SegmentType::Coast,
                    AttitudeMode::NadirPointing,
                    spacecraft.base_load_w,
                ));
                cursor = coast_end;
            }
        }
        specs
    }

    fn validate(&self, activity: &Activity, _config: &SimulationConfig) -> Vec<SimEvent> {
        let mut events = Vec::new();
        Self::params(activity, Some(&mut events));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityKind;
    use chrono::{TimeZone, Utc};

    fn activity(duration_s: f64, delta_altitude_km: f64) -> Activity {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        Activity::new("thr-1", ActivityKind::ThrustLowering, start, offset_epoch(start, duration_s))
            .with_parameter("delta_altitude_km", delta_altitude_km)
    }

    fn count(specs: &[SegmentSpec], kind: SegmentType) -> usize {
        specs.iter().filter(|s| s.segment_type == kind).count()
    }

    #[test]
    fn test_long_burn_splits_into_arcs_with_coasts() {
        let config = SimulationConfig::default();
        let act = activity(5400.0, -5.0);
        let specs = ThrustMapper.map(&act, &config);

        assert_eq!(count(&specs, SegmentType::Thrust), 3);
        assert_eq!(count(&specs, SegmentType::Coast), 2);
        assert_eq!(specs.last().unwrap().end, act.end);
        for spec in specs.iter().filter(|s| s.segment_type == SegmentType::Thrust) {
            assert!(spec.duration_s() <= config.mappers.thrust.max_arc_s + 1e-6);
            assert_eq!(spec.thrust.unwrap().direction, ThrustDirection::Retrograde);
        }
        assert!(specs.windows(2).all(|w| w[0].end == w[1].start));
    }

    #[test]
    fn test_short_explicit_burn_leaves_trailing_coast() {
        let config = SimulationConfig::default();
        let act = activity(3600.0, 2.0).with_parameter("burn_duration_s", 1200.0);
        let specs = ThrustMapper.map(&act, &config);

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].segment_type, SegmentType::Thrust);
        assert!((specs[0].duration_s() - 1200.0).abs() < 1e-6);
        assert_eq!(specs[0].thrust.unwrap().direction, ThrustDirection::Prograde);
        assert_eq!(specs[1].segment_type, SegmentType::Coast);
        assert_eq!(specs[1].end, act.end);
    }

    #[test]
    fn test_burn_fits_with_full_coasts() {
        let config = SimulationConfig::default();
        let act = activity(7200.0, -1.0).with_parameter("burn_duration_s", 3000.0);
        let specs = ThrustMapper.map(&act, &config);

        let types: Vec<_> = specs.iter().map(|s| s.segment_type).collect();
        assert_eq!(
            types,
            vec![SegmentType::Thrust, SegmentType::Coast, SegmentType::Thrust, SegmentType::Coast]
        );
        assert!((specs[1].duration_s() - 600.0).abs() < 1e-6);
        assert!((specs[0].duration_s() - 1500.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_delta_altitude_warns() {
        let config = SimulationConfig::default();
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let act = Activity::new("thr-2", ActivityKind::ThrustLowering, start, offset_epoch(start, 600.0));
        assert_eq!(ThrustMapper.validate(&act, &config).len(), 1);
    }
}
