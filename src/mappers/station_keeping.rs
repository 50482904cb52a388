use super::{
    ActivityMapper, AttitudeMode, SegmentSpec, SegmentType, ThrustDirection, ThrustGoal,
    ThrustProfile,
};
use crate::activity::Activity;
use crate::config::SimulationConfig;
use crate::events::{EventCategory, SimEvent};

/// One reduced-thrust, reduced-duty segment holding the reference altitude.
#[derive(Debug, Default, Clone, Copy)]
pub struct StationKeepingMapper;

impl ActivityMapper for StationKeepingMapper {
    fn map(&self, activity: &Activity, config: &SimulationConfig) -> Vec<SegmentSpec> {
        let keeping = &config.mappers.station_keeping;
        let spacecraft = &config.spacecraft;
        let target_altitude_km = activity
            .param_f64("target_altitude_km")
            .or(spacecraft.reference_altitude_km);

        let profile = ThrustProfile {
            thrust_n: spacecraft.thrust_n * keeping.thrust_fraction,
            duty_cycle: keeping.duty_cycle,
            // Refined per segment from the current orbit.
            direction: ThrustDirection::Prograde,
            goal: ThrustGoal::HoldAltitude(target_altitude_km),
        };
        let load_w = spacecraft.base_load_w
            + spacecraft.thruster_power_w * keeping.thrust_fraction * keeping.duty_cycle;

        vec![SegmentSpec::new(
            activity.start,
            activity.end,
            SegmentType::StationKeeping,
            AttitudeMode::ThrustVector,
            load_w,
        )
        .with_thrust(profile)]
    }

    fn validate(&self, activity: &Activity, config: &SimulationConfig) -> Vec<SimEvent> {
        let has_target = activity.param_f64("target_altitude_km").is_some()
            || config.spacecraft.reference_altitude_km.is_some();
        if has_target {
            return Vec::new();
        }
        vec![SimEvent::warning(
            activity.start,
            EventCategory::Validation,
            format!(
                "{}: missing parameter 'target_altitude_km', holding the initial orbit",
                activity.id
            ),
        )
        .with_activity(activity.id.clone())]
    }
}
