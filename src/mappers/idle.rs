use super::{ActivityMapper, AttitudeMode, SegmentSpec, SegmentType};
use crate::activity::Activity;
use crate::config::SimulationConfig;
use crate::propagation::Epoch;

/// Nadir-pointing bus-only segment covering the whole window.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleMapper;

impl IdleMapper {
    pub fn segment(start: Epoch, end: Epoch, config: &SimulationConfig) -> SegmentSpec {
        SegmentSpec::new(
            start,
            end,
            SegmentType::Idle,
            AttitudeMode::NadirPointing,
            config.spacecraft.base_load_w,
        )
    }
}

impl ActivityMapper for IdleMapper {
    fn map(&self, activity: &Activity, config: &SimulationConfig) -> Vec<SegmentSpec> {
        vec![Self::segment(activity.start, activity.end, config)]
    }
}
