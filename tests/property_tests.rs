use chrono::{TimeZone, Utc};
use nalgebra::Vector3;
use satmission::access::GroundStation;
use satmission::config::{PropagatorConfig, StorageConfig};
use satmission::mappers::{ActivityMapper, SegmentType, ThrustMapper};
use satmission::modes::{ModeStateMachine, SpacecraftMode};
use satmission::propagation::{offset_epoch, AnalyticalPropagator, OrbitState};
use satmission::storage::{DataPriority, StorageModel};
use satmission::*;

fn t0() -> Epoch {
    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
}

fn plan(hours: f64, activities: Vec<Activity>) -> Plan {
    Plan {
        plan_id: "properties".into(),
        spacecraft_id: "sat-1".into(),
        start: t0(),
        end: offset_epoch(t0(), hours * 3600.0),
        activities,
        ground_stations: Vec::new(),
    }
}

fn minutes(m: f64) -> Epoch {
    offset_epoch(t0(), m * 60.0)
}

#[test]
fn test_battery_soc_stays_in_bounds_under_heavy_load() {
    let mut config = SimulationConfig::default();
    config.spacecraft.base_load_w = 2500.0;
    let initial = RunnerState::circular(t0(), 500.0, 150.0, 20.0);

    let result = run_simulation(&plan(3.0, Vec::new()), &initial, Fidelity::Low, &config).unwrap();

    assert!(result.profile.iter().all(|p| (0.0..=1.0).contains(&p.battery_soc)));
    assert!(result.summary.violation_count > 0);
    assert_eq!(result.final_state.battery_soc, 0.0);
    assert_eq!(result.final_state.mode, SpacecraftMode::Safe);
}

#[test]
fn test_storage_stays_in_bounds_when_imaging_overflows() {
    let mut config = SimulationConfig::default();
    config.mappers.imaging.base_data_rate_mbps = 5000.0;
    let initial = RunnerState::circular(t0(), 500.0, 150.0, 20.0);
    let activities = vec![
        Activity::new("img-1", ActivityKind::Imaging, minutes(5.0), minutes(20.0)),
        Activity::new("img-2", ActivityKind::Imaging, minutes(30.0), minutes(45.0)),
    ];

    let result = run_simulation(&plan(1.0, activities), &initial, Fidelity::Low, &config).unwrap();

    let capacity = config.storage.capacity_gb;
    assert!(result
        .profile
        .iter()
        .all(|p| p.storage_used_gb >= 0.0 && p.storage_used_gb <= capacity));
    assert!(result
        .events
        .iter()
        .any(|e| e.category == EventCategory::Storage && e.severity == Severity::Violation));
}

#[test]
fn test_access_windows_open_before_they_close() {
    let mut plan = plan(12.0, Vec::new());
    plan.ground_stations = vec![GroundStation::new("equator", 0.0, 0.0), GroundStation::new("quito", -0.2, -78.5)];
    let initial = RunnerState::circular(t0(), 500.0, 150.0, 20.0);

    let result = run_simulation(&plan, &initial, Fidelity::Low, &SimulationConfig::default()).unwrap();

    let windows: Vec<_> = result.access_windows.iter().flat_map(|s| s.windows.iter()).collect();
    assert!(!windows.is_empty());
    assert!(windows.iter().all(|w| w.aos() < w.los()));
}

#[test]
fn test_disallowed_transition_leaves_mode_unchanged() {
    let mut modes = ModeStateMachine::new(SpacecraftMode::Safe, t0());
    let result = modes.transition(SpacecraftMode::Imaging, minutes(1.0), "image", 1.0, false, false);

    assert!(!result.success);
    assert!(result.rejection.is_some());
    assert_eq!(modes.current_mode(), SpacecraftMode::Safe);
    assert_eq!(modes.counts().rejected, 1);
}

#[test]
fn test_identical_runs_are_identical() {
    let activities = vec![
        Activity::new("img", ActivityKind::Imaging, minutes(10.0), minutes(25.0)),
        Activity::new("dl", ActivityKind::Downlink, minutes(40.0), minutes(55.0)),
        Activity::new("burn", ActivityKind::ThrustLowering, minutes(60.0), minutes(120.0))
            .with_parameter("delta_altitude_km", -2.0),
    ];
    let plan = plan(3.0, activities);
    let initial = RunnerState::circular(t0(), 500.0, 150.0, 20.0);
    let config = SimulationConfig::default();

    let a = run_simulation(&plan, &initial, Fidelity::Low, &config).unwrap();
    let b = run_simulation(&plan, &initial, Fidelity::Low, &config).unwrap();

    assert!((a.final_state.position - b.final_state.position).norm() < 1e-9);
    assert!((a.final_state.velocity - b.final_state.velocity).norm() < 1e-9);
    assert_eq!(a.summary.info_count, b.summary.info_count);
    assert_eq!(a.summary.warning_count, b.summary.warning_count);
    assert_eq!(a.summary.violation_count, b.summary.violation_count);
    assert_eq!(a.storage_transactions, b.storage_transactions);
}

#[test]
fn test_maneuver_then_propagate_returns_post_maneuver_velocity() {
    let r = 6878.137;
    let mut propagator = AnalyticalPropagator::new(&PropagatorConfig::default(), 1600.0);
    propagator
        .initialize(&OrbitState {
            epoch: t0(),
            position: Vector3::new(r, 0.0, 0.0),
            velocity: Vector3::new(0.0, 7.612, 0.0),
            mass_kg: 150.0,
        })
        .unwrap();

    let burn_epoch = minutes(30.0);
    let result = propagator.apply_maneuver(Vector3::new(0.0, 0.0, 0.002), burn_epoch).unwrap();
    let after = propagator.propagate(burn_epoch).unwrap();

    assert_eq!(after.velocity, result.post_maneuver.velocity);
    assert!(result.mass_after_kg < result.mass_before_kg);
}

#[test]
fn test_high_priority_fill_evicts_low_priority_data() {
    let config = StorageConfig {
        capacity_gb: 100.0,
        reserved_gb: 0.0,
        warning_fraction: 0.9,
    };
    let mut storage = StorageModel::new(&config, 7);
    for i in 0_u32..9 {
        storage.fill(10.0, offset_epoch(t0(), f64::from(i)), "survey", DataPriority::Low, "image");
    }

    let outcome = storage.fill(20.0, minutes(1.0), "target", DataPriority::High, "image");

    assert!(outcome.evicted_gb >= 20.0);
    assert!((outcome.stored_gb - 20.0).abs() < 1e-9);
    let high: f64 = storage
        .packets()
        .iter()
        .filter(|p| p.priority == DataPriority::High)
        .map(|p| p.size_gb)
        .sum();
    assert!((high - 20.0).abs() < 1e-9);
    assert!(storage.used_gb() <= storage.capacity_gb());
}

#[test]
fn test_six_hour_idle_leo_stays_near_500_km() {
    let initial = RunnerState {
        epoch: t0(),
        position: Vector3::new(6878.137, 0.0, 0.0),
        velocity: Vector3::new(0.0, 7.612, 0.0),
        mass_kg: 150.0,
        propellant_kg: 20.0,
        battery_soc: 0.9,
        storage_used_gb: 0.0,
        mode: SpacecraftMode::Standby,
    };

    let result = run_simulation(&plan(6.0, Vec::new()), &initial, Fidelity::Low, &SimulationConfig::default())
        .unwrap();

    assert!(result.final_state.specific_energy() < 0.0);
    assert!((result.final_state.altitude_km() - 500.0).abs() < 10.0);
    assert_eq!(result.final_state.epoch, offset_epoch(t0(), 6.0 * 3600.0));
    assert_eq!(result.summary.violation_count, 0);
}

#[test]
fn test_fill_above_warning_fraction_is_warning_not_violation() {
    let config = StorageConfig {
        capacity_gb: 100.0,
        reserved_gb: 0.0,
        warning_fraction: 0.9,
    };
    let mut storage = StorageModel::new(&config, 7);
    let outcome = storage.fill(91.0, t0(), "img", DataPriority::Medium, "image");

    assert!(outcome.events.iter().any(|e| e.severity == Severity::Warning));
    assert!(outcome.events.iter().all(|e| e.severity != Severity::Violation));
    assert!((storage.used_gb() - 91.0).abs() < 1e-9);
}

#[test]
fn test_long_lowering_burn_is_split_by_coasts() {
    let mut config = SimulationConfig::default();
    config.mappers.thrust.max_arc_s = 1800.0;
    let activity = Activity::new("lower", ActivityKind::ThrustLowering, t0(), offset_epoch(t0(), 5400.0))
        .with_parameter("delta_altitude_km", -5.0);

    let specs = ThrustMapper.map(&activity, &config);
    let types: Vec<SegmentType> = specs.iter().map(|s| s.segment_type).collect();

    assert!(types.iter().filter(|t| **t == SegmentType::Thrust).count() >= 2);
    let first_thrust = types.iter().position(|t| *t == SegmentType::Thrust).unwrap();
    let last_thrust = types.iter().rposition(|t| *t == SegmentType::Thrust).unwrap();
    assert!(types[first_thrust..last_thrust].contains(&SegmentType::Coast));
}
