//! Mission orchestrator.
//!
//! [`SimulationContext`] owns the registries built once per context (mappers, propagator
//! backends, access service). Each [`SimulationContext::run`] creates its own propagator,
//! recorder and mode machine and threads one [`RunnerState`] through gap and activity
//! segments until the plan end.

pub mod handlers;
pub mod state;

pub use handlers::EffectHandler;
pub use state::{RunnerState, StateDeltas};

use crate::access::{AccessWindowService, GeometricAccessService, StationAccess};
use crate::activity::{Activity, ActivityKind, Plan};
use crate::config::SimulationConfig;
use crate::error::SimError;
use crate::events::{EventCategory, EventLog, SimEvent};
use crate::mappers::{IdleMapper, MapperRegistry, SegmentSpec, SegmentType, ThrustGoal};
use crate::modes::{ModeStateMachine, ModeTransition, SpacecraftMode, TransitionCounts};
use crate::power::{EclipseInterval, PowerModel};
use crate::propagation::{
    seconds_between, EphemerisPoint, Epoch, Fidelity, Propagator, PropagatorBackends,
    PropagatorSelection, R_EARTH_KM,
};
use crate::storage::{DataPriority, StorageModel, StorageStats, StorageTransaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One row of the time-indexed resource profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub epoch: Epoch,
    pub altitude_km: f64,
    pub battery_soc: f64,
    pub storage_used_gb: f64,
    pub propellant_kg: f64,
    pub mode: SpacecraftMode,
    pub in_eclipse: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSegment {
    pub start: Epoch,
    pub end: Epoch,
    pub segment_type: SegmentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_kind: Option<ActivityKind>,
    pub mode: SpacecraftMode,
    pub load_w: f64,
    pub generated_wh: f64,
    pub consumed_wh: f64,
    pub eclipse_fraction: f64,
    pub ephemeris: Vec<EphemerisPoint>,
    pub events: Vec<SimEvent>,
    pub deltas: StateDeltas,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub plan_id: String,
    pub spacecraft_id: String,
    pub seed: u64,
    pub requested_fidelity: Fidelity,
    pub used_fidelity: Fidelity,
    pub propagator: String,
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degradation_reason: Option<String>,
    pub info_count: u32,
    pub warning_count: u32,
    pub violation_count: u32,
    pub segment_count: usize,
    pub activities_run: usize,
    pub activities_skipped: usize,
    pub eclipse_count: usize,
    pub deltas: StateDeltas,
    pub storage: StorageStats,
    /// Data left on board at the end of the run, most important first.
    pub storage_by_priority: Vec<(DataPriority, f64)>,
    pub mode_transitions: TransitionCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub profile: Vec<ResourceSample>,
    pub ephemeris: Vec<EphemerisPoint>,
    pub segments: Vec<SimulationSegment>,
    pub events: Vec<SimEvent>,
    pub final_state: RunnerState,
    pub summary: RunSummary,
    pub storage_transactions: Vec<StorageTransaction>,
    pub mode_transitions: Vec<ModeTransition>,
    pub eclipse_intervals: Vec<EclipseInterval>,
    pub access_windows: Vec<StationAccess>,
}

pub struct SimulationContext {
    config: SimulationConfig,
    mappers: MapperRegistry,
    backends: PropagatorBackends,
    access: Box<dyn AccessWindowService>,
}

impl SimulationContext {
    pub fn new(config: SimulationConfig) -> Result<Self, SimError> {
        config.validate()?;
        Ok(Self {
            config,
            mappers: MapperRegistry::new(),
            backends: PropagatorBackends::detect(),
            access: Box::new(GeometricAccessService),
        })
    }

    #[must_use]
    pub fn with_backends(mut self, backends: PropagatorBackends) -> Self {
        self.backends = backends;
        self
    }

    #[must_use]
    pub fn with_access_service(mut self, access: Box<dyn AccessWindowService>) -> Self {
        self.access = access;
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn mappers(&self) -> &MapperRegistry {
        &self.mappers
    }

    /// Simulate `plan` from `initial`. Only malformed input (and a missing backend under
    /// `strict_fidelity`) fails. Everything else, including propagator failures mid-run,
    /// is reported as events.
    pub fn run(
        &self,
        plan: &Plan,
        initial: &RunnerState,
        fidelity: Fidelity,
    ) -> Result<SimulationResult, SimError> {
        check_inputs(plan, initial)?;
        let selection = self.backends.select(fidelity, &self.config)?;
        self.run_selected(plan, initial, selection)
    }

    /// Simulate with a caller-supplied propagator instead of one chosen from the backends.
    /// `fidelity` is reported as both requested and used.
    pub fn run_with_propagator(
        &self,
        plan: &Plan,
        initial: &RunnerState,
        propagator: Box<dyn Propagator>,
        fidelity: Fidelity,
    ) -> Result<SimulationResult, SimError> {
        check_inputs(plan, initial)?;
        let selection = PropagatorSelection {
            propagator,
            requested: fidelity,
            used: fidelity,
            degradation: None,
        };
        self.run_selected(plan, initial, selection)
    }

    fn run_selected(
        &self,
        plan: &Plan,
        initial: &RunnerState,
        selection: PropagatorSelection,
    ) -> Result<SimulationResult, SimError> {
        let mut propagator = selection.propagator;
        propagator
            .initialize(&initial.orbit_state())
            .map_err(|e| SimError::Initialization(e.to_string()))?;

        info!(
            plan = %plan.plan_id,
            requested = %selection.requested,
            used = %selection.used,
            propagator = propagator.name(),
            "Starting simulation"
        );

        let mut events = EventLog::new();
        if let Some(degradation) = &selection.degradation {
            events.push(SimEvent::warning(
                initial.epoch,
                EventCategory::Backend,
                format!(
                    "requested {} fidelity unavailable, using {}: {}",
                    degradation.requested, degradation.used, degradation.reason
                ),
            ));
        }

        let mut storage = StorageModel::new(&self.config.storage, self.config.seed);
        events.extend(storage.preload(initial.storage_used_gb, initial.epoch));
        let reference_sma_km = self
            .config
            .spacecraft
            .reference_altitude_km
            .map_or_else(|| semi_major_axis(initial), |alt| R_EARTH_KM + alt);

        let mut run = Run {
            config: &self.config,
            mappers: &self.mappers,
            propagator,
            power: PowerModel::new(&self.config.power),
            storage,
            modes: ModeStateMachine::new(initial.mode, initial.epoch),
            state: initial.clone(),
            events,
            segments: Vec::new(),
            ephemeris: Vec::new(),
            profile: Vec::new(),
            last_eclipse: None,
            reference_sma_km,
            total_delta_v_m_s: 0.0,
            activities_run: 0,
            activities_skipped: 0,
        };
        run.state.storage_used_gb = run.storage.used_gb();
        run.state.clamp_resources(run.storage.capacity_gb());
        run.drain_propagator_notices(initial.epoch);
        run.execute(plan);

        let access_windows = self.check_access(plan, &run.ephemeris, &mut run.events);
        let eclipse_intervals = run.power.eclipse_intervals(&run.ephemeris);
        let counts = run.events.counts();

        let summary = RunSummary {
            plan_id: plan.plan_id.clone(),
            spacecraft_id: plan.spacecraft_id.clone(),
            seed: self.config.seed,
            requested_fidelity: selection.requested,
            used_fidelity: selection.used,
            propagator: run.propagator.name().to_string(),
            degraded: selection.degradation.is_some(),
            degradation_reason: selection.degradation.map(|d| d.reason),
            info_count: counts.info,
            warning_count: counts.warnings,
            violation_count: counts.violations,
            segment_count: run.segments.len(),
            activities_run: run.activities_run,
            activities_skipped: run.activities_skipped,
            eclipse_count: eclipse_intervals.len(),
            deltas: StateDeltas::between(initial, &run.state, run.total_delta_v_m_s),
            storage: run.storage.stats(),
            storage_by_priority: run.storage.usage_by_priority(),
            mode_transitions: run.modes.counts(),
        };
        info!(
            segments = summary.segment_count,
            warnings = summary.warning_count,
            violations = summary.violation_count,
            "Simulation complete"
        );

        Ok(SimulationResult {
            profile: run.profile,
            ephemeris: run.ephemeris,
            segments: run.segments,
            events: run.events.into_events(),
            final_state: run.state,
            summary,
            storage_transactions: run.storage.transactions().to_vec(),
            mode_transitions: run.modes.history().to_vec(),
            eclipse_intervals,
            access_windows,
        })
    }

    /// Compute passes for the plan's stations and flag downlinks outside all of them.
    fn check_access(
        &self,
        plan: &Plan,
        ephemeris: &[EphemerisPoint],
        events: &mut EventLog,
    ) -> Vec<StationAccess> {
        if plan.ground_stations.is_empty() || ephemeris.is_empty() {
            return Vec::new();
        }
        let access = self.access.compute_windows(ephemeris, &plan.ground_stations);

        for activity in plan.activities.iter().filter(|a| a.kind == ActivityKind::Downlink) {
            let covered = access
                .iter()
                .flat_map(|station| station.windows.iter())
                .any(|window| window.overlaps(activity.start, activity.end));
            if !covered {
                events.push(
                    SimEvent::warning(
                        activity.start,
                        EventCategory::Access,
                        format!("downlink {} falls outside every ground-station pass", activity.id),
                    )
                    .with_activity(activity.id.clone()),
                );
            }
        }
        access
    }
}

fn check_inputs(plan: &Plan, initial: &RunnerState) -> Result<(), SimError> {
    initial.validate()?;
    if plan.end < plan.start {
        return Err(SimError::Initialization(format!(
            "plan {} ends before it starts",
            plan.plan_id
        )));
    }
    Ok(())
}

/// Simulate with a fresh context built from `config`.
pub fn run_simulation(
    plan: &Plan,
    initial: &RunnerState,
    fidelity: Fidelity,
    config: &SimulationConfig,
) -> Result<SimulationResult, SimError> {
    SimulationContext::new(config.clone())?.run(plan, initial, fidelity)
}

/// Stationary samples at the segment bounds, used when the propagator cannot cover it.
fn held_ephemeris(state: &RunnerState, start: Epoch, end: Epoch) -> Vec<EphemerisPoint> {
    let mut points = vec![EphemerisPoint::new(start, state.position, state.velocity)];
    if end > start {
        points.push(EphemerisPoint::new(end, state.position, state.velocity));
    }
    points
}

fn semi_major_axis(state: &RunnerState) -> f64 {
    handlers::semi_major_axis_km(&EphemerisPoint::new(state.epoch, state.position, state.velocity))
}

/// Activity context carried into each of its segments.
struct ActivityScope<'p> {
    activity: &'p Activity,
    target_sma_km: Option<f64>,
}

/// Mutable state of one run.
struct Run<'c> {
    config: &'c SimulationConfig,
    mappers: &'c MapperRegistry,
    propagator: Box<dyn Propagator>,
    power: PowerModel,
    storage: StorageModel,
    modes: ModeStateMachine,
    state: RunnerState,
    events: EventLog,
    segments: Vec<SimulationSegment>,
    ephemeris: Vec<EphemerisPoint>,
    profile: Vec<ResourceSample>,
    last_eclipse: Option<bool>,
    reference_sma_km: f64,
    total_delta_v_m_s: f64,
    activities_run: usize,
    activities_skipped: usize,
}

impl Run<'_> {
    fn execute(&mut self, plan: &Plan) {
        for activity in plan.sorted_activities() {
            if let Some(reason) = self.skip_reason(activity, plan.end) {
                warn!(activity = %activity.id, reason, "Skipping activity");
                self.activities_skipped += 1;
                self.events.push(
                    SimEvent::warning(
                        activity.start,
                        EventCategory::Activity,
                        format!("activity {} skipped: {reason}", activity.id),
                    )
                    .with_activity(activity.id.clone()),
                );
                continue;
            }

            let mut window = activity.clone();
            if window.start < self.state.epoch {
                self.events.push(
                    SimEvent::warning(
                        self.state.epoch,
                        EventCategory::Activity,
                        format!(
                            "activity {} overlaps the previous one, truncated by {:.1} s",
                            activity.id,
                            seconds_between(activity.start, self.state.epoch)
                        ),
                    )
                    .with_activity(activity.id.clone()),
                );
                window.start = self.state.epoch;
            }
            if window.end > plan.end {
                self.events.push(
                    SimEvent::warning(
                        plan.end,
                        EventCategory::Activity,
                        format!("activity {} truncated at plan end", activity.id),
                    )
                    .with_activity(activity.id.clone()),
                );
                window.end = plan.end;
            }

            if window.start > self.state.epoch {
                self.run_gap(window.start);
            }
            self.run_activity(&window);
        }

        if self.state.epoch < plan.end {
            self.run_gap(plan.end);
        }
    }

    fn skip_reason(&self, activity: &Activity, plan_end: Epoch) -> Option<&'static str> {
        if activity.end <= activity.start {
            Some("empty or inverted window")
        } else if activity.start >= plan_end {
            Some("starts after plan end")
        } else if activity.end <= self.state.epoch {
            Some("ends before the current simulation time")
        } else {
            None
        }
    }

    fn run_gap(&mut self, until: Epoch) {
        let start = self.state.epoch;
        let in_eclipse = self.power.is_in_eclipse(&self.state.position, start);
        let result = self.modes.request_mode(
            SpacecraftMode::Standby,
            start,
            "idle gap",
            self.state.battery_soc,
            in_eclipse,
        );
        self.events.extend(result.events);

        let spec = IdleMapper::segment(start, until, self.config);
        self.run_segment(&spec, None);
    }

    fn run_activity(&mut self, activity: &Activity) {
        debug!(activity = %activity.id, kind = %activity.kind, "Running activity");
        self.activities_run += 1;
        let tag = |event: SimEvent| event.with_activity(activity.id.clone());

        let validation = self.mappers.validate(activity, self.config);
        self.events.extend(validation.into_iter().map(tag));
        if !activity.kind.is_registered() {
            self.events.push(tag(SimEvent::warning(
                activity.start,
                EventCategory::Activity,
                format!("unregistered activity kind '{}', running as idle", activity.kind),
            )));
        }

        let in_eclipse = self.power.is_in_eclipse(&self.state.position, self.state.epoch);
        let nominal = ModeStateMachine::get_mode_for_activity(&activity.kind);
        let result = self.modes.request_mode(
            nominal,
            self.state.epoch,
            &activity.id,
            self.state.battery_soc,
            in_eclipse,
        );
        self.events.extend(result.events.into_iter().map(tag));

        let specs = self.mappers.map(activity, self.config);
        let target_sma_km = specs
            .iter()
            .find_map(|spec| spec.thrust)
            .map(|profile| match profile.goal {
                ThrustGoal::DeltaAltitude(delta_km) => semi_major_axis(&self.state) + delta_km,
                ThrustGoal::HoldAltitude(Some(altitude_km)) => R_EARTH_KM + altitude_km,
                ThrustGoal::HoldAltitude(None) => self.reference_sma_km,
            });
        let scope = ActivityScope {
            activity,
            target_sma_km,
        };

        for spec in &specs {
            if spec.end <= self.state.epoch {
                continue;
            }
            if spec.start > self.state.epoch {
                let filler = IdleMapper::segment(self.state.epoch, spec.start, self.config);
                self.run_segment(&filler, Some(&scope));
            }
            self.run_segment(spec, Some(&scope));
        }

        // Uncovered tail, e.g. the downlink signal-loss margin.
        if self.state.epoch < activity.end {
            let tail = IdleMapper::segment(self.state.epoch, activity.end, self.config);
            self.run_segment(&tail, Some(&scope));
        }
    }

    fn run_segment(&mut self, spec: &SegmentSpec, scope: Option<&ActivityScope<'_>>) {
        let start = self.state.epoch;
        let end = spec.end;
        let duration_s = seconds_between(start, end);
        let before = self.state.clone();
        let mode = self.modes.current_mode();
        let activity_id = scope.map(|s| s.activity.id.clone());
        let source = activity_id.clone().unwrap_or_else(|| "idle".to_string());
        let mut segment_events = Vec::new();
        let mut delta_v_m_s = 0.0;

        let handler = EffectHandler::for_segment(spec);
        if let (EffectHandler::Thrust, Some(profile), Some(target)) =
            (handler, spec.thrust, scope.and_then(|s| s.target_sma_km))
        {
            match handlers::apply_thrust(
                self.propagator.as_mut(),
                spec,
                &profile,
                target,
                &self.state,
                self.config.spacecraft.isp_s,
            ) {
                Ok(outcome) => {
                    delta_v_m_s = outcome.delta_v_km_s * 1000.0;
                    self.state.propellant_kg -= outcome.propellant_used_kg;
                    if let Some(mass) = outcome.mass_after_kg {
                        self.state.mass_kg = mass;
                    }
                    segment_events.extend(outcome.events);
                }
                Err(e) => {
                    warn!(segment_start = %start, error = %e, "Maneuver failed");
                    segment_events.push(SimEvent::violation(
                        start,
                        EventCategory::Propagation,
                        format!("maneuver not applied: {e}"),
                    ));
                }
            }
        }

        let ephemeris = match self.propagator.propagate_range(start, end, self.config.time_step_s) {
            Ok(points) => points,
            Err(e) => {
                warn!(segment_start = %start, error = %e, "Propagation failed, holding state");
                segment_events.push(SimEvent::violation(
                    start,
                    EventCategory::Propagation,
                    format!("propagation failed, orbit held at last good state: {e}"),
                ));
                held_ephemeris(&before, start, end)
            }
        };
        segment_events.extend(self.drain_notices_at(start));

        if let Some(point) = ephemeris.iter().find(|p| p.position.norm() <= R_EARTH_KM) {
            warn!(epoch = %point.epoch, "Trajectory below the surface");
            segment_events.push(SimEvent::violation(
                point.epoch,
                EventCategory::Propagation,
                format!(
                    "trajectory below the Earth's surface (radius {:.1} km)",
                    point.position.norm()
                ),
            ));
        }

        // Battery: running clamp over the cumulative SOC deltas.
        let integration = self.power.integrate(&ephemeris, spec.power.load_w);
        let mut soc_trace = Vec::with_capacity(ephemeris.len());
        let mut soc = before.battery_soc;
        let mut previous_delta = 0.0;
        let mut depleted = false;
        for cumulative in &integration.interval_soc {
            let unclamped = soc + (cumulative - previous_delta);
            previous_delta = *cumulative;
            if unclamped < 0.0 {
                depleted = true;
            }
            soc = unclamped.clamp(0.0, 1.0);
            soc_trace.push(soc);
        }
        if depleted {
            warn!(segment_start = %start, load_w = spec.power.load_w, "Battery depleted");
            segment_events.push(SimEvent::violation(
                end,
                EventCategory::Power,
                format!("battery depleted during {:?} segment ({:.0} W load)", spec.segment_type, spec.power.load_w),
            ));
        }

        let storage_before = self.storage.used_gb();
        match (handler, spec.data.as_ref()) {
            (EffectHandler::Imaging, Some(data)) => {
                segment_events.extend(handlers::apply_imaging(&mut self.storage, data, duration_s, end, &source));
            }
            (EffectHandler::Downlink, Some(data)) => {
                segment_events.extend(handlers::apply_downlink(&mut self.storage, data, duration_s, end, &source));
            }
            _ => {}
        }
        let purged = self.storage.purge_expired(end);
        if purged > 0.0 {
            segment_events.push(SimEvent::info(
                end,
                EventCategory::Storage,
                format!("{purged:.3} GB of expired data deleted"),
            ));
        }

        // Eclipse transitions inside the segment.
        let eclipse_flags: Vec<bool> = ephemeris
            .iter()
            .map(|p| self.power.is_in_eclipse(&p.position, p.epoch))
            .collect();
        for (point, &shadowed) in ephemeris.iter().zip(&eclipse_flags) {
            if let Some(previous) = self.last_eclipse {
                if previous != shadowed {
                    let what = if shadowed { "eclipse entry" } else { "eclipse exit" };
                    segment_events.push(SimEvent::info(point.epoch, EventCategory::Eclipse, what));
                }
            }
            self.last_eclipse = Some(shadowed);
        }

        // Advance state from the last ephemeris point.
        if let Some(last) = ephemeris.last() {
            self.state.epoch = last.epoch;
            self.state.position = last.position;
            self.state.velocity = last.velocity;
        }
        self.state.battery_soc = soc;
        self.state.storage_used_gb = self.storage.used_gb();
        self.state.clamp_resources(self.storage.capacity_gb());

        let end_in_eclipse = eclipse_flags.last().copied().unwrap_or(false);
        segment_events.extend(self.modes.check_mode_constraints(end, self.state.battery_soc, end_in_eclipse));
        self.state.mode = self.modes.current_mode();

        // Profile rows; the first point repeats the previous segment's last one.
        let storage_after = self.state.storage_used_gb;
        let last_index = ephemeris.len().saturating_sub(1);
        let skip_first = self.ephemeris.last().is_some_and(|p| Some(p.epoch) == ephemeris.first().map(|q| q.epoch));
        for (index, point) in ephemeris.iter().enumerate() {
            if index == 0 && skip_first {
                continue;
            }
            self.profile.push(ResourceSample {
                epoch: point.epoch,
                altitude_km: point.altitude_km,
                battery_soc: soc_trace[index],
                storage_used_gb: if index == last_index { storage_after } else { storage_before },
                propellant_kg: if index == last_index { self.state.propellant_kg } else { before.propellant_kg },
                mode: if index == last_index { self.state.mode } else { mode },
                in_eclipse: eclipse_flags[index],
            });
            self.ephemeris.push(point.clone());
        }

        let segment_events: Vec<SimEvent> = match &activity_id {
            Some(id) => segment_events
                .into_iter()
                .map(|e| if e.activity_id.is_none() { e.with_activity(id.clone()) } else { e })
                .collect(),
            None => segment_events,
        };
        self.events.extend(segment_events.iter().cloned());
        self.total_delta_v_m_s += delta_v_m_s;

        self.segments.push(SimulationSegment {
            start,
            end,
            segment_type: spec.segment_type,
            activity_id,
            activity_kind: scope.map(|s| s.activity.kind.clone()),
            mode,
            load_w: spec.power.load_w,
            generated_wh: integration.generated_wh,
            consumed_wh: integration.consumed_wh,
            eclipse_fraction: integration.eclipse_fraction,
            deltas: StateDeltas::between(&before, &self.state, delta_v_m_s),
            ephemeris,
            events: segment_events,
        });
    }

    fn drain_notices_at(&mut self, epoch: Epoch) -> Vec<SimEvent> {
        self.propagator
            .drain_notices()
            .into_iter()
            .map(|notice| SimEvent::warning(epoch, EventCategory::Propagation, notice))
            .collect()
    }

    fn drain_propagator_notices(&mut self, epoch: Epoch) {
        let notices = self.drain_notices_at(epoch);
        self.events.extend(notices);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PropagationError;
    use crate::events::Severity;
    use crate::propagation::{offset_epoch, AnalyticalPropagator, ManeuverResult, OrbitState};
    use chrono::{TimeZone, Utc};
    use nalgebra::Vector3;

    /// Analytical propagation that breaks down after `fails_after`.
    struct BreaksDownAfter {
        inner: AnalyticalPropagator,
        fails_after: Epoch,
    }

    impl BreaksDownAfter {
        fn boxed(fails_after: Epoch) -> Box<dyn Propagator> {
            let config = SimulationConfig::default();
            Box::new(Self {
                inner: AnalyticalPropagator::new(&config.propagator, config.spacecraft.isp_s),
                fails_after,
            })
        }
    }

    impl Propagator for BreaksDownAfter {
        fn name(&self) -> &'static str {
            "breaks-down-after"
        }

        fn initialize(&mut self, state: &OrbitState) -> Result<(), PropagationError> {
            self.inner.initialize(state)
        }

        fn propagate(&mut self, epoch: Epoch) -> Result<EphemerisPoint, PropagationError> {
            if epoch > self.fails_after {
                return Err(PropagationError::InvalidState(format!("integration diverged at {epoch}")));
            }
            self.inner.propagate(epoch)
        }

        fn apply_maneuver(
            &mut self,
            delta_v_km_s: Vector3<f64>,
            epoch: Epoch,
        ) -> Result<ManeuverResult, PropagationError> {
            self.inner.apply_maneuver(delta_v_km_s, epoch)
        }

        fn mass_kg(&self) -> f64 {
            self.inner.mass_kg()
        }
    }

    fn t0() -> Epoch {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn plan(hours: f64, activities: Vec<Activity>) -> Plan {
        Plan {
            plan_id: "plan-test".into(),
            spacecraft_id: "sat-test".into(),
            start: t0(),
            end: offset_epoch(t0(), hours * 3600.0),
            activities,
            ground_stations: Vec::new(),
        }
    }

    fn at(minutes: f64) -> Epoch {
        offset_epoch(t0(), minutes * 60.0)
    }

    fn initial() -> RunnerState {
        RunnerState::circular(t0(), 500.0, 150.0, 20.0)
    }

    #[test]
    fn test_empty_plan_runs_one_idle_segment() {
        let result =
            run_simulation(&plan(2.0, Vec::new()), &initial(), Fidelity::Low, &SimulationConfig::default())
                .unwrap();

        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].segment_type, SegmentType::Idle);
        assert_eq!(result.final_state.epoch, at(120.0));
        assert_eq!(result.summary.violation_count, 0);
        assert!(result.profile.windows(2).all(|w| w[0].epoch < w[1].epoch));
        assert_eq!(result.profile.len(), result.ephemeris.len());
    }

    #[test]
    fn test_gap_and_imaging_segments() {
        let imaging = Activity::new("img-1", ActivityKind::Imaging, at(10.0), at(20.0));
        let result =
            run_simulation(&plan(1.0, vec![imaging]), &initial(), Fidelity::Low, &SimulationConfig::default())
                .unwrap();

        assert_eq!(result.segments[0].segment_type, SegmentType::Idle);
        assert!(result.segments[0].activity_id.is_none());
        assert_eq!(result.segments[0].end, at(10.0));
        assert!(result
            .segments
            .iter()
            .any(|s| s.segment_type == SegmentType::Imaging && s.activity_id.as_deref() == Some("img-1")));
        assert!(result.final_state.storage_used_gb > 0.0);
        let (priority, volume_gb) = result.summary.storage_by_priority[0];
        assert_eq!(priority, DataPriority::Medium);
        assert!((volume_gb - result.final_state.storage_used_gb).abs() < 1e-9);
        assert_eq!(result.summary.activities_run, 1);
        assert!(result.segments.windows(2).all(|w| w[0].end == w[1].start));
    }

    #[test]
    fn test_overlap_truncates_and_late_activity_is_skipped() {
        let first = Activity::new("a", ActivityKind::Idle, at(0.0), at(20.0));
        let second = Activity::new("b", ActivityKind::Idle, at(10.0), at(30.0));
        let late = Activity::new("c", ActivityKind::Idle, at(90.0), at(100.0));
        let result = run_simulation(
            &plan(1.0, vec![first, second, late]),
            &initial(),
            Fidelity::Low,
            &SimulationConfig::default(),
        )
        .unwrap();

        let truncated = result
            .events
            .iter()
            .find(|e| e.activity_id.as_deref() == Some("b") && e.message.contains("truncated"))
            .unwrap();
        assert_eq!(truncated.severity, Severity::Warning);
        assert_eq!(result.summary.activities_skipped, 1);
        assert_eq!(result.summary.activities_run, 2);
        assert_eq!(result.final_state.epoch, at(60.0));
    }

    #[test]
    fn test_runs_are_deterministic() {
        let activities = vec![
            Activity::new("img", ActivityKind::Imaging, at(5.0), at(15.0)),
            Activity::new("dl", ActivityKind::Downlink, at(30.0), at(40.0)),
        ];
        let plan = plan(1.0, activities);
        let config = SimulationConfig::default();

        let a = run_simulation(&plan, &initial(), Fidelity::Low, &config).unwrap();
        let b = run_simulation(&plan, &initial(), Fidelity::Low, &config).unwrap();
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    #[test]
    fn test_invalid_initial_state_is_rejected() {
        let mut state = initial();
        state.position = nalgebra::Vector3::new(100.0, 0.0, 0.0);
        let err = run_simulation(&plan(1.0, Vec::new()), &state, Fidelity::Low, &SimulationConfig::default())
            .unwrap_err();
        assert!(matches!(err, SimError::Initialization(_)));
    }

    #[test]
    fn test_propagation_failure_holds_state_and_is_a_violation() {
        let context = SimulationContext::new(SimulationConfig::default()).unwrap();
        let imaging = Activity::new("img", ActivityKind::Imaging, at(10.0), at(20.0));
        let result = context
            .run_with_propagator(&plan(1.0, vec![imaging]), &initial(), BreaksDownAfter::boxed(at(30.0)), Fidelity::Low)
            .unwrap();

        let failures: Vec<_> = result
            .events
            .iter()
            .filter(|e| e.category == EventCategory::Propagation && e.severity == Severity::Violation)
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].timestamp, at(20.0));

        assert_eq!(result.final_state.epoch, at(60.0));
        let last_good = result
            .segments
            .iter()
            .find(|s| s.end == at(20.0))
            .and_then(|s| s.ephemeris.last())
            .unwrap();
        assert_eq!(last_good.epoch, at(20.0));
        assert_eq!(result.final_state.position, last_good.position);
        assert!(result.segments.windows(2).all(|w| w[0].end == w[1].start));
        assert_eq!(result.summary.propagator, "breaks-down-after");
    }

    #[test]
    fn test_failed_maneuver_spends_no_propellant() {
        let context = SimulationContext::new(SimulationConfig::default()).unwrap();
        let burn = Activity::new("lower", ActivityKind::ThrustLowering, at(10.0), at(40.0))
            .with_parameter("delta_altitude_km", -2.0);
        let result = context
            .run_with_propagator(&plan(1.0, vec![burn]), &initial(), BreaksDownAfter::boxed(at(5.0)), Fidelity::Low)
            .unwrap();

        assert!(result
            .events
            .iter()
            .any(|e| e.category == EventCategory::Propagation && e.message.starts_with("maneuver not applied")));
        assert_eq!(result.final_state.propellant_kg, initial().propellant_kg);
        assert_eq!(result.summary.deltas.delta_v_m_s, 0.0);
        assert_eq!(result.final_state.epoch, at(60.0));
    }

    #[test]
    fn test_trajectory_through_the_surface_is_a_violation() {
        // Apoapsis at 300 km with a perigee well inside the Earth.
        let mut state = initial();
        state.position = Vector3::new(R_EARTH_KM + 300.0, 0.0, 0.0);
        state.velocity = Vector3::new(0.0, 7.0, 0.0);

        let result =
            run_simulation(&plan(1.0, Vec::new()), &state, Fidelity::Low, &SimulationConfig::default()).unwrap();

        assert!(result.events.iter().any(|e| {
            e.category == EventCategory::Propagation
                && e.severity == Severity::Violation
                && e.message.contains("below the Earth's surface")
        }));
    }

    #[test]
    fn test_oversized_initial_storage_is_a_warning() {
        let mut state = initial();
        state.storage_used_gb = 1.0e6;
        let config = SimulationConfig::default();
        let result = run_simulation(&plan(0.5, Vec::new()), &state, Fidelity::Low, &config).unwrap();

        assert!(result
            .events
            .iter()
            .any(|e| e.category == EventCategory::Storage && e.severity == Severity::Warning));
        let usable = config.storage.capacity_gb - config.storage.reserved_gb;
        assert!((result.profile[0].storage_used_gb - usable).abs() < 1e-9);
    }

    #[test]
    fn test_degraded_backend_is_reported() {
        let context = SimulationContext::new(SimulationConfig::default())
            .unwrap()
            .with_backends(PropagatorBackends::analytical_only());
        let result = context.run(&plan(0.5, Vec::new()), &initial(), Fidelity::High).unwrap();

        assert!(result.summary.degraded);
        assert_eq!(result.summary.used_fidelity, Fidelity::Low);
        assert!(result
            .events
            .iter()
            .any(|e| e.category == EventCategory::Backend && e.severity == Severity::Warning));
    }
}
