//! Operational mode state machine.
//!
//! Eight fixed modes joined by a fixed adjacency table. Commanded transitions are
//! validated against the table, the target's entry charge, and its eclipse allowance;
//! [`ModeStateMachine::check_mode_constraints`] forces recovery transitions when the
//! current mode can no longer be held.

use crate::activity::ActivityKind;
use crate::events::{EventCategory, SimEvent};
use crate::propagation::{seconds_between, Epoch};
use heapless::Vec as BoundedVec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const MODE_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpacecraftMode {
    Safe,
    Standby,
    Imaging,
    Downlink,
    Thrust,
    EclipseSafe,
    Commissioning,
    Maintenance,
}

pub const ALL_MODES: [SpacecraftMode; MODE_COUNT] = [
    SpacecraftMode::Safe,
    SpacecraftMode::Standby,
    SpacecraftMode::Imaging,
    SpacecraftMode::Downlink,
    SpacecraftMode::Thrust,
    SpacecraftMode::EclipseSafe,
    SpacecraftMode::Commissioning,
    SpacecraftMode::Maintenance,
];

const_assert_eq!(ALL_MODES.len(), MODE_COUNT);

/// Per-mode operating limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeProperties {
    /// State of charge required to enter the mode.
    pub min_entry_soc: f64,
    /// State of charge below which the mode cannot be held.
    pub min_maintain_soc: f64,
    pub eclipse_allowed: bool,
    /// Longest continuous stay, if limited.
    pub max_duration_s: Option<f64>,
    /// Nominal reconfiguration time when entering the mode.
    pub transition_time_s: f64,
}

impl SpacecraftMode {
    fn index(self) -> usize {
        self as usize
    }

    pub const fn properties(self) -> ModeProperties {
        match self {
            Self::Safe | Self::EclipseSafe => ModeProperties {
                min_entry_soc: 0.0,
                min_maintain_soc: 0.0,
                eclipse_allowed: true,
                max_duration_s: None,
                transition_time_s: 30.0,
            },
            Self::Standby => ModeProperties {
                min_entry_soc: 0.2,
                min_maintain_soc: 0.15,
                eclipse_allowed: true,
                max_duration_s: None,
                transition_time_s: 30.0,
            },
            Self::Imaging => ModeProperties {
                min_entry_soc: 0.4,
                min_maintain_soc: 0.3,
                eclipse_allowed: false,
                max_duration_s: Some(1800.0),
                transition_time_s: 60.0,
            },
            Self::Downlink => ModeProperties {
                min_entry_soc: 0.3,
                min_maintain_soc: 0.2,
                eclipse_allowed: true,
                max_duration_s: Some(3600.0),
                transition_time_s: 60.0,
            },
            Self::Thrust => ModeProperties {
                min_entry_soc: 0.5,
                min_maintain_soc: 0.4,
                eclipse_allowed: false,
                max_duration_s: Some(7200.0),
                transition_time_s: 120.0,
            },
            Self::Commissioning => ModeProperties {
                min_entry_soc: 0.3,
                min_maintain_soc: 0.2,
                eclipse_allowed: true,
                max_duration_s: None,
                transition_time_s: 60.0,
            },
            Self::Maintenance => ModeProperties {
                min_entry_soc: 0.3,
                min_maintain_soc: 0.2,
                eclipse_allowed: true,
                max_duration_s: Some(7200.0),
                transition_time_s: 60.0,
            },
        }
    }

    /// Targets reachable in one transition.
    pub fn allowed_transitions(self) -> BoundedVec<SpacecraftMode, MODE_COUNT> {
        use SpacecraftMode::{
            Commissioning, Downlink, EclipseSafe, Imaging, Maintenance, Safe, Standby, Thrust,
        };
        let targets: &[SpacecraftMode] = match self {
            Safe => &[Standby, Commissioning, Maintenance],
            Standby => &[Safe, Imaging, Downlink, Thrust, EclipseSafe, Maintenance],
            Imaging => &[Standby, Downlink, Safe, EclipseSafe],
            Downlink => &[Standby, Imaging, Safe, EclipseSafe],
            Thrust => &[Standby, Safe, EclipseSafe],
            EclipseSafe | Commissioning | Maintenance => &[Standby, Safe],
        };
        // Never more than MODE_COUNT targets.
        BoundedVec::from_slice(targets).unwrap_or_default()
    }

    pub fn can_reach(self, target: SpacecraftMode) -> bool {
        self.allowed_transitions().contains(&target)
    }
}

impl fmt::Display for SpacecraftMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Safe => "SAFE",
            Self::Standby => "STANDBY",
            Self::Imaging => "IMAGING",
            Self::Downlink => "DOWNLINK",
            Self::Thrust => "THRUST",
            Self::EclipseSafe => "ECLIPSE_SAFE",
            Self::Commissioning => "COMMISSIONING",
            Self::Maintenance => "MAINTENANCE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum TransitionRejection {
    #[error("no transition from {from} to {to}")]
    NotAllowed {
        from: SpacecraftMode,
        to: SpacecraftMode,
    },
    #[error("state of charge {soc:.3} below {target} entry threshold {required:.3}")]
    InsufficientCharge {
        target: SpacecraftMode,
        soc: f64,
        required: f64,
    },
    #[error("{target} not permitted in eclipse")]
    EclipseNotAllowed { target: SpacecraftMode },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeTransition {
    pub timestamp: Epoch,
    pub from: SpacecraftMode,
    pub to: SpacecraftMode,
    pub reason: String,
    pub transition_time_s: f64,
    pub success: bool,
    pub forced: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionResult {
    pub success: bool,
    pub rejection: Option<TransitionRejection>,
    pub events: Vec<SimEvent>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionCounts {
    pub succeeded: u32,
    /// Successful requests for the mode already active.
    pub held: u32,
    pub rejected: u32,
    pub forced: u32,
}

#[derive(Debug)]
pub struct ModeStateMachine {
    current: SpacecraftMode,
    entered_at: Epoch,
    history: Vec<ModeTransition>,
    accumulated_s: [f64; MODE_COUNT],
}

impl ModeStateMachine {
    pub fn new(initial: SpacecraftMode, epoch: Epoch) -> Self {
        Self {
            current: initial,
            entered_at: epoch,
            history: Vec::new(),
            accumulated_s: [0.0; MODE_COUNT],
        }
    }

    pub fn current_mode(&self) -> SpacecraftMode {
        self.current
    }

    pub fn entered_at(&self) -> Epoch {
        self.entered_at
    }

    pub fn history(&self) -> &[ModeTransition] {
        &self.history
    }

    pub fn counts(&self) -> TransitionCounts {
        let mut counts = TransitionCounts::default();
        for record in &self.history {
            if record.from == record.to {
                counts.held += 1;
            } else if record.success {
                counts.succeeded += 1;
            } else {
                counts.rejected += 1;
            }
            if record.forced {
                counts.forced += 1;
            }
        }
        counts
    }

    /// Total seconds spent in `mode` up to `now`, including the current stay.
    pub fn time_in_mode(&self, mode: SpacecraftMode, now: Epoch) -> f64 {
        let mut total = self.accumulated_s[mode.index()];
        if mode == self.current {
            total += seconds_between(self.entered_at, now).max(0.0);
        }
        total
    }

    pub fn mode_properties(&self, mode: SpacecraftMode) -> ModeProperties {
        mode.properties()
    }

    pub fn can_transition(
        &self,
        target: SpacecraftMode,
        soc: f64,
        in_eclipse: bool,
    ) -> Result<(), TransitionRejection> {
        if !self.current.can_reach(target) {
            return Err(TransitionRejection::NotAllowed {
                from: self.current,
                to: target,
            });
        }
        let props = self.mode_properties(target);
        if soc < props.min_entry_soc {
            return Err(TransitionRejection::InsufficientCharge {
                target,
                soc,
                required: props.min_entry_soc,
            });
        }
        if in_eclipse && !props.eclipse_allowed {
            return Err(TransitionRejection::EclipseNotAllowed { target });
        }
        Ok(())
    }

    /// Attempt a transition. Every attempt is recorded. A request for the current mode
    /// succeeds with zero transition time and leaves the time in mode running.
    pub fn transition(
        &mut self,
        target: SpacecraftMode,
        timestamp: Epoch,
        reason: &str,
        soc: f64,
        in_eclipse: bool,
        force: bool,
    ) -> TransitionResult {
        if target == self.current {
            self.history.push(ModeTransition {
                timestamp,
                from: target,
                to: target,
                reason: reason.to_string(),
                transition_time_s: 0.0,
                success: true,
                forced: force,
            });
            debug!(mode = %target, reason, "Mode already active");
            return TransitionResult {
                success: true,
                rejection: None,
                events: Vec::new(),
            };
        }

        let from = self.current;
        let check = if force {
            Ok(())
        } else {
            self.can_transition(target, soc, in_eclipse)
        };

        match check {
            Ok(()) => {
                let transition_time_s = target.properties().transition_time_s;
                self.history.push(ModeTransition {
                    timestamp,
                    from,
                    to: target,
                    reason: reason.to_string(),
                    transition_time_s,
                    success: true,
                    forced: force,
                });
                self.accumulated_s[from.index()] += seconds_between(self.entered_at, timestamp).max(0.0);
                self.current = target;
                self.entered_at = timestamp;
                info!(%from, to = %target, forced = force, reason, "Mode transition");

                let qualifier = if force { " (forced)" } else { "" };
                TransitionResult {
                    success: true,
                    rejection: None,
                    events: vec![SimEvent::info(
                        timestamp,
                        EventCategory::Mode,
                        format!("mode {from} -> {target}{qualifier}: {reason}"),
                    )],
                }
            }
            Err(rejection) => {
                self.history.push(ModeTransition {
                    timestamp,
                    from,
                    to: target,
                    reason: reason.to_string(),
                    transition_time_s: 0.0,
                    success: false,
                    forced: false,
                });
                warn!(%from, to = %target, %rejection, "Mode transition rejected");
                TransitionResult {
                    success: false,
                    events: vec![SimEvent::warning(
                        timestamp,
                        EventCategory::Mode,
                        format!("mode {from} -> {target} rejected: {rejection}"),
                    )],
                    rejection: Some(rejection),
                }
            }
        }
    }

    /// Transition to `target`, stepping through STANDBY when there is no direct edge.
    pub fn request_mode(
        &mut self,
        target: SpacecraftMode,
        timestamp: Epoch,
        reason: &str,
        soc: f64,
        in_eclipse: bool,
    ) -> TransitionResult {
        let via_standby = target != self.current
            && !self.current.can_reach(target)
            && self.current != SpacecraftMode::Standby
            && self.current.can_reach(SpacecraftMode::Standby)
            && SpacecraftMode::Standby.can_reach(target);

        if !via_standby {
            return self.transition(target, timestamp, reason, soc, in_eclipse, false);
        }

        let first = self.transition(
            SpacecraftMode::Standby,
            timestamp,
            &format!("{reason} (via STANDBY)"),
            soc,
            in_eclipse,
            false,
        );
        if !first.success {
            return first;
        }
        let mut second = self.transition(target, timestamp, reason, soc, in_eclipse, false);
        let mut events = first.events;
        events.append(&mut second.events);
        second.events = events;
        second
    }

    /// Force a recovery transition when the current mode's limits are exceeded. At most
    /// one recovery is applied per call: charge first, then eclipse, then duration.
    pub fn check_mode_constraints(
        &mut self,
        timestamp: Epoch,
        soc: f64,
        in_eclipse: bool,
    ) -> Vec<SimEvent> {
        let mode = self.current;
        let props = self.mode_properties(mode);

        let (trigger, recovery, reason) = if soc < props.min_maintain_soc {
            (
                SimEvent::violation(
                    timestamp,
                    EventCategory::Power,
                    format!(
                        "state of charge {soc:.3} below {mode} maintain threshold {:.3}",
                        props.min_maintain_soc
                    ),
                ),
                SpacecraftMode::Safe,
                "low state of charge",
            )
        } else if in_eclipse && !props.eclipse_allowed {
            (
                SimEvent::warning(timestamp, EventCategory::Eclipse, format!("{mode} not permitted in eclipse")),
                SpacecraftMode::EclipseSafe,
                "eclipse entry",
            )
        } else {
            let elapsed = seconds_between(self.entered_at, timestamp);
            match props.max_duration_s {
                Some(limit) if elapsed > limit => (
                    SimEvent::warning(
                        timestamp,
                        EventCategory::Mode,
                        format!("{mode} held {elapsed:.0} s, limit {limit:.0} s"),
                    ),
                    SpacecraftMode::Standby,
                    "maximum mode duration exceeded",
                ),
                _ => return Vec::new(),
            }
        };

        let mut events = vec![trigger];
        events.extend(self.transition(recovery, timestamp, reason, soc, in_eclipse, true).events);
        events
    }

    /// Nominal mode for an activity kind.
    pub fn get_mode_for_activity(kind: &ActivityKind) -> SpacecraftMode {
        match kind {
            ActivityKind::Imaging => SpacecraftMode::Imaging,
            ActivityKind::Downlink => SpacecraftMode::Downlink,
            ActivityKind::ThrustLowering | ActivityKind::StationKeeping => SpacecraftMode::Thrust,
            ActivityKind::Idle | ActivityKind::Unregistered(_) => SpacecraftMode::Standby,
        }
    }
}
