use crate::propagation::Epoch;
use serde::{Deserialize, Serialize};

/// Event severity. Ordered so the most severe level compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Violation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Missing or malformed activity parameter; defaults were used.
    Validation,
    Activity,
    Mode,
    Power,
    Eclipse,
    Storage,
    Propulsion,
    Propagation,
    /// Requested propagator backend unavailable.
    Backend,
    Access,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimEvent {
    pub timestamp: Epoch,
    pub severity: Severity,
    pub category: EventCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
}

impl SimEvent {
    pub fn new(
        timestamp: Epoch,
        severity: Severity,
        category: EventCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            severity,
            category,
            message: message.into(),
            activity_id: None,
        }
    }

    pub fn info(timestamp: Epoch, category: EventCategory, message: impl Into<String>) -> Self {
        Self::new(timestamp, Severity::Info, category, message)
    }

    pub fn warning(timestamp: Epoch, category: EventCategory, message: impl Into<String>) -> Self {
        Self::new(timestamp, Severity::Warning, category, message)
    }

    pub fn violation(timestamp: Epoch, category: EventCategory, message: impl Into<String>) -> Self {
        Self::new(timestamp, Severity::Violation, category, message)
    }

    #[must_use]
    pub fn with_activity(mut self, activity_id: impl Into<String>) -> Self {
        self.activity_id = Some(activity_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub info: u32,
    pub warnings: u32,
    pub violations: u32,
}

impl EventCounts {
    fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Info => self.info += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Violation => self.violations += 1,
        }
    }
}

/// Run-level, append-only event list with running severity counts.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<SimEvent>,
    counts: EventCounts,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: SimEvent) {
        self.counts.record(event.severity);
        self.events.push(event);
    }

    pub fn extend<I: IntoIterator<Item = SimEvent>>(&mut self, events: I) {
        for event in events {
            self.push(event);
        }
    }

    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    pub fn counts(&self) -> EventCounts {
        self.counts
    }

    pub fn into_events(self) -> Vec<SimEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_counts_follow_severity() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut log = EventLog::new();
        log.push(SimEvent::info(t, EventCategory::Mode, "entered STANDBY"));
        log.push(SimEvent::warning(t, EventCategory::Storage, "fill above 90%"));
        log.push(SimEvent::violation(t, EventCategory::Power, "battery depleted"));
        log.push(SimEvent::violation(t, EventCategory::Storage, "overflow"));

        let counts = log.counts();
        assert_eq!(counts.info, 1);
        assert_eq!(counts.warnings, 1);
        assert_eq!(counts.violations, 2);
        assert_eq!(log.events().len(), 4);
        assert_eq!(log.events()[3].category, EventCategory::Storage);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Violation > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }
}
