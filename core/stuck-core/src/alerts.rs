//! Active alerts, at most one per repository.
//!
//! Every method that changes an alert also changes the owning tracker's
//! stuck mark in the same call, which keeps "tracker is stuck" and "alert
//! exists" in lockstep.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use stuck_protocol::{Severity, StuckAlert, StuckReason, StuckStatus};

use crate::policy::{describe, severity_for, suggested_action, ReasonContext};
use crate::tracker::Tracker;

/// An alert whose severity moved during a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct Escalation {
    pub alert: StuckAlert,
    pub previous_severity: Severity,
}

#[derive(Debug, Default)]
pub struct AlertRegistry {
    alerts: HashMap<String, StuckAlert>,
}

impl AlertRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the tracker stuck and stores a fresh alert for it.
    ///
    /// Severity starts at the reason's base (duration zero); escalation is
    /// left to later refreshes.
    pub fn create(
        &mut self,
        tracker: &mut Tracker,
        reason: StuckReason,
        now: DateTime<Utc>,
    ) -> StuckAlert {
        tracker.mark_stuck(reason, now);
        let context = ReasonContext {
            silent_secs: tracker.silence_secs(now),
            failure_count: tracker.consecutive_failures,
            blocked_gate: tracker.blocked_qa_gate.as_deref(),
        };

        let alert = StuckAlert {
            id: ulid::Ulid::new().to_string(),
            repository_id: tracker.repository_id.clone(),
            repository_name: tracker.repository_name.clone(),
            session_id: tracker.session_id.clone(),
            task_id: tracker.task_id.clone(),
            reason,
            description: describe(reason, &context),
            severity: severity_for(reason, 0),
            detected_at: now,
            stuck_duration_seconds: 0,
            last_output_at: tracker.last_output_at,
            failure_count: (reason == StuckReason::RepeatedFailures)
                .then_some(tracker.consecutive_failures),
            blocked_gate_name: match reason {
                StuckReason::QaGateBlocked => tracker.blocked_qa_gate.clone(),
                _ => None,
            },
            acknowledged: false,
            suggested_action: suggested_action(reason).to_string(),
        };

        self.alerts
            .insert(tracker.repository_id.clone(), alert.clone());
        alert
    }

    /// Clears the tracker's stuck mark and removes its alert.
    ///
    /// Returns the removed alert, or `None` when there was nothing to resolve.
    pub fn resolve(&mut self, tracker: &mut Tracker, now: DateTime<Utc>) -> Option<StuckAlert> {
        let mark = tracker.clear_stuck();
        let mut alert = self.alerts.remove(&tracker.repository_id)?;
        if let Some(mark) = mark {
            alert.stuck_duration_seconds = elapsed_secs(mark.since, now);
        }
        alert.last_output_at = tracker.last_output_at;
        Some(alert)
    }

    /// Recomputes duration and severity for an alert that is still stuck for
    /// the same reason. Only a severity change is reported.
    pub fn refresh(&mut self, tracker: &Tracker, now: DateTime<Utc>) -> Option<Escalation> {
        let since = tracker.stuck_since()?;
        let alert = self.alerts.get_mut(&tracker.repository_id)?;

        let elapsed = elapsed_secs(since, now);
        alert.stuck_duration_seconds = elapsed;
        alert.last_output_at = tracker.last_output_at;
        if alert.reason == StuckReason::RepeatedFailures {
            alert.failure_count = Some(tracker.consecutive_failures);
        }

        let next = severity_for(alert.reason, elapsed);
        if next == alert.severity {
            return None;
        }
        let previous_severity = alert.severity;
        alert.severity = next;
        Some(Escalation {
            alert: alert.clone(),
            previous_severity,
        })
    }

    /// Returns whether an alert existed. Acknowledged alerts still escalate
    /// and resolve normally.
    pub fn acknowledge(&mut self, repository_id: &str) -> bool {
        match self.alerts.get_mut(repository_id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, repository_id: &str) -> Option<&StuckAlert> {
        self.alerts.get(repository_id)
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Aggregate view, most urgent alerts first.
    pub fn status(&self, now: DateTime<Utc>) -> StuckStatus {
        let mut alerts: Vec<StuckAlert> = self
            .alerts
            .values()
            .cloned()
            .map(|mut alert| {
                alert.stuck_duration_seconds = elapsed_secs(alert.detected_at, now);
                alert
            })
            .collect();
        alerts.sort_by(|left, right| {
            right
                .severity
                .cmp(&left.severity)
                .then_with(|| left.detected_at.cmp(&right.detected_at))
                .then_with(|| left.repository_id.cmp(&right.repository_id))
        });

        let count = |reason: StuckReason| alerts.iter().filter(|a| a.reason == reason).count();

        StuckStatus {
            total_stuck_count: alerts.len(),
            waiting_input_count: count(StuckReason::WaitingInput),
            failed_count: count(StuckReason::RepeatedFailures),
            qa_blocked_count: count(StuckReason::QaGateBlocked),
            highest_severity: alerts.iter().map(|a| a.severity).max(),
            alerts,
            last_updated: now,
        }
    }
}

fn elapsed_secs(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - since).num_seconds().max(0) as u64
}
