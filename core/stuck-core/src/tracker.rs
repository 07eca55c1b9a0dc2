//! Per-repository activity record.
//!
//! A tracker is created the first time a repository reports state and is
//! mutated in place by every later report. Stuck state is a single
//! `Option<StuckMark>` so "stuck", "reason" and "since" can never disagree.

use chrono::{DateTime, Utc};
use serde::Serialize;
use stuck_protocol::{StuckReason, TaskStatus};

use crate::history::BoundedRing;

pub const STATUS_HISTORY_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub status: TaskStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StuckMark {
    pub reason: StuckReason,
    pub since: DateTime<Utc>,
}

/// What a status report did to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<TaskStatus>,
    pub to: TaskStatus,
    pub consecutive_failures: u32,
}

impl Transition {
    pub fn entered_terminal(&self) -> bool {
        self.to.is_terminal()
    }
}

#[derive(Debug, Clone)]
pub struct Tracker {
    pub repository_id: String,
    pub repository_name: String,
    pub session_id: Option<String>,
    pub task_id: Option<String>,
    pub last_output_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub current_status: Option<TaskStatus>,
    pub status_history: BoundedRing<StatusEntry>,
    pub blocked_qa_gate: Option<String>,
    pub updated_at: DateTime<Utc>,
    stuck: Option<StuckMark>,
}

impl Tracker {
    /// Creation counts as activity, so silence is measured from the first report.
    pub fn new(
        repository_id: impl Into<String>,
        repository_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            repository_id: repository_id.into(),
            repository_name: repository_name.into(),
            session_id: None,
            task_id: None,
            last_output_at: now,
            consecutive_failures: 0,
            current_status: None,
            status_history: BoundedRing::with_capacity(STATUS_HISTORY_CAPACITY),
            blocked_qa_gate: None,
            updated_at: now,
            stuck: None,
        }
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck.is_some()
    }

    pub fn stuck_reason(&self) -> Option<StuckReason> {
        self.stuck.map(|mark| mark.reason)
    }

    pub fn stuck_since(&self) -> Option<DateTime<Utc>> {
        self.stuck.map(|mark| mark.since)
    }

    pub(crate) fn mark_stuck(&mut self, reason: StuckReason, since: DateTime<Utc>) {
        self.stuck = Some(StuckMark { reason, since });
    }

    pub(crate) fn clear_stuck(&mut self) -> Option<StuckMark> {
        self.stuck.take()
    }

    pub fn record_output(&mut self, now: DateTime<Utc>) {
        self.last_output_at = now;
    }

    /// Milliseconds since the last output, never negative.
    pub fn silence_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_output_at).num_milliseconds().max(0)
    }

    pub fn silence_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.last_output_at).num_seconds().max(0) as u64
    }

    /// Whether `status` should run a transition.
    ///
    /// A changed status always does. A repeated failure report also does,
    /// because each one is a fresh failed attempt that extends the streak.
    pub fn needs_transition(&self, status: TaskStatus) -> bool {
        self.current_status != Some(status) || status.is_failure()
    }

    pub fn apply_transition(&mut self, status: TaskStatus, now: DateTime<Utc>) -> Transition {
        let from = self.current_status;
        self.status_history.push(StatusEntry { status, at: now });
        if status.is_failure() {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        } else {
            self.consecutive_failures = 0;
        }
        self.current_status = Some(status);

        Transition {
            from,
            to: status,
            consecutive_failures: self.consecutive_failures,
        }
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            repository_id: self.repository_id.clone(),
            repository_name: self.repository_name.clone(),
            session_id: self.session_id.clone(),
            task_id: self.task_id.clone(),
            last_output_at: self.last_output_at,
            consecutive_failures: self.consecutive_failures,
            current_status: self.current_status,
            status_history: self.status_history.to_vec(),
            is_stuck: self.is_stuck(),
            stuck_reason: self.stuck_reason(),
            stuck_since: self.stuck_since(),
            blocked_qa_gate: self.blocked_qa_gate.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Read-only copy of a tracker for callers outside the engine lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerSnapshot {
    pub repository_id: String,
    pub repository_name: String,
    pub session_id: Option<String>,
    pub task_id: Option<String>,
    pub last_output_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub current_status: Option<TaskStatus>,
    pub status_history: Vec<StatusEntry>,
    pub is_stuck: bool,
    pub stuck_reason: Option<StuckReason>,
    pub stuck_since: Option<DateTime<Utc>>,
    pub blocked_qa_gate: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tracker() -> Tracker {
        Tracker::new("repo-1", "api", Utc::now())
    }

    #[test]
    fn failures_accumulate_and_reset() {
        let mut tracker = tracker();
        let now = Utc::now();

        tracker.apply_transition(TaskStatus::Failed, now);
        tracker.apply_transition(TaskStatus::QaFailed, now);
        assert_eq!(tracker.consecutive_failures, 2);

        let transition = tracker.apply_transition(TaskStatus::Running, now);
        assert_eq!(transition.from, Some(TaskStatus::QaFailed));
        assert_eq!(transition.consecutive_failures, 0);
        assert_eq!(tracker.consecutive_failures, 0);
    }

    #[test]
    fn repeated_failure_reports_are_transitions() {
        let mut tracker = tracker();
        tracker.apply_transition(TaskStatus::Failed, Utc::now());

        assert!(tracker.needs_transition(TaskStatus::Failed));
        assert!(tracker.needs_transition(TaskStatus::Running));

        tracker.apply_transition(TaskStatus::Running, Utc::now());
        assert!(!tracker.needs_transition(TaskStatus::Running));
    }

    #[test]
    fn history_keeps_last_ten_statuses() {
        let mut tracker = tracker();
        let start = Utc::now();
        let statuses = [TaskStatus::Running, TaskStatus::Failed];
        for i in 0..14 {
            tracker.apply_transition(statuses[i % 2], start + Duration::seconds(i as i64));
        }

        let history = tracker.status_history.to_vec();
        assert_eq!(history.len(), STATUS_HISTORY_CAPACITY);
        assert_eq!(history[0].at, start + Duration::seconds(4));
        assert_eq!(history[9].at, start + Duration::seconds(13));
    }

    #[test]
    fn stuck_fields_move_together() {
        let mut tracker = tracker();
        let now = Utc::now();
        assert!(!tracker.is_stuck());
        assert_eq!(tracker.stuck_since(), None);

        tracker.mark_stuck(StuckReason::NoOutput, now);
        let snapshot = tracker.snapshot();
        assert!(snapshot.is_stuck);
        assert_eq!(snapshot.stuck_reason, Some(StuckReason::NoOutput));
        assert_eq!(snapshot.stuck_since, Some(now));

        tracker.clear_stuck();
        let snapshot = tracker.snapshot();
        assert!(!snapshot.is_stuck);
        assert_eq!(snapshot.stuck_reason, None);
        assert_eq!(snapshot.stuck_since, None);
    }

    #[test]
    fn silence_is_never_negative() {
        let tracker = tracker();
        let earlier = tracker.last_output_at - Duration::seconds(5);
        assert_eq!(tracker.silence_ms(earlier), 0);
        assert_eq!(tracker.silence_secs(earlier), 0);
    }
}
