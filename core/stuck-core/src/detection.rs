//! Classifies a tracker as stuck or not at a given instant.
//!
//! Rules are checked in a fixed order and the first match wins:
//! repeated failures, then a blocked QA gate, then status-specific silence.
//! Failure counts are never scaled by sensitivity; silence thresholds are.

use chrono::{DateTime, Utc};
use stuck_protocol::{StuckReason, TaskStatus};

use crate::config::StuckConfig;
use crate::tracker::Tracker;

/// Trackers without a session have nothing running that could stall.
pub fn is_evaluable(tracker: &Tracker) -> bool {
    tracker
        .session_id
        .as_deref()
        .map(|id| !id.trim().is_empty())
        .unwrap_or(false)
}

pub fn classify(tracker: &Tracker, config: &StuckConfig, now: DateTime<Utc>) -> Option<StuckReason> {
    // A finished task cannot be stuck, whatever its counters still say.
    if tracker.current_status.map(|s| s.is_terminal()).unwrap_or(false) {
        return None;
    }

    if tracker.consecutive_failures >= config.repeated_failure_count {
        return Some(StuckReason::RepeatedFailures);
    }

    if tracker.blocked_qa_gate.is_some() || tracker.current_status == Some(TaskStatus::QaFailed) {
        return Some(StuckReason::QaGateBlocked);
    }

    let status = tracker.current_status?;
    let silence_ms = tracker.silence_ms(now);
    if status.is_waiting() {
        if silence_ms > config.effective_waiting_input_threshold_ms() {
            return Some(StuckReason::WaitingInput);
        }
    } else if status.is_working() && silence_ms > config.effective_no_output_threshold_ms() {
        return Some(StuckReason::NoOutput);
    }

    None
}
