//! Severity ladder and human-facing text for each stuck reason.
//!
//! Pure functions: no tracker state, no clock.

use stuck_protocol::{Severity, StuckReason};

/// Past this many seconds stuck, every alert is critical.
pub const CRITICAL_AFTER_SECS: u64 = 300;
/// Past this many seconds stuck, every alert is at least high.
pub const HIGH_AFTER_SECS: u64 = 120;
/// A silent session turns high on its own after this long.
pub const NO_OUTPUT_HIGH_AFTER_SECS: u64 = 60;

/// Severity for an alert that has been stuck for `elapsed_secs`.
///
/// Duration overrides win over the per-reason base, so a long-running alert
/// of any reason ends up critical.
pub fn severity_for(reason: StuckReason, elapsed_secs: u64) -> Severity {
    if elapsed_secs > CRITICAL_AFTER_SECS {
        return Severity::Critical;
    }
    if elapsed_secs > HIGH_AFTER_SECS {
        return Severity::High;
    }

    match reason {
        StuckReason::RepeatedFailures => Severity::High,
        StuckReason::QaGateBlocked => Severity::Medium,
        StuckReason::WaitingInput => Severity::Medium,
        StuckReason::NoOutput if elapsed_secs <= NO_OUTPUT_HIGH_AFTER_SECS => Severity::Medium,
        StuckReason::NoOutput => Severity::High,
        StuckReason::Timeout => Severity::High,
        StuckReason::Unknown => Severity::Low,
    }
}

/// Facts about the tracker that make a description specific.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReasonContext<'a> {
    pub silent_secs: u64,
    pub failure_count: u32,
    pub blocked_gate: Option<&'a str>,
}

pub fn describe(reason: StuckReason, context: &ReasonContext<'_>) -> String {
    match reason {
        StuckReason::NoOutput => format!(
            "No output from the session for {}",
            format_secs(context.silent_secs)
        ),
        StuckReason::WaitingInput => format!(
            "Waiting for input or approval for {}",
            format_secs(context.silent_secs)
        ),
        StuckReason::RepeatedFailures => format!(
            "Task failed {} times in a row",
            context.failure_count
        ),
        StuckReason::QaGateBlocked => match context.blocked_gate {
            Some(gate) => format!("Blocked by QA gate '{}'", gate),
            None => "QA checks failed and are blocking progress".to_string(),
        },
        StuckReason::Timeout => "Task exceeded its time limit".to_string(),
        StuckReason::Unknown => "Session appears stuck for an unknown reason".to_string(),
    }
}

pub fn suggested_action(reason: StuckReason) -> &'static str {
    match reason {
        StuckReason::NoOutput => "Check whether the agent process is still alive, then restart the session",
        StuckReason::WaitingInput => "Open the session and answer the pending prompt or approval",
        StuckReason::RepeatedFailures => "Review the latest failure logs before retrying the task",
        StuckReason::QaGateBlocked => "Inspect the failing QA gate and fix or override it",
        StuckReason::Timeout => "Split the task or raise its time limit",
        StuckReason::Unknown => "Inspect the session manually",
    }
}

fn format_secs(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_durations_are_critical_for_every_reason() {
        for reason in StuckReason::ALL {
            assert_eq!(severity_for(reason, 301), Severity::Critical, "{:?}", reason);
            assert_eq!(severity_for(reason, 10_000), Severity::Critical);
        }
    }

    #[test]
    fn medium_durations_are_at_least_high() {
        for reason in StuckReason::ALL {
            assert_eq!(severity_for(reason, 121), Severity::High, "{:?}", reason);
            assert_eq!(severity_for(reason, 300), Severity::High);
        }
    }

    #[test]
    fn fresh_alerts_use_reason_base() {
        assert_eq!(severity_for(StuckReason::RepeatedFailures, 0), Severity::High);
        assert_eq!(severity_for(StuckReason::QaGateBlocked, 0), Severity::Medium);
        assert_eq!(severity_for(StuckReason::WaitingInput, 0), Severity::Medium);
        assert_eq!(severity_for(StuckReason::NoOutput, 0), Severity::Medium);
        assert_eq!(severity_for(StuckReason::Timeout, 0), Severity::High);
        assert_eq!(severity_for(StuckReason::Unknown, 0), Severity::Low);
    }

    #[test]
    fn no_output_turns_high_after_a_minute() {
        assert_eq!(severity_for(StuckReason::NoOutput, 60), Severity::Medium);
        assert_eq!(severity_for(StuckReason::NoOutput, 61), Severity::High);
        assert_eq!(severity_for(StuckReason::WaitingInput, 61), Severity::Medium);
    }

    #[test]
    fn descriptions_carry_context() {
        let context = ReasonContext {
            silent_secs: 95,
            failure_count: 4,
            blocked_gate: Some("lint"),
        };
        assert_eq!(
            describe(StuckReason::NoOutput, &context),
            "No output from the session for 1m 35s"
        );
        assert_eq!(
            describe(StuckReason::RepeatedFailures, &context),
            "Task failed 4 times in a row"
        );
        assert_eq!(
            describe(StuckReason::QaGateBlocked, &context),
            "Blocked by QA gate 'lint'"
        );
        assert_eq!(
            describe(StuckReason::QaGateBlocked, &ReasonContext::default()),
            "QA checks failed and are blocking progress"
        );
    }

    #[test]
    fn every_reason_has_an_action() {
        for reason in StuckReason::ALL {
            assert!(!suggested_action(reason).is_empty());
        }
    }
}
