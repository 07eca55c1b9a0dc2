//! Shared types for the stuck-detection engine and its clients.
//!
//! The engine owns classification and alert lifecycle; this crate only fixes
//! the shape of what crosses the boundary (status updates in, alerts and
//! events out) so producers and consumers cannot drift from the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
const MAX_ID_LEN: usize = 256;

// ═══════════════════════════════════════════════════════════════════════════════
// Line protocol envelope
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    Update,
    Output,
    Acknowledge,
    Status,
    Alert,
    Config,
    GetConfig,
    Forget,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self::error_with_info(id, ErrorInfo::new(code, message))
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Parses one request line and checks the protocol version.
pub fn parse_request(line: &str) -> Result<Request, ErrorInfo> {
    if line.len() > MAX_REQUEST_BYTES {
        return Err(ErrorInfo::new(
            "request_too_large",
            format!("request exceeds {} bytes", MAX_REQUEST_BYTES),
        ));
    }
    let request: Request = serde_json::from_str(line).map_err(|err| {
        ErrorInfo::new("invalid_json", format!("request is invalid JSON: {}", err))
    })?;
    if request.protocol_version != PROTOCOL_VERSION {
        return Err(ErrorInfo::new(
            "unsupported_version",
            format!(
                "protocol_version {} is not supported (expected {})",
                request.protocol_version, PROTOCOL_VERSION
            ),
        ));
    }
    Ok(request)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Task status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status reported by the orchestrator for a repository's current task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    PreFlight,
    Running,
    QaRunning,
    QaFailed,
    WaitingApproval,
    WaitingInput,
    Failed,
    Completed,
    Rejected,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::PreFlight => "pre_flight",
            TaskStatus::Running => "running",
            TaskStatus::QaRunning => "qa_running",
            TaskStatus::QaFailed => "qa_failed",
            TaskStatus::WaitingApproval => "waiting_approval",
            TaskStatus::WaitingInput => "waiting_input",
            TaskStatus::Failed => "failed",
            TaskStatus::Completed => "completed",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Unknown => "unknown",
        }
    }

    /// Statuses that count towards the consecutive failure streak.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::QaFailed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Rejected | TaskStatus::Cancelled
        )
    }

    /// The session is parked until a human responds.
    pub fn is_waiting(&self) -> bool {
        matches!(self, TaskStatus::WaitingApproval | TaskStatus::WaitingInput)
    }

    /// The session is expected to keep producing output.
    pub fn is_working(&self) -> bool {
        matches!(
            self,
            TaskStatus::Running | TaskStatus::PreFlight | TaskStatus::QaRunning
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Classification
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StuckReason {
    NoOutput,
    WaitingInput,
    RepeatedFailures,
    QaGateBlocked,
    Timeout,
    Unknown,
}

impl StuckReason {
    pub const ALL: [StuckReason; 6] = [
        StuckReason::NoOutput,
        StuckReason::WaitingInput,
        StuckReason::RepeatedFailures,
        StuckReason::QaGateBlocked,
        StuckReason::Timeout,
        StuckReason::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StuckReason::NoOutput => "no_output",
            StuckReason::WaitingInput => "waiting_input",
            StuckReason::RepeatedFailures => "repeated_failures",
            StuckReason::QaGateBlocked => "qa_gate_blocked",
            StuckReason::Timeout => "timeout",
            StuckReason::Unknown => "unknown",
        }
    }
}

/// Ordered so that `max()` yields the most urgent severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl SensitivityLevel {
    /// Scale factor for time-based thresholds. Count thresholds are never scaled.
    pub fn multiplier(&self) -> f64 {
        match self {
            SensitivityLevel::Low => 2.0,
            SensitivityLevel::Medium => 1.0,
            SensitivityLevel::High => 0.5,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Alerts, status, events
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StuckAlert {
    pub id: String,
    pub repository_id: String,
    pub repository_name: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    pub reason: StuckReason,
    pub description: String,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
    pub stuck_duration_seconds: u64,
    pub last_output_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_gate_name: Option<String>,
    pub acknowledged: bool,
    pub suggested_action: String,
}

/// Aggregate view over every active alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StuckStatus {
    pub total_stuck_count: usize,
    pub waiting_input_count: usize,
    pub failed_count: usize,
    pub qa_blocked_count: usize,
    pub alerts: Vec<StuckAlert>,
    #[serde(default)]
    pub highest_severity: Option<Severity>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Detected,
    Resolved,
    Escalated,
    StatusUpdated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StuckEvent {
    Detected {
        alert: StuckAlert,
    },
    Resolved {
        alert: StuckAlert,
    },
    Escalated {
        alert: StuckAlert,
        previous_severity: Severity,
    },
    StatusUpdated {
        status: StuckStatus,
    },
}

impl StuckEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StuckEvent::Detected { .. } => EventKind::Detected,
            StuckEvent::Resolved { .. } => EventKind::Resolved,
            StuckEvent::Escalated { .. } => EventKind::Escalated,
            StuckEvent::StatusUpdated { .. } => EventKind::StatusUpdated,
        }
    }

    pub fn alert(&self) -> Option<&StuckAlert> {
        match self {
            StuckEvent::Detected { alert }
            | StuckEvent::Resolved { alert }
            | StuckEvent::Escalated { alert, .. } => Some(alert),
            StuckEvent::StatusUpdated { .. } => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Producer payloads
// ═══════════════════════════════════════════════════════════════════════════════

/// A status/output report for one repository's session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RepoStateUpdate {
    pub repository_id: String,
    pub repository_name: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub has_output: bool,
    #[serde(default)]
    pub blocked_qa_gate: Option<String>,
}

impl RepoStateUpdate {
    pub fn new(
        repository_id: impl Into<String>,
        repository_name: impl Into<String>,
        status: TaskStatus,
    ) -> Self {
        Self {
            repository_id: repository_id.into(),
            repository_name: repository_name.into(),
            session_id: None,
            task_id: None,
            status,
            has_output: false,
            blocked_qa_gate: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_output(mut self) -> Self {
        self.has_output = true;
        self
    }

    pub fn with_blocked_gate(mut self, gate: impl Into<String>) -> Self {
        self.blocked_qa_gate = Some(gate.into());
        self
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.repository_id, "repository_id")?;
        if let Some(session_id) = &self.session_id {
            require_id(session_id, "session_id")?;
        }
        Ok(())
    }
}

/// Params for requests addressed to a single repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RepoRef {
    pub repository_id: String,
}

pub fn parse_update(params: Value) -> Result<RepoStateUpdate, ErrorInfo> {
    let update: RepoStateUpdate = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("update payload is invalid: {}", err),
        )
    })?;
    update.validate()?;
    Ok(update)
}

pub fn parse_repo_ref(params: Value) -> Result<RepoRef, ErrorInfo> {
    let repo: RepoRef = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("repository payload is invalid: {}", err),
        )
    })?;
    require_id(&repo.repository_id, "repository_id")?;
    Ok(repo)
}

fn require_id(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    if value.len() > MAX_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_field",
            format!("{} must be {} characters or fewer", field, MAX_ID_LEN),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_update_with_defaults() {
        let update = parse_update(json!({
            "repository_id": "repo-1",
            "repository_name": "api",
            "session_id": "s-1",
            "status": "running"
        }))
        .expect("valid update");

        assert_eq!(update.status, TaskStatus::Running);
        assert!(!update.has_output);
        assert_eq!(update.blocked_qa_gate, None);
    }

    #[test]
    fn unrecognised_status_maps_to_unknown() {
        let update = parse_update(json!({
            "repository_id": "repo-1",
            "repository_name": "api",
            "status": "paused_for_lunch"
        }))
        .expect("valid update");
        assert_eq!(update.status, TaskStatus::Unknown);
    }

    #[test]
    fn rejects_blank_repository_id() {
        let err = parse_update(json!({
            "repository_id": "  ",
            "repository_name": "api",
            "status": "running"
        }))
        .expect_err("blank id");
        assert_eq!(err.code, "missing_field");
    }

    #[test]
    fn rejects_unknown_update_fields() {
        let err = parse_update(json!({
            "repository_id": "repo-1",
            "repository_name": "api",
            "status": "running",
            "colour": "red"
        }))
        .expect_err("unknown field");
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn rejects_wrong_protocol_version() {
        let err = parse_request(r#"{"protocol_version":9,"method":"status"}"#)
            .expect_err("version mismatch");
        assert_eq!(err.code, "unsupported_version");
    }

    #[test]
    fn parses_request_method() {
        let request = parse_request(
            r#"{"protocol_version":1,"method":"get_config","id":"req-7"}"#,
        )
        .expect("valid request");
        assert_eq!(request.method, Method::GetConfig);
        assert_eq!(request.id.as_deref(), Some("req-7"));
    }

    #[test]
    fn status_classes_do_not_overlap() {
        let all = [
            TaskStatus::Pending,
            TaskStatus::PreFlight,
            TaskStatus::Running,
            TaskStatus::QaRunning,
            TaskStatus::QaFailed,
            TaskStatus::WaitingApproval,
            TaskStatus::WaitingInput,
            TaskStatus::Failed,
            TaskStatus::Completed,
            TaskStatus::Rejected,
            TaskStatus::Cancelled,
            TaskStatus::Unknown,
        ];
        for status in all {
            let classes = [
                status.is_failure(),
                status.is_terminal(),
                status.is_waiting(),
                status.is_working(),
            ];
            assert!(
                classes.iter().filter(|c| **c).count() <= 1,
                "{} belongs to more than one class",
                status.as_str()
            );
        }
    }

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn event_serializes_with_tag() {
        let status = StuckStatus {
            total_stuck_count: 0,
            waiting_input_count: 0,
            failed_count: 0,
            qa_blocked_count: 0,
            alerts: Vec::new(),
            highest_severity: None,
            last_updated: DateTime::parse_from_rfc3339("2026-01-30T12:00:00Z")
                .expect("timestamp")
                .with_timezone(&Utc),
        };
        let value = serde_json::to_value(StuckEvent::StatusUpdated { status }).expect("json");
        assert_eq!(value["event"], "status_updated");
        assert_eq!(value["status"]["total_stuck_count"], 0);
    }
}
