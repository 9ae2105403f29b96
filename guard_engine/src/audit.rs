//! Audit events for compliance logging.
//!
//! Every validation produces events suitable for an append-only audit trail:
//! the outcome itself, error detail on rejection, and a security event when
//! the rejection indicates a circumvention or injection attempt.
//!
//! Queries are NEVER placed in events — only their SHA-256 hash. Sinks are
//! fire-and-forget collaborators invoked after the outcome is decided; a
//! slow or failing sink can never affect the pipeline's correctness path.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::Rejection;
use crate::types::ValidationReport;

/// Audit event schema version.
const EVENT_VERSION: &str = "1.0";

/// SHA-256 hex digest of a query, the only form in which query content may
/// reach logs or events.
#[must_use]
pub fn hash_query(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hex::encode(hasher.finalize())
}

/// Category of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A validation pipeline completed (pass or fail).
    QueryValidation,
    /// A validation rejected a query, with error detail.
    ValidationError,
    /// A circumvention or injection attempt was blocked.
    SecurityEvent,
}

/// Event severity for downstream filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

/// Caller identity attached to the audit trail.
///
/// All fields are optional free text; anonymization is the caller's concern.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestIdentity {
    /// User identifier.
    pub user_id: Option<String>,
    /// Session identifier for grouping related events.
    pub session_id: Option<String>,
    /// Source IP address.
    pub ip_address: Option<String>,
    /// Execution environment identifier.
    pub container_id: Option<String>,
}

/// One audit event.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Schema version for event format evolution.
    pub version: &'static str,
    /// Event creation time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Event category.
    pub event_type: EventType,
    /// Event severity.
    pub severity: EventSeverity,
    /// Request this event belongs to.
    pub request_id: String,
    /// SHA-256 hash of the query.
    pub query_hash: String,
    /// Caller identity.
    #[serde(flatten)]
    pub identity: RequestIdentity,
    /// Event-specific payload.
    pub data: serde_json::Value,
}

impl AuditEvent {
    fn new(
        event_type: EventType,
        severity: EventSeverity,
        request_id: &str,
        query_hash: &str,
        identity: &RequestIdentity,
        data: serde_json::Value,
    ) -> Self {
        Self {
            version: EVENT_VERSION,
            timestamp: Utc::now(),
            event_id: Uuid::new_v4(),
            event_type,
            severity,
            request_id: request_id.to_owned(),
            query_hash: query_hash.to_owned(),
            identity: identity.clone(),
            data,
        }
    }

    /// Pipeline-completion event, pass or fail.
    #[must_use]
    pub fn validation(report: &ValidationReport, identity: &RequestIdentity) -> Self {
        let passed = report.layers_failed.is_empty();
        Self::new(
            EventType::QueryValidation,
            EventSeverity::Info,
            &report.request_id,
            &report.query_hash,
            identity,
            serde_json::json!({
                "validation_result": if passed { "PASS" } else { "FAIL" },
                "layers_passed": &report.layers_passed,
                "layers_failed": &report.layers_failed,
                "total_time_ms": report.validation_time_ms,
                "layer_times_ms": &report.layer_times_ms,
            }),
        )
    }

    /// Error-detail event for a rejection.
    #[must_use]
    pub fn error(
        report: &ValidationReport,
        rejection: &Rejection,
        identity: &RequestIdentity,
    ) -> Self {
        let message: String = rejection.to_string().chars().take(200).collect();
        Self::new(
            EventType::ValidationError,
            EventSeverity::Warning,
            &report.request_id,
            &report.query_hash,
            identity,
            serde_json::json!({
                "error_code": rejection.code(),
                "layer": rejection.layer().number(),
                "message": message,
            }),
        )
    }

    /// Security event for a blocked circumvention or injection attempt.
    #[must_use]
    pub fn security(
        report: &ValidationReport,
        rejection: &Rejection,
        identity: &RequestIdentity,
    ) -> Self {
        Self::new(
            EventType::SecurityEvent,
            EventSeverity::Error,
            &report.request_id,
            &report.query_hash,
            identity,
            serde_json::json!({
                "event_subtype": "CIRCUMVENTION_ATTEMPT",
                "detection_layer": rejection.layer().number(),
                "pattern": rejection.code(),
                "blocked": true,
            }),
        )
    }
}

/// A fire-and-forget audit event consumer.
///
/// Implementations must swallow their own failures — there is no error
/// channel back into the pipeline by design.
pub trait AuditSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: &AuditEvent);
}

/// Sink that forwards events as structured lines through the `log` facade,
/// under the `audit` target.
pub struct LogSink;

impl AuditSink for LogSink {
    fn record(&self, event: &AuditEvent) {
        match serde_json::to_string(event) {
            Ok(line) => log::info!(target: "audit", "{line}"),
            Err(e) => log::warn!(target: "audit", "unserializable audit event: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
