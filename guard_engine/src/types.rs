//! Core type definitions for the Safe Harbor guard engine.
//!
//! These types form the outward contract of the crate:
//!
//! - [`Layer`] names the fixed pipeline layers (0–9)
//! - [`Clause`] tags every token with the SQL region that owns it
//! - [`Span`] is a byte range into the original query text
//! - [`RejectionReport`] is the full caller-facing error payload
//! - [`ValidationReport`] carries per-request timing and layer metadata
//! - [`ValidationOutcome`] is the terminal result of one pipeline run

use std::collections::BTreeMap;

use serde::Serialize;

/// A validation layer in the fixed pipeline order.
///
/// Layer numbers are part of the stable contract: they appear in audit
/// events and in the `layers_passed` / `layers_failed` report fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Layer 0 — character-level input screening.
    AsciiInput,
    /// Layer 1 — table/column catalog check (optional).
    Schema,
    /// Layer 2 — PHI identifier scan.
    Phi,
    /// Layer 3 — aggregation shape enforcement.
    Aggregation,
    /// Layer 4 — anti-circumvention (subqueries, CTEs).
    Enforcement,
    /// Layer 5 — sample execution against synthetic data (extension).
    SampleExecution,
    /// Layer 7 — injection pattern scan (extension).
    PromptInjection,
    /// Layer 9 — system faults: configuration and tokenizer failures.
    System,
}

impl Layer {
    /// Stable numeric identifier for audit events and reports.
    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Self::AsciiInput => 0,
            Self::Schema => 1,
            Self::Phi => 2,
            Self::Aggregation => 3,
            Self::Enforcement => 4,
            Self::SampleExecution => 5,
            Self::PromptInjection => 7,
            Self::System => 9,
        }
    }

    /// Short name used in report keys (e.g. `"layer_2_phi"`).
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::AsciiInput => "ascii_input",
            Self::Schema => "schema",
            Self::Phi => "phi",
            Self::Aggregation => "aggregation",
            Self::Enforcement => "enforcement",
            Self::SampleExecution => "sample_execution",
            Self::PromptInjection => "prompt_injection",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The SQL clause that owns a token, inferred during tree construction.
///
/// `None` covers tokens seen before the first clause keyword (and constructs
/// such as `WITH` headers that precede any clause).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Clause {
    /// No owning clause determined.
    #[default]
    None,
    /// SELECT projection list.
    Select,
    /// FROM table references.
    From,
    /// JOIN table references.
    Join,
    /// ON join predicates.
    On,
    /// WHERE predicates.
    Where,
    /// GROUP BY dimension list.
    GroupBy,
    /// HAVING post-aggregation predicates.
    Having,
    /// ORDER BY sort list.
    OrderBy,
}

impl std::fmt::Display for Clause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::None => "statement",
            Self::Select => "SELECT",
            Self::From => "FROM",
            Self::Join => "JOIN",
            Self::On => "ON",
            Self::Where => "WHERE",
            Self::GroupBy => "GROUP BY",
            Self::Having => "HAVING",
            Self::OrderBy => "ORDER BY",
        };
        f.write_str(text)
    }
}

/// A byte range into the original query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    /// Byte offset of the first byte.
    pub start: usize,
    /// Byte offset one past the last byte.
    pub end: usize,
}

impl Span {
    /// Build a span from a start offset and a length.
    #[must_use]
    pub fn at(start: usize, len: usize) -> Self {
        Self {
            start,
            end: start + len,
        }
    }
}

/// The full caller-facing rejection payload.
///
/// Assembled by the orchestrator from a [`crate::errors::Rejection`] plus the
/// educational guidance tables. Field names are part of the stable contract.
#[derive(Debug, Clone, Serialize)]
pub struct RejectionReport {
    /// Stable error code (e.g. `"E201"`).
    pub code: &'static str,

    /// Human-readable description of what was rejected.
    pub message: String,

    /// Name of the layer that rejected the query.
    pub layer: &'static str,

    /// Why the violated rule exists and how to comply with it.
    pub educational_guidance: &'static str,

    /// A worked example of a compliant query, when one applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_pattern: Option<&'static str>,

    /// Link to the relevant rule documentation.
    pub documentation: &'static str,

    /// Byte range of the offending text, when locatable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offending_span: Option<Span>,

    /// The offending identifier, when the rule names one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

/// Per-request metadata returned with every outcome.
///
/// The query itself is never stored here — only its SHA-256 hash, so that
/// reports and audit events can be persisted without PHI exposure.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// Request identifier supplied by (or generated for) the caller.
    pub request_id: String,

    /// SHA-256 hex digest of the query text.
    pub query_hash: String,

    /// Total wall-clock validation time in milliseconds.
    pub validation_time_ms: f64,

    /// Per-layer wall-clock times, keyed `layer_<n>_<name>`.
    pub layer_times_ms: BTreeMap<String, f64>,

    /// Layer numbers that completed successfully, in execution order.
    pub layers_passed: Vec<u8>,

    /// Layer numbers that rejected the query (at most one).
    pub layers_failed: Vec<u8>,
}

/// Terminal result of one pipeline invocation.
///
/// Exactly one of the two variants; `Accepted` is only reachable after every
/// stage returned normally and the wrapper ran.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status")]
pub enum ValidationOutcome {
    /// The query passed every layer and was wrapped.
    #[serde(rename = "valid")]
    Accepted {
        /// The guarded rewrite of the query.
        wrapped_query: String,
        /// Timing and layer metadata.
        #[serde(flatten)]
        report: ValidationReport,
    },
    /// The query was rejected by the first failing layer.
    #[serde(rename = "invalid")]
    Rejected {
        /// The classified, explainable rejection.
        #[serde(flatten)]
        rejection: RejectionReport,
        /// Timing and layer metadata.
        #[serde(flatten)]
        report: ValidationReport,
    },
}

impl ValidationOutcome {
    /// Whether the query was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// The wrapped query text, if accepted.
    #[must_use]
    pub fn wrapped_query(&self) -> Option<&str> {
        match self {
            Self::Accepted { wrapped_query, .. } => Some(wrapped_query),
            Self::Rejected { .. } => None,
        }
    }

    /// The rejection code, if rejected.
    #[must_use]
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Accepted { .. } => None,
            Self::Rejected { rejection, .. } => Some(rejection.code),
        }
    }

    /// The full rejection payload, if rejected.
    #[must_use]
    pub fn rejection(&self) -> Option<&RejectionReport> {
        match self {
            Self::Accepted { .. } => None,
            Self::Rejected { rejection, .. } => Some(rejection),
        }
    }

    /// The shared request metadata.
    #[must_use]
    pub fn report(&self) -> &ValidationReport {
        match self {
            Self::Accepted { report, .. } | Self::Rejected { report, .. } => report,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
