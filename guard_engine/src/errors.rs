//! Rejection taxonomy for the Safe Harbor guard engine.
//!
//! Every way the pipeline can refuse a query is one variant of [`Rejection`],
//! carrying a stable error code and enough structure for the caller-facing
//! report. Code ranges are a stable contract:
//!
//! | Range | Layer |
//! |---|---|
//! | E0xx | lexical input screening |
//! | E1xx | schema catalog (optional layer) |
//! | E2xx | PHI identifier scan |
//! | E3xx | aggregation shape |
//! | E4xx | anti-circumvention |
//! | E5xx | sample execution (extension) |
//! | E7xx | injection patterns (extension) |
//! | E9xx | system: configuration, tokenizer |
//!
//! Rejections are terminal: the first failing layer stops the pipeline and
//! nothing is ever auto-corrected.

use crate::types::{Clause, Layer, Span};

/// A classified reason for refusing a query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    /// E001 — a character outside printable ASCII.
    #[error("non-ASCII character '{character}' (U+{code_point:04X}) at position {position}")]
    NonAsciiCharacter {
        /// 1-based character offset into the query.
        position: usize,
        /// The offending character.
        character: char,
        /// Unicode code point of the character.
        code_point: u32,
        /// Byte range of the character.
        span: Span,
    },

    /// E002 — a control character other than tab, newline, or carriage return.
    #[error(
        "invalid control character U+{code_point:04X} at position {position}; \
         only newline, carriage return, and tab are allowed"
    )]
    InvalidControlCharacter {
        /// 1-based character offset into the query.
        position: usize,
        /// Code point of the control character.
        code_point: u32,
        /// Byte range of the character.
        span: Span,
    },

    /// E003 — empty or whitespace-only input.
    #[error("query is empty or contains only whitespace")]
    EmptyQuery,

    /// E004 — input longer than the configured maximum.
    #[error("query is {length} characters long; the maximum accepted length is {max}")]
    QueryTooLong {
        /// Character count of the input.
        length: usize,
        /// Configured maximum.
        max: usize,
    },

    /// E101 — a table reference outside the approved catalog.
    #[error("table '{table}' is not part of the approved schema")]
    UnknownTable {
        /// The unrecognized table name.
        table: String,
    },

    /// E102 — a column reference no referenced table defines.
    #[error("column '{column}' is not defined by any table referenced in the query")]
    UnknownColumn {
        /// The unrecognized column name.
        column: String,
    },

    /// E201 — a direct PHI identifier.
    #[error("direct identifier '{identifier}' ({kind}) referenced in the {clause} clause")]
    DirectIdentifier {
        /// The blocked identifier as written.
        identifier: String,
        /// Safe Harbor category description.
        kind: &'static str,
        /// Clause where the identifier appears.
        clause: Clause,
        /// Byte range of the identifier token.
        span: Span,
    },

    /// E202 — geography finer than state level.
    #[error("geographic identifier '{identifier}' in the {clause} clause is finer than state level")]
    GeographicElement {
        /// The blocked identifier as written.
        identifier: String,
        /// Clause where the identifier appears.
        clause: Clause,
        /// Byte range of the identifier token.
        span: Span,
    },

    /// E203 — a date element more specific than year.
    #[error("date element '{identifier}' in the {clause} clause is more specific than year")]
    DateElement {
        /// The blocked identifier as written.
        identifier: String,
        /// Clause where the identifier appears.
        clause: Clause,
        /// Byte range of the identifier token.
        span: Span,
    },

    /// E204 — a wildcard projection.
    #[error("SELECT * is prohibited; every projected column must be listed explicitly")]
    WildcardProjection,

    /// E301 — a grouped query shape without GROUP BY.
    #[error("GROUP BY is required whenever the SELECT list contains a non-aggregate column")]
    MissingGroupBy,

    /// E302 — the mandated patient count expression is absent.
    #[error(
        "required patient count expression is missing; \
         include COUNT(DISTINCT person_id) AS Count_Patients"
    )]
    MissingPatientCount,

    /// E303 — a near-miss of the mandated patient count expression.
    #[error(
        "invalid patient count syntax '{found}'; \
         the required form is COUNT(DISTINCT person_id) AS Count_Patients"
    )]
    InvalidPatientCountSyntax {
        /// The deviating expression as written.
        found: String,
        /// Byte range of the deviating expression, when locatable.
        span: Option<Span>,
    },

    /// E304 — an aggregate function outside SELECT/HAVING.
    #[error("aggregate function '{function}' is not allowed in the {clause} clause")]
    AggregateMisplaced {
        /// The aggregate function name as written.
        function: String,
        /// Clause where the call appears.
        clause: Clause,
        /// Byte range of the function token.
        span: Span,
    },

    /// E305 — a GROUP BY column missing from the SELECT list.
    #[error("invalid column '{column}' in GROUP BY clause: {reason}")]
    InvalidGroupByColumn {
        /// The offending GROUP BY column.
        column: String,
        /// Why the column is not acceptable.
        reason: String,
    },

    /// E401 — a nested SELECT.
    #[error("subqueries are not allowed; they could bypass the minimum patient count threshold")]
    SubqueryNotAllowed,

    /// E402 — a WITH clause.
    #[error("common table expressions (WITH clauses) are not allowed")]
    CteNotAllowed,

    /// E501 — the sample executor reported a runtime failure.
    #[error("sample execution failed ({kind}): {message}")]
    ExecutionFailed {
        /// Failure classification from the executor.
        kind: String,
        /// Executor-provided detail.
        message: String,
    },

    /// E502 — the sample result set exceeded the row cap.
    #[error("sample execution returned {rows} rows, exceeding the cap of {max}")]
    ResultSetTooLarge {
        /// Rows the sample run produced.
        rows: usize,
        /// Configured row cap.
        max: usize,
    },

    /// E701 — instruction-like text inside a SQL comment.
    #[error("instruction-like text in SQL comment (matched '{pattern}')")]
    InstructionInComment {
        /// Truncated comment text.
        snippet: String,
        /// The phrase or keyword that matched.
        pattern: String,
    },

    /// E702 — instruction-like text inside a string literal.
    #[error("instruction-like text in string literal (matched '{pattern}')")]
    InstructionInString {
        /// Truncated literal text.
        snippet: String,
        /// The phrase or keyword that matched.
        pattern: String,
    },

    /// E703 — a privileged-role reference.
    #[error("privilege escalation attempt detected (keyword '{keyword}')")]
    PrivilegeEscalation {
        /// Truncated surrounding text.
        snippet: String,
        /// The privilege keyword that matched.
        keyword: String,
    },

    /// E704 — encoded or obfuscated content.
    #[error("encoding or obfuscation detected (pattern {pattern})")]
    ObfuscationDetected {
        /// Truncated surrounding text.
        snippet: String,
        /// The encoding pattern that matched.
        pattern: String,
    },

    /// E902 — the tokenizer could not produce any structure.
    #[error("the SQL tokenizer could not derive a structure: {reason}")]
    ParseFailure {
        /// What defeated tokenization.
        reason: String,
    },
}

impl Rejection {
    /// The stable error code for this rejection.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NonAsciiCharacter { .. } => "E001",
            Self::InvalidControlCharacter { .. } => "E002",
            Self::EmptyQuery => "E003",
            Self::QueryTooLong { .. } => "E004",
            Self::UnknownTable { .. } => "E101",
            Self::UnknownColumn { .. } => "E102",
            Self::DirectIdentifier { .. } => "E201",
            Self::GeographicElement { .. } => "E202",
            Self::DateElement { .. } => "E203",
            Self::WildcardProjection => "E204",
            Self::MissingGroupBy => "E301",
            Self::MissingPatientCount => "E302",
            Self::InvalidPatientCountSyntax { .. } => "E303",
            Self::AggregateMisplaced { .. } => "E304",
            Self::InvalidGroupByColumn { .. } => "E305",
            Self::SubqueryNotAllowed => "E401",
            Self::CteNotAllowed => "E402",
            Self::ExecutionFailed { .. } => "E501",
            Self::ResultSetTooLarge { .. } => "E502",
            Self::InstructionInComment { .. } => "E701",
            Self::InstructionInString { .. } => "E702",
            Self::PrivilegeEscalation { .. } => "E703",
            Self::ObfuscationDetected { .. } => "E704",
            Self::ParseFailure { .. } => "E902",
        }
    }

    /// The pipeline layer this rejection belongs to.
    #[must_use]
    pub fn layer(&self) -> Layer {
        match self {
            Self::NonAsciiCharacter { .. }
            | Self::InvalidControlCharacter { .. }
            | Self::EmptyQuery
            | Self::QueryTooLong { .. } => Layer::AsciiInput,
            Self::UnknownTable { .. } | Self::UnknownColumn { .. } => Layer::Schema,
            Self::DirectIdentifier { .. }
            | Self::GeographicElement { .. }
            | Self::DateElement { .. }
            | Self::WildcardProjection => Layer::Phi,
            Self::MissingGroupBy
            | Self::MissingPatientCount
            | Self::InvalidPatientCountSyntax { .. }
            | Self::AggregateMisplaced { .. }
            | Self::InvalidGroupByColumn { .. } => Layer::Aggregation,
            Self::SubqueryNotAllowed | Self::CteNotAllowed => Layer::Enforcement,
            Self::ExecutionFailed { .. } | Self::ResultSetTooLarge { .. } => {
                Layer::SampleExecution
            }
            Self::InstructionInComment { .. }
            | Self::InstructionInString { .. }
            | Self::PrivilegeEscalation { .. }
            | Self::ObfuscationDetected { .. } => Layer::PromptInjection,
            Self::ParseFailure { .. } => Layer::System,
        }
    }

    /// The byte range of the offending text, when locatable.
    #[must_use]
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::NonAsciiCharacter { span, .. }
            | Self::InvalidControlCharacter { span, .. }
            | Self::DirectIdentifier { span, .. }
            | Self::GeographicElement { span, .. }
            | Self::DateElement { span, .. }
            | Self::AggregateMisplaced { span, .. } => Some(*span),
            Self::InvalidPatientCountSyntax { span, .. } => *span,
            _ => None,
        }
    }

    /// The offending identifier, when the rule names one.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::DirectIdentifier { identifier, .. }
            | Self::GeographicElement { identifier, .. }
            | Self::DateElement { identifier, .. } => Some(identifier),
            Self::UnknownTable { table } => Some(table),
            Self::UnknownColumn { column } | Self::InvalidGroupByColumn { column, .. } => {
                Some(column)
            }
            _ => None,
        }
    }

    /// Whether this rejection represents a circumvention or injection
    /// attempt that warrants a dedicated security audit event.
    #[must_use]
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::SubqueryNotAllowed
                | Self::CteNotAllowed
                | Self::InstructionInComment { .. }
                | Self::InstructionInString { .. }
                | Self::PrivilegeEscalation { .. }
                | Self::ObfuscationDetected { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors raised while loading configuration, rule tables, or catalogs.
///
/// These are fatal at process start (code range E9xx) and are never produced
/// per-request: a running engine always holds fully validated configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("[E901] failed to read '{0}': {1}")]
    Read(String, String),

    /// A configuration file could not be parsed.
    #[error("[E901] failed to parse '{0}': {1}")]
    Parse(String, String),

    /// A configured pattern failed to compile.
    #[error("[E901] invalid pattern '{0}': {1}")]
    Pattern(String, String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
