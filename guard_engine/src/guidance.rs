//! Educational guidance for rejection codes.
//!
//! Every rejection is explainable: alongside the error message the caller
//! receives a plain-language explanation of why the rule exists and, where
//! one applies, a worked example of a compliant query. Rejections are never
//! auto-corrected — the guidance is the only remediation offered.

use crate::errors::Rejection;
use crate::types::RejectionReport;

/// A compliant query used as the worked example for several aggregation codes.
const CANONICAL_PATTERN: &str = "SELECT gender_concept_id,\n       \
     COUNT(DISTINCT person_id) AS Count_Patients\nFROM person\nGROUP BY gender_concept_id";

/// Look up the guidance text and optional correct-pattern example for a code.
///
/// Unknown codes return a generic fallback rather than panicking so that the
/// report assembly path is total.
#[must_use]
pub fn guidance_for(code: &str) -> (&'static str, Option<&'static str>) {
    match code {
        "E001" => (
            "The query contains characters outside printable ASCII. Non-ASCII input is \
             refused outright because Unicode confusables, zero-width characters, and \
             direction overrides are the cheapest way to smuggle content past textual \
             checks. Rewrite the query using plain ASCII letters, digits, and punctuation.",
            Some("SELECT state_code, COUNT(DISTINCT person_id) AS Count_Patients\nFROM person\nGROUP BY state_code"),
        ),
        "E002" => (
            "The query contains a control character other than newline, carriage return, \
             or tab. Control characters serve no purpose in SQL text and are a known \
             smuggling vector, so they are refused before any parsing happens.",
            Some("SELECT person_id,\n       gender_concept_id\nFROM person"),
        ),
        "E003" => (
            "The query is empty or contains only whitespace. Submit a complete SQL \
             statement.",
            Some("SELECT COUNT(DISTINCT person_id) AS Count_Patients FROM person"),
        ),
        "E004" => (
            "The query exceeds the configured maximum length. The limit bounds \
             worst-case validation latency; split the analysis into smaller queries.",
            None,
        ),
        "E101" => (
            "The query references a table that is not part of the approved schema. \
             Check the table name against the catalog; common tables include person, \
             condition_occurrence, drug_exposure, measurement, observation, and \
             visit_occurrence.",
            Some("SELECT COUNT(DISTINCT person_id) AS Count_Patients\nFROM condition_occurrence"),
        ),
        "E102" => (
            "The query references a column that none of its tables define. Check the \
             column name against the schema documentation for the tables in the FROM \
             clause.",
            Some("SELECT gender_concept_id,\n       COUNT(DISTINCT person_id) AS Count_Patients\nFROM person\nGROUP BY gender_concept_id"),
        ),
        "E201" => (
            "The query references a column that carries a direct identifier — one of \
             the eighteen Safe Harbor categories of identifying information (names, \
             SSNs, record numbers, contact details, device and network identifiers, \
             biometrics, and similar). Such columns can never appear in a query; only \
             aggregate, de-identified data may be requested.",
            Some("SELECT state_code,\n       COUNT(DISTINCT person_id) AS Count_Patients\nFROM person\nGROUP BY state_code"),
        ),
        "E202" => (
            "The query references geography finer than state level. Safe Harbor permits \
             only state-level or larger divisions: street addresses, cities, counties, \
             ZIP codes, and coordinates are all blocked.",
            Some("SELECT state_code,\n       COUNT(DISTINCT person_id) AS Count_Patients\nFROM person\nGROUP BY state_code"),
        ),
        "E203" => (
            "The query references a date element more specific than year. Safe Harbor \
             permits year alone; months, days, and full dates (birth, admission, \
             discharge, visit) are blocked.",
            Some("SELECT year_of_birth,\n       COUNT(DISTINCT person_id) AS Count_Patients\nFROM person\nGROUP BY year_of_birth"),
        ),
        "E204" => (
            "SELECT * cannot be verified free of blocked columns, so it is refused \
             unconditionally. List every projected column explicitly — you must know \
             exactly which data the query touches.",
            Some("SELECT gender_concept_id,\n       race_concept_id,\n       COUNT(DISTINCT person_id) AS Count_Patients\nFROM person\nGROUP BY gender_concept_id, race_concept_id"),
        ),
        "E301" => (
            "Any query that projects a plain column must group by it: aggregation is \
             the mechanism that de-identifies results. Only a purely aggregate query \
             (a single total with no dimension columns) is exempt from GROUP BY.",
            Some(CANONICAL_PATTERN),
        ),
        "E302" => (
            "Every query must include the patient count expression \
             COUNT(DISTINCT person_id) AS Count_Patients in its SELECT list. The \
             minimum-cohort threshold is enforced against that exact output column.",
            Some(CANONICAL_PATTERN),
        ),
        "E303" => (
            "The patient count expression must be written exactly as \
             COUNT(DISTINCT person_id) AS Count_Patients: keywords may vary in case \
             and spacing, but the alias is case-sensitive, DISTINCT is required, and \
             the counted column must be person_id. The exact spelling is what lets \
             the threshold wrapper locate the column unambiguously — a near miss is \
             treated as a spoofing attempt, never as close enough.",
            Some(CANONICAL_PATTERN),
        ),
        "E304" => (
            "Aggregate functions may appear only in the SELECT list or the HAVING \
             clause. An aggregate in WHERE, GROUP BY, or a join predicate has no \
             defined grouping scope and is refused.",
            Some(CANONICAL_PATTERN),
        ),
        "E305" => (
            "Every column named in GROUP BY must also appear in the SELECT list, so \
             that each output row names the dimensions it was aggregated over.",
            Some("SELECT gender_concept_id,\n       race_concept_id,\n       COUNT(DISTINCT person_id) AS Count_Patients\nFROM person\nGROUP BY gender_concept_id, race_concept_id"),
        ),
        "E401" => (
            "Subqueries are refused because a nested scope could compute an aggregate \
             internally and re-expose it in a shape the outer checks no longer \
             recognize, defeating the minimum-cohort threshold. All logic must live \
             in one top-level query.",
            Some(CANONICAL_PATTERN),
        ),
        "E402" => (
            "WITH clauses (common table expressions) are refused for the same reason \
             as subqueries: a named intermediate result can hide a non-compliant \
             shape from the checks. All logic must live in one top-level query.",
            Some(CANONICAL_PATTERN),
        ),
        "E501" => (
            "The query passed every static check but failed when executed against \
             synthetic sample data. This usually indicates a type mismatch, a \
             division by zero, or a syntax construct the static checks do not model. \
             The executor's message names the failure.",
            None,
        ),
        "E502" => (
            "The query produced more sample rows than the configured cap, which \
             suggests a missing join predicate or an unintended cartesian product. \
             Tighten the join or filter conditions.",
            None,
        ),
        "E701" => (
            "A SQL comment in the query contains instruction-like text. Comments \
             should describe query logic, not carry directives; instruction phrasing \
             in comments is treated as an attempt to manipulate downstream tooling.",
            Some("/* Join to person for demographics */\nSELECT gender_concept_id, COUNT(DISTINCT person_id) AS Count_Patients\nFROM person\nGROUP BY gender_concept_id"),
        ),
        "E702" => (
            "A string literal in the query contains instruction-like text. Literals \
             should hold data values only; instruction phrasing inside a value is \
             treated as an attempt to manipulate downstream tooling.",
            None,
        ),
        "E703" => (
            "The query references a privileged role (admin, root, superuser, or \
             similar). Such references have no place in an analytic query and are \
             treated as an escalation attempt.",
            None,
        ),
        "E704" => (
            "The query contains encoded content (hex or unicode escapes, base64-like \
             runs). Encodings can conceal blocked constructs from textual checks, so \
             they are refused; use plain ASCII text only.",
            None,
        ),
        "E901" => (
            "The engine configuration is invalid. This is a deployment fault, not a \
             problem with the query; contact the operator.",
            None,
        ),
        "E902" => (
            "The SQL tokenizer could not derive any structure from the query — \
             commonly an unterminated string literal or unbalanced parentheses. Fix \
             the syntax and resubmit.",
            Some(CANONICAL_PATTERN),
        ),
        _ => ("No guidance is available for this code.", None),
    }
}

/// Documentation link for an error code, by range.
#[must_use]
pub fn documentation_link(code: &str) -> &'static str {
    match code.as_bytes().get(1) {
        Some(b'0') => "https://docs.safeharbor-guard.dev/rules/input-screening",
        Some(b'1') => "https://docs.safeharbor-guard.dev/rules/schema",
        Some(b'2') => {
            "https://www.hhs.gov/hipaa/for-professionals/privacy/special-topics/de-identification/index.html"
        }
        Some(b'3') => "https://docs.safeharbor-guard.dev/rules/aggregation",
        Some(b'4') => "https://docs.safeharbor-guard.dev/rules/circumvention",
        Some(b'5') => "https://docs.safeharbor-guard.dev/rules/sample-execution",
        Some(b'7') => "https://docs.safeharbor-guard.dev/rules/injection",
        Some(b'9') => "https://docs.safeharbor-guard.dev/operations/system-errors",
        _ => "https://docs.safeharbor-guard.dev/rules",
    }
}

/// Assemble the full caller-facing report for a rejection.
#[must_use]
pub fn report_for(rejection: &Rejection) -> RejectionReport {
    let code = rejection.code();
    let (educational_guidance, correct_pattern) = guidance_for(code);
    RejectionReport {
        code,
        message: rejection.to_string(),
        layer: rejection.layer().name(),
        educational_guidance,
        correct_pattern,
        documentation: documentation_link(code),
        offending_span: rejection.span(),
        identifier: rejection.identifier().map(str::to_owned),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
