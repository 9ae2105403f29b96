//! The threshold wrapper — the final transform on an accepted query.
//!
//! Rewrites the validated query so that a minimum patient count filter
//! applies strictly after the query's own WHERE/GROUP BY/HAVING evaluate:
//!
//! ```sql
//! WITH guarded_query AS (
//! SELECT gender_concept_id, COUNT(DISTINCT person_id) AS Count_Patients
//! FROM person
//! GROUP BY gender_concept_id
//! )
//! SELECT *
//! FROM guarded_query
//! WHERE Count_Patients >= 20000
//! ```
//!
//! The system-generated named common-table wrapper is the single construct
//! in the system allowed to introduce a containing scope — user input may
//! not contain subqueries or CTEs (Layer 4), so by the time this runs, the
//! inner relation is known to be a single-scope compliant statement and the
//! outer filter cannot be reordered before the user's own predicates.
//!
//! The inner text is inserted byte-for-byte (minus trailing whitespace and
//! semicolon), and wrapping is idempotent.

/// The reserved name of the system-generated inner relation.
pub const WRAPPER_NAME: &str = "guarded_query";

/// The output column the threshold filter reads.
const COUNT_COLUMN: &str = "Count_Patients";

/// Wrap a validated query with the minimum patient count filter.
///
/// Idempotent: text that is already a wrap is returned unchanged.
#[must_use]
pub fn wrap_query(query: &str, min_patient_count: u64) -> String {
    if is_wrapped(query) {
        return query.to_owned();
    }
    let inner = query.trim_end().trim_end_matches(';').trim_end();
    format!(
        "WITH {WRAPPER_NAME} AS (\n{inner}\n)\nSELECT *\nFROM {WRAPPER_NAME}\nWHERE {COUNT_COLUMN} >= {min_patient_count}"
    )
}

/// Whether the text is a wrap produced by [`wrap_query`].
#[must_use]
pub fn is_wrapped(query: &str) -> bool {
    let head = format!("WITH {WRAPPER_NAME} AS (");
    let tail_marker = format!("WHERE {COUNT_COLUMN} >= ");
    let trimmed = query.trim_start();
    trimmed.starts_with(&head) && query.trim_end().rsplit('\n').next().is_some_and(|last| {
        last.trim_start().starts_with(&tail_marker)
    })
}

/// Recover the inner query from a wrap, for audit tooling and logging.
/// Text that is not a wrap is returned as-is.
#[must_use]
pub fn unwrap_query(wrapped: &str) -> &str {
    if !is_wrapped(wrapped) {
        return wrapped;
    }
    let head_len = format!("WITH {WRAPPER_NAME} AS (\n").len();
    let trimmed = wrapped.trim_start();
    let body = &trimmed[head_len..];
    let closer = format!("\n)\nSELECT *\nFROM {WRAPPER_NAME}\n");
    match body.rfind(&closer) {
        Some(end) => &body[..end],
        None => wrapped,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
