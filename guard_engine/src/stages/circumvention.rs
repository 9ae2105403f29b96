//! Layer 4 — anti-circumvention.
//!
//! Subqueries and common table expressions let a query compute an aggregate
//! in a nested scope and re-expose the value in a shape the earlier layers
//! no longer recognize, or reference blocked columns in a scope the clause
//! tagging does not anticipate. Both constructs are refused outright.
//!
//! This stage runs strictly after the PHI and aggregation layers, so the
//! only queries reaching the wrapper are single-scope statements already
//! proven compliant. Detection is dual: keyword counting over the tree plus
//! the raw-text patterns `(SELECT` and leading `WITH`.

use regex::Regex;

use crate::errors::Rejection;
use crate::stages::{Stage, ValidationContext};
use crate::types::Layer;

/// The anti-circumvention checker.
pub struct CircumventionCheck {
    /// `( SELECT` anywhere — the textual subquery net.
    subquery: Regex,
    /// Statement-leading `WITH` — the textual CTE net.
    leading_with: Regex,
}

impl CircumventionCheck {
    /// Compile the fallback patterns.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subquery: Regex::new(r"(?i)\(\s*SELECT\b").expect("subquery fallback regex is valid"),
            leading_with: Regex::new(r"(?i)^\s*WITH\b").expect("cte fallback regex is valid"),
        }
    }
}

impl Default for CircumventionCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for CircumventionCheck {
    fn name(&self) -> &'static str {
        "circumvention"
    }

    fn layer(&self) -> Layer {
        Layer::Enforcement
    }

    fn check(&self, ctx: &mut ValidationContext<'_>) -> Result<(), Rejection> {
        let Some(statement) = ctx.statement.as_ref() else {
            return Ok(());
        };

        // CTEs first: a WITH statement also contains a nested SELECT, and the
        // more specific classification is the useful one.
        if statement.count_keyword("WITH") > 0 || self.leading_with.is_match(ctx.query) {
            return Err(Rejection::CteNotAllowed);
        }

        if statement.count_keyword("SELECT") > 1 || self.subquery.is_match(ctx.query) {
            return Err(Rejection::SubqueryNotAllowed);
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
