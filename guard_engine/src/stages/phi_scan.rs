//! Layer 2 — PHI identifier scan.
//!
//! Classifies every column/table reference against the policy rule table,
//! clause by clause, and rejects wildcard projections outright. Two rules
//! here are load-bearing:
//!
//! - String and number literals are never looked up. A value that happens to
//!   equal a blocked name is not a column reference, and classifying it as
//!   one would make legitimate filters impossible to write.
//! - Qualified names are checked segment by segment (`p.patient_name` checks
//!   both `p` and `patient_name`), so a table prefix can never mask a
//!   blocked column.
//!
//! Per the dual-strategy rule, the structural wildcard check is paired with
//! a whole-string `SELECT * FROM` pattern in case the tree mis-models the
//! projection.

use regex::Regex;

use crate::errors::Rejection;
use crate::policy::{PhiCategory, PolicyRuleTable};
use crate::stages::{Stage, ValidationContext};
use crate::token_tree::{NodeKind, Statement, TokenNode};
use crate::types::{Clause, Layer};

/// Clauses whose identifiers are classified, in the order they are scanned.
const SCANNED_CLAUSES: [Clause; 7] = [
    Clause::Select,
    Clause::From,
    Clause::Join,
    Clause::Where,
    Clause::On,
    Clause::GroupBy,
    Clause::Having,
];

/// The PHI identifier scanner.
pub struct PhiScan;

impl Stage for PhiScan {
    fn name(&self) -> &'static str {
        "phi_scan"
    }

    fn layer(&self) -> Layer {
        Layer::Phi
    }

    fn check(&self, ctx: &mut ValidationContext<'_>) -> Result<(), Rejection> {
        let Some(statement) = ctx.statement.as_ref() else {
            return Ok(());
        };

        check_wildcard(ctx.query, statement)?;

        for clause in SCANNED_CLAUSES {
            for node in statement.walk() {
                if node.clause != clause {
                    continue;
                }
                check_identifier(node, ctx.policy)?;
            }
        }

        Ok(())
    }
}

/// Reject a wildcard projection, structurally and via the textual fallback.
fn check_wildcard(query: &str, statement: &Statement<'_>) -> Result<(), Rejection> {
    // Textual fallback net.
    let pattern =
        Regex::new(r"(?i)\bSELECT\s+\*\s+FROM\b").expect("wildcard fallback regex is valid");
    if pattern.is_match(query) {
        return Err(Rejection::WildcardProjection);
    }

    // Structural pass: `*` as a projection item. A `*` opening a sequence is
    // the argument of an aggregate call (`COUNT(*)`), which Layer 3 judges.
    for sequence in statement.sequences() {
        for (i, node) in sequence.iter().enumerate() {
            if node.kind != NodeKind::Operator || node.text != "*" || node.clause != Clause::Select
            {
                continue;
            }
            if i == 0 {
                continue;
            }
            let prev = &sequence[i - 1];
            let follows_projection_head = prev.is_keyword("SELECT")
                || prev.is_keyword("DISTINCT")
                || (prev.kind == NodeKind::Punctuation && prev.text == ",");
            if follows_projection_head {
                return Err(Rejection::WildcardProjection);
            }
        }
    }

    Ok(())
}

/// Look one identifier node up in the rule table.
fn check_identifier(node: &TokenNode<'_>, policy: &PolicyRuleTable) -> Result<(), Rejection> {
    if !matches!(node.kind, NodeKind::Identifier | NodeKind::QuotedIdent) {
        return Ok(());
    }
    let Some(normalized) = node.normalized_name() else {
        return Ok(());
    };

    let Some(category) = policy.lookup(&normalized) else {
        return Ok(());
    };

    let identifier = match node.kind {
        NodeKind::QuotedIdent => node
            .text
            .trim_matches(|c| c == '`' || c == '"')
            .trim()
            .to_owned(),
        _ => node.text.to_owned(),
    };

    Err(match category {
        PhiCategory::Direct => Rejection::DirectIdentifier {
            kind: PolicyRuleTable::identifier_kind(&normalized),
            identifier,
            clause: node.clause,
            span: node.span(),
        },
        PhiCategory::Geographic => Rejection::GeographicElement {
            identifier,
            clause: node.clause,
            span: node.span(),
        },
        PhiCategory::Date => Rejection::DateElement {
            identifier,
            clause: node.clause,
            span: node.span(),
        },
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
