//! Layer 3 — aggregation shape enforcement.
//!
//! Aggregation is the de-identification mechanism, so the statement shape is
//! checked strictly:
//!
//! - exactly one occurrence of the mandated patient count expression,
//!   `COUNT(DISTINCT person_id) AS Count_Patients` — keywords are
//!   case-insensitive and whitespace-flexible, the alias is case-sensitive.
//!   Exactness is an anti-spoofing contract: the wrapper filters on this
//!   precise output column, so a near miss is rejected, never accepted as
//!   close enough;
//! - GROUP BY whenever the SELECT list carries a non-aggregate item (a
//!   purely aggregate query is exempt);
//! - aggregate functions only in SELECT or HAVING;
//! - every GROUP BY column present in the SELECT list.
//!
//! The patient count match runs against the raw text (the regex tolerates
//! newlines), which also yields the exact source span recorded for later
//! stages. Structural checks use the clause-tagged tree with the
//! `GROUP BY` textual fallback, per the dual-strategy rule.

use regex::Regex;

use crate::errors::Rejection;
use crate::stages::{Stage, ValidationContext};
use crate::token_tree::{NodeKind, Statement, TokenNode};
use crate::types::{Clause, Layer, Span};

/// The required output alias, matched case-sensitively.
const REQUIRED_ALIAS: &str = "Count_Patients";

/// Aggregate function names (uppercase).
const AGGREGATE_FUNCTIONS: [&str; 7] =
    ["COUNT", "SUM", "AVG", "MIN", "MAX", "STDDEV", "VARIANCE"];

/// The aggregation shape checker.
pub struct AggregationCheck {
    /// `COUNT(DISTINCT [tbl.]person_id) AS <alias>`, alias captured.
    exact: Regex,
    /// `COUNT([tbl.]person_id)` — DISTINCT missing.
    missing_distinct: Regex,
    /// `COUNT(DISTINCT [tbl.]person_id)` — alias missing.
    missing_alias: Regex,
    /// `COUNT(*)` — the wrong thing counted.
    count_star: Regex,
    /// Whole-string GROUP BY fallback.
    group_by: Regex,
    /// Aggregate call detection inside one SELECT item.
    aggregate_call: Regex,
}

impl AggregationCheck {
    /// Compile the patterns. All are static, so compilation cannot fail.
    #[must_use]
    pub fn new() -> Self {
        Self {
            exact: Regex::new(r"(?i)COUNT\s*\(\s*DISTINCT\s+(?:\w+\.)?person_id\s*\)\s+AS\s+(\w+)")
                .expect("exact patient count regex is valid"),
            missing_distinct: Regex::new(r"(?i)COUNT\s*\(\s*(?:\w+\.)?person_id\s*\)")
                .expect("missing-distinct regex is valid"),
            missing_alias: Regex::new(r"(?i)COUNT\s*\(\s*DISTINCT\s+(?:\w+\.)?person_id\s*\)")
                .expect("missing-alias regex is valid"),
            count_star: Regex::new(r"(?i)COUNT\s*\(\s*\*\s*\)")
                .expect("count-star regex is valid"),
            group_by: Regex::new(r"(?i)GROUP\s+BY").expect("group-by fallback regex is valid"),
            aggregate_call: Regex::new(r"(?i)\b(?:COUNT|SUM|AVG|MIN|MAX|STDDEV|VARIANCE)\s*\(")
                .expect("aggregate call regex is valid"),
        }
    }

    /// Locate the mandated patient count expression, or classify what stands
    /// in its place.
    fn check_patient_count(
        &self,
        query: &str,
        ctx: &mut ValidationContext<'_>,
    ) -> Result<(), Rejection> {
        let captures: Vec<regex::Captures<'_>> = self.exact.captures_iter(query).collect();

        match captures.len() {
            1 => {
                let cap = &captures[0];
                let whole = cap.get(0).expect("capture 0 always present");
                let alias = cap.get(1).expect("alias group always present");
                if alias.as_str() == REQUIRED_ALIAS {
                    ctx.patient_count_span = Some(Span {
                        start: whole.start(),
                        end: whole.end(),
                    });
                    return Ok(());
                }
                Err(Rejection::InvalidPatientCountSyntax {
                    found: whole.as_str().to_owned(),
                    span: Some(Span {
                        start: whole.start(),
                        end: whole.end(),
                    }),
                })
            }
            0 => {
                // No aliased candidate at all; classify the nearest miss.
                for pattern in [&self.missing_distinct, &self.missing_alias, &self.count_star] {
                    if let Some(found) = pattern.find(query) {
                        return Err(Rejection::InvalidPatientCountSyntax {
                            found: found.as_str().to_owned(),
                            span: Some(Span {
                                start: found.start(),
                                end: found.end(),
                            }),
                        });
                    }
                }
                Err(Rejection::MissingPatientCount)
            }
            _ => {
                // Exactly one occurrence is part of the contract.
                let whole = captures[1].get(0).expect("capture 0 always present");
                Err(Rejection::InvalidPatientCountSyntax {
                    found: format!("{} (duplicate occurrence)", whole.as_str()),
                    span: Some(Span {
                        start: whole.start(),
                        end: whole.end(),
                    }),
                })
            }
        }
    }

    /// Whether one SELECT item is an aggregate expression.
    fn is_aggregate_item(&self, item_text: &str) -> bool {
        self.aggregate_call.is_match(item_text)
    }
}

impl Default for AggregationCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for AggregationCheck {
    fn name(&self) -> &'static str {
        "aggregation"
    }

    fn layer(&self) -> Layer {
        Layer::Aggregation
    }

    fn check(&self, ctx: &mut ValidationContext<'_>) -> Result<(), Rejection> {
        let Some(statement) = ctx.statement.take() else {
            return Ok(());
        };
        let query = ctx.query;

        let result = self.run_checks(query, &statement, ctx);
        ctx.statement = Some(statement);
        result
    }
}

impl AggregationCheck {
    fn run_checks(
        &self,
        query: &str,
        statement: &Statement<'_>,
        ctx: &mut ValidationContext<'_>,
    ) -> Result<(), Rejection> {
        self.check_patient_count(query, ctx)?;

        // Structural GROUP BY detection with the textual fallback net.
        let has_group_by =
            statement.count_keyword("GROUP") > 0 || self.group_by.is_match(query);
        ctx.group_by_seen = has_group_by;

        let items = select_items(statement);
        let regular_items: Vec<&[TokenNode<'_>]> = items
            .iter()
            .filter(|item| !self.is_aggregate_item(item_text(query, item)))
            .copied()
            .collect();

        if !has_group_by && !regular_items.is_empty() {
            return Err(Rejection::MissingGroupBy);
        }

        check_aggregate_placement(statement)?;
        self.check_group_by_columns(query, statement, &items)?;

        Ok(())
    }

    /// Every GROUP BY column must appear in the SELECT list.
    fn check_group_by_columns(
        &self,
        query: &str,
        statement: &Statement<'_>,
        select_items: &[&[TokenNode<'_>]],
    ) -> Result<(), Rejection> {
        // Names the SELECT list exposes: all identifier segments of
        // non-aggregate items, plus the alias of aggregate items.
        let mut exposed: Vec<String> = Vec::new();
        for item in select_items {
            if self.is_aggregate_item(item_text(query, item)) {
                if let Some(alias) = trailing_alias(item) {
                    exposed.push(alias);
                }
            } else {
                for node in *item {
                    collect_identifier_names(node, &mut exposed);
                }
            }
        }

        for item in group_by_items(statement) {
            let Some(column) = item
                .iter()
                .rev()
                .find_map(TokenNode::normalized_name)
            else {
                continue;
            };
            if !exposed.iter().any(|name| *name == column) {
                return Err(Rejection::InvalidGroupByColumn {
                    column,
                    reason: "not present in the SELECT list".to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// Source text covered by one item slice.
fn item_text<'a>(query: &'a str, item: &[TokenNode<'_>]) -> &'a str {
    let Some(first) = item.first() else {
        return "";
    };
    let last = item.last().expect("non-empty slice has a last node");
    &query[first.offset..last.offset + last.text.len()]
}

/// Top-level SELECT-list items, split on commas. The leading SELECT keyword
/// and an optional leading DISTINCT are not part of any item.
fn select_items<'t, 'a>(statement: &'t Statement<'a>) -> Vec<&'t [TokenNode<'a>]> {
    let nodes = &statement.nodes;
    let mut region_start = None;
    let mut region_end = nodes.len();
    for (i, node) in nodes.iter().enumerate() {
        if node.clause == Clause::Select {
            if region_start.is_none() && !node.is_keyword("SELECT") && !node.is_keyword("DISTINCT")
            {
                region_start = Some(i);
            }
        } else if region_start.is_some() {
            region_end = i;
            break;
        }
    }
    let Some(start) = region_start else {
        return Vec::new();
    };
    split_on_commas(&nodes[start..region_end])
}

/// Top-level GROUP BY items, split on commas, keywords excluded.
fn group_by_items<'t, 'a>(statement: &'t Statement<'a>) -> Vec<&'t [TokenNode<'a>]> {
    let nodes = &statement.nodes;
    let mut region_start = None;
    let mut region_end = nodes.len();
    for (i, node) in nodes.iter().enumerate() {
        if node.clause == Clause::GroupBy {
            if region_start.is_none() && !node.is_keyword("GROUP") && !node.is_keyword("BY") {
                region_start = Some(i);
            }
        } else if region_start.is_some() {
            region_end = i;
            break;
        }
    }
    let Some(start) = region_start else {
        return Vec::new();
    };
    split_on_commas(&nodes[start..region_end])
}

/// Split a node slice on top-level commas, dropping empty pieces.
fn split_on_commas<'t, 'a>(nodes: &'t [TokenNode<'a>]) -> Vec<&'t [TokenNode<'a>]> {
    nodes
        .split(|n| n.kind == NodeKind::Punctuation && n.text == ",")
        .filter(|piece| !piece.is_empty())
        .collect()
}

/// The alias identifier at the end of an `<expr> AS <alias>` item.
fn trailing_alias(item: &[TokenNode<'_>]) -> Option<String> {
    if item.len() < 2 {
        return None;
    }
    let last = item.last()?;
    let before = &item[item.len() - 2];
    if before.is_keyword("AS") {
        last.normalized_name()
    } else {
        None
    }
}

/// Collect the normalized names of an identifier node and, recursively, of
/// any identifiers nested in groups.
fn collect_identifier_names(node: &TokenNode<'_>, out: &mut Vec<String>) {
    if let Some(name) = node.normalized_name() {
        out.push(name);
    }
    for child in &node.children {
        collect_identifier_names(child, out);
    }
}

/// Reject aggregate calls outside SELECT/HAVING.
fn check_aggregate_placement(statement: &Statement<'_>) -> Result<(), Rejection> {
    for sequence in statement.sequences() {
        for i in 0..sequence.len().saturating_sub(1) {
            let node = &sequence[i];
            let next = &sequence[i + 1];
            let is_aggregate = node.kind == NodeKind::Keyword
                && AGGREGATE_FUNCTIONS
                    .iter()
                    .any(|f| node.text.eq_ignore_ascii_case(f));
            if is_aggregate
                && next.kind == NodeKind::Group
                && !matches!(node.clause, Clause::Select | Clause::Having)
            {
                return Err(Rejection::AggregateMisplaced {
                    function: node.text.to_owned(),
                    clause: node.clause,
                    span: node.span(),
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
