//! Layer 1 (optional) — schema catalog check.
//!
//! Rejects references to tables and columns the approved catalog does not
//! define. The layer runs only when a [`crate::schema::SchemaCatalog`] is
//! installed on the engine; deployments without a catalog skip it entirely.
//!
//! Column resolution here is deliberately loose — the tokenizer gives no
//! real name binding, so anything that could be an alias, a qualifier, or a
//! function name is given the benefit of the doubt. Unknown-reference
//! errors are a usability feature; the privacy guarantees never depend on
//! this layer.

use std::collections::HashSet;

use crate::errors::Rejection;
use crate::stages::{Stage, ValidationContext};
use crate::token_tree::{NodeKind, Statement};
use crate::types::{Clause, Layer};

/// Clauses whose identifiers are resolved as columns.
const COLUMN_CLAUSES: [Clause; 5] = [
    Clause::Select,
    Clause::Where,
    Clause::GroupBy,
    Clause::Having,
    Clause::On,
];

/// The schema catalog checker.
pub struct SchemaCheck;

impl Stage for SchemaCheck {
    fn name(&self) -> &'static str {
        "schema_check"
    }

    fn layer(&self) -> Layer {
        Layer::Schema
    }

    fn check(&self, ctx: &mut ValidationContext<'_>) -> Result<(), Rejection> {
        let Some(statement) = ctx.statement.as_ref() else {
            return Ok(());
        };
        let Some(catalog) = ctx.schema else {
            return Ok(());
        };

        let (tables, known_names) = collect_tables_and_aliases(statement);

        for table in &tables {
            if !catalog.has_table(table) {
                return Err(Rejection::UnknownTable {
                    table: table.clone(),
                });
            }
        }

        for sequence in statement.sequences() {
            for (i, node) in sequence.iter().enumerate() {
                if !COLUMN_CLAUSES.contains(&node.clause) {
                    continue;
                }
                if !matches!(node.kind, NodeKind::Identifier | NodeKind::QuotedIdent) {
                    continue;
                }
                let Some(name) = node.normalized_name() else {
                    continue;
                };
                if known_names.contains(&name) {
                    continue;
                }
                // Qualifier (`x.`) — resolved as a table or alias, not a column.
                if sequence
                    .get(i + 1)
                    .is_some_and(|n| n.kind == NodeKind::Punctuation && n.text == ".")
                {
                    continue;
                }
                // Function name (`x(...)`).
                if sequence.get(i + 1).is_some_and(|n| n.kind == NodeKind::Group) {
                    continue;
                }
                if !catalog.any_table_has_column(&tables, &name) {
                    return Err(Rejection::UnknownColumn { column: name });
                }
            }
        }

        Ok(())
    }
}

/// First pass: table names in FROM/JOIN position, plus every name that can
/// stand for something else (table aliases, `AS` aliases, the mandated count
/// alias).
fn collect_tables_and_aliases(statement: &Statement<'_>) -> (Vec<String>, HashSet<String>) {
    let mut tables = Vec::new();
    let mut known: HashSet<String> = HashSet::new();
    known.insert("count_patients".to_owned());

    for sequence in statement.sequences() {
        let mut expect_table = false;
        for (i, node) in sequence.iter().enumerate() {
            if node.is_keyword("FROM") || node.is_keyword("JOIN") {
                expect_table = true;
                continue;
            }
            if matches!(node.clause, Clause::From | Clause::Join)
                && node.kind == NodeKind::Punctuation
                && node.text == ","
            {
                expect_table = true;
                continue;
            }
            if node.kind == NodeKind::Keyword {
                continue;
            }
            let Some(name) = node.normalized_name() else {
                continue;
            };
            if matches!(node.clause, Clause::From | Clause::Join) {
                if expect_table {
                    tables.push(name.clone());
                    expect_table = false;
                } // otherwise a table alias
                known.insert(name);
                continue;
            }
            if i > 0 && sequence[i - 1].is_keyword("AS") {
                known.insert(name);
            }
        }
    }

    (tables, known)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
