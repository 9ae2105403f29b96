//! Token tree construction — the adapter between the flat lexer stream and
//! the policy stages.
//!
//! Normalizes the lexer output into a [`Statement`]: an ordered sequence of
//! [`TokenNode`]s where parenthesized runs become nested `Group` nodes and
//! every node carries the [`Clause`] that owns it. Clause membership is
//! inferred from keyword transitions, restarting inside each group from the
//! enclosing clause so that nested expressions stay visible to the scans.
//!
//! This layer enforces no policy. It fails only when no structure can be
//! recovered at all: an unterminated string or quoted identifier, unbalanced
//! parentheses, or input with no SQL tokens. Everything downstream treats
//! the tree as a best-effort approximation and pairs structural checks with
//! whole-string pattern fallbacks.

use crate::errors::Rejection;
use crate::sql_lexer::{self, TokenKind};
use crate::types::{Clause, Span};

/// Node kind in the normalized tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// SQL keyword.
    Keyword,
    /// Unquoted identifier.
    Identifier,
    /// Quoted identifier (quotes still present in `text`).
    QuotedIdent,
    /// String literal (quotes still present in `text`).
    StringLiteral,
    /// Numeric literal.
    NumberLiteral,
    /// Operator.
    Operator,
    /// Comma, semicolon, dot, or stray character.
    Punctuation,
    /// A parenthesized group; children hold the inner nodes.
    Group,
}

/// A typed node with its owning clause and nested children.
#[derive(Debug, Clone)]
pub struct TokenNode<'a> {
    /// The node kind.
    pub kind: NodeKind,
    /// Source text (for groups, the full parenthesized slice).
    pub text: &'a str,
    /// Byte offset in the source.
    pub offset: usize,
    /// The clause that owns this node.
    pub clause: Clause,
    /// Inner nodes; non-empty only for [`NodeKind::Group`].
    pub children: Vec<TokenNode<'a>>,
}

impl<'a> TokenNode<'a> {
    /// Byte range of this node in the source.
    #[must_use]
    pub fn span(&self) -> Span {
        Span::at(self.offset, self.text.len())
    }

    /// Whether this node is the given keyword (case-insensitive).
    #[must_use]
    pub fn is_keyword(&self, word: &str) -> bool {
        self.kind == NodeKind::Keyword && self.text.eq_ignore_ascii_case(word)
    }

    /// The normalized name of an identifier node: lowercased, quoting
    /// stripped. Returns `None` for non-identifier nodes.
    #[must_use]
    pub fn normalized_name(&self) -> Option<String> {
        match self.kind {
            NodeKind::Identifier => Some(self.text.to_lowercase()),
            NodeKind::QuotedIdent => {
                let inner = self
                    .text
                    .trim_matches(|c| c == '`' || c == '"')
                    .trim();
                Some(inner.to_lowercase())
            }
            _ => None,
        }
    }
}

/// A normalized statement: the top-level node sequence.
#[derive(Debug, Clone)]
pub struct Statement<'a> {
    /// Top-level nodes in source order.
    pub nodes: Vec<TokenNode<'a>>,
}

impl<'a> Statement<'a> {
    /// Preorder traversal over every node, groups included, using an
    /// explicit stack so pathological nesting cannot exhaust the call stack.
    #[must_use]
    pub fn walk(&self) -> Walk<'_, 'a> {
        let mut stack: Vec<&TokenNode<'a>> = self.nodes.iter().collect();
        stack.reverse();
        Walk { stack }
    }

    /// Count keyword nodes matching `word` anywhere in the tree.
    #[must_use]
    pub fn count_keyword(&self, word: &str) -> usize {
        self.walk().filter(|n| n.is_keyword(word)).count()
    }

    /// Every sibling sequence in the tree: the top-level nodes plus the
    /// child list of each group. Adjacency checks (what directly precedes a
    /// token) only make sense within one sequence.
    #[must_use]
    pub fn sequences(&self) -> Vec<&[TokenNode<'a>]> {
        let mut out: Vec<&[TokenNode<'a>]> = vec![self.nodes.as_slice()];
        let mut stack: Vec<&TokenNode<'a>> = self.nodes.iter().collect();
        while let Some(node) = stack.pop() {
            if node.kind == NodeKind::Group {
                out.push(node.children.as_slice());
            }
            stack.extend(node.children.iter());
        }
        out
    }
}

/// Preorder iterator over a [`Statement`].
pub struct Walk<'t, 'a> {
    stack: Vec<&'t TokenNode<'a>>,
}

impl<'t, 'a> Iterator for Walk<'t, 'a> {
    type Item = &'t TokenNode<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}

/// Clause transition for a keyword, if the keyword starts a new clause.
fn clause_for_keyword(word: &str) -> Option<Clause> {
    if word.eq_ignore_ascii_case("SELECT") {
        Some(Clause::Select)
    } else if word.eq_ignore_ascii_case("FROM") {
        Some(Clause::From)
    } else if word.eq_ignore_ascii_case("WHERE") {
        Some(Clause::Where)
    } else if word.eq_ignore_ascii_case("HAVING") {
        Some(Clause::Having)
    } else if word.eq_ignore_ascii_case("ON") {
        Some(Clause::On)
    } else if word.eq_ignore_ascii_case("GROUP") {
        Some(Clause::GroupBy)
    } else if word.eq_ignore_ascii_case("ORDER") {
        Some(Clause::OrderBy)
    } else if ["JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS"]
        .iter()
        .any(|k| word.eq_ignore_ascii_case(k))
    {
        Some(Clause::Join)
    } else {
        None
    }
}

/// An in-progress group during tree construction.
struct Frame<'a> {
    nodes: Vec<TokenNode<'a>>,
    clause: Clause,
    open_offset: usize,
}

/// Parse query text into a [`Statement`].
///
/// # Errors
///
/// Returns [`Rejection::ParseFailure`] when no structure can be recovered:
/// unterminated string literal or quoted identifier, unbalanced parentheses,
/// or input containing no SQL tokens.
pub fn parse(source: &str) -> Result<Statement<'_>, Rejection> {
    let tokens = sql_lexer::tokenize(source);
    let meaningful = sql_lexer::meaningful_tokens(&tokens);

    if meaningful.is_empty() {
        return Err(Rejection::ParseFailure {
            reason: "no SQL tokens found".to_owned(),
        });
    }

    let mut stack: Vec<Frame<'_>> = vec![Frame {
        nodes: Vec::new(),
        clause: Clause::None,
        open_offset: 0,
    }];

    for token in meaningful {
        let frame = stack.last_mut().expect("stack holds at least the root frame");

        let kind = match token.kind {
            TokenKind::Keyword => {
                if let Some(clause) = clause_for_keyword(token.text) {
                    frame.clause = clause;
                }
                NodeKind::Keyword
            }
            TokenKind::Identifier => NodeKind::Identifier,
            TokenKind::QuotedIdent => NodeKind::QuotedIdent,
            TokenKind::StringLiteral => NodeKind::StringLiteral,
            TokenKind::NumberLiteral => NodeKind::NumberLiteral,
            TokenKind::Operator => NodeKind::Operator,
            TokenKind::Comma | TokenKind::Semicolon | TokenKind::Dot => NodeKind::Punctuation,
            TokenKind::LeftParen => {
                let clause = frame.clause;
                stack.push(Frame {
                    nodes: Vec::new(),
                    clause,
                    open_offset: token.offset,
                });
                continue;
            }
            TokenKind::RightParen => {
                if stack.len() == 1 {
                    return Err(Rejection::ParseFailure {
                        reason: "unbalanced parentheses".to_owned(),
                    });
                }
                let closed = stack.pop().expect("stack depth checked above");
                let parent = stack.last_mut().expect("parent frame exists");
                parent.nodes.push(TokenNode {
                    kind: NodeKind::Group,
                    text: &source[closed.open_offset..token.offset + 1],
                    offset: closed.open_offset,
                    clause: parent.clause,
                    children: closed.nodes,
                });
                continue;
            }
            TokenKind::Unknown => {
                let first = token.text.chars().next().unwrap_or(' ');
                if first == '\'' {
                    return Err(Rejection::ParseFailure {
                        reason: "unterminated string literal".to_owned(),
                    });
                }
                if first == '"' || first == '`' {
                    return Err(Rejection::ParseFailure {
                        reason: "unterminated quoted identifier".to_owned(),
                    });
                }
                // Stray character; keep it visible but inert.
                NodeKind::Punctuation
            }
            TokenKind::Whitespace
            | TokenKind::Newline
            | TokenKind::LineComment
            | TokenKind::BlockComment => continue,
        };

        let frame = stack.last_mut().expect("stack holds at least the root frame");
        frame.nodes.push(TokenNode {
            kind,
            text: token.text,
            offset: token.offset,
            clause: frame.clause,
            children: Vec::new(),
        });
    }

    if stack.len() > 1 {
        return Err(Rejection::ParseFailure {
            reason: "unbalanced parentheses".to_owned(),
        });
    }

    let root = stack.pop().expect("root frame remains");
    Ok(Statement { nodes: root.nodes })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn clause_of<'a>(statement: &'a Statement<'_>, text: &str) -> Clause {
        statement
            .walk()
            .find(|n| n.text == text)
            .map(|n| n.clause)
            .unwrap_or_else(|| panic!("token {text} not found"))
    }

    #[test]
    fn clause_tagging_across_statement() {
        let sql = "SELECT gender_concept_id FROM person WHERE year_of_birth > 1980 \
                   GROUP BY gender_concept_id HAVING COUNT(DISTINCT person_id) > 5 \
                   ORDER BY gender_concept_id";
        let statement = parse(sql).unwrap();
        let clauses: Vec<Clause> = statement
            .walk()
            .filter(|n| n.text == "gender_concept_id")
            .map(|n| n.clause)
            .collect();
        assert_eq!(
            clauses,
            vec![Clause::Select, Clause::GroupBy, Clause::OrderBy]
        );
        assert_eq!(clause_of(&statement, "person"), Clause::From);
        assert_eq!(clause_of(&statement, "year_of_birth"), Clause::Where);
    }

    #[test]
    fn join_and_on_clauses() {
        let sql = "SELECT a FROM person INNER JOIN visit_occurrence ON person_id = person_id";
        let statement = parse(sql).unwrap();
        assert_eq!(clause_of(&statement, "visit_occurrence"), Clause::Join);
        let on_idents: Vec<Clause> = statement
            .walk()
            .filter(|n| n.text == "person_id")
            .map(|n| n.clause)
            .collect();
        assert_eq!(on_idents, vec![Clause::On, Clause::On]);
    }

    #[test]
    fn groups_nest_and_inherit_clause() {
        let sql = "SELECT COUNT(DISTINCT person_id) AS Count_Patients FROM person";
        let statement = parse(sql).unwrap();
        let group = statement
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Group)
            .unwrap();
        assert_eq!(group.clause, Clause::Select);
        assert_eq!(group.text, "(DISTINCT person_id)");
        let inner = group
            .children
            .iter()
            .find(|n| n.text == "person_id")
            .unwrap();
        assert_eq!(inner.clause, Clause::Select);
    }

    #[test]
    fn nested_select_switches_clause_inside_group() {
        let sql = "SELECT a FROM (SELECT zip_code FROM person)";
        let statement = parse(sql).unwrap();
        let group = statement
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Group)
            .unwrap();
        assert_eq!(group.clause, Clause::From);
        let zip = group.children.iter().find(|n| n.text == "zip_code").unwrap();
        assert_eq!(zip.clause, Clause::Select);
        assert_eq!(statement.count_keyword("SELECT"), 2);
    }

    #[test]
    fn walk_visits_nested_nodes() {
        let sql = "SELECT COUNT((a))";
        let statement = parse(sql).unwrap();
        let texts: Vec<&str> = statement.walk().map(|n| n.text).collect();
        assert_eq!(texts, vec!["SELECT", "COUNT", "((a))", "(a)", "a"]);
    }

    #[test]
    fn normalized_name_strips_quoting() {
        let sql = "SELECT \"Zip Code\", `City`, plain FROM person";
        let statement = parse(sql).unwrap();
        let names: Vec<String> = statement
            .walk()
            .filter_map(TokenNode::normalized_name)
            .collect();
        assert!(names.contains(&"zip code".to_owned()));
        assert!(names.contains(&"city".to_owned()));
        assert!(names.contains(&"plain".to_owned()));
    }

    #[test]
    fn unbalanced_parens_fail() {
        assert!(matches!(
            parse("SELECT (a FROM person"),
            Err(Rejection::ParseFailure { .. })
        ));
        assert!(matches!(
            parse("SELECT a) FROM person"),
            Err(Rejection::ParseFailure { .. })
        ));
    }

    #[test]
    fn unterminated_string_fails() {
        let err = parse("SELECT 'runaway FROM person").unwrap_err();
        match err {
            Rejection::ParseFailure { reason } => {
                assert!(reason.contains("unterminated string"));
            }
            other => panic!("unexpected rejection: {other:?}"),
        }
    }

    #[test]
    fn comment_only_input_fails() {
        assert!(matches!(
            parse("-- nothing here\n/* still nothing */"),
            Err(Rejection::ParseFailure { .. })
        ));
    }

    #[test]
    fn string_literals_are_not_identifiers() {
        let sql = "SELECT x FROM person WHERE note = 'patient_name'";
        let statement = parse(sql).unwrap();
        let literal = statement
            .walk()
            .find(|n| n.kind == NodeKind::StringLiteral)
            .unwrap();
        assert!(literal.normalized_name().is_none());
    }
}
