//! Lightweight SQL tokenizer for the guard pipeline.
//!
//! Produces a flat stream of [`Token`]s from query text. Built for policy
//! checks (clause tracking, keyword detection, identifier classification),
//! NOT for full AST construction — the tree layer on top of this stream is a
//! best-effort approximation and every downstream check pairs it with a
//! whole-string textual fallback.
//!
//! The lexer uses zero-copy `&str` slices into the source and tracks byte
//! offsets plus 1-based line/column positions. It handles:
//!
//! - SQL keywords (case-insensitive matching)
//! - Identifiers (letters, digits, underscore)
//! - Quoted identifiers: `` `backtick` `` and `"double-quoted"`
//! - String literals with `''` escape sequences
//! - Number literals (integer, decimal, scientific notation)
//! - Operators: `=`, `<>`, `!=`, `>=`, `<=`, `+`, `-`, `*`, `/`, `%`
//! - Punctuation: `(`, `)`, `,`, `;`, `.`
//! - Line comments `-- ...` and nested block comments `/* /* */ */`
//!
//! An unterminated string or quoted identifier is emitted as
//! [`TokenKind::Unknown`] spanning the remainder of the input; the tree
//! layer turns that into a parse failure.

use memchr::memchr;

/// A token kind produced by the SQL lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// SQL keyword: SELECT, FROM, WHERE, GROUP, COUNT, etc.
    Keyword,
    /// Unquoted identifier: table or column name.
    Identifier,
    /// Backtick- or double-quoted identifier.
    QuotedIdent,
    /// Single-quoted string literal (with `''` escaping).
    StringLiteral,
    /// Numeric literal: integer, decimal, or scientific notation.
    NumberLiteral,
    /// Operator: `=`, `<>`, `!=`, `>=`, `<=`, `+`, `-`, `*`, `/`, `%`.
    Operator,
    /// Left parenthesis `(`.
    LeftParen,
    /// Right parenthesis `)`.
    RightParen,
    /// Comma `,`.
    Comma,
    /// Semicolon `;`.
    Semicolon,
    /// Dot `.`.
    Dot,
    /// Line comment `-- ...`.
    LineComment,
    /// Block comment `/* ... */` (supports nesting).
    BlockComment,
    /// Spaces and tabs.
    Whitespace,
    /// `\n` or `\r\n` or bare `\r`.
    Newline,
    /// Unrecognized character, or an unterminated string/quoted identifier.
    Unknown,
}

/// A single token with its kind, text slice, and position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    /// The kind of token.
    pub kind: TokenKind,
    /// Zero-copy slice into the original source text.
    pub text: &'a str,
    /// Byte offset in the source.
    pub offset: usize,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

/// Keywords recognized by the lexer, uppercase, sorted for binary search.
///
/// Covers the clause keywords the tree layer needs plus the aggregate
/// function names the shape checks look for.
const SQL_KEYWORDS: &[&str] = &[
    "ALL",
    "AND",
    "ANY",
    "AS",
    "ASC",
    "AVG",
    "BETWEEN",
    "BY",
    "CASE",
    "CAST",
    "COUNT",
    "CROSS",
    "DESC",
    "DISTINCT",
    "ELSE",
    "END",
    "EXCEPT",
    "EXISTS",
    "FROM",
    "FULL",
    "GROUP",
    "HAVING",
    "IN",
    "INNER",
    "INTERSECT",
    "IS",
    "JOIN",
    "LEFT",
    "LIKE",
    "LIMIT",
    "MAX",
    "MIN",
    "NOT",
    "NULL",
    "OFFSET",
    "ON",
    "OR",
    "ORDER",
    "OUTER",
    "RIGHT",
    "SELECT",
    "SOME",
    "STDDEV",
    "SUM",
    "THEN",
    "UNION",
    "VARIANCE",
    "WHEN",
    "WHERE",
    "WITH",
];

/// Check whether a word is a recognized SQL keyword (case-insensitive).
fn is_keyword(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    SQL_KEYWORDS.binary_search(&upper.as_str()).is_ok()
}

/// Tokenize a SQL source string into a vector of [`Token`]s.
#[must_use]
pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    Lexer::new(source).run()
}

/// Filter a token stream to tokens that carry meaning — everything except
/// whitespace, newlines, and comments.
#[must_use]
pub fn meaningful_tokens<'a, 'b>(tokens: &'b [Token<'a>]) -> Vec<&'b Token<'a>> {
    tokens
        .iter()
        .filter(|t| {
            !matches!(
                t.kind,
                TokenKind::Whitespace
                    | TokenKind::Newline
                    | TokenKind::LineComment
                    | TokenKind::BlockComment
            )
        })
        .collect()
}

/// Cursor-based lexer over the source bytes.
struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
    tokens: Vec<Token<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Token<'a>> {
        while self.pos < self.bytes.len() {
            let start = self.pos;
            let start_line = self.line;
            let start_col = self.col;

            let kind = self.next_kind();

            self.tokens.push(Token {
                kind,
                text: &self.source[start..self.pos],
                offset: start,
                line: start_line,
                column: start_col,
            });
        }
        self.tokens
    }

    /// Consume one token's worth of input and return its kind.
    fn next_kind(&mut self) -> TokenKind {
        let ch = self.bytes[self.pos];
        match ch {
            b'\n' | b'\r' => self.lex_newline(),
            b' ' | b'\t' => self.lex_whitespace(),
            b'-' if self.peek(1) == Some(b'-') => self.lex_line_comment(),
            b'/' if self.peek(1) == Some(b'*') => self.lex_block_comment(),
            b'\'' => self.lex_string(),
            b'`' => self.lex_quoted(b'`'),
            b'"' => self.lex_quoted(b'"'),
            b'0'..=b'9' => self.lex_number(),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_word(),
            b'(' => self.single(TokenKind::LeftParen),
            b')' => self.single(TokenKind::RightParen),
            b',' => self.single(TokenKind::Comma),
            b';' => self.single(TokenKind::Semicolon),
            b'.' => self.single(TokenKind::Dot),
            b'<' => {
                self.bump(1);
                if matches!(self.cur(), Some(b'>') | Some(b'=')) {
                    self.bump(1);
                }
                TokenKind::Operator
            }
            b'>' => {
                self.bump(1);
                if self.cur() == Some(b'=') {
                    self.bump(1);
                }
                TokenKind::Operator
            }
            b'!' if self.peek(1) == Some(b'=') => {
                self.bump(2);
                TokenKind::Operator
            }
            b'=' | b'+' | b'-' | b'*' | b'/' | b'%' => self.single(TokenKind::Operator),
            _ => {
                // Multi-byte UTF-8 or stray ASCII; consume one full character.
                let width = self.source[self.pos..]
                    .chars()
                    .next()
                    .map_or(1, char::len_utf8);
                self.bump(width);
                TokenKind::Unknown
            }
        }
    }

    fn cur(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    /// Advance by `n` bytes of single-line content.
    fn bump(&mut self, n: usize) {
        self.pos += n;
        self.col += n as u32;
    }

    /// Advance to `end`, recomputing line/column across any newlines passed.
    fn bump_multiline(&mut self, end: usize) {
        let passed = &self.bytes[self.pos..end];
        let newlines = passed.iter().filter(|&&b| b == b'\n').count() as u32;
        if newlines > 0 {
            self.line += newlines;
            // Column restarts after the last newline in the span.
            let tail = passed
                .iter()
                .rposition(|&b| b == b'\n')
                .map_or(0, |i| passed.len() - i - 1);
            self.col = tail as u32 + 1;
        } else {
            self.col += passed.len() as u32;
        }
        self.pos = end;
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.bump(1);
        kind
    }

    fn lex_newline(&mut self) -> TokenKind {
        if self.cur() == Some(b'\r') && self.peek(1) == Some(b'\n') {
            self.pos += 2;
        } else {
            self.pos += 1;
        }
        self.line += 1;
        self.col = 1;
        TokenKind::Newline
    }

    fn lex_whitespace(&mut self) -> TokenKind {
        while matches!(self.cur(), Some(b' ') | Some(b'\t')) {
            self.bump(1);
        }
        TokenKind::Whitespace
    }

    fn lex_line_comment(&mut self) -> TokenKind {
        // Runs to end of line; the newline stays its own token.
        let rest = &self.bytes[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
            .unwrap_or(rest.len());
        self.bump(len);
        TokenKind::LineComment
    }

    fn lex_block_comment(&mut self) -> TokenKind {
        let mut end = self.pos + 2;
        let mut depth = 1u32;
        while end < self.bytes.len() && depth > 0 {
            if self.bytes[end] == b'/' && self.bytes.get(end + 1) == Some(&b'*') {
                depth += 1;
                end += 2;
            } else if self.bytes[end] == b'*' && self.bytes.get(end + 1) == Some(&b'/') {
                depth -= 1;
                end += 2;
            } else {
                end += 1;
            }
        }
        self.bump_multiline(end);
        TokenKind::BlockComment
    }

    fn lex_string(&mut self) -> TokenKind {
        // Scan quote-to-quote with memchr, treating '' as an escaped quote.
        let mut search = self.pos + 1;
        loop {
            match memchr(b'\'', &self.bytes[search..]) {
                Some(found) => {
                    let close = search + found;
                    if self.bytes.get(close + 1) == Some(&b'\'') {
                        search = close + 2;
                        continue;
                    }
                    self.bump_multiline(close + 1);
                    return TokenKind::StringLiteral;
                }
                None => {
                    // No closing quote before EOF.
                    self.bump_multiline(self.bytes.len());
                    return TokenKind::Unknown;
                }
            }
        }
    }

    fn lex_quoted(&mut self, delim: u8) -> TokenKind {
        match memchr(delim, &self.bytes[self.pos + 1..]) {
            Some(found) => {
                let close = self.pos + 1 + found;
                self.bump_multiline(close + 1);
                TokenKind::QuotedIdent
            }
            None => {
                self.bump_multiline(self.bytes.len());
                TokenKind::Unknown
            }
        }
    }

    fn lex_number(&mut self) -> TokenKind {
        while self.cur().is_some_and(|b| b.is_ascii_digit()) {
            self.bump(1);
        }
        // Decimal part
        if self.cur() == Some(b'.') && self.peek(1).is_some_and(|b| b.is_ascii_digit()) {
            self.bump(1);
            while self.cur().is_some_and(|b| b.is_ascii_digit()) {
                self.bump(1);
            }
        }
        // Exponent part
        if matches!(self.cur(), Some(b'e') | Some(b'E')) {
            let mut lookahead = 1;
            if matches!(self.peek(1), Some(b'+') | Some(b'-')) {
                lookahead = 2;
            }
            if self.peek(lookahead).is_some_and(|b| b.is_ascii_digit()) {
                self.bump(lookahead);
                while self.cur().is_some_and(|b| b.is_ascii_digit()) {
                    self.bump(1);
                }
            }
        }
        TokenKind::NumberLiteral
    }

    fn lex_word(&mut self) -> TokenKind {
        let start = self.pos;
        while self
            .cur()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.bump(1);
        }
        if is_keyword(&self.source[start..self.pos]) {
            TokenKind::Keyword
        } else {
            TokenKind::Identifier
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: collect token kinds from source.
    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).iter().map(|t| t.kind).collect()
    }

    /// Helper: collect (kind, text) pairs, ignoring whitespace and comments.
    fn significant(source: &str) -> Vec<(TokenKind, &str)> {
        let tokens = tokenize(source);
        meaningful_tokens(&tokens)
            .iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn simple_select() {
        assert_eq!(
            significant("SELECT 1"),
            vec![
                (TokenKind::Keyword, "SELECT"),
                (TokenKind::NumberLiteral, "1"),
            ]
        );
    }

    #[test]
    fn keywords_case_insensitive() {
        let tokens = significant("select FROM where Group bY");
        assert_eq!(tokens.len(), 5);
        assert!(tokens.iter().all(|(k, _)| *k == TokenKind::Keyword));
    }

    #[test]
    fn aggregate_names_are_keywords() {
        for word in ["COUNT", "sum", "Avg", "MIN", "max", "STDDEV", "variance"] {
            let tokens = significant(word);
            assert_eq!(tokens[0].0, TokenKind::Keyword, "{word}");
        }
    }

    #[test]
    fn identifiers() {
        let tokens = significant("person gender_concept_id _private");
        assert_eq!(tokens[0], (TokenKind::Identifier, "person"));
        assert_eq!(tokens[1], (TokenKind::Identifier, "gender_concept_id"));
        assert_eq!(tokens[2], (TokenKind::Identifier, "_private"));
    }

    #[test]
    fn quoted_identifiers() {
        assert_eq!(
            significant("`my column`"),
            vec![(TokenKind::QuotedIdent, "`my column`")]
        );
        assert_eq!(
            significant("\"zip code\""),
            vec![(TokenKind::QuotedIdent, "\"zip code\"")]
        );
    }

    #[test]
    fn string_literal_with_escape() {
        assert_eq!(
            significant("'it''s fine'"),
            vec![(TokenKind::StringLiteral, "'it''s fine'")]
        );
    }

    #[test]
    fn unterminated_string_is_unknown() {
        let tokens = significant("SELECT 'runaway");
        assert_eq!(tokens[1].0, TokenKind::Unknown);
        assert_eq!(tokens[1].1, "'runaway");
    }

    #[test]
    fn unterminated_escaped_string_is_unknown() {
        // The trailing '' is an escape, not a terminator.
        let tokens = significant("'ab''");
        assert_eq!(tokens[0].0, TokenKind::Unknown);
    }

    #[test]
    fn numbers() {
        assert_eq!(
            significant("42 3.14 1e10 2.5E-3"),
            vec![
                (TokenKind::NumberLiteral, "42"),
                (TokenKind::NumberLiteral, "3.14"),
                (TokenKind::NumberLiteral, "1e10"),
                (TokenKind::NumberLiteral, "2.5E-3"),
            ]
        );
    }

    #[test]
    fn operators() {
        let ops = significant("= <> != >= <= + - * / %");
        let expected = ["=", "<>", "!=", ">=", "<=", "+", "-", "*", "/", "%"];
        assert_eq!(ops.len(), expected.len());
        for (i, (kind, text)) in ops.iter().enumerate() {
            assert_eq!(*kind, TokenKind::Operator);
            assert_eq!(*text, expected[i]);
        }
    }

    #[test]
    fn punctuation() {
        let tokens = significant("( ) , ; .");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.0).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::Comma,
                TokenKind::Semicolon,
                TokenKind::Dot,
            ]
        );
    }

    #[test]
    fn line_comment_runs_to_eol() {
        let all = tokenize("-- filter by year\nSELECT 1");
        assert_eq!(all[0].kind, TokenKind::LineComment);
        assert_eq!(all[0].text, "-- filter by year");
        assert_eq!(all[1].kind, TokenKind::Newline);
    }

    #[test]
    fn nested_block_comment() {
        let all = tokenize("/* outer /* inner */ still */ SELECT");
        assert_eq!(all[0].kind, TokenKind::BlockComment);
        assert_eq!(all[0].text, "/* outer /* inner */ still */");
    }

    #[test]
    fn keywords_inside_strings_stay_strings() {
        let tokens = significant("SELECT 'WITH SELECT FROM'");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].0, TokenKind::StringLiteral);
    }

    #[test]
    fn offsets_and_positions() {
        let all = tokenize("SELECT\n  person_id");
        let ident = all.iter().find(|t| t.text == "person_id").unwrap();
        assert_eq!(ident.offset, 9);
        assert_eq!(ident.line, 2);
        assert_eq!(ident.column, 3);
    }

    #[test]
    fn multiline_string_updates_position() {
        let all = tokenize("'line1\nline2' x");
        let ident = all.iter().find(|t| t.text == "x").unwrap();
        assert_eq!(ident.line, 2);
        assert_eq!(ident.column, 8);
    }

    #[test]
    fn crlf_newline() {
        let all = kinds("SELECT\r\n1");
        assert_eq!(
            all,
            vec![
                TokenKind::Keyword,
                TokenKind::Newline,
                TokenKind::NumberLiteral,
            ]
        );
    }

    #[test]
    fn full_patient_count_query() {
        let sql = "SELECT gender_concept_id, COUNT(DISTINCT person_id) AS Count_Patients \
                   FROM person GROUP BY gender_concept_id";
        let kinds: Vec<TokenKind> = significant(sql).iter().map(|t| t.0).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Keyword,       // SELECT
                TokenKind::Identifier,    // gender_concept_id
                TokenKind::Comma,
                TokenKind::Keyword,       // COUNT
                TokenKind::LeftParen,
                TokenKind::Keyword,       // DISTINCT
                TokenKind::Identifier,    // person_id
                TokenKind::RightParen,
                TokenKind::Keyword,       // AS
                TokenKind::Identifier,    // Count_Patients
                TokenKind::Keyword,       // FROM
                TokenKind::Identifier,    // person
                TokenKind::Keyword,       // GROUP
                TokenKind::Keyword,       // BY
                TokenKind::Identifier,    // gender_concept_id
            ]
        );
    }

    #[test]
    fn empty_input() {
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn non_ascii_becomes_unknown() {
        // The lexical gate runs first in the pipeline, but the lexer must
        // still stay on character boundaries for arbitrary input.
        let all = tokenize("café");
        assert!(all.iter().any(|t| t.kind == TokenKind::Unknown));
    }
}
