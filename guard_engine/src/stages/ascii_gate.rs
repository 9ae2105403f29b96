//! Layer 0 — character-level input screening.
//!
//! Runs before any parsing: Unicode confusables, zero-width characters, and
//! control-character smuggling are the cheapest evasions to close, and one
//! left-to-right scan closes them at linear cost with no backtracking. The
//! configured maximum input length is enforced here too, as a fast early
//! rejection rather than a timeout.
//!
//! Accepted characters: printable ASCII 0x20–0x7E plus tab, newline, and
//! carriage return. The check is pure and idempotent — text it accepts is
//! accepted unchanged on a second pass.

use crate::config::GuardConfig;
use crate::errors::Rejection;
use crate::types::Span;

/// Code points allowed outside the printable range.
const ALLOWED_CONTROL: [u32; 3] = [0x09, 0x0A, 0x0D];

/// Screen raw query text. Reports the first offending character with its
/// 1-based character offset.
///
/// # Errors
///
/// - [`Rejection::EmptyQuery`] for empty or whitespace-only input
/// - [`Rejection::QueryTooLong`] past the configured maximum
/// - [`Rejection::NonAsciiCharacter`] at the first code point above 0x7E
/// - [`Rejection::InvalidControlCharacter`] for any other control character
pub fn check(query: &str, config: &GuardConfig) -> Result<(), Rejection> {
    if query.trim().is_empty() {
        return Err(Rejection::EmptyQuery);
    }

    let length = query.chars().count();
    if length > config.max_query_length {
        return Err(Rejection::QueryTooLong {
            length,
            max: config.max_query_length,
        });
    }

    for (position, (byte_offset, character)) in query.char_indices().enumerate() {
        let code_point = character as u32;

        if (0x20..=0x7E).contains(&code_point) || ALLOWED_CONTROL.contains(&code_point) {
            continue;
        }

        let span = Span::at(byte_offset, character.len_utf8());
        if code_point > 0x7E {
            return Err(Rejection::NonAsciiCharacter {
                position: position + 1,
                character,
                code_point,
                span,
            });
        }
        return Err(Rejection::InvalidControlCharacter {
            position: position + 1,
            code_point,
            span,
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
