//! C2: turns one raw source line into a bytecode line (spec §4.1).
//!
//! Mirrors the way `chip::chip8::opcodes` turns a raw `u16` fetch into a
//! typed dispatch target, except here the source is a run of ASCII bytes of
//! unknown length and the result is a variable-length byte run rather than a
//! fixed-width word.

use crate::error::TokenizeError;
use crate::opcode::{self, Keyword};
use crate::value::{self, Int};

/// What kind of token was last committed to the output, for unary-sign
/// folding (spec §4.1: a `+`/`-` folds into the following literal unless the
/// token right before the sign was itself a value or a closing bracket).
#[derive(Clone, Copy, PartialEq, Eq)]
enum Prev {
    Start,
    Value,
    CloseBracket,
    Sign(u8),
    Other,
}

/// Tokenizes `line` into bytecode, appending opcode bytes (ending in
/// [`opcode::EOL`]) to `out`. Returns the opcode byte count written,
/// *excluding* the EOL sentinel — the quantity the program store's length
/// prefix records.
///
/// `max_len` bounds the opcode byte count (not counting EOL); exceeding it
/// is a [`TokenizeError::Overflow`], matching the original firmware's PG
/// area overflow check happening inline as bytes are produced rather than
/// after the fact.
pub fn tokenize(line: &str, out: &mut Vec<u8>, max_len: usize) -> Result<usize, TokenizeError> {
    let bytes = line.as_bytes();
    let mut i = 0usize;
    let mut prev = Prev::Start;
    let start = out.len();

    macro_rules! push {
        ($b:expr) => {{
            if out.len() - start >= max_len {
                return Err(TokenizeError::Overflow);
            }
            out.push($b);
        }};
    }

    while i < bytes.len() {
        let c = bytes[i];

        if c == b' ' || c == b'\t' {
            i += 1;
            continue;
        }

        if c == b'?' {
            push!(Keyword::Print.opcode());
            prev = Prev::Other;
            i += 1;
            continue;
        }

        if c == b'\'' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                // Meta-comment: the rest of the line vanishes from the
                // stored form entirely (spec §4.1).
                out.truncate(start);
                return Ok(0);
            }
            push!(opcode::COMMENT_MARK);
            for &b in &bytes[i + 1..] {
                push!(b);
            }
            prev = Prev::Other;
            break;
        }

        if c == b'"' {
            push!(opcode::STRING_MARK);
            i += 1;
            loop {
                if i >= bytes.len() {
                    return Err(TokenizeError::Syntax);
                }
                if bytes[i] == b'\\' && i + 1 < bytes.len() {
                    push!(bytes[i]);
                    push!(bytes[i + 1]);
                    i += 2;
                    continue;
                }
                if bytes[i] == b'"' {
                    push!(opcode::STRING_MARK);
                    i += 1;
                    break;
                }
                push!(bytes[i]);
                i += 1;
            }
            prev = Prev::Other;
            continue;
        }

        if c == b'@' {
            if i + 1 >= bytes.len() || bytes[i + 1] != b'[' {
                return Err(TokenizeError::Syntax);
            }
            push!(opcode::ARRAY_MARK);
            prev = Prev::Other;
            i += 1;
            continue;
        }

        if c.is_ascii_alphabetic() {
            let run_start = i;
            while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                i += 1;
            }
            let word = std::str::from_utf8(&bytes[run_start..i]).unwrap();
            if let Some(kw) = Keyword::from_name(word) {
                push!(kw.opcode());
                prev = Prev::Other;
            } else {
                // No whole-run match: first letter is a single-letter
                // variable, scanning resumes right after it.
                push!(bytes[run_start]);
                prev = Prev::Other;
                i = run_start + 1;
            }
            continue;
        }

        if c.is_ascii_digit() || (c == b'0' && matches!(bytes.get(i + 1), Some(b'x' | b'X'))) {
            let (magnitude, next_i, hex) = scan_number(bytes, i)?;
            i = next_i;

            let fold_negative = match prev {
                Prev::Sign(sign_byte) => {
                    out.truncate(out.len() - 1); // drop the provisional sign byte
                    sign_byte == b'-'
                }
                _ => false,
            };
            let value: i64 = if fold_negative { -magnitude } else { magnitude };
            emit_value(out, start, max_len, value, hex)?;
            prev = Prev::Value;
            continue;
        }

        if c == b'+' || c == b'-' {
            push!(c);
            // Unary (fold candidate) unless the token right before it was a
            // value or a closing bracket, in which case it's binary.
            prev = match prev {
                Prev::Value | Prev::CloseBracket => Prev::Other,
                _ => Prev::Sign(c),
            };
            i += 1;
            continue;
        }

        if (opcode::ASCII_MIN..=opcode::ASCII_MAX).contains(&c) {
            push!(c);
            prev = if c == b')' || c == b']' { Prev::CloseBracket } else { Prev::Other };
            i += 1;
            continue;
        }

        return Err(TokenizeError::Syntax);
    }

    push!(opcode::EOL);
    Ok(out.len() - start - 1)
}

/// Scans a decimal or `0x`-prefixed hex digit run starting at `i`. Returns
/// the magnitude, the index just past the run, and whether it was hex.
fn scan_number(bytes: &[u8], i: usize) -> Result<(i64, usize, bool), TokenizeError> {
    if bytes[i] == b'0' && matches!(bytes.get(i + 1), Some(b'x' | b'X')) {
        let digits_start = i + 2;
        let mut j = digits_start;
        while j < bytes.len() && bytes[j].is_ascii_hexdigit() {
            j += 1;
        }
        if j == digits_start {
            return Err(TokenizeError::Syntax);
        }
        let text = std::str::from_utf8(&bytes[digits_start..j]).unwrap();
        let magnitude = i64::from_str_radix(text, 16).map_err(|_| TokenizeError::Syntax)?;
        Ok((magnitude, j, true))
    } else {
        let mut j = i;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        let text = std::str::from_utf8(&bytes[i..j]).unwrap();
        let magnitude: i64 = text.parse().map_err(|_| TokenizeError::Syntax)?;
        Ok((magnitude, j, false))
    }
}

/// Emits a value-literal: the single-byte inline-digit encoding for `0..=9`,
/// otherwise a tag byte plus the smallest payload that holds it.
fn emit_value(
    out: &mut Vec<u8>,
    start: usize,
    max_len: usize,
    value: i64,
    hex: bool,
) -> Result<(), TokenizeError> {
    if !hex && (0..=9).contains(&value) {
        if out.len() - start >= max_len {
            return Err(TokenizeError::Overflow);
        }
        out.push(b'0' + value as u8);
        return Ok(());
    }
    let width = if hex && value >= 0 {
        value::smallest_unsigned_width(value as u64)
    } else {
        value::smallest_width(value)
    };
    let payload = value::encode_literal(value as Int, width);
    if out.len() - start + 1 + payload.len() > max_len {
        return Err(TokenizeError::Overflow);
    }
    out.push(opcode::value_tag(hex, width));
    out.extend_from_slice(&payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(line: &str) -> Vec<u8> {
        let mut out = Vec::new();
        tokenize(line, &mut out, 63).unwrap();
        out
    }

    #[test]
    fn question_mark_folds_to_print() {
        assert_eq!(toks("?A"), vec![Keyword::Print.opcode(), b'A', opcode::EOL]);
    }

    #[test]
    fn keyword_scan_is_longest_terminated_match() {
        assert_eq!(toks("GOTO10"), vec![
            Keyword::Goto.opcode(),
            b'1', b'0',
            opcode::EOL,
        ]);
    }

    #[test]
    fn unmatched_run_falls_back_to_single_letter_variable() {
        // "AB" is not a keyword: A is taken as a variable, then B again.
        assert_eq!(toks("AB"), vec![b'A', b'B', opcode::EOL]);
    }

    #[test]
    fn inline_digit_literal() {
        assert_eq!(toks("5"), vec![b'5', opcode::EOL]);
    }

    #[test]
    fn multi_digit_literal_gets_tagged() {
        let out = toks("300");
        assert_eq!(out[0], opcode::value_tag(false, 2));
        assert_eq!(out.last(), Some(&opcode::EOL));
    }

    #[test]
    fn hex_literal() {
        let out = toks("0xFF");
        assert_eq!(out[0], opcode::value_tag(true, 1));
        assert_eq!(value::decode_literal(&out[1..2], 1, true), Some(0xFF));
    }

    #[test]
    fn unary_minus_folds_into_literal() {
        let out = toks("-5");
        // Folded: no separate '-' byte, inline digit can't represent
        // negative values so it becomes a tagged 1-byte literal of -5.
        assert_eq!(out[0], opcode::value_tag(false, 1));
        assert_eq!(value::decode_literal(&out[1..2], 1, false), Some(-5));
        assert_eq!(out.last(), Some(&opcode::EOL));
    }

    #[test]
    fn binary_minus_after_value_does_not_fold() {
        let out = toks("A-5");
        assert_eq!(out, vec![b'A', b'-', b'5', opcode::EOL]);
    }

    #[test]
    fn binary_minus_after_close_bracket_does_not_fold() {
        let out = toks("(A)-5");
        assert_eq!(out, vec![b'(', b'A', b')', b'-', b'5', opcode::EOL]);
    }

    #[test]
    fn string_literal_keeps_escaped_quote_as_two_bytes() {
        let out = toks("\"a\\\"b\"");
        assert_eq!(
            out,
            vec![opcode::STRING_MARK, b'a', b'\\', b'"', b'b', opcode::STRING_MARK, opcode::EOL]
        );
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        let mut out = Vec::new();
        assert_eq!(tokenize("\"abc", &mut out, 63), Err(TokenizeError::Syntax));
    }

    #[test]
    fn single_apostrophe_comment_is_kept_verbatim() {
        let out = toks("PRINT 'hello");
        assert_eq!(out[0], Keyword::Print.opcode());
        assert_eq!(out[1], opcode::COMMENT_MARK);
        assert_eq!(&out[2..out.len() - 1], b"hello");
    }

    #[test]
    fn double_apostrophe_meta_comment_vanishes() {
        let mut out = Vec::new();
        let n = tokenize("'' this disappears", &mut out, 63).unwrap();
        assert_eq!(n, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn array_subscript_marker_requires_bracket() {
        let mut out = Vec::new();
        assert_eq!(tokenize("@5", &mut out, 63), Err(TokenizeError::Syntax));
        out.clear();
        assert!(tokenize("@[5]", &mut out, 63).is_ok());
    }

    #[test]
    fn overflow_is_reported_before_appending_past_the_limit() {
        let mut out = Vec::new();
        let line = "A".repeat(10);
        assert_eq!(tokenize(&line, &mut out, 4), Err(TokenizeError::Overflow));
    }
}
