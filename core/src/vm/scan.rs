//! Forward structural scanning over a bytecode buffer (spec §4.7): finding
//! the matching `ENDIF`/`ELSEIF`/`ELSE` for an `IF`, the matching
//! `NEXT`/`LOOP` for a `FOR`/`DO` being skipped over, and the label-skip /
//! next-line primitives the executor's fetch loop rides on. Pure byte-level
//! scanning — no evaluation happens here.
//!
//! Everything here takes a plain `bytes: &[u8]` rather than a
//! [`crate::program::ProgramStore`]: the same walker serves both the
//! length-prefixed, multi-line program area (`framed = true`) and a single
//! ephemeral REPL line tokenized with no length prefix and nothing past its
//! own EOL (`framed = false`). `framed` only changes what happens when a
//! scan crosses an EOL (spec §4.7: "stops at the first EOL" in REPL mode).

use crate::opcode::{self, Keyword};
use crate::value;

/// Advances past exactly one token at `pos`: a value-literal's tag plus
/// payload, a string's body (honoring `\`-escapes) plus its closing mark, or
/// a single plain byte. Never special-cases `:` or EOL — callers that care
/// about statement/line boundaries check for those themselves.
fn step_token(bytes: &[u8], pos: usize) -> usize {
    match bytes.get(pos).copied() {
        None => pos,
        Some(opcode::STRING_MARK) => {
            let mut p = pos + 1;
            loop {
                match bytes.get(p).copied() {
                    None => return p,
                    Some(opcode::STRING_MARK) => return p + 1,
                    Some(b'\\') => p += 2,
                    Some(_) => p += 1,
                }
            }
        }
        Some(b) if opcode::is_value_tag(b) => {
            let (_, width) = opcode::decode_value_tag(b);
            pos + 1 + width as usize
        }
        Some(_) => pos + 1,
    }
}

/// Walks from one statement start to the next, crossing a `:` (to the byte
/// right after it) or an EOL (to the first opcode of the following stored
/// line, past its length prefix — only when `framed`; in REPL mode an EOL
/// ends the scan). `None` means there is no further statement to find.
pub fn next_statement(bytes: &[u8], mut pos: usize, framed: bool) -> Option<usize> {
    loop {
        match bytes.get(pos).copied() {
            None => return None,
            Some(b':') => return Some(pos + 1),
            Some(opcode::EOL) => {
                if !framed {
                    return None;
                }
                let len_pos = pos + 1;
                if len_pos >= bytes.len() {
                    return None;
                }
                return Some(len_pos + 1);
            }
            Some(_) => pos = step_token(bytes, pos),
        }
    }
}

/// Advances from anywhere within a physical line to the first opcode of the
/// next stored line, ignoring `:` (this is a line-level skip, not a
/// statement-level one — used by the executor's Run-mode fetch loop once a
/// line's statements are exhausted). Returns the buffer length past the
/// last line.
pub fn advance_to_next_line(bytes: &[u8], mut pos: usize) -> usize {
    loop {
        match bytes.get(pos).copied() {
            None => return bytes.len(),
            Some(opcode::EOL) => {
                let len_pos = pos + 1;
                if len_pos >= bytes.len() {
                    return bytes.len();
                }
                return len_pos + 1;
            }
            Some(_) => pos = step_token(bytes, pos),
        }
    }
}

/// Skips a leading *decimal* label literal at `pos`, if there is one (spec
/// §4.3 step 2). A hex-tagged leading literal is ordinary data, never a
/// label, and is left alone.
pub fn skip_label(bytes: &[u8], pos: usize) -> usize {
    match value::read_leading_label(&bytes[pos..]) {
        Some((_, consumed)) => pos + consumed,
        None => pos,
    }
}

/// The keyword opcode of the statement starting at `pos`, after skipping a
/// possible leading label. A bare literal can never legitimately start a
/// real statement other than as a label, so it's always safe to try.
fn statement_keyword(bytes: &[u8], pos: usize) -> Option<Keyword> {
    bytes.get(keyword_offset(bytes, pos)).copied().and_then(Keyword::from_opcode)
}

fn keyword_offset(bytes: &[u8], pos: usize) -> usize {
    match value::read_leading_label(&bytes[pos..]) {
        Some((_, consumed)) => pos + consumed,
        None => pos,
    }
}

/// Finds the next `ELSEIF`/`ELSE`/`ENDIF` belonging to the `IF` whose body
/// starts at `from` (strictly after the `IF` statement itself), skipping
/// nested `IF`/`ENDIF` pairs. Returns the absolute offset of the matching
/// keyword opcode byte and which keyword it was.
pub fn find_if_branch(bytes: &[u8], from: usize, framed: bool) -> Option<(usize, Keyword)> {
    let mut pos = from;
    let mut depth = 0u32;
    loop {
        match statement_keyword(bytes, pos) {
            Some(Keyword::If) => depth += 1,
            Some(Keyword::Endif) => {
                if depth == 0 {
                    return Some((keyword_offset(bytes, pos), Keyword::Endif));
                }
                depth -= 1;
            }
            Some(kw @ (Keyword::Elseif | Keyword::Else)) if depth == 0 => {
                return Some((keyword_offset(bytes, pos), kw));
            }
            _ => {}
        }
        pos = next_statement(bytes, pos, framed)?;
    }
}

/// Finds the offset of the `close` keyword balancing the `open` keyword
/// whose body starts at `from` — used to skip a zero-iteration `FOR` or a
/// `DO WHILE` that tests false up front. Returns the absolute offset of the
/// `close` keyword opcode byte.
pub fn find_block_close(bytes: &[u8], from: usize, open: Keyword, close: Keyword, framed: bool) -> Option<usize> {
    let mut pos = from;
    let mut depth = 0u32;
    loop {
        match statement_keyword(bytes, pos) {
            Some(kw) if kw == open => depth += 1,
            Some(kw) if kw == close => {
                if depth == 0 {
                    return Some(keyword_offset(bytes, pos));
                }
                depth -= 1;
            }
            _ => {}
        }
        pos = next_statement(bytes, pos, framed)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramStore;

    fn framed_bytes(lines: &[&str]) -> Vec<u8> {
        let mut p = ProgramStore::with_default_capacity();
        for l in lines {
            p.append_line(l, 63).unwrap();
        }
        p.as_bytes().to_vec()
    }

    #[test]
    fn finds_endif_skipping_nested_if() {
        let bytes = framed_bytes(&["IF A", "IF B", "ENDIF", "ENDIF", "PRINT 1"]);
        let body = next_statement(&bytes, 1, true).unwrap();
        let (offset, kw) = find_if_branch(&bytes, body, true).unwrap();
        assert_eq!(kw, Keyword::Endif);
        assert_eq!(bytes[offset], Keyword::Endif.opcode());
    }

    #[test]
    fn finds_else_at_the_same_depth() {
        let bytes = framed_bytes(&["IF A", "PRINT 1", "ELSE", "PRINT 2", "ENDIF"]);
        let body = next_statement(&bytes, 1, true).unwrap();
        let (_, kw) = find_if_branch(&bytes, body, true).unwrap();
        assert_eq!(kw, Keyword::Else);
    }

    #[test]
    fn finds_matching_next_skipping_nested_for() {
        let bytes = framed_bytes(&["FOR A", "FOR B", "NEXT", "NEXT", "PRINT 1"]);
        let body = next_statement(&bytes, 1, true).unwrap();
        let offset = find_block_close(&bytes, body, Keyword::For, Keyword::Next, true).unwrap();
        assert_eq!(bytes[offset], Keyword::Next.opcode());
    }

    #[test]
    fn colon_chained_statements_share_one_line() {
        let bytes = framed_bytes(&["A=2:FOR I=1 TO 3"]);
        let first = next_statement(&bytes, 1, true).unwrap();
        assert_eq!(statement_keyword(&bytes, first), Some(Keyword::For));
    }

    #[test]
    fn repl_scan_stops_at_the_first_eol() {
        // An unframed (REPL) buffer has nothing past its own EOL.
        let mut out = Vec::new();
        crate::tokenizer::tokenize("PRINT 1", &mut out, 63).unwrap();
        assert_eq!(next_statement(&out, 0, false), None);
    }

    #[test]
    fn advance_to_next_line_crosses_length_prefix() {
        let bytes = framed_bytes(&["PRINT 1", "PRINT 2"]);
        let next = advance_to_next_line(&bytes, 1);
        assert_eq!(statement_keyword(&bytes, next), Some(Keyword::Print));
    }

    #[test]
    fn skip_label_leaves_hex_literals_alone() {
        let bytes = framed_bytes(&["0xFF PRINT 1"]);
        assert_eq!(skip_label(&bytes, 1), 1);
    }

    #[test]
    fn skip_label_consumes_a_decimal_label() {
        let bytes = framed_bytes(&["100 PRINT 1"]);
        let after = skip_label(&bytes, 1);
        assert_eq!(statement_keyword(&bytes, after), Some(Keyword::Print));
    }
}
