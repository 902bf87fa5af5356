//! C3: the program area — a flat buffer of length-prefixed bytecode lines,
//! plus the `PROG` entry-loop semantics for building one up interactively.
//!
//! Storage shape mirrors `chip::chip8::chipset::Chipset`'s flat `memory:
//! [u8; N]` buffer with a handful of cursor fields rather than a `Vec` of
//! structured records — the layout the original hardware's 2 KB RAM forced,
//! kept here even though nothing stops us from using richer types.

use crate::definitions::memory;
use crate::error::{PersistError, TokenizeError};
use crate::opcode;
use crate::tokenizer;
use crate::value::{self, Int};

/// One decoded line: its opcode bytes (without the length prefix or EOL).
pub struct Line<'a> {
    pub bytes: &'a [u8],
}

/// The flat, length-prefixed bytecode buffer.
///
/// On-disk/in-memory shape per line: `[len: u8][opcode bytes...][EOL]`,
/// where `len` is the opcode byte count excluding EOL (spec §3). The store
/// itself never interprets opcode bytes beyond finding line boundaries and
/// label definitions.
pub struct ProgramStore {
    buf: Vec<u8>,
    capacity: usize,
}

/// A label is a decimal literal appearing as the first opcode of a line
/// (spec's Glossary entry for "Label"); there are no separate line numbers.
fn label_of(line: &[u8]) -> Option<Int> {
    value::read_leading_label(line).map(|(v, _)| v)
}

impl ProgramStore {
    pub fn new(capacity: usize) -> Self {
        Self { buf: Vec::new(), capacity }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(memory::SIZE)
    }

    /// `NEW`: clears the program area.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Tokenizes `raw` and appends it as a new stored line. Silently drops
    /// the line (returns `Ok(())` without writing anything) when the
    /// tokenized result is empty — a blank line or a `''` meta-comment
    /// (spec §4.1).
    pub fn append_line(&mut self, raw: &str, max_line_len: usize) -> Result<(), TokenizeError> {
        let mut opcode_bytes = Vec::new();
        let n = tokenizer::tokenize(raw, &mut opcode_bytes, max_line_len)?;
        if n == 0 {
            return Ok(());
        }
        if self.buf.len() + 1 + opcode_bytes.len() > self.capacity {
            return Err(TokenizeError::Overflow);
        }
        debug_assert_eq!(opcode_bytes.last(), Some(&opcode::EOL));
        self.buf.push(n as u8);
        self.buf.extend_from_slice(&opcode_bytes);
        Ok(())
    }

    /// Iterates stored lines in order, skipping length prefix and EOL.
    pub fn lines(&self) -> impl Iterator<Item = (usize, Line<'_>)> {
        LineIter { buf: &self.buf, pos: 0 }
    }

    /// Byte offset of the first statement *after* the label literal on the
    /// line whose label equals `target`, if any (spec's `findST`-style scan,
    /// §4.7). Already past the label itself — callers never need to skip it
    /// again.
    pub fn find_label(&self, target: Int) -> Option<usize> {
        self.lines().find_map(|(offset, line)| {
            let (value, consumed) = value::read_leading_label(line.bytes)?;
            (value == target).then_some(offset + 1 + consumed)
        })
    }

    /// Raw bytes at and after `offset`, for the executor's program counter.
    pub fn bytes_from(&self, offset: usize) -> &[u8] {
        &self.buf[offset..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Restores a program area previously produced by [`Self::as_bytes`]
    /// (used by [`crate::persistence`] after validating the block header).
    pub fn restore(&mut self, bytes: &[u8]) -> Result<(), PersistError> {
        if bytes.is_empty() {
            return Err(PersistError::Empty);
        }
        self.buf.clear();
        self.buf.extend_from_slice(bytes);
        Ok(())
    }
}

struct LineIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for LineIter<'a> {
    type Item = (usize, Line<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let start = self.pos;
        let len = self.buf[self.pos] as usize;
        let opcode_start = self.pos + 1;
        let opcode_end = opcode_start + len;
        self.pos = opcode_end + 1; // + EOL byte
        Some((start, Line { bytes: &self.buf[opcode_start..opcode_end] }))
    }
}
