//! C8: the `DATA`/`READ`/`RESTORE` cursor — an `Option<usize>` byte pointer
//! into the program area, `None` meaning "rescan from the top on next
//! `READ`" (spec §4.8).

use crate::error::RuntimeError;
use crate::opcode::Keyword;
use crate::program::ProgramStore;
use crate::value::{self, Int};

pub struct DataCursor {
    /// Where the next forward scan for a `DATA` line should start.
    scan_from: usize,
    /// Absolute offset of the next literal to read, once a `DATA` line has
    /// been found; `None` means the scan hasn't located one yet.
    value_at: Option<usize>,
}

impl DataCursor {
    pub fn new() -> Self {
        Self { scan_from: 0, value_at: None }
    }

    /// `RESTORE` and `RUN`: rescan from the top of the program on next `READ`.
    pub fn reset(&mut self) {
        self.scan_from = 0;
        self.value_at = None;
    }

    /// `READ`: returns the next `DATA` value, advancing the cursor past it
    /// (and a trailing comma, if any). [`RuntimeError::UnexpectedRead`] once
    /// every `DATA` statement in the program has been exhausted.
    pub fn read_next(&mut self, program: &ProgramStore) -> Result<Int, RuntimeError> {
        if self.value_at.is_none() {
            self.value_at = Some(self.find_next_data_line(program)?);
        }
        let at = self.value_at.unwrap();
        let bytes = program.as_bytes();

        let (value, past) = value::read_leading_literal(&bytes[at..]).ok_or(RuntimeError::Syntax)?;
        let next = at + past;

        if bytes.get(next) == Some(&b',') {
            self.value_at = Some(next + 1);
        } else {
            self.value_at = None;
            self.scan_from = line_end_after(program, next);
        }
        Ok(value)
    }

    fn find_next_data_line(&self, program: &ProgramStore) -> Result<usize, RuntimeError> {
        for (offset, line) in program.lines() {
            if offset < self.scan_from {
                continue;
            }
            let (body, label_len) = match value::read_leading_label(line.bytes) {
                Some((_, consumed)) => (&line.bytes[consumed..], consumed),
                None => (line.bytes, 0),
            };
            if body.first() == Some(&Keyword::Data.opcode()) {
                // +1 for the length prefix byte, +1 to skip the DATA opcode.
                return Ok(offset + 1 + label_len + 1);
            }
        }
        Err(RuntimeError::UnexpectedRead)
    }
}

impl Default for DataCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Absolute offset of the byte after the line containing `within_offset`
/// (i.e. the start of the following stored line), for resuming a forward
/// scan past an exhausted `DATA` line.
fn line_end_after(program: &ProgramStore, within_offset: usize) -> usize {
    program
        .lines()
        .find(|(offset, line)| {
            let opcode_start = offset + 1;
            within_offset >= opcode_start && within_offset <= opcode_start + line.bytes.len()
        })
        .map(|(offset, line)| offset + 1 + line.bytes.len() + 1)
        .unwrap_or(program.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program_with(lines: &[&str]) -> ProgramStore {
        let mut p = ProgramStore::with_default_capacity();
        for l in lines {
            p.append_line(l, 63).unwrap();
        }
        p
    }

    #[test]
    fn reads_values_across_one_data_line() {
        let program = program_with(&["DATA 1,2,3"]);
        let mut cursor = DataCursor::new();
        assert_eq!(cursor.read_next(&program).unwrap(), 1);
        assert_eq!(cursor.read_next(&program).unwrap(), 2);
        assert_eq!(cursor.read_next(&program).unwrap(), 3);
    }

    #[test]
    fn advances_to_the_next_data_line() {
        let program = program_with(&["DATA 1,2", "PRINT 0", "DATA 3"]);
        let mut cursor = DataCursor::new();
        assert_eq!(cursor.read_next(&program).unwrap(), 1);
        assert_eq!(cursor.read_next(&program).unwrap(), 2);
        assert_eq!(cursor.read_next(&program).unwrap(), 3);
    }

    #[test]
    fn exhausting_all_data_is_unexpected_read() {
        let program = program_with(&["DATA 1"]);
        let mut cursor = DataCursor::new();
        cursor.read_next(&program).unwrap();
        assert_eq!(cursor.read_next(&program), Err(RuntimeError::UnexpectedRead));
    }

    #[test]
    fn restore_rescans_from_the_top() {
        let program = program_with(&["DATA 1,2"]);
        let mut cursor = DataCursor::new();
        cursor.read_next(&program).unwrap();
        cursor.reset();
        assert_eq!(cursor.read_next(&program).unwrap(), 1);
    }
}
