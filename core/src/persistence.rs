//! C9: the persisted-program block layout (spec §4.9/§6.4) and the
//! `SAVE`/`LOAD` adapter over a host-supplied [`PersistentStore`].

use crate::definitions::persist;
use crate::error::PersistError;
use crate::host::PersistentStore;
use crate::program::ProgramStore;

/// Offset of the auto-run flag byte within the header.
const AUTORUN_OFFSET: usize = 6;
/// Offset of the reserved byte within the header.
const RESERVED_OFFSET: usize = 7;

/// `SAVE`: serializes `program` through `store`. An empty program area is
/// rejected (`PG empty`) rather than writing a zero-length block.
///
/// `autorun` is the `SAVE !` form's flag (run automatically on next boot,
/// within the boot wait window); `SAVE 0` is expressed by the caller
/// passing `erase_only = true`, which writes just the header with a
/// zero length, matching the original "erase the header" shortcut.
pub fn save(
    store: &mut dyn PersistentStore,
    program: &ProgramStore,
    autorun: bool,
    erase_only: bool,
) -> Result<(), PersistError> {
    if !erase_only && program.is_empty() {
        log::debug!("save rejected: program area empty");
        return Err(PersistError::Empty);
    }
    log::trace!("save: {} bytes, autorun={}, erase_only={}", program.len(), autorun, erase_only);

    let body: &[u8] = if erase_only { &[] } else { program.as_bytes() };
    let len = body.len() as i16;

    let mut header = [0u8; persist::HEADER_LEN];
    header[0] = persist::MAGIC_0;
    header[1] = persist::MAGIC_1;
    header[2] = persist::MAJOR_VERSION;
    header[3] = persist::MINOR_VERSION;
    header[4..6].copy_from_slice(&len.to_le_bytes());
    header[AUTORUN_OFFSET] = autorun as u8;
    header[RESERVED_OFFSET] = 0;

    store.erase(0, persist::HEADER_LEN + body.len());
    store.write(0, &header);
    if !body.is_empty() {
        store.write(persist::HEADER_LEN, body);
    }
    Ok(())
}

/// `LOAD`: validates the header's magic and a plausible length before
/// replacing `program`'s contents. Any mismatch is `PG empty`, exactly as
/// spec.md treats "nothing sensible to load" and "nothing was ever saved"
/// the same way.
pub fn load(
    store: &mut dyn PersistentStore,
    program: &mut ProgramStore,
    max_len: usize,
) -> Result<(), PersistError> {
    let mut header = [0u8; persist::HEADER_LEN];
    store.read(0, &mut header);

    if header[0] != persist::MAGIC_0 || header[1] != persist::MAGIC_1 {
        log::debug!("load rejected: bad magic");
        return Err(PersistError::Empty);
    }
    let len = i16::from_le_bytes([header[4], header[5]]);
    if len <= 0 || len as usize > max_len {
        log::debug!("load rejected: implausible length {}", len);
        return Err(PersistError::Empty);
    }
    log::trace!("load: {} bytes", len);

    let mut body = vec![0u8; len as usize];
    store.read(persist::HEADER_LEN, &mut body);
    program.restore(&body)
}

/// Whether a previously-saved block requests an unconditional auto-run on
/// boot (spec's boot wait window, `boot::AUTORUN_WAIT_MS`).
pub fn autorun_flag(store: &mut dyn PersistentStore) -> bool {
    let mut header = [0u8; persist::HEADER_LEN];
    store.read(0, &mut header);
    header[0] == persist::MAGIC_0 && header[1] == persist::MAGIC_1 && header[AUTORUN_OFFSET] != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockPersistentStore;

    /// A simple in-memory stand-in, used where the test needs a
    /// round-trip rather than asserting on individual mock calls.
    struct MemStore {
        bytes: Vec<u8>,
    }

    impl MemStore {
        fn new() -> Self {
            Self { bytes: vec![0; 1024] }
        }
    }

    impl PersistentStore for MemStore {
        fn erase(&mut self, addr: usize, len: usize) {
            for b in &mut self.bytes[addr..addr + len] {
                *b = 0;
            }
        }
        fn write(&mut self, addr: usize, buf: &[u8]) {
            self.bytes[addr..addr + buf.len()].copy_from_slice(buf);
        }
        fn read(&mut self, addr: usize, buf: &mut [u8]) {
            buf.copy_from_slice(&self.bytes[addr..addr + buf.len()]);
        }
    }

    #[test]
    fn save_then_load_round_trips_program_bytes() {
        let mut program = ProgramStore::with_default_capacity();
        program.append_line("PRINT 1", 63).unwrap();
        let mut mem = MemStore::new();

        save(&mut mem, &program, false, false).unwrap();

        let mut restored = ProgramStore::with_default_capacity();
        load(&mut mem, &mut restored, 768).unwrap();
        assert_eq!(restored.as_bytes(), program.as_bytes());
    }

    #[test]
    fn save_rejects_empty_program() {
        let program = ProgramStore::with_default_capacity();
        let mut mem = MemStore::new();
        assert_eq!(save(&mut mem, &program, false, false), Err(PersistError::Empty));
    }

    #[test]
    fn load_rejects_bad_magic() {
        let mut mem = MemStore::new();
        let mut program = ProgramStore::with_default_capacity();
        assert_eq!(load(&mut mem, &mut program, 768), Err(PersistError::Empty));
    }

    #[test]
    fn autorun_flag_reflects_save_bang() {
        let mut program = ProgramStore::with_default_capacity();
        program.append_line("PRINT 1", 63).unwrap();
        let mut mem = MemStore::new();
        save(&mut mem, &program, true, false).unwrap();
        assert!(autorun_flag(&mut mem));
    }

    #[test]
    fn erase_only_save_writes_zero_length_header() {
        let program = ProgramStore::with_default_capacity();
        let mut mock = MockPersistentStore::new();
        mock.expect_erase().times(1).returning(|_, _| ());
        mock.expect_write().times(1).returning(|_, _| ());
        save(&mut mock, &program, false, true).unwrap();
    }
}
