//! Concrete host-collaborator implementations (spec §12): a real terminal in
//! raw mode for `Console`, a wall-clock `Clock`, the OS RNG for `Random`, a
//! local file standing in for the EEPROM block store, and no-op `Gpio`/
//! `SystemControl` stand-ins for hardware a developer's machine doesn't have.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use nanobasic::host::{Clock, Console, Gpio, PersistentStore, Random, SystemControl};
use nanobasic::ParamError;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Break byte the core polls for between dispatches (spec §4.4).
const BREAK_BYTE: u8 = 0x03;

/// Terminal console. Raw mode is enabled/disabled by the caller around the
/// whole session (see `main.rs`'s `RawModeGuard`) so this struct only deals
/// with reading and writing bytes.
pub struct TermConsole;

impl Console for TermConsole {
    fn put_char(&mut self, b: u8) {
        let mut out = std::io::stdout();
        // carriage return is the core's own newline convention (spec §4.6's
        // PRINT escape table); raw mode needs an explicit "\r" alongside it.
        if b == b'\n' {
            let _ = out.write_all(b"\r\n");
        } else {
            let _ = out.write_all(&[b]);
        }
        let _ = out.flush();
    }

    fn get_char(&mut self) -> Option<u8> {
        if !event::poll(std::time::Duration::from_millis(0)).unwrap_or(false) {
            return None;
        }
        match event::read().ok()? {
            Event::Key(k) => {
                if k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c') {
                    return Some(BREAK_BYTE);
                }
                match k.code {
                    KeyCode::Char(c) if c.is_ascii() => Some(c as u8),
                    KeyCode::Enter => Some(b'\n'),
                    KeyCode::Backspace => Some(0x08),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Monotonic wall clock, zeroed at process start.
pub struct WallClock {
    start: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for WallClock {
    fn tick_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

/// OS-seeded RNG, reseedable by `RANDOMIZE n` (spec §4.6).
pub struct OsRandom {
    rng: StdRng,
}

impl OsRandom {
    pub fn new() -> Self {
        Self { rng: StdRng::from_entropy() }
    }
}

impl Random for OsRandom {
    fn seed(&mut self, s: i32) {
        self.rng = StdRng::seed_from_u64(s as u64);
    }

    fn next(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            0
        } else {
            self.rng.gen_range(0..bound)
        }
    }
}

/// No physical pins on a developer's terminal; every call reports
/// [`ParamError`] the way the core expects an unreachable pin number to
/// (spec §6.1).
pub struct NoGpio;

impl Gpio for NoGpio {
    fn write(&mut self, _pin: u32, _v: u32) -> Result<(), ParamError> {
        Err(ParamError)
    }

    fn read(&mut self, _pin: u32) -> Result<u32, ParamError> {
        Err(ParamError)
    }

    fn adc_read(&mut self, _ch: u32) -> Result<u32, ParamError> {
        Err(ParamError)
    }

    fn pwm_set(&mut self, _pin: u32, _v: u32) -> Result<(), ParamError> {
        Err(ParamError)
    }
}

/// A single file standing in for the EEPROM block the original firmware's
/// `SAVE`/`LOAD` wrote through (spec §4.9).
pub struct FileStore {
    path: PathBuf,
    buf: Vec<u8>,
}

impl FileStore {
    pub fn open(path: PathBuf) -> Self {
        let buf = fs::read(&path).unwrap_or_default();
        Self { path, buf }
    }

    fn flush(&self) {
        if let Err(e) = fs::write(&self.path, &self.buf) {
            log::warn!("failed to persist program store to {:?}: {}", self.path, e);
        }
    }

    fn ensure_len(&mut self, end: usize) {
        if self.buf.len() < end {
            self.buf.resize(end, 0);
        }
    }
}

impl PersistentStore for FileStore {
    fn erase(&mut self, addr: usize, len: usize) {
        self.ensure_len(addr + len);
        for b in &mut self.buf[addr..addr + len] {
            *b = 0;
        }
        self.flush();
    }

    fn write(&mut self, addr: usize, buf: &[u8]) {
        self.ensure_len(addr + buf.len());
        self.buf[addr..addr + buf.len()].copy_from_slice(buf);
        self.flush();
    }

    fn read(&mut self, addr: usize, buf: &mut [u8]) {
        self.ensure_len(addr + buf.len());
        buf.copy_from_slice(&self.buf[addr..addr + buf.len()]);
    }
}

/// `RESET`: the nearest a regular OS process has to the UNO's jump back to
/// its bootloader vector.
pub struct ProcessSystem;

impl SystemControl for ProcessSystem {
    fn reset(&mut self) -> ! {
        log::info!("RESET requested, exiting process");
        std::process::exit(0)
    }
}
