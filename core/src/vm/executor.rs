//! C4: the fetch/dispatch loop (spec §4.3) plus the REPL/`PROG`/`Run`-mode
//! state machine that drives it. Mirrors `chip::chip8::chipset::Chipset`'s
//! role: one struct owning all interpreter state, with `&mut dyn Trait`
//! host collaborators borrowed only for the duration of a single step —
//! exactly how `runner::run` threads `&mut dyn DisplayCommands` through
//! `ChipSet::process` without `ChipSet` ever owning a display.

use crate::config::Config;
use crate::error::RuntimeError;
use crate::host::{Clock, Console, Gpio, PersistentStore, Random, SystemControl};
use crate::program::ProgramStore;
use crate::value::Int;

use super::control_stack::ControlStack;
use super::data_cursor::DataCursor;
use super::scan;
use super::statements;

/// What a submitted line currently means: an immediate statement, a
/// `PROG`-loop line waiting to be appended, or a running program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Repl,
    ProgEntry,
    Run,
}

/// What a statement handler asks the dispatch loop to do next (spec §4.3:
/// `ReturnRequest::{None, Goto(usize), End}`, here with `Stop`/`EnterProg`
/// added for the extra top-level commands spec §4.6 groups alongside them).
/// `Next` always means "just keep dispatching from the returned position" —
/// the dispatch loop in [`statements`] handles it internally regardless of
/// whether that position is later in the same statement chain or across an
/// EOL; only the others ever reach [`Interpreter::settle`].
pub enum Flow {
    Next,
    Goto(usize),
    Stop,
    End,
    EnterProg,
}

/// The host collaborators for one step, bundled the way `runner::run`
/// bundles `&mut dyn DisplayCommands`/`&mut dyn KeyboardCommands`.
pub struct Host<'h> {
    pub console: &'h mut dyn Console,
    pub clock: &'h dyn Clock,
    pub random: &'h mut dyn Random,
    pub gpio: &'h mut dyn Gpio,
    pub store: &'h mut dyn PersistentStore,
    pub system: &'h mut dyn SystemControl,
}

pub struct Interpreter {
    pub(crate) config: Config,
    pub(crate) registers: [Int; 26],
    pub(crate) array: Vec<Int>,
    pub(crate) program: ProgramStore,
    pub(crate) control: ControlStack,
    pub(crate) data: DataCursor,
    pub(crate) resume: Option<usize>,
    mode: Mode,
    pc: usize,
}

impl Interpreter {
    pub fn new(config: Config) -> Self {
        let array = vec![0; config.array_len];
        let control = ControlStack::new(config.control_stack_depth);
        let program = ProgramStore::new(config.program_area_size);
        Self {
            registers: [0; 26],
            array,
            program,
            control,
            data: DataCursor::new(),
            resume: None,
            mode: Mode::Repl,
            pc: 0,
            config,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn program(&self) -> &ProgramStore {
        &self.program
    }

    pub(crate) fn reset_state(&mut self) {
        self.registers = [0; 26];
        for slot in &mut self.array {
            *slot = 0;
        }
        self.control.clear();
        self.data.reset();
        self.resume = None;
    }

    /// Where execution is sitting right now, in [`Mode::Run`] — tracked at
    /// statement granularity, not line granularity (spec §4.3/§4.4), so a
    /// `Break` or `STOP` mid-line resumes at the exact next statement.
    pub(crate) fn pc(&self) -> usize {
        self.pc
    }

    pub(crate) fn set_pc(&mut self, pc: usize) {
        self.pc = pc;
    }

    /// Executes one line typed at the `OK`/`>` prompt (spec §6.3). In
    /// [`Mode::ProgEntry`] (after a `PROG` statement) each line is appended
    /// to the program store instead of being run immediately; a bare `#`
    /// ends program entry (spec §4.2).
    pub fn submit_line(&mut self, raw: &str, host: &mut Host<'_>) -> Result<(), RuntimeError> {
        match self.mode {
            Mode::ProgEntry => {
                if raw.trim() == "#" {
                    self.mode = Mode::Repl;
                    return Ok(());
                }
                self.program.append_line(raw, self.config.max_line_len).map_err(RuntimeError::from)
            }
            Mode::Run => Err(RuntimeError::NotInRunMode),
            Mode::Repl => {
                let outcome = statements::execute_repl(self, raw, host);
                self.settle(outcome)
            }
        }
    }

    /// Advances execution by one statement chain while in [`Mode::Run`]
    /// (spec §4.3/§4.4): dispatches statements from the current `pc`,
    /// crossing `:` and EOL boundaries freely, until a `GOTO`/`GOSUB`/
    /// `RETURN`/`RESUME`, `STOP`/`END`/`PROG`, an error, or the program's
    /// end is reached. Break (`0x03`) is polled before every dispatch.
    pub fn run_step(&mut self, host: &mut Host<'_>) -> Result<(), RuntimeError> {
        debug_assert_eq!(self.mode, Mode::Run);

        if self.pc >= self.program.len() {
            self.mode = Mode::Repl;
            self.resume = None;
            return Ok(());
        }

        let bytes = self.program.as_bytes().to_vec();
        let start = self.pc;
        let outcome = statements::execute_run(self, &bytes, start, host);
        self.settle(outcome)
    }

    fn settle(&mut self, outcome: Result<Flow, RuntimeError>) -> Result<(), RuntimeError> {
        if let Err(e) = &outcome {
            log::debug!("statement error at pc={}: {}", self.pc, e);
        }
        match outcome {
            Ok(Flow::Next) => Ok(()),
            Ok(Flow::Goto(target)) => {
                self.mode = Mode::Run;
                self.pc = scan::skip_label(self.program.as_bytes(), target);
                Ok(())
            }
            Ok(Flow::Stop) => {
                self.resume = Some(self.pc);
                self.mode = Mode::Repl;
                Ok(())
            }
            Ok(Flow::End) => {
                self.resume = None;
                self.mode = Mode::Repl;
                Ok(())
            }
            Ok(Flow::EnterProg) => {
                self.mode = Mode::ProgEntry;
                Ok(())
            }
            Err(e) => {
                self.resume = if e.is_break() { Some(self.pc) } else { None };
                self.mode = Mode::Repl;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::{MockClock, MockConsole, MockGpio, MockPersistentStore, MockRandom};

    struct NoopSystem;
    impl SystemControl for NoopSystem {
        fn reset(&mut self) -> ! {
            panic!("reset called in test");
        }
    }

    fn host<'h>(
        console: &'h mut dyn Console,
        clock: &'h dyn Clock,
        random: &'h mut dyn Random,
        gpio: &'h mut dyn Gpio,
        store: &'h mut dyn PersistentStore,
        system: &'h mut dyn SystemControl,
    ) -> Host<'h> {
        Host { console, clock, random, gpio, store, system }
    }

    #[test]
    fn print_literal_runs_immediately_in_repl_mode() {
        let mut interp = Interpreter::new(Config::default());
        let mut console = MockConsole::new();
        console.expect_get_char().returning(|| None);
        console.expect_put_char().returning(|_| ());
        let clock = MockClock::new();
        let mut random = MockRandom::new();
        let mut gpio = MockGpio::new();
        let mut store = MockPersistentStore::new();
        let mut system = NoopSystem;

        let mut h = host(&mut console, &clock, &mut random, &mut gpio, &mut store, &mut system);
        interp.submit_line("PRINT 1+2", &mut h).unwrap();
        assert_eq!(interp.mode(), Mode::Repl);
    }

    #[test]
    fn goto_switches_to_run_mode() {
        let mut interp = Interpreter::new(Config::default());
        interp.program.append_line("100 PRINT 1", 63).unwrap();

        let mut console = MockConsole::new();
        console.expect_get_char().returning(|| None);
        console.expect_put_char().returning(|_| ());
        let clock = MockClock::new();
        let mut random = MockRandom::new();
        let mut gpio = MockGpio::new();
        let mut store = MockPersistentStore::new();
        let mut system = NoopSystem;

        let mut h = host(&mut console, &clock, &mut random, &mut gpio, &mut store, &mut system);
        interp.submit_line("GOTO 100", &mut h).unwrap();
        assert_eq!(interp.mode(), Mode::Run);
    }

    #[test]
    fn break_byte_drops_back_to_repl_with_resume_snapshot() {
        let mut interp = Interpreter::new(Config::default());
        interp.program.append_line("100 PRINT 1", 63).unwrap();

        let mut console = MockConsole::new();
        console.expect_get_char().returning(|| Some(0x03));
        console.expect_put_char().returning(|_| ());
        let clock = MockClock::new();
        let mut random = MockRandom::new();
        let mut gpio = MockGpio::new();
        let mut store = MockPersistentStore::new();
        let mut system = NoopSystem;

        let mut h = host(&mut console, &clock, &mut random, &mut gpio, &mut store, &mut system);
        interp.submit_line("GOTO 100", &mut h).unwrap();
        let err = interp.run_step(&mut h).unwrap_err();
        assert_eq!(err, RuntimeError::Break);
        assert_eq!(interp.mode(), Mode::Repl);
    }
}
