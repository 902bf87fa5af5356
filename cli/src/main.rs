//! `nanobasic-cli`: a terminal host for the `nanobasic` interpreter core
//! (spec §13). Mirrors the teacher's `src/main.rs` in spirit — a thin binary
//! that wires concrete trait implementations into the library's own loop,
//! with no argument-parsing crate pulled in for a handful of long flags.

mod host_impl;

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use crossterm::terminal;
use nanobasic::host::Console as _;
use nanobasic::{persistence, Config, Host, Interpreter, Mode};

use host_impl::{FileStore, NoGpio, OsRandom, ProcessSystem, TermConsole, WallClock};

/// Disables raw mode on drop so a panic or early return never leaves the
/// user's shell in a broken state.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Parses the handful of long-form `--key value` flags spec §14 calls out,
/// falling back to [`Config::default`] for anything unspecified.
fn parse_config() -> (Config, PathBuf) {
    let mut config = Config::default();
    let mut store_path = PathBuf::from("nanobasic.prog");
    let mut args = std::env::args().skip(1);
    while let Some(flag) = args.next() {
        let mut next_usize = || args.next().and_then(|v| v.parse::<usize>().ok());
        match flag.as_str() {
            "--max-line-len" => {
                if let Some(v) = next_usize() {
                    config.max_line_len = v;
                }
            }
            "--program-area-size" => {
                if let Some(v) = next_usize() {
                    config.program_area_size = v;
                }
            }
            "--control-stack-depth" => {
                if let Some(v) = next_usize() {
                    config.control_stack_depth = v;
                }
            }
            "--array-len" => {
                if let Some(v) = next_usize() {
                    config.array_len = v;
                }
            }
            "--expr-depth" => {
                if let Some(v) = next_usize() {
                    config.expr_depth = v;
                }
            }
            "--store" => {
                if let Some(v) = args.next() {
                    store_path = PathBuf::from(v);
                }
            }
            other => {
                eprintln!("unrecognized flag: {}", other);
            }
        }
    }
    (config, store_path)
}

/// Reads one line at the `OK`/`>` prompt, echoing and handling backspace,
/// exactly the line-assembly responsibility spec §2 keeps out of the core.
fn read_line(console: &mut TermConsole) -> String {
    let mut line = String::new();
    loop {
        if let Some(b) = console.get_char() {
            match b {
                b'\n' | b'\r' => {
                    console.put_char(b'\n');
                    break;
                }
                0x08 | 0x7F => {
                    if line.pop().is_some() {
                        console.put_char(0x08);
                        console.put_char(b' ');
                        console.put_char(0x08);
                    }
                }
                0x03 => {
                    line.clear();
                    console.put_char(b'\n');
                    break;
                }
                c if c.is_ascii_graphic() || c == b' ' => {
                    console.put_char(c);
                    line.push(c as char);
                }
                _ => {}
            }
        } else {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
    line
}

/// Waits up to `boot::AUTORUN_WAIT_MS` for a break byte before auto-running
/// a persisted program that carries the auto-run flag (spec §13).
fn autorun_wait(console: &mut TermConsole, clock: &WallClock) -> bool {
    let deadline = clock.tick_ms() + nanobasic::definitions::boot::AUTORUN_WAIT_MS;
    print!("press ^C to cancel auto-run...");
    let _ = io::stdout().flush();
    while clock.tick_ms() < deadline {
        if console.get_char() == Some(0x03) {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    true
}

fn report_error(console: &mut TermConsole, e: nanobasic::RuntimeError) {
    let mut msg = String::new();
    if e.is_break() {
        msg.push_str("Break\r\n");
    } else {
        msg.push_str(e.display_name());
        msg.push_str(" error\r\n");
    }
    for b in msg.bytes() {
        console.put_char(b);
    }
}

fn print_prompt(console: &mut TermConsole, mode: Mode) {
    let prompt: &[u8] = match mode {
        Mode::Repl => b"OK\r\n",
        Mode::ProgEntry => b">",
        Mode::Run => b"",
    };
    for &b in prompt {
        console.put_char(b);
    }
}

fn main() {
    env_logger::init();
    let (config, store_path) = parse_config();

    let _guard = RawModeGuard::enable().expect("failed to enable terminal raw mode");

    let mut interp = Interpreter::new(config);
    let mut console = TermConsole;
    let clock = WallClock::new();
    let mut random = OsRandom::new();
    let mut gpio = NoGpio;
    let mut store = FileStore::open(store_path);
    let mut system = ProcessSystem;

    if persistence::autorun_flag(&mut store) {
        let mut host = Host {
            console: &mut console,
            clock: &clock,
            random: &mut random,
            gpio: &mut gpio,
            store: &mut store,
            system: &mut system,
        };
        if autorun_wait(&mut console, &clock) {
            let _ = interp.submit_line("LOAD", &mut host);
            let _ = interp.submit_line("RUN", &mut host);
        } else {
            console.put_char(b'\n');
        }
    }

    loop {
        let mut host = Host {
            console: &mut console,
            clock: &clock,
            random: &mut random,
            gpio: &mut gpio,
            store: &mut store,
            system: &mut system,
        };

        match interp.mode() {
            Mode::Run => {
                if let Err(e) = interp.run_step(&mut host) {
                    report_error(&mut console, e);
                }
            }
            Mode::Repl | Mode::ProgEntry => {
                print_prompt(&mut console, interp.mode());
                let line = read_line(&mut console);
                if let Err(e) = interp.submit_line(&line, &mut host) {
                    report_error(&mut console, e);
                }
            }
        }
    }
}
