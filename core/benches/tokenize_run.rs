use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nanobasic::config::Config;
use nanobasic::host::{Clock, Console, Gpio, PersistentStore, Random, SystemControl};
use nanobasic::{Host, Interpreter};

const PROGRAM: &[&str] = &[
    "100 FOR I=1 TO 50",
    "S=S+I*2-1",
    "IF S>1000 THEN",
    "S=S-1000",
    "ENDIF",
    "NEXT",
    "GOTO 100",
];

struct NullConsole;
impl Console for NullConsole {
    fn put_char(&mut self, _c: u8) {}
    fn get_char(&mut self) -> Option<u8> {
        None
    }
}

struct NullClock;
impl Clock for NullClock {
    fn tick_ms(&self) -> u32 {
        0
    }
}

struct NullRandom;
impl Random for NullRandom {
    fn seed(&mut self, _s: i32) {}
    fn next(&mut self, _bound: u32) -> u32 {
        0
    }
}

struct NullGpio;
impl Gpio for NullGpio {
    fn write(&mut self, _pin: u32, _v: u32) -> Result<(), nanobasic::ParamError> {
        Ok(())
    }
    fn read(&mut self, _pin: u32) -> Result<u32, nanobasic::ParamError> {
        Ok(0)
    }
    fn adc_read(&mut self, _ch: u32) -> Result<u32, nanobasic::ParamError> {
        Ok(0)
    }
    fn pwm_set(&mut self, _pin: u32, _v: u32) -> Result<(), nanobasic::ParamError> {
        Ok(())
    }
}

struct NullStore;
impl PersistentStore for NullStore {
    fn erase(&mut self, _addr: usize, _len: usize) {}
    fn write(&mut self, _addr: usize, _buf: &[u8]) {}
    fn read(&mut self, _addr: usize, _buf: &mut [u8]) {}
}

struct NullSystem;
impl SystemControl for NullSystem {
    fn reset(&mut self) -> ! {
        panic!("reset called in benchmark")
    }
}

fn tokenize_program(c: &mut Criterion) {
    c.bench_function("tokenize_program", |b| {
        b.iter(|| {
            let mut out = Vec::new();
            for line in PROGRAM {
                out.clear();
                nanobasic::tokenizer::tokenize(black_box(line), &mut out, 63).unwrap();
            }
        });
    });
}

fn run_loop(c: &mut Criterion) {
    c.bench_function("run_loop_800_steps", |b| {
        b.iter(|| {
            let mut interp = Interpreter::new(Config::default());
            let mut console = NullConsole;
            let mut random = NullRandom;
            let mut gpio = NullGpio;
            let mut store = NullStore;
            let mut system = NullSystem;
            let clock = NullClock;
            let mut host = Host {
                console: &mut console,
                clock: &clock,
                random: &mut random,
                gpio: &mut gpio,
                store: &mut store,
                system: &mut system,
            };
            interp.submit_line("PROG", &mut host).unwrap();
            for line in PROGRAM {
                interp.submit_line(line, &mut host).unwrap();
            }
            interp.submit_line("#", &mut host).unwrap();
            interp.submit_line("GOTO 100", &mut host).unwrap();
            for _ in 0..800 {
                if interp.mode() != nanobasic::Mode::Run {
                    break;
                }
                let _ = interp.run_step(&mut host);
            }
            black_box(interp.mode());
        });
    });
}

criterion_group!(benches, tokenize_program, run_loop);
criterion_main!(benches);
