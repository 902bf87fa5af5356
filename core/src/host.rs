//! Host-collaborator traits (spec §6.1). `core` never touches a terminal,
//! a clock, an RNG, GPIO pins, or a block store directly — it borrows them
//! through these traits, the same separation `chip` draws between itself
//! and the `DisplayCommands`/`KeyboardCommands` traits `runner::run` takes
//! by `&mut dyn`.

use crate::error::ParamError;

/// Character I/O. `get_char` is non-blocking: `None` means "nothing
/// buffered right now", used both for ordinary `INPUT` polling and for the
/// break-byte (`0x03`) scan between opcode dispatches (spec §4.4).
pub trait Console {
    fn put_char(&mut self, b: u8);
    fn get_char(&mut self) -> Option<u8>;
}

/// Monotonic millisecond tick, consumed by `DELAY`/`PAUSE`/`TICK` and the
/// boot auto-run wait.
pub trait Clock {
    fn tick_ms(&self) -> u32;
}

/// `RANDOMIZE`/`RND`. `seed` reseeds deterministically (for `RANDOMIZE n`);
/// `next` returns a value in `0..bound`.
pub trait Random {
    fn seed(&mut self, s: i32);
    fn next(&mut self, bound: u32) -> u32;
}

/// `OUTP`/`INP`/`ADC`/`PWM`. Every call is fallible: a host with no
/// physical pins attached (or an out-of-range pin/channel number) reports
/// [`ParamError`] rather than panicking (spec §6.1: "the core treats -1 as
/// parameter error").
pub trait Gpio {
    fn write(&mut self, pin: u32, v: u32) -> Result<(), ParamError>;
    fn read(&mut self, pin: u32) -> Result<u32, ParamError>;
    fn adc_read(&mut self, ch: u32) -> Result<u32, ParamError>;
    fn pwm_set(&mut self, pin: u32, v: u32) -> Result<(), ParamError>;
}

/// The EEPROM-shaped backing store `SAVE`/`LOAD` read and write through
/// (spec §4.9/§6.4). `core` only ever calls these with offsets/lengths it
/// computed itself, so they're infallible from its point of view; a
/// concrete host that can fail (disk full, I/O error) is expected to log
/// and degrade rather than propagate, matching the original EEPROM API's
/// fire-and-forget shape.
pub trait PersistentStore {
    fn erase(&mut self, addr: usize, len: usize);
    fn write(&mut self, addr: usize, buf: &[u8]);
    fn read(&mut self, addr: usize, buf: &mut [u8]);
}

/// `RESET`. Never returns, mirroring the AVR's `system_reset` jump to the
/// bootloader vector.
pub trait SystemControl {
    fn reset(&mut self) -> !;
}

#[cfg(test)]
pub mod mock {
    //! `mockall`-generated mocks for the traits above, used by `vm`/
    //! `executor` tests that need a host without wiring up a real terminal.
    use super::*;
    use mockall::mock;

    mock! {
        pub Console {}
        impl Console for Console {
            fn put_char(&mut self, b: u8);
            fn get_char(&mut self) -> Option<u8>;
        }
    }

    mock! {
        pub Clock {}
        impl Clock for Clock {
            fn tick_ms(&self) -> u32;
        }
    }

    mock! {
        pub Random {}
        impl Random for Random {
            fn seed(&mut self, s: i32);
            fn next(&mut self, bound: u32) -> u32;
        }
    }

    mock! {
        pub Gpio {}
        impl Gpio for Gpio {
            fn write(&mut self, pin: u32, v: u32) -> Result<(), ParamError>;
            fn read(&mut self, pin: u32) -> Result<u32, ParamError>;
            fn adc_read(&mut self, ch: u32) -> Result<u32, ParamError>;
            fn pwm_set(&mut self, pin: u32, v: u32) -> Result<(), ParamError>;
        }
    }

    mock! {
        pub PersistentStore {}
        impl PersistentStore for PersistentStore {
            fn erase(&mut self, addr: usize, len: usize);
            fn write(&mut self, addr: usize, buf: &[u8]);
            fn read(&mut self, addr: usize, buf: &mut [u8]);
        }
    }
}
