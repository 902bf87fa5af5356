/// The definitions

/// The definitions for the program area (the "tape" of stored bytecode lines).
pub mod memory {
    /// Default size of the program store in bytes.
    pub const SIZE: usize = 768;
    /// A single stored bytecode line may hold at most this many opcode
    /// bytes (length prefix and EOL sentinel not included in the count).
    pub const MAX_LINE_LEN: usize = 63;
}

/// The definitions for the cpu / execution engine.
pub mod cpu {
    /// The number of scalar variable slots, addressed `A..Z`.
    pub const REGISTER_COUNT: usize = 26;
    /// Default length of the single integer array, addressed `@[index]`.
    pub const ARRAY_LEN: usize = 64;
    /// Recursion cap for the expression evaluator.
    pub const EXPR_DEPTH: usize = 16;

    /// The control stack definitions.
    pub mod stack {
        /// The count of nesting frames (GOSUB/FOR/DO share this stack).
        pub const SIZE: usize = 8;
    }
}

/// How long the boot auto-run wait lasts before a persisted program starts
/// unconditionally, and how it can be cancelled.
pub mod boot {
    /// Milliseconds to wait for a break before auto-running a saved program.
    pub const AUTORUN_WAIT_MS: u32 = 3_000;
}

/// Bytes that make up the persisted-program header (see [`crate::persistence`]).
pub mod persist {
    pub const MAGIC_0: u8 = b'n';
    pub const MAGIC_1: u8 = b'B';
    pub const MAJOR_VERSION: u8 = 1;
    pub const MINOR_VERSION: u8 = 0;
    /// Header size in bytes: magic(2) + major(1) + minor(1) + len(2) + autorun(1) + reserved(1).
    pub const HEADER_LEN: usize = 8;
}
