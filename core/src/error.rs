//! The error taxonomy (spec §7), modeled as `Result`-propagating types
//! instead of the original firmware's single ambient error byte.

use thiserror::Error;

/// Errors raised while turning a raw source line into bytecode (C2).
#[derive(Error, Debug, PartialEq, Clone, Copy)]
pub enum TokenizeError {
    #[error("Syntax error")]
    Syntax,
    #[error("PG area overflow")]
    Overflow,
}

/// Errors raised while serializing/restoring the program area (C9).
#[derive(Error, Debug, PartialEq, Clone, Copy)]
pub enum PersistError {
    #[error("PG empty")]
    Empty,
}

/// Errors raised by a host collaborator call with an out-of-range parameter
/// (spec §6.1: "the core treats -1 as parameter error").
#[derive(Error, Debug, PartialEq, Clone, Copy)]
#[error("Parameter error")]
pub struct ParamError;

/// The full runtime error taxonomy (spec §7). `Break` is a first-class
/// variant rather than a signal, since break delivery is just a polled byte
/// value (spec §4.4) that the executor turns into this like any other error.
#[derive(Error, Debug, PartialEq, Clone, Copy)]
pub enum RuntimeError {
    #[error("Syntax")]
    Syntax,
    #[error("Division by 0")]
    DivisionByZero,
    #[error("Array index over")]
    ArrayIndexOver,
    #[error("Parameter")]
    Parameter,
    #[error("Stack overflow")]
    StackOverflow,
    #[error("Can't resume")]
    CantResume,
    #[error("Label not found")]
    LabelNotFound,
    #[error("Not in run-mode")]
    NotInRunMode,
    #[error("PG area overflow")]
    ProgramAreaOverflow,
    #[error("PG empty")]
    ProgramEmpty,
    #[error("Loop nothing")]
    LoopNothing,
    #[error("Endif not found")]
    EndifNotFound,
    #[error("Expr too deep")]
    ExprTooDeep,
    #[error("Unexpected Next")]
    UnexpectedNext,
    #[error("Unexpected Return")]
    UnexpectedReturn,
    #[error("Unexpected Loop")]
    UnexpectedLoop,
    #[error("Unexpected Exit")]
    UnexpectedExit,
    #[error("Unexpected Continue")]
    UnexpectedContinue,
    #[error("Unexpected Read")]
    UnexpectedRead,
    #[error("Break")]
    Break,
}

impl From<TokenizeError> for RuntimeError {
    fn from(e: TokenizeError) -> Self {
        match e {
            TokenizeError::Syntax => RuntimeError::Syntax,
            TokenizeError::Overflow => RuntimeError::ProgramAreaOverflow,
        }
    }
}

impl From<PersistError> for RuntimeError {
    fn from(_: PersistError) -> Self {
        RuntimeError::ProgramEmpty
    }
}

impl From<ParamError> for RuntimeError {
    fn from(_: ParamError) -> Self {
        RuntimeError::Parameter
    }
}

impl RuntimeError {
    /// Name shown in the `<Name> error[ in <line>]` exit surface (spec §6.5).
    /// `Break` prints without the word "error"; the executor special-cases it.
    pub fn display_name(&self) -> &'static str {
        match self {
            RuntimeError::Syntax => "Syntax",
            RuntimeError::DivisionByZero => "Division by 0",
            RuntimeError::ArrayIndexOver => "Array index over",
            RuntimeError::Parameter => "Parameter",
            RuntimeError::StackOverflow => "Stack overflow",
            RuntimeError::CantResume => "Can't resume",
            RuntimeError::LabelNotFound => "Label not found",
            RuntimeError::NotInRunMode => "Not in run-mode",
            RuntimeError::ProgramAreaOverflow => "PG area overflow",
            RuntimeError::ProgramEmpty => "PG empty",
            RuntimeError::LoopNothing => "Loop nothing",
            RuntimeError::EndifNotFound => "Endif not found",
            RuntimeError::ExprTooDeep => "Expr too deep",
            RuntimeError::UnexpectedNext => "Unexpected Next",
            RuntimeError::UnexpectedReturn => "Unexpected Return",
            RuntimeError::UnexpectedLoop => "Unexpected Loop",
            RuntimeError::UnexpectedExit => "Unexpected Exit",
            RuntimeError::UnexpectedContinue => "Unexpected Continue",
            RuntimeError::UnexpectedRead => "Unexpected Read",
            RuntimeError::Break => "Break",
        }
    }

    /// `Break` is recoverable with `RESUME`; every other error clears the
    /// resume snapshot (spec §7).
    pub fn is_break(&self) -> bool {
        matches!(self, RuntimeError::Break)
    }
}
