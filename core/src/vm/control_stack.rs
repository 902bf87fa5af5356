//! C7: the single fixed-capacity stack shared by `GOSUB`/`FOR`/`DO` (spec
//! §3/§4.6). Mirrors `chip`'s `stack: ArrayVec<[usize; cpu::stack::SIZE]>`
//! plus its `StackError::{Full, Empty}` pair, extended with a kind
//! mismatch for `Unexpected Next`/`Unexpected Return`/`Unexpected Loop`.

use tinyvec::ArrayVec;

use crate::definitions::cpu;
use crate::error::RuntimeError;
use crate::value::Int;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Gosub,
    For,
    Do,
}

/// One nesting frame. Fields outside a frame's own kind are left at their
/// `Default` value; a flat struct (rather than an enum with payloads) is
/// what `ArrayVec<[Frame; N]>` needs a `Copy`/`Default` element type for.
#[derive(Debug, Clone, Copy, Default)]
pub struct Frame {
    pub kind_tag: u8, // 0 = Gosub, 1 = For, 2 = Do; see `FrameKind`
    /// `Gosub`: offset to resume at on `RETURN`. `For`/`Do`: offset of the
    /// first opcode byte of the loop body, for jumping back to on
    /// `NEXT`/`LOOP`.
    pub target: usize,
    /// `For`: register index (0..26) of the loop variable.
    pub var: u8,
    /// `For`: loop limit and step.
    pub limit: Int,
    pub step: Int,
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self.kind_tag {
            0 => FrameKind::Gosub,
            1 => FrameKind::For,
            _ => FrameKind::Do,
        }
    }

    pub fn gosub(target: usize) -> Self {
        Self { kind_tag: 0, target, var: 0, limit: 0, step: 0 }
    }

    pub fn for_loop(target: usize, var: u8, limit: Int, step: Int) -> Self {
        Self { kind_tag: 1, target, var, limit, step }
    }

    pub fn do_loop(target: usize) -> Self {
        Self { kind_tag: 2, target, var: 0, limit: 0, step: 0 }
    }
}

pub struct ControlStack {
    frames: ArrayVec<[Frame; cpu::stack::SIZE]>,
    soft_limit: usize,
}

impl ControlStack {
    pub fn new(soft_limit: usize) -> Self {
        Self { frames: ArrayVec::new(), soft_limit: soft_limit.min(cpu::stack::SIZE) }
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, frame: Frame) -> Result<(), RuntimeError> {
        if self.frames.len() >= self.soft_limit {
            return Err(RuntimeError::StackOverflow);
        }
        self.frames.push(frame);
        Ok(())
    }

    /// `RETURN`: pops the innermost frame only if it's a `Gosub` frame.
    /// Intervening unterminated `FOR`/`DO` frames are *not* unwound —
    /// a dangling loop is the caller's bug, not something `RETURN` fixes.
    pub fn pop_gosub(&mut self) -> Result<Frame, RuntimeError> {
        match self.frames.last().map(Frame::kind) {
            Some(FrameKind::Gosub) => Ok(self.frames.pop().unwrap()),
            _ => Err(RuntimeError::UnexpectedReturn),
        }
    }

    pub fn top_for_mut(&mut self) -> Result<&mut Frame, RuntimeError> {
        match self.frames.last().map(Frame::kind) {
            Some(FrameKind::For) => Ok(self.frames.last_mut().unwrap()),
            _ => Err(RuntimeError::UnexpectedNext),
        }
    }

    pub fn pop_for(&mut self) -> Result<Frame, RuntimeError> {
        match self.frames.last().map(Frame::kind) {
            Some(FrameKind::For) => Ok(self.frames.pop().unwrap()),
            _ => Err(RuntimeError::UnexpectedNext),
        }
    }

    pub fn top_do(&self) -> Result<&Frame, RuntimeError> {
        match self.frames.last().map(Frame::kind) {
            Some(FrameKind::Do) => Ok(self.frames.last().unwrap()),
            _ => Err(RuntimeError::UnexpectedLoop),
        }
    }

    pub fn pop_do(&mut self) -> Result<Frame, RuntimeError> {
        match self.frames.last().map(Frame::kind) {
            Some(FrameKind::Do) => Ok(self.frames.pop().unwrap()),
            _ => Err(RuntimeError::UnexpectedLoop),
        }
    }
}
