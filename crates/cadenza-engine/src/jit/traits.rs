//! The three-address code generation interface the emitter drives

use std::fmt;

use serde::Serialize;

/// JIT register. Allocatable registers count up from 0; the reserved
/// registers are negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Reg(pub i32);

impl Reg {
    /// Points at the machine state
    pub const CONTEXT: Reg = Reg(-3);
    /// Base of the current stack record
    pub const STACK: Reg = Reg(-2);
    /// Current heap frame
    pub const FRAME: Reg = Reg(-1);

    /// Number of reserved registers below 0.
    pub const RESERVED: i32 = 3;

    /// One-byte encoding: the register plus 3.
    pub fn encode(self) -> Option<u8> {
        u8::try_from(self.0 + Self::RESERVED).ok()
    }

    /// Inverse of [`Reg::encode`].
    pub fn decode(byte: u8) -> Reg {
        Reg(i32::from(byte) - Self::RESERVED)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Reg::CONTEXT => write!(f, "context"),
            Reg::STACK => write!(f, "stack"),
            Reg::FRAME => write!(f, "frame"),
            Reg(n) => write!(f, "r{}", n),
        }
    }
}

/// Byte position in generated code: a jump site to patch, or a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Label(pub usize);

/// Code generation target.
///
/// Methods returning `Label` return the site of a placeholder that
/// [`Jit::patch_here`] or [`Jit::patch_there`] fills in later.
pub trait Jit {
    /// `target = a + b`
    fn addr(&mut self, target: Reg, a: Reg, b: Reg);
    /// `target = a + value`
    fn addi(&mut self, target: Reg, a: Reg, value: i64);
    /// `target = a & value`
    fn andi(&mut self, target: Reg, a: Reg, value: u64);
    /// `target = a | value`
    fn ori(&mut self, target: Reg, a: Reg, value: u64);
    /// `target = a ^ b`
    fn xorr(&mut self, target: Reg, a: Reg, b: Reg);
    /// `target = value`
    fn movr(&mut self, target: Reg, value: Reg);
    /// `target = value`
    fn movi(&mut self, target: Reg, value: i64);
    /// `target = value`
    fn movi_u(&mut self, target: Reg, value: u64);
    /// `target = address of a label patched later`
    fn mov_addr(&mut self, target: Reg) -> Label;
    /// Jump if `a >= value`
    fn bgei(&mut self, a: Reg, value: i64) -> Label;
    /// Jump if `a == value`
    fn beqi(&mut self, a: Reg, value: i64) -> Label;
    /// Unconditional jump
    fn jmp(&mut self) -> Label;
    /// Jump to the address in `register`
    fn jmpr(&mut self, register: Reg);
    /// Jump to a fixed address
    fn jmpi(&mut self, address: u64);
    /// `target = *address` (word)
    fn ldr_l(&mut self, target: Reg, address: Reg);
    /// `target = *(address + offset)` (target word)
    fn ldxi_w(&mut self, target: Reg, address: Reg, offset: i32);
    /// `target = *(address + offset)` (32 bits, sign extended)
    fn ldxi_i(&mut self, target: Reg, address: Reg, offset: i32);
    /// `target = *(address + offset)` (word)
    fn ldxi_l(&mut self, target: Reg, address: Reg, offset: i32);
    /// `*address = value` (32 bits)
    fn str_i(&mut self, address: Reg, value: Reg);
    /// `*address = value` (word)
    fn str_l(&mut self, address: Reg, value: Reg);
    /// `*(address + offset) = value` (target word)
    fn stxi_w(&mut self, offset: i32, address: Reg, value: Reg);
    /// `*(address + offset) = value` (32 bits)
    fn stxi_i(&mut self, offset: i32, address: Reg, value: Reg);
    /// `*(address + offset) = value` (word)
    fn stxi_l(&mut self, offset: i32, address: Reg, value: Reg);
    /// Return
    fn ret(&mut self);
    /// Return `register`
    fn retr(&mut self, register: Reg);
    /// Return `value`
    fn reti(&mut self, value: i32);
    /// Mark a jump target here.
    fn label(&mut self) -> Label;
    /// Current position as a target, without emitting anything.
    fn address(&mut self) -> Label;
    /// Point the placeholder at `site` to the current position.
    fn patch_here(&mut self, site: Label);
    /// Point the placeholder at `site` to `target`.
    fn patch_there(&mut self, site: Label, target: Label);
    /// Current position.
    fn current_address(&self) -> usize;
}
