//! Back end: register allocation and code generation
//!
//! A [`LinearFrame`](crate::compiler::lir::LinearFrame) goes through
//! - lifetime analysis ([`lifetime_analyzer`])
//! - linear-scan register allocation ([`register_allocator`])
//! - data-flow resolution across block edges ([`resolver`])
//! - emission through the [`Jit`] interface ([`emitter`]), with parallel
//!   moves sequentialized by [`move_scheduler`]
//!
//! [`VirtualJit`] records the emitted opcode stream and [`VirtualMachine`]
//! runs it.

pub mod emitter;
pub mod lifetime;
pub mod lifetime_analyzer;
pub mod move_scheduler;
pub mod opcode;
pub mod register_allocator;
pub mod resolver;
pub mod traits;
pub mod virtual_jit;
pub mod virtual_machine;

pub use emitter::{emit, emit_bytecode, EmitError};
pub use lifetime::{LifetimeInterval, LiveRange};
pub use lifetime_analyzer::analyze_lifetimes;
pub use move_scheduler::{move_set, schedule_moves, ScheduleError};
pub use opcode::{disassemble, DecodeError, Instruction, Opcode, OpcodeReadIterator, OpcodeWriteIterator};
pub use register_allocator::{allocate_registers, AllocationError};
pub use resolver::{resolve, ResolveError};
pub use traits::{Jit, Label, Reg};
pub use virtual_jit::VirtualJit;
pub use virtual_machine::{DispatchRecord, VirtualMachine, VmError, VmOutcome};
