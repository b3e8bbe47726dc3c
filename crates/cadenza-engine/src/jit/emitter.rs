//! Final code generation from an allocated, resolved linear frame

use cadenza_sdk::{Slot, TypeFlags, OBJECT_TAG, PAYLOAD_MASK};
use log::debug;

use super::move_scheduler::{schedule_moves, ScheduleError};
use super::traits::{Jit, Label, Reg};
use super::virtual_jit::VirtualJit;
use crate::compiler::hir::BlockId;
use crate::compiler::lir::{InterruptPayload, LinearFrame, Lir, LirOpcode, Location, Operand, Reserved, VReg};
use crate::runtime::{offsets, InterruptCode};

/// Emission errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    /// The output buffer is full
    #[error("bytecode buffer of {capacity} bytes overflowed")]
    Overflow {
        /// Capacity of the full buffer
        capacity: usize,
    },

    /// An operand is not in a register where the instruction needs it
    #[error("{value} is not in a register at position {position}")]
    NotInRegister {
        /// The operand
        value: VReg,
        /// The instruction
        position: usize,
    },

    /// A branch targets a block that has no label
    #[error("branch to unplaced block {0}")]
    UnknownBlock(BlockId),

    /// The spill area does not fit a stack offset
    #[error("frame needs {0} spill slots")]
    FrameTooLarge(usize),

    /// A move set could not be scheduled
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Emit `linear` through `jit`. `registers` is the number of allocatable
/// registers.
pub fn emit<J: Jit + ?Sized>(linear: &LinearFrame, jit: &mut J, registers: usize) -> Result<(), EmitError> {
    let spill_size = linear
        .spill_slot_count
        .checked_mul(8)
        .and_then(|size| i32::try_from(size).ok())
        .ok_or(EmitError::FrameTooLarge(linear.spill_slot_count))?;
    let mut emitter = Emitter {
        linear,
        jit,
        registers,
        spill_size,
        block_addresses: vec![None; linear.block_count()],
        branches: Vec::new(),
    };
    for position in 0..linear.instructions.len() {
        emitter.instruction(position)?;
    }
    emitter.patch_branches()
}

/// Emit `linear` into a fresh opcode buffer of `capacity` bytes.
pub fn emit_bytecode(linear: &LinearFrame, registers: usize, capacity: usize) -> Result<Vec<u8>, EmitError> {
    let mut jit = VirtualJit::new(capacity);
    emit(linear, &mut jit, registers)?;
    if jit.has_overflowed() {
        return Err(EmitError::Overflow { capacity });
    }
    let bytes = jit.into_bytes();
    debug!("emitted frame {}: {} bytes", linear.name, bytes.len());
    Ok(bytes)
}

struct Emitter<'a, J: Jit + ?Sized> {
    linear: &'a LinearFrame,
    jit: &'a mut J,
    registers: usize,
    /// Bytes of spill area below the stack register
    spill_size: i32,
    block_addresses: Vec<Option<Label>>,
    branches: Vec<(Label, BlockId)>,
}

impl<J: Jit + ?Sized> Emitter<'_, J> {
    fn instruction(&mut self, position: usize) -> Result<(), EmitError> {
        let linear = self.linear;
        let lir = &linear.instructions[position];
        if let LirOpcode::Label { block, .. } = &lir.opcode {
            let address = self.jit.label();
            if let Some(entry) = self.block_addresses.get_mut(block.index()) {
                *entry = Some(address);
            }
            self.moves(lir)?;
            return Ok(());
        }
        self.moves(lir)?;

        match &lir.opcode {
            LirOpcode::Label { .. } => {}
            LirOpcode::LoadConstant { output, value } => {
                let target = self.register(*output, position)?;
                self.jit.movi_u(target, value.as_bits());
            }
            LirOpcode::LoadFromPointer { output, pointer, offset } => {
                let target = self.register(*output, position)?;
                let (base, offset, tagged) = self.pointer(*pointer, *offset, position)?;
                if tagged {
                    self.jit.andi(base, base, PAYLOAD_MASK);
                }
                self.jit.ldxi_l(target, base, offset);
                if tagged && target != base {
                    self.jit.ori(base, base, OBJECT_TAG);
                }
            }
            LirOpcode::StoreToPointer { pointer, offset, value } => {
                let value = self.operand(*value, position)?;
                let (base, offset, tagged) = self.pointer(*pointer, *offset, position)?;
                let tagged = tagged && base != value;
                if tagged {
                    self.jit.andi(base, base, PAYLOAD_MASK);
                }
                self.jit.stxi_l(offset, base, value);
                if tagged {
                    self.jit.ori(base, base, OBJECT_TAG);
                }
            }
            LirOpcode::Branch { target } => {
                let site = self.jit.jmp();
                self.branches.push((site, *target));
            }
            LirOpcode::BranchIfTrue { condition, target } => {
                let condition = self.register(*condition, position)?;
                let site = self.jit.beqi(condition, Slot::TRUE.as_bits() as i64);
                self.branches.push((site, *target));
            }
            LirOpcode::BranchToRegister { address } => {
                let address = self.register(*address, position)?;
                self.jit.jmpr(address);
            }
            LirOpcode::Interrupt { code, payload } => self.interrupt(*code, *payload),
        }
        Ok(())
    }

    /// Split moves, then edge moves.
    fn moves(&mut self, lir: &Lir) -> Result<(), EmitError> {
        if lir.moves.is_empty() && lir.edge_moves.is_empty() {
            return Ok(());
        }
        let free = self.free_register(lir);
        schedule_moves(&mut *self.jit, &lir.moves, free, self.registers)?;
        schedule_moves(&mut *self.jit, &lir.edge_moves, free, self.registers)?;
        Ok(())
    }

    /// Lowest register no value occupies at `lir`.
    fn free_register(&self, lir: &Lir) -> Option<u8> {
        let occupied = |register: u8| {
            let location = Location::Register(register);
            lir.locations.values().any(|l| *l == location)
                || lir.moves.iter().any(|(d, o)| *d == location || *o == location)
                || lir.edge_moves.iter().any(|(d, o)| *d == location || *o == location)
        };
        (0..self.registers)
            .filter_map(|register| u8::try_from(register).ok())
            .find(|register| !occupied(*register))
    }

    fn register(&self, value: VReg, position: usize) -> Result<Reg, EmitError> {
        match self.linear.instructions[position].locations.get(&value) {
            Some(Location::Register(register)) => Ok(Reg(i32::from(*register))),
            _ => Err(EmitError::NotInRegister { value, position }),
        }
    }

    fn operand(&self, operand: Operand, position: usize) -> Result<Reg, EmitError> {
        match operand {
            Operand::Reserved(reserved) => Ok(reserved_register(reserved)),
            Operand::Value(value) => self.register(value, position),
        }
    }

    /// Base register, offset, and whether the base is an object pointer.
    fn pointer(&self, pointer: Operand, offset: i32, position: usize) -> Result<(Reg, i32, bool), EmitError> {
        match pointer {
            Operand::Reserved(Reserved::Stack) if offset < 0 => Ok((Reg::STACK, offset - self.spill_size, false)),
            Operand::Reserved(reserved) => Ok((reserved_register(reserved), offset, false)),
            Operand::Value(value) => {
                let tagged = self.linear.flags(value).contains(TypeFlags::OBJECT);
                Ok((self.register(value, position)?, offset, tagged))
            }
        }
    }

    /// Store the payload and code into the machine state, then leave
    /// through the exit trampoline. Every allocatable register is free here.
    fn interrupt(&mut self, code: InterruptCode, payload: InterruptPayload) {
        let scratch = Reg(0);
        match payload {
            InterruptPayload::None => {}
            InterruptPayload::Dispatch {
                record,
                argument_count,
                keyword_argument_count,
                is_super,
            } => {
                self.jit.addi(scratch, Reg::STACK, i64::from(record - self.spill_size));
                self.jit.stxi_l(offsets::DISPATCH_RECORD, Reg::CONTEXT, scratch);
                self.jit.movi(scratch, i64::from(argument_count));
                self.jit.stxi_l(offsets::ARGUMENT_COUNT, Reg::CONTEXT, scratch);
                self.jit.movi(scratch, i64::from(keyword_argument_count));
                self.jit.stxi_l(offsets::KEYWORD_ARGUMENT_COUNT, Reg::CONTEXT, scratch);
                self.jit.movi(scratch, i64::from(is_super));
                self.jit.stxi_l(offsets::DISPATCH_SUPER, Reg::CONTEXT, scratch);
            }
            InterruptPayload::Allocate { size } => {
                self.jit.movi(scratch, i64::from(size));
                self.jit.stxi_l(offsets::ALLOCATION_SIZE, Reg::CONTEXT, scratch);
            }
        }
        self.jit.stxi_l(offsets::FRAME_POINTER, Reg::CONTEXT, Reg::FRAME);
        self.jit.stxi_l(offsets::STACK_POINTER, Reg::CONTEXT, Reg::STACK);
        self.jit.movi(scratch, code.as_u64() as i64);
        self.jit.stxi_l(offsets::INTERRUPT_CODE, Reg::CONTEXT, scratch);
        let resume = self.jit.mov_addr(scratch);
        self.jit.stxi_l(offsets::INTERRUPT_RETURN_ADDRESS, Reg::CONTEXT, scratch);
        self.jit.ldxi_l(scratch, Reg::CONTEXT, offsets::EXIT_MACHINE_CODE);
        self.jit.jmpr(scratch);
        self.jit.patch_here(resume);
    }

    fn patch_branches(&mut self) -> Result<(), EmitError> {
        for (site, block) in std::mem::take(&mut self.branches) {
            let target = self
                .block_addresses
                .get(block.index())
                .copied()
                .flatten()
                .ok_or(EmitError::UnknownBlock(block))?;
            self.jit.patch_there(site, target);
        }
        Ok(())
    }
}

fn reserved_register(reserved: Reserved) -> Reg {
    match reserved {
        Reserved::Context => Reg::CONTEXT,
        Reserved::Stack => Reg::STACK,
        Reserved::Frame => Reg::FRAME,
    }
}
