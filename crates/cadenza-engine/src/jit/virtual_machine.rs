//! Reference interpreter for the opcode stream
//!
//! The machine simulates three memory regions at fixed virtual addresses:
//! the machine-state record the context register points at, a call stack,
//! and a bump-allocated heap for frames and runtime allocations. Every
//! access is bounds checked.
//!
//! Generated code leaves by jumping to [`EXIT_ADDRESS`]. If no interrupt
//! is pending at that point the method returned and the result is the
//! entry record's return slot. `AllocateMemory` interrupts are served
//! here; every other interrupt stops the machine so the host can act on
//! it and [`VirtualMachine::resume`].

use cadenza_sdk::{Slot, OBJECT_TAG, PAYLOAD_MASK, RAW_POINTER_TAG, SLOT_SIZE, STACK_SLOT_SIZE};
use log::{debug, trace};

use super::opcode::{DecodeError, Instruction, OpcodeReadIterator};
use super::traits::Reg;
use crate::runtime::{offsets, FunctionDef, InterruptCode, MachineState};

/// Jumping here hands control back to the host.
pub const EXIT_ADDRESS: u64 = PAYLOAD_MASK;

/// Base address of the machine-state record.
pub const CONTEXT_BASE: u64 = 0x1000_0000;
/// Lowest stack address.
pub const STACK_BASE: u64 = 0x2000_0000;
/// Lowest heap address.
pub const HEAP_BASE: u64 = 0x3000_0000;

const DEFAULT_STACK_SIZE: usize = 64 * 1024;
const DEFAULT_HEAP_SIZE: usize = 1024 * 1024;
const DEFAULT_STEP_LIMIT: u64 = 10_000_000;

/// Virtual machine errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// The opcode stream is malformed
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A load or store outside every region
    #[error("memory fault: {width} bytes at {address:#x}")]
    MemoryFault {
        /// Faulting address
        address: u64,
        /// Access width in bytes
        width: usize,
    },

    /// A jump outside the opcode stream
    #[error("jump to {0:#x} is outside the code")]
    InvalidJump(u64),

    /// A register operand out of range
    #[error("invalid register {0}")]
    InvalidRegister(Reg),

    /// The stored interrupt code is not a known code
    #[error("unknown interrupt code {0}")]
    UnknownInterrupt(u64),

    /// `resume` called with no pending interrupt
    #[error("the machine is not stopped at an interrupt")]
    NotInterrupted,

    /// The heap region is exhausted
    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(u64),

    /// The step budget ran out
    #[error("step limit of {0} instructions reached")]
    StepLimit(u64),
}

/// How a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmOutcome {
    /// Control returned to the host; the return slot's value
    Returned(Slot),
    /// Generated code raised an interrupt the host must serve
    Interrupted(InterruptCode),
}

/// The outgoing record of a pending dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    /// Message selector
    pub selector: Slot,
    /// Positional arguments, receiver first
    pub arguments: Vec<Slot>,
    /// Keyword name and value pairs, flattened
    pub keyword_arguments: Vec<Slot>,
    /// Lookup starts at the receiver's superclass
    pub is_super: bool,
}

/// One contiguous memory region.
#[derive(Debug, Clone)]
struct Region {
    base: u64,
    bytes: Vec<u8>,
}

impl Region {
    fn new(base: u64, size: usize) -> Self {
        Self {
            base,
            bytes: vec![0; size],
        }
    }

    fn range(&self, address: u64, width: usize) -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(address.checked_sub(self.base)?).ok()?;
        let end = start.checked_add(width)?;
        (end <= self.bytes.len()).then_some(start..end)
    }
}

/// Interpreter state.
#[derive(Debug, Clone)]
pub struct VirtualMachine {
    code: Vec<u8>,
    registers: [u64; 256],
    context: Region,
    stack: Region,
    heap: Region,
    heap_top: usize,
    pc: usize,
    entry_stack: u64,
    step_limit: u64,
    steps: u64,
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualMachine {
    /// Machine with the default region sizes.
    pub fn new() -> Self {
        Self::with_sizes(DEFAULT_STACK_SIZE, DEFAULT_HEAP_SIZE)
    }

    /// Machine with a `stack_size` byte stack and a `heap_size` byte heap.
    pub fn with_sizes(stack_size: usize, heap_size: usize) -> Self {
        let mut machine = Self {
            code: Vec::new(),
            registers: [0; 256],
            context: Region::new(CONTEXT_BASE, MachineState::SIZE),
            stack: Region::new(STACK_BASE, stack_size),
            heap: Region::new(HEAP_BASE, heap_size),
            heap_top: 0,
            pc: 0,
            entry_stack: 0,
            step_limit: DEFAULT_STEP_LIMIT,
            steps: 0,
        };
        machine.reset_context();
        machine
    }

    /// Stop with [`VmError::StepLimit`] after `limit` instructions per run.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Snapshot of the machine-state record.
    pub fn machine_state(&self) -> MachineState {
        let words: Vec<u64> = self
            .context
            .bytes
            .chunks_exact(SLOT_SIZE)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                u64::from_le_bytes(raw)
            })
            .collect();
        MachineState::from_words(&words)
    }

    /// Allocate the class-variable array and point the machine state at it.
    pub fn set_class_variables(&mut self, values: &[Slot]) -> Result<(), VmError> {
        let size = (values.len().max(1) * SLOT_SIZE) as u64;
        let base = self.allocate(size)?;
        for (i, value) in values.iter().enumerate() {
            self.store(base + (i * SLOT_SIZE) as u64, value.as_bits(), SLOT_SIZE)?;
        }
        self.set_context(offsets::CLASS_VARIABLES, base)
    }

    /// Run `def` with `arguments`. Missing arguments take their defaults.
    pub fn run(&mut self, def: &FunctionDef, arguments: &[Slot]) -> Result<VmOutcome, VmError> {
        self.code = def.bytecode.clone();
        self.registers = [0; 256];
        self.stack.bytes.fill(0);
        let class_variables = self.context_word(offsets::CLASS_VARIABLES)?;
        self.reset_context();
        self.set_context(offsets::CLASS_VARIABLES, class_variables)?;

        let frame_size = ((def.frame_slots() + 1) * SLOT_SIZE) as u64;
        let frame = self.allocate(frame_size)?;
        for i in 0..def.frame_slots() {
            let value = arguments
                .get(i)
                .or_else(|| def.prototype_frame.get(i))
                .copied()
                .unwrap_or(Slot::NIL);
            self.store(frame + ((i + 1) * SLOT_SIZE) as u64, value.as_bits(), SLOT_SIZE)?;
        }

        let stack_pointer = STACK_BASE + (self.stack.bytes.len() / 2) as u64;
        self.store(stack_pointer, RAW_POINTER_TAG | EXIT_ADDRESS, SLOT_SIZE)?;
        self.store(stack_pointer + STACK_SLOT_SIZE as u64, Slot::NIL.as_bits(), SLOT_SIZE)?;
        let count = def.argument_count().max(arguments.len());
        for i in 0..count {
            let value = arguments
                .get(i)
                .or_else(|| def.default_values.get(i))
                .copied()
                .unwrap_or(Slot::NIL);
            let address = stack_pointer + ((i + 2) * STACK_SLOT_SIZE) as u64;
            self.store(address, value.as_bits(), SLOT_SIZE)?;
        }

        self.entry_stack = stack_pointer;
        self.set_register(Reg::CONTEXT, CONTEXT_BASE)?;
        self.set_register(Reg::STACK, stack_pointer)?;
        self.set_register(Reg::FRAME, frame)?;
        self.set_context(offsets::FRAME_POINTER, frame)?;
        self.set_context(offsets::STACK_POINTER, stack_pointer)?;
        self.pc = 0;
        self.steps = 0;
        debug!("running {} bytes of code with {} arguments", self.code.len(), arguments.len());
        self.execute()
    }

    /// Clear the pending interrupt and continue after it.
    pub fn resume(&mut self) -> Result<VmOutcome, VmError> {
        self.pending_interrupt()?;
        self.set_context(offsets::INTERRUPT_CODE, InterruptCode::NONE)?;
        let address = self.context_word(offsets::INTERRUPT_RETURN_ADDRESS)?;
        self.jump(address)?;
        self.execute()
    }

    /// Answer the pending dispatch with `result` and continue.
    pub fn resume_with(&mut self, result: Slot) -> Result<VmOutcome, VmError> {
        if self.pending_interrupt()? != InterruptCode::Dispatch {
            return Err(VmError::NotInterrupted);
        }
        let record = self.context_word(offsets::DISPATCH_RECORD)?;
        self.store(record + STACK_SLOT_SIZE as u64, result.as_bits(), SLOT_SIZE)?;
        self.resume()
    }

    /// Decode the outgoing record of the pending dispatch.
    pub fn dispatch_record(&self) -> Result<DispatchRecord, VmError> {
        if self.pending_interrupt()? != InterruptCode::Dispatch {
            return Err(VmError::NotInterrupted);
        }
        let record = self.context_word(offsets::DISPATCH_RECORD)?;
        let argument_count = self.context_word(offsets::ARGUMENT_COUNT)? as usize;
        let keyword_count = self.context_word(offsets::KEYWORD_ARGUMENT_COUNT)? as usize * 2;
        let entry = |i: usize| -> Result<Slot, VmError> {
            let address = record + ((i + 2) * STACK_SLOT_SIZE) as u64;
            Ok(Slot::from_bits(self.load(address, SLOT_SIZE)?))
        };
        Ok(DispatchRecord {
            selector: Slot::from_bits(self.load(record + STACK_SLOT_SIZE as u64, SLOT_SIZE)?),
            arguments: (0..argument_count).map(entry).collect::<Result<_, _>>()?,
            keyword_arguments: (argument_count..argument_count + keyword_count)
                .map(entry)
                .collect::<Result<_, _>>()?,
            is_super: self.context_word(offsets::DISPATCH_SUPER)? != 0,
        })
    }

    /// Read one word of simulated memory.
    pub fn read_word(&self, address: u64) -> Result<u64, VmError> {
        self.load(address, SLOT_SIZE)
    }

    fn pending_interrupt(&self) -> Result<InterruptCode, VmError> {
        let code = self.context_word(offsets::INTERRUPT_CODE)?;
        if code == InterruptCode::NONE {
            return Err(VmError::NotInterrupted);
        }
        InterruptCode::from_u64(code).ok_or(VmError::UnknownInterrupt(code))
    }

    fn reset_context(&mut self) {
        self.context.bytes.fill(0);
        let state = MachineState {
            interrupt_code: InterruptCode::NONE,
            exit_machine_code: EXIT_ADDRESS,
            ..MachineState::default()
        };
        for (chunk, word) in self.context.bytes.chunks_exact_mut(SLOT_SIZE).zip(state.to_words()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }

    fn context_word(&self, offset: i32) -> Result<u64, VmError> {
        self.load(CONTEXT_BASE + offset as u64, SLOT_SIZE)
    }

    fn set_context(&mut self, offset: i32, value: u64) -> Result<(), VmError> {
        self.store(CONTEXT_BASE + offset as u64, value, SLOT_SIZE)
    }

    /// Bump-allocate `size` zeroed bytes, 16-byte aligned.
    fn allocate(&mut self, size: u64) -> Result<u64, VmError> {
        let size = usize::try_from(size).map_err(|_| VmError::OutOfMemory(size))?;
        let rounded = size.div_ceil(STACK_SLOT_SIZE).max(1) * STACK_SLOT_SIZE;
        let start = self.heap_top;
        let end = start
            .checked_add(rounded)
            .filter(|end| *end <= self.heap.bytes.len())
            .ok_or(VmError::OutOfMemory(size as u64))?;
        self.heap.bytes[start..end].fill(0);
        self.heap_top = end;
        trace!("allocated {} bytes at {:#x}", rounded, HEAP_BASE + start as u64);
        Ok(HEAP_BASE + start as u64)
    }

    fn region(&self, address: u64, width: usize) -> Result<(&Region, std::ops::Range<usize>), VmError> {
        [&self.context, &self.stack, &self.heap]
            .into_iter()
            .find_map(|region| region.range(address, width).map(|range| (region, range)))
            .ok_or(VmError::MemoryFault { address, width })
    }

    fn load(&self, address: u64, width: usize) -> Result<u64, VmError> {
        let (region, range) = self.region(address, width)?;
        let mut raw = [0u8; 8];
        raw[..width].copy_from_slice(&region.bytes[range]);
        Ok(u64::from_le_bytes(raw))
    }

    fn store(&mut self, address: u64, value: u64, width: usize) -> Result<(), VmError> {
        let fault = VmError::MemoryFault { address, width };
        let region = [&mut self.context, &mut self.stack, &mut self.heap]
            .into_iter()
            .find(|region| region.range(address, width).is_some())
            .ok_or(fault.clone())?;
        let range = region.range(address, width).ok_or(fault)?;
        region.bytes[range].copy_from_slice(&value.to_le_bytes()[..width]);
        Ok(())
    }

    fn index(register: Reg) -> Result<usize, VmError> {
        register
            .encode()
            .map(usize::from)
            .ok_or(VmError::InvalidRegister(register))
    }

    fn register(&self, register: Reg) -> Result<u64, VmError> {
        Ok(self.registers[Self::index(register)?])
    }

    fn set_register(&mut self, register: Reg, value: u64) -> Result<(), VmError> {
        self.registers[Self::index(register)?] = value;
        Ok(())
    }

    fn effective(&self, address: Reg, offset: i32) -> Result<u64, VmError> {
        Ok(self.register(address)?.wrapping_add(i64::from(offset) as u64))
    }

    /// Move the program counter; `None` means control left for the host.
    fn jump(&mut self, target: u64) -> Result<Option<()>, VmError> {
        let target = target & PAYLOAD_MASK;
        if target == EXIT_ADDRESS {
            return Ok(None);
        }
        match usize::try_from(target) {
            Ok(pc) if pc < self.code.len() => {
                self.pc = pc;
                Ok(Some(()))
            }
            _ => Err(VmError::InvalidJump(target)),
        }
    }

    fn execute(&mut self) -> Result<VmOutcome, VmError> {
        loop {
            if self.step()?.is_none() {
                match self.exit()? {
                    Some(outcome) => return Ok(outcome),
                    None => continue,
                }
            }
        }
    }

    /// Control reached the exit address. Serve allocations in place.
    fn exit(&mut self) -> Result<Option<VmOutcome>, VmError> {
        let code = self.context_word(offsets::INTERRUPT_CODE)?;
        if code == InterruptCode::NONE {
            let result = self.load(self.entry_stack + STACK_SLOT_SIZE as u64, SLOT_SIZE)?;
            return Ok(Some(VmOutcome::Returned(Slot::from_bits(result))));
        }
        match InterruptCode::from_u64(code).ok_or(VmError::UnknownInterrupt(code))? {
            InterruptCode::AllocateMemory => {
                let size = self.context_word(offsets::ALLOCATION_SIZE)?;
                let address = self.allocate(size)?;
                self.set_context(offsets::ALLOCATION_RESULT, OBJECT_TAG | address)?;
                self.set_context(offsets::INTERRUPT_CODE, InterruptCode::NONE)?;
                let resume = self.context_word(offsets::INTERRUPT_RETURN_ADDRESS)?;
                if self.jump(resume)?.is_none() {
                    return Err(VmError::InvalidJump(resume));
                }
                Ok(None)
            }
            other => {
                debug!("interrupted with {:?}", other);
                Ok(Some(VmOutcome::Interrupted(other)))
            }
        }
    }

    /// Execute one instruction; `None` when control left for the host.
    fn step(&mut self) -> Result<Option<()>, VmError> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(VmError::StepLimit(self.step_limit));
        }
        let (instruction, next) = {
            let mut reader = OpcodeReadIterator::new(&self.code);
            reader.seek(self.pc);
            let instruction = reader.decode()?;
            (instruction, reader.position())
        };
        trace!("{:6}  {}", self.pc, instruction);
        self.pc = next;

        use Instruction::*;
        match instruction {
            Addr { target, a, b } => {
                let value = self.register(a)?.wrapping_add(self.register(b)?);
                self.set_register(target, value)?;
            }
            Addi { target, a, value } => {
                let value = self.register(a)?.wrapping_add(value as u64);
                self.set_register(target, value)?;
            }
            Andi { target, a, value } => {
                let value = self.register(a)? & value;
                self.set_register(target, value)?;
            }
            Ori { target, a, value } => {
                let value = self.register(a)? | value;
                self.set_register(target, value)?;
            }
            Xorr { target, a, b } => {
                let value = self.register(a)? ^ self.register(b)?;
                self.set_register(target, value)?;
            }
            Movr { target, value } => {
                let value = self.register(value)?;
                self.set_register(target, value)?;
            }
            Movi { target, value } => self.set_register(target, value as u64)?,
            MoviU { target, value } => self.set_register(target, value)?,
            MovAddr { target, address } => self.set_register(target, address as u64)?,
            Bgei { a, value, address } => {
                if self.register(a)? as i64 >= value {
                    return self.jump(address as u64);
                }
            }
            Beqi { a, value, address } => {
                if self.register(a)? as i64 == value {
                    return self.jump(address as u64);
                }
            }
            Jmp { address } => return self.jump(address as u64),
            Jmpr { register } => {
                let address = self.register(register)?;
                return self.jump(address);
            }
            Jmpi { address } => return self.jump(address),
            LdrL { target, address } => {
                let value = self.load(self.register(address)?, SLOT_SIZE)?;
                self.set_register(target, value)?;
            }
            LdxiW { target, address, offset } | LdxiL { target, address, offset } => {
                let value = self.load(self.effective(address, offset)?, SLOT_SIZE)?;
                self.set_register(target, value)?;
            }
            LdxiI { target, address, offset } => {
                let value = self.load(self.effective(address, offset)?, 4)?;
                self.set_register(target, value as u32 as i32 as i64 as u64)?;
            }
            StrI { address, value } => {
                let (address, value) = (self.register(address)?, self.register(value)?);
                self.store(address, value, 4)?;
            }
            StrL { address, value } => {
                let (address, value) = (self.register(address)?, self.register(value)?);
                self.store(address, value, SLOT_SIZE)?;
            }
            StxiW { offset, address, value } | StxiL { offset, address, value } => {
                let (address, value) = (self.effective(address, offset)?, self.register(value)?);
                self.store(address, value, SLOT_SIZE)?;
            }
            StxiI { offset, address, value } => {
                let (address, value) = (self.effective(address, offset)?, self.register(value)?);
                self.store(address, value, 4)?;
            }
            Ret => return Ok(None),
            Retr { register } => {
                let value = self.register(register)?;
                self.store(self.entry_stack + STACK_SLOT_SIZE as u64, value, SLOT_SIZE)?;
                return Ok(None);
            }
            Reti { value } => {
                let value = Slot::make_int32(value).as_bits();
                self.store(self.entry_stack + STACK_SLOT_SIZE as u64, value, SLOT_SIZE)?;
                return Ok(None);
            }
            Label { .. } => {}
        }
        if self.pc >= self.code.len() {
            return Err(VmError::InvalidJump(self.pc as u64));
        }
        Ok(Some(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::traits::Jit;
    use crate::jit::virtual_jit::VirtualJit;
    use crate::runtime::Symbol;

    fn function(bytecode: Vec<u8>) -> FunctionDef {
        FunctionDef {
            name: Symbol::hash_of("f"),
            argument_names: vec![Symbol::hash_of("this")],
            default_values: vec![Slot::NIL],
            variable_names: Vec::new(),
            prototype_frame: vec![Slot::NIL],
            has_var_args: false,
            primitive: None,
            bytecode,
        }
    }

    fn return_through_stack(jit: &mut VirtualJit, value: Reg) {
        jit.stxi_l(16, Reg::STACK, value);
        jit.ldxi_l(value, Reg::STACK, 0);
        jit.jmpr(value);
    }

    #[test]
    fn test_return_constant() {
        let mut jit = VirtualJit::new(256);
        jit.movi_u(Reg(0), Slot::make_int32(7).as_bits());
        return_through_stack(&mut jit, Reg(0));
        let mut vm = VirtualMachine::new();
        let outcome = vm.run(&function(jit.into_bytes()), &[]).unwrap();
        assert_eq!(outcome, VmOutcome::Returned(Slot::make_int32(7)));
    }

    #[test]
    fn test_argument_is_read_from_stack() {
        let mut jit = VirtualJit::new(256);
        jit.ldxi_l(Reg(1), Reg::STACK, 32);
        return_through_stack(&mut jit, Reg(1));
        let mut vm = VirtualMachine::new();
        let outcome = vm.run(&function(jit.into_bytes()), &[Slot::make_int32(3)]).unwrap();
        assert_eq!(outcome, VmOutcome::Returned(Slot::make_int32(3)));
    }

    #[test]
    fn test_allocation_is_served_internally() {
        let mut jit = VirtualJit::new(512);
        jit.movi(Reg(0), 16);
        jit.stxi_l(offsets::ALLOCATION_SIZE, Reg::CONTEXT, Reg(0));
        jit.movi(Reg(0), InterruptCode::AllocateMemory.as_u64() as i64);
        jit.stxi_l(offsets::INTERRUPT_CODE, Reg::CONTEXT, Reg(0));
        let resume = jit.mov_addr(Reg(0));
        jit.stxi_l(offsets::INTERRUPT_RETURN_ADDRESS, Reg::CONTEXT, Reg(0));
        jit.ldxi_l(Reg(0), Reg::CONTEXT, offsets::EXIT_MACHINE_CODE);
        jit.jmpr(Reg(0));
        jit.patch_here(resume);
        jit.ldxi_l(Reg(1), Reg::CONTEXT, offsets::ALLOCATION_RESULT);
        return_through_stack(&mut jit, Reg(1));

        let mut vm = VirtualMachine::new();
        let VmOutcome::Returned(result) = vm.run(&function(jit.into_bytes()), &[]).unwrap() else {
            panic!("expected a return");
        };
        assert!(result.is_pointer());
        let address = result.as_bits() & PAYLOAD_MASK;
        assert!(address >= HEAP_BASE);
        assert_eq!(vm.read_word(address).unwrap(), 0);
    }

    #[test]
    fn test_dispatch_interrupt_and_resume() {
        let mut jit = VirtualJit::new(512);
        jit.movi_u(Reg(0), Slot::make_int32(5).as_bits());
        jit.stxi_l(-16, Reg::STACK, Reg(0));
        jit.addi(Reg(0), Reg::STACK, -48);
        jit.stxi_l(offsets::DISPATCH_RECORD, Reg::CONTEXT, Reg(0));
        jit.movi(Reg(0), 1);
        jit.stxi_l(offsets::ARGUMENT_COUNT, Reg::CONTEXT, Reg(0));
        jit.movi(Reg(0), InterruptCode::Dispatch.as_u64() as i64);
        jit.stxi_l(offsets::INTERRUPT_CODE, Reg::CONTEXT, Reg(0));
        let resume = jit.mov_addr(Reg(0));
        jit.stxi_l(offsets::INTERRUPT_RETURN_ADDRESS, Reg::CONTEXT, Reg(0));
        jit.ldxi_l(Reg(0), Reg::CONTEXT, offsets::EXIT_MACHINE_CODE);
        jit.jmpr(Reg(0));
        jit.patch_here(resume);
        jit.ldxi_l(Reg(1), Reg::STACK, -32);
        return_through_stack(&mut jit, Reg(1));

        let mut vm = VirtualMachine::new();
        let outcome = vm.run(&function(jit.into_bytes()), &[]).unwrap();
        assert_eq!(outcome, VmOutcome::Interrupted(InterruptCode::Dispatch));
        let record = vm.dispatch_record().unwrap();
        assert_eq!(record.arguments, vec![Slot::make_int32(5)]);
        assert!(!record.is_super);
        let outcome = vm.resume_with(Slot::make_int32(9)).unwrap();
        assert_eq!(outcome, VmOutcome::Returned(Slot::make_int32(9)));
        assert_eq!(vm.resume(), Err(VmError::NotInterrupted));
    }

    #[test]
    fn test_memory_fault() {
        let mut jit = VirtualJit::new(64);
        jit.movi(Reg(0), 8);
        jit.ldr_l(Reg(0), Reg(0));
        jit.ret();
        let mut vm = VirtualMachine::new();
        assert_eq!(
            vm.run(&function(jit.into_bytes()), &[]),
            Err(VmError::MemoryFault { address: 8, width: 8 })
        );
    }

    #[test]
    fn test_step_limit() {
        let mut jit = VirtualJit::new(64);
        let top = jit.label();
        let back = jit.jmp();
        jit.patch_there(back, top);
        let mut vm = VirtualMachine::new().with_step_limit(100);
        assert_eq!(vm.run(&function(jit.into_bytes()), &[]), Err(VmError::StepLimit(100)));
    }
}
