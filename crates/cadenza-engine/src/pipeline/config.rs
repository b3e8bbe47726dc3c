//! Pipeline configuration

/// Registers the emitter keeps for the context, stack, and frame pointers.
pub const RESERVED_REGISTERS: usize = 3;

/// Settings for one [`Pipeline`](super::Pipeline).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Total physical registers, including the three reserved ones.
    /// Must be at least 5.
    pub number_of_registers: usize,

    /// Run the structural validator after every stage.
    pub validate: bool,

    /// Initial size of the opcode buffer in bytes.
    pub bytecode_capacity: usize,

    /// On emitter overflow, double the buffer and retry.
    pub grow_on_overflow: bool,

    /// Largest buffer the retry loop will try.
    pub max_bytecode_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            number_of_registers: 16,
            validate: cfg!(debug_assertions),
            bytecode_capacity: 64 * 1024,
            grow_on_overflow: true,
            max_bytecode_capacity: 16 * 1024 * 1024,
        }
    }
}

impl PipelineConfig {
    /// Set the total register count.
    pub fn with_registers(mut self, number_of_registers: usize) -> Self {
        self.number_of_registers = number_of_registers;
        self
    }

    /// Turn the validator on or off.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Set the initial opcode buffer size.
    pub fn with_bytecode_capacity(mut self, bytecode_capacity: usize) -> Self {
        self.bytecode_capacity = bytecode_capacity;
        self
    }

    /// Set whether an overflowing buffer is grown and emission retried.
    pub fn with_grow_on_overflow(mut self, grow_on_overflow: bool) -> Self {
        self.grow_on_overflow = grow_on_overflow;
        self
    }

    /// Set the upper bound for buffer growth.
    pub fn with_max_bytecode_capacity(mut self, max_bytecode_capacity: usize) -> Self {
        self.max_bytecode_capacity = max_bytecode_capacity;
        self
    }

    /// Registers the allocator may hand out.
    pub fn allocatable_registers(&self) -> usize {
        self.number_of_registers.saturating_sub(RESERVED_REGISTERS)
    }
}
