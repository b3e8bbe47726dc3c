//! Machine-state record shared with generated code
//!
//! The context register points at a [`MachineState`]. Generated code reads
//! and writes its fields at the fixed offsets exported here, so the layout
//! is `#[repr(C)]` and every field is one machine word.

use std::mem::offset_of;

use serde::Serialize;

/// Reason generated code handed control back to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum InterruptCode {
    /// Send the message described by the dispatch record
    Dispatch = 0,
    /// Unrecoverable runtime error
    FatalError = 1,
    /// Allocate an instance of a class
    NewObject = 2,
    /// Run a runtime primitive
    Primitive = 3,
    /// Allocate `allocation_size` bytes of raw memory
    AllocateMemory = 4,
}

impl InterruptCode {
    /// Value stored in `interrupt_code` while no interrupt is pending.
    pub const NONE: u64 = u64::MAX;

    /// Decode a stored interrupt code.
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(InterruptCode::Dispatch),
            1 => Some(InterruptCode::FatalError),
            2 => Some(InterruptCode::NewObject),
            3 => Some(InterruptCode::Primitive),
            4 => Some(InterruptCode::AllocateMemory),
            _ => None,
        }
    }

    /// Encoded value.
    pub fn as_u64(self) -> u64 {
        self as u64
    }
}

/// Per-thread state visible to generated code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[repr(C)]
pub struct MachineState {
    /// Current heap frame
    pub frame_pointer: u64,
    /// Current stack record
    pub stack_pointer: u64,
    /// Entry trampoline address
    pub enter_machine_code: u64,
    /// Exit trampoline address; jumping here returns to the host
    pub exit_machine_code: u64,
    /// Host stack pointer saved by the entry trampoline
    pub host_stack_pointer: u64,
    /// Pending [`InterruptCode`], or [`InterruptCode::NONE`]
    pub interrupt_code: u64,
    /// Heap handle
    pub heap: u64,
    /// Symbol table handle
    pub symbol_table: u64,
    /// Class library handle
    pub class_library: u64,
    /// `thisProcess`
    pub this_process: u64,
    /// `thisThread`
    pub this_thread: u64,
    /// Base of the global class-variable array
    pub class_variables: u64,
    /// Nonzero in debug mode
    pub debug_mode: u64,
    /// Base of the outgoing stack record of a dispatch
    pub dispatch_record: u64,
    /// Address to resume at after an interrupt
    pub interrupt_return_address: u64,
    /// Positional argument count of a dispatch, receiver included
    pub argument_count: u64,
    /// Keyword argument pair count of a dispatch
    pub keyword_argument_count: u64,
    /// Nonzero when a dispatch starts lookup at the superclass
    pub dispatch_super: u64,
    /// Byte count requested by an allocation interrupt
    pub allocation_size: u64,
    /// Pointer slot produced by an allocation interrupt
    pub allocation_result: u64,
}

/// Field offsets, in bytes, for generated code.
pub mod offsets {
    use super::*;

    /// `frame_pointer`
    pub const FRAME_POINTER: i32 = offset_of!(MachineState, frame_pointer) as i32;
    /// `stack_pointer`
    pub const STACK_POINTER: i32 = offset_of!(MachineState, stack_pointer) as i32;
    /// `exit_machine_code`
    pub const EXIT_MACHINE_CODE: i32 = offset_of!(MachineState, exit_machine_code) as i32;
    /// `interrupt_code`
    pub const INTERRUPT_CODE: i32 = offset_of!(MachineState, interrupt_code) as i32;
    /// `this_process`
    pub const THIS_PROCESS: i32 = offset_of!(MachineState, this_process) as i32;
    /// `this_thread`
    pub const THIS_THREAD: i32 = offset_of!(MachineState, this_thread) as i32;
    /// `class_variables`
    pub const CLASS_VARIABLES: i32 = offset_of!(MachineState, class_variables) as i32;
    /// `dispatch_record`
    pub const DISPATCH_RECORD: i32 = offset_of!(MachineState, dispatch_record) as i32;
    /// `interrupt_return_address`
    pub const INTERRUPT_RETURN_ADDRESS: i32 = offset_of!(MachineState, interrupt_return_address) as i32;
    /// `argument_count`
    pub const ARGUMENT_COUNT: i32 = offset_of!(MachineState, argument_count) as i32;
    /// `keyword_argument_count`
    pub const KEYWORD_ARGUMENT_COUNT: i32 = offset_of!(MachineState, keyword_argument_count) as i32;
    /// `dispatch_super`
    pub const DISPATCH_SUPER: i32 = offset_of!(MachineState, dispatch_super) as i32;
    /// `allocation_size`
    pub const ALLOCATION_SIZE: i32 = offset_of!(MachineState, allocation_size) as i32;
    /// `allocation_result`
    pub const ALLOCATION_RESULT: i32 = offset_of!(MachineState, allocation_result) as i32;
}

impl MachineState {
    /// Size of the record in bytes.
    pub const SIZE: usize = std::mem::size_of::<MachineState>();

    /// Field values as words, in layout order.
    pub fn to_words(&self) -> Vec<u64> {
        vec![
            self.frame_pointer,
            self.stack_pointer,
            self.enter_machine_code,
            self.exit_machine_code,
            self.host_stack_pointer,
            self.interrupt_code,
            self.heap,
            self.symbol_table,
            self.class_library,
            self.this_process,
            self.this_thread,
            self.class_variables,
            self.debug_mode,
            self.dispatch_record,
            self.interrupt_return_address,
            self.argument_count,
            self.keyword_argument_count,
            self.dispatch_super,
            self.allocation_size,
            self.allocation_result,
        ]
    }

    /// Rebuild from words in layout order; missing words read as zero.
    pub fn from_words(words: &[u64]) -> Self {
        let word = |i: usize| words.get(i).copied().unwrap_or(0);
        MachineState {
            frame_pointer: word(0),
            stack_pointer: word(1),
            enter_machine_code: word(2),
            exit_machine_code: word(3),
            host_stack_pointer: word(4),
            interrupt_code: word(5),
            heap: word(6),
            symbol_table: word(7),
            class_library: word(8),
            this_process: word(9),
            this_thread: word(10),
            class_variables: word(11),
            debug_mode: word(12),
            dispatch_record: word(13),
            interrupt_return_address: word(14),
            argument_count: word(15),
            keyword_argument_count: word(16),
            dispatch_super: word(17),
            allocation_size: word(18),
            allocation_result: word(19),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_word_packed() {
        assert_eq!(MachineState::SIZE, 20 * 8);
        assert_eq!(offsets::FRAME_POINTER, 0);
        assert_eq!(offsets::STACK_POINTER, 8);
        assert_eq!(offsets::INTERRUPT_CODE, 40);
        assert_eq!(offsets::ALLOCATION_RESULT, 19 * 8);
    }

    #[test]
    fn test_words_round_trip() {
        let state = MachineState {
            interrupt_code: InterruptCode::NONE,
            dispatch_super: 1,
            allocation_result: 42,
            ..Default::default()
        };
        let words = state.to_words();
        assert_eq!(words.len() * 8, MachineState::SIZE);
        assert_eq!(words[offsets::DISPATCH_SUPER as usize / 8], 1);
        assert_eq!(MachineState::from_words(&words), state);
    }

    #[test]
    fn test_interrupt_codes() {
        assert_eq!(InterruptCode::from_u64(0), Some(InterruptCode::Dispatch));
        assert_eq!(InterruptCode::from_u64(4), Some(InterruptCode::AllocateMemory));
        assert_eq!(InterruptCode::from_u64(InterruptCode::NONE), None);
    }
}
