//! Low-level IR: three-address instructions over virtual registers
//!
//! The block serializer flattens a HIR frame into one instruction list.
//! Every block starts with a [`LirOpcode::Label`] carrying its phis;
//! everything else is a load, a store, a branch, or an interrupt.

pub mod display;
pub mod linear_frame;

use std::collections::BTreeMap;
use std::num::NonZeroU32;

use cadenza_sdk::Slot;
use serde::{Serialize, Serializer};

use crate::compiler::hir::BlockId;
use crate::runtime::InterruptCode;

pub use linear_frame::LinearFrame;

/// Virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VReg(pub u32);

impl VReg {
    /// Index into per-vreg tables.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Registers the allocator never hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Reserved {
    /// Points at the machine-state record
    Context,
    /// Base of the current stack record
    Stack,
    /// Current heap frame
    Frame,
}

/// Register operand of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operand {
    /// A reserved register
    Reserved(Reserved),
    /// A virtual register
    Value(VReg),
}

impl Operand {
    /// The virtual register, if this is one.
    pub fn vreg(self) -> Option<VReg> {
        match self {
            Operand::Value(vreg) => Some(vreg),
            Operand::Reserved(_) => None,
        }
    }
}

/// Spill slot index. Slot 0 is scratch space for the move scheduler and
/// cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SpillSlot(NonZeroU32);

impl SpillSlot {
    /// Spill slot `index`, or `None` for the scratch slot.
    pub fn new(index: u32) -> Option<Self> {
        NonZeroU32::new(index).map(SpillSlot)
    }

    /// Slot index, at least 1.
    pub fn index(self) -> u32 {
        self.0.get()
    }
}

/// Where a value lives at one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Location {
    /// Allocatable register
    Register(u8),
    /// Spill slot
    Spill(SpillSlot),
}

/// Parallel moves keyed by destination.
pub type MoveSet = BTreeMap<Location, Location>;

/// Merge input of a block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhiLir {
    /// Merged value
    pub output: VReg,
    /// One input per predecessor, in predecessor order
    pub inputs: Vec<VReg>,
}

/// Runtime state an interrupt passes along with its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InterruptPayload {
    /// Nothing beyond the code
    None,
    /// A message send whose record starts at `record` below the spill area
    Dispatch {
        /// Stack offset of the outgoing record, relative to the spill area bottom
        record: i32,
        /// Positional arguments, receiver included
        argument_count: u32,
        /// Keyword argument pairs
        keyword_argument_count: u32,
        /// Method lookup starts at the receiver's superclass
        is_super: bool,
    },
    /// Request for `size` bytes of heap memory
    Allocate {
        /// Bytes requested
        size: u32,
    },
}

/// LIR operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LirOpcode {
    /// Start of a block
    Label {
        /// Block id in the HIR frame
        block: BlockId,
        /// Predecessor blocks, in phi input order
        predecessors: Vec<BlockId>,
        /// Successor blocks, in branch order
        successors: Vec<BlockId>,
        /// Merges evaluated on entry
        phis: Vec<PhiLir>,
    },
    /// `output = value`
    LoadConstant {
        /// Defined register
        output: VReg,
        /// Constant
        value: Slot,
    },
    /// `output = *(pointer + offset)`
    LoadFromPointer {
        /// Defined register
        output: VReg,
        /// Base address
        pointer: Operand,
        /// Byte offset
        offset: i32,
    },
    /// `*(pointer + offset) = value`
    StoreToPointer {
        /// Base address
        pointer: Operand,
        /// Byte offset
        offset: i32,
        /// Stored register
        value: Operand,
    },
    /// Unconditional jump
    Branch {
        /// Target block
        target: BlockId,
    },
    /// Jump if `condition` holds `true`
    BranchIfTrue {
        /// Tested register
        condition: VReg,
        /// Target block
        target: BlockId,
    },
    /// Jump to the address in `address`
    BranchToRegister {
        /// Holds the target address
        address: VReg,
    },
    /// Hand control to the runtime
    Interrupt {
        /// Interrupt code
        code: InterruptCode,
        /// Data stored with the code
        payload: InterruptPayload,
    },
}

impl LirOpcode {
    /// Register this operation defines.
    pub fn output(&self) -> Option<VReg> {
        match self {
            LirOpcode::LoadConstant { output, .. } | LirOpcode::LoadFromPointer { output, .. } => Some(*output),
            _ => None,
        }
    }

    /// Registers defined at this position; phis for labels.
    pub fn outputs(&self) -> Vec<VReg> {
        match self {
            LirOpcode::Label { phis, .. } => phis.iter().map(|phi| phi.output).collect(),
            other => other.output().into_iter().collect(),
        }
    }

    /// Registers this operation reads. Phi inputs are read on the incoming
    /// edges and are not listed.
    pub fn inputs(&self) -> Vec<VReg> {
        match self {
            LirOpcode::Label { .. }
            | LirOpcode::LoadConstant { .. }
            | LirOpcode::Branch { .. }
            | LirOpcode::Interrupt { .. } => Vec::new(),
            LirOpcode::LoadFromPointer { pointer, .. } => pointer.vreg().into_iter().collect(),
            LirOpcode::StoreToPointer { pointer, value, .. } => {
                pointer.vreg().into_iter().chain(value.vreg()).collect()
            }
            LirOpcode::BranchIfTrue { condition, .. } => vec![*condition],
            LirOpcode::BranchToRegister { address } => vec![*address],
        }
    }

    /// True if every allocatable register is clobbered here.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, LirOpcode::Interrupt { .. })
    }

    /// True for operations that end a block.
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            LirOpcode::Branch { .. } | LirOpcode::BranchIfTrue { .. } | LirOpcode::BranchToRegister { .. }
        )
    }

    /// Short mnemonic.
    pub fn name(&self) -> &'static str {
        match self {
            LirOpcode::Label { .. } => "Label",
            LirOpcode::LoadConstant { .. } => "LoadConstant",
            LirOpcode::LoadFromPointer { .. } => "LoadFromPointer",
            LirOpcode::StoreToPointer { .. } => "StoreToPointer",
            LirOpcode::Branch { .. } => "Branch",
            LirOpcode::BranchIfTrue { .. } => "BranchIfTrue",
            LirOpcode::BranchToRegister { .. } => "BranchToRegister",
            LirOpcode::Interrupt { .. } => "Interrupt",
        }
    }
}

/// Moves as `(origin, destination)` pairs; map keys must be strings in JSON.
fn serialize_moves<S: Serializer>(moves: &MoveSet, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(moves.iter().map(|(destination, origin)| (origin, destination)))
}

/// One LIR instruction with its allocation results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lir {
    /// Operation
    pub opcode: LirOpcode,
    /// Moves the allocator needs before this instruction; after it, for labels
    #[serde(serialize_with = "serialize_moves")]
    pub moves: MoveSet,
    /// Control-flow edge moves, run after `moves`
    #[serde(serialize_with = "serialize_moves")]
    pub edge_moves: MoveSet,
    /// Location of every register live here
    pub locations: BTreeMap<VReg, Location>,
}

impl Lir {
    /// Instruction with no moves or locations yet.
    pub fn new(opcode: LirOpcode) -> Self {
        Self {
            opcode,
            moves: MoveSet::new(),
            edge_moves: MoveSet::new(),
            locations: BTreeMap::new(),
        }
    }
}
