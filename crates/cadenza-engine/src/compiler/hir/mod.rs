//! High-level IR: SSA values in a control-flow graph
//!
//! Every HIR, value-producing or not, lives in its frame's arena and is
//! addressed by a [`HirId`]. Blocks, scopes, and frames refer to each other
//! by index; see [`frame`].

pub mod display;
pub mod frame;

use std::collections::BTreeSet;

use cadenza_sdk::{Slot, TypeFlags};
use serde::Serialize;

use crate::runtime::Symbol;

pub use frame::{Block, Frame, NameKey, Placement, Scope, SealedBlock, UnsealedBlock};

/// SSA value number; the index of the HIR in its frame's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HirId(pub u32);

impl HirId {
    /// Arena index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a block in its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Index into the frame's block list.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a scope in its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeId(pub u32);

impl ScopeId {
    /// Index into the frame's scope list.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where an assigned value must eventually be stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AssignTarget {
    /// Argument or variable of this frame, by heap frame slot
    Local {
        /// Slot index in the heap frame
        slot: usize,
    },
    /// Argument or variable of an enclosing frame
    Outer {
        /// Pointer to the enclosing heap frame
        frame: HirId,
        /// Slot index in that frame
        slot: usize,
    },
    /// Instance variable of `this`
    Instance {
        /// The receiver
        this: HirId,
        /// Instance variable index
        index: usize,
    },
    /// Class variable
    Class {
        /// Base of the class-variable array
        class_variables: HirId,
        /// Global class variable index
        index: usize,
    },
}

/// HIR operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum HirOpcode {
    /// Compile-time constant
    Constant(Slot),
    /// Block-entry merge; one input per predecessor
    Phi {
        /// Inputs in predecessor order
        inputs: Vec<HirId>,
        /// Name being merged, if any
        name: Option<Symbol>,
    },
    /// `name` now binds `value`
    Assign {
        /// Bound name
        name: Symbol,
        /// New value
        value: HirId,
        /// Storage the binding maps to
        target: AssignTarget,
    },
    /// Argument `index` of the frame, read from the stack record
    LoadArgument {
        /// Argument index; `this` is 0
        index: usize,
    },
    /// Variable of an enclosing frame
    ImportLocalVariable {
        /// Variable name
        name: Symbol,
        /// Pointer to the enclosing heap frame
        frame: HirId,
        /// Slot index in that frame
        index: usize,
    },
    /// Instance variable of the receiver
    ImportInstanceVariable {
        /// Variable name
        name: Symbol,
        /// The receiver
        this: HirId,
        /// Instance variable index
        index: usize,
    },
    /// Class variable
    ImportClassVariable {
        /// Variable name
        name: Symbol,
        /// Base of the class-variable array
        class_variables: HirId,
        /// Global class variable index
        index: usize,
    },
    /// Dynamic dispatch
    Message {
        /// Selector
        selector: Symbol,
        /// Receiver then positional arguments
        arguments: Vec<HirId>,
        /// Alternating keys and values
        keyword_arguments: Vec<HirId>,
    },
    /// Return to the caller
    MethodReturn,
    /// Store the return value
    StoreReturn {
        /// Returned value
        value: HirId,
    },
    /// Unconditional jump
    Branch {
        /// Target block
        target: BlockId,
    },
    /// Jump if `condition` is `true`
    BranchIfTrue {
        /// Tested value
        condition: HirId,
        /// Target block
        target: BlockId,
    },
    /// Function literal
    BlockLiteral {
        /// The literal's own frame
        frame: Box<Frame>,
        /// Enclosing values the literal captures by name
        captures: Vec<(Symbol, HirId)>,
        /// Compiled function definition, set once the inner frame is compiled
        function_def: Option<Slot>,
    },
    /// Load a heap frame slot; `None` is this frame
    ReadFromFrame {
        /// Heap frame pointer
        frame: Option<HirId>,
        /// Slot index
        index: usize,
    },
    /// Store a heap frame slot; `None` is this frame
    WriteToFrame {
        /// Heap frame pointer
        frame: Option<HirId>,
        /// Slot index
        index: usize,
        /// Stored value
        value: HirId,
    },
    /// Load an instance variable
    ReadFromThis {
        /// The receiver
        this: HirId,
        /// Instance variable index
        index: usize,
    },
    /// Store an instance variable
    WriteToThis {
        /// The receiver
        this: HirId,
        /// Instance variable index
        index: usize,
        /// Stored value
        value: HirId,
    },
    /// Load a class variable
    ReadFromClass {
        /// Base of the class-variable array
        class_variables: HirId,
        /// Global class variable index
        index: usize,
    },
    /// Store a class variable
    WriteToClass {
        /// Base of the class-variable array
        class_variables: HirId,
        /// Global class variable index
        index: usize,
        /// Stored value
        value: HirId,
    },
    /// Load a machine-state field
    ReadFromContext {
        /// Byte offset into the machine state
        offset: i32,
    },
    /// Mark a receiver for lookup starting at the superclass
    RouteToSuperclass {
        /// The receiver
        this: HirId,
    },
    /// Follow the context pointer of a heap frame; `None` is this frame
    LoadOuterFrame {
        /// Inner heap frame pointer
        inner: Option<HirId>,
    },
}

impl HirOpcode {
    /// Values this operation reads, in operand order.
    pub fn reads(&self) -> Vec<HirId> {
        match self {
            HirOpcode::Constant(_)
            | HirOpcode::LoadArgument { .. }
            | HirOpcode::MethodReturn
            | HirOpcode::Branch { .. }
            | HirOpcode::ReadFromContext { .. } => Vec::new(),
            HirOpcode::Phi { inputs, .. } => inputs.clone(),
            HirOpcode::Assign { value, target, .. } => {
                let mut reads = vec![*value];
                match target {
                    AssignTarget::Local { .. } => {}
                    AssignTarget::Outer { frame, .. } => reads.push(*frame),
                    AssignTarget::Instance { this, .. } => reads.push(*this),
                    AssignTarget::Class { class_variables, .. } => reads.push(*class_variables),
                }
                reads
            }
            HirOpcode::ImportLocalVariable { frame, .. } => vec![*frame],
            HirOpcode::ImportInstanceVariable { this, .. } => vec![*this],
            HirOpcode::ImportClassVariable { class_variables, .. } => vec![*class_variables],
            HirOpcode::Message {
                arguments,
                keyword_arguments,
                ..
            } => arguments.iter().chain(keyword_arguments).copied().collect(),
            HirOpcode::StoreReturn { value } => vec![*value],
            HirOpcode::BranchIfTrue { condition, .. } => vec![*condition],
            HirOpcode::BlockLiteral { captures, .. } => captures.iter().map(|(_, id)| *id).collect(),
            HirOpcode::ReadFromFrame { frame, .. } => frame.iter().copied().collect(),
            HirOpcode::WriteToFrame { frame, value, .. } => {
                frame.iter().copied().chain(std::iter::once(*value)).collect()
            }
            HirOpcode::ReadFromThis { this, .. } => vec![*this],
            HirOpcode::WriteToThis { this, value, .. } => vec![*this, *value],
            HirOpcode::ReadFromClass { class_variables, .. } => vec![*class_variables],
            HirOpcode::WriteToClass {
                class_variables,
                value,
                ..
            } => vec![*class_variables, *value],
            HirOpcode::RouteToSuperclass { this } => vec![*this],
            HirOpcode::LoadOuterFrame { inner } => inner.iter().copied().collect(),
        }
    }

    /// Replace every read of `old` with `new`.
    pub fn replace_input(&mut self, old: HirId, new: HirId) {
        let swap = |id: &mut HirId| {
            if *id == old {
                *id = new;
            }
        };
        match self {
            HirOpcode::Constant(_)
            | HirOpcode::LoadArgument { .. }
            | HirOpcode::MethodReturn
            | HirOpcode::Branch { .. }
            | HirOpcode::ReadFromContext { .. } => {}
            HirOpcode::Phi { inputs, .. } => inputs.iter_mut().for_each(swap),
            HirOpcode::Assign { value, target, .. } => {
                swap(value);
                match target {
                    AssignTarget::Local { .. } => {}
                    AssignTarget::Outer { frame, .. } => swap(frame),
                    AssignTarget::Instance { this, .. } => swap(this),
                    AssignTarget::Class { class_variables, .. } => swap(class_variables),
                }
            }
            HirOpcode::ImportLocalVariable { frame, .. } => swap(frame),
            HirOpcode::ImportInstanceVariable { this, .. } => swap(this),
            HirOpcode::ImportClassVariable { class_variables, .. } => swap(class_variables),
            HirOpcode::Message {
                arguments,
                keyword_arguments,
                ..
            } => {
                arguments.iter_mut().for_each(swap);
                keyword_arguments.iter_mut().for_each(swap);
            }
            HirOpcode::StoreReturn { value } => swap(value),
            HirOpcode::BranchIfTrue { condition, .. } => swap(condition),
            HirOpcode::BlockLiteral { captures, .. } => captures.iter_mut().for_each(|(_, id)| swap(id)),
            HirOpcode::ReadFromFrame { frame, .. } => frame.iter_mut().for_each(swap),
            HirOpcode::WriteToFrame { frame, value, .. } => {
                frame.iter_mut().for_each(swap);
                swap(value);
            }
            HirOpcode::ReadFromThis { this, .. } => swap(this),
            HirOpcode::WriteToThis { this, value, .. } => {
                swap(this);
                swap(value);
            }
            HirOpcode::ReadFromClass { class_variables, .. } => swap(class_variables),
            HirOpcode::WriteToClass {
                class_variables,
                value,
                ..
            } => {
                swap(class_variables);
                swap(value);
            }
            HirOpcode::RouteToSuperclass { this } => swap(this),
            HirOpcode::LoadOuterFrame { inner } => inner.iter_mut().for_each(swap),
        }
    }

    /// True if the operation defines an SSA value.
    pub fn produces_value(&self) -> bool {
        !matches!(
            self,
            HirOpcode::Assign { .. }
                | HirOpcode::MethodReturn
                | HirOpcode::StoreReturn { .. }
                | HirOpcode::Branch { .. }
                | HirOpcode::BranchIfTrue { .. }
                | HirOpcode::WriteToFrame { .. }
                | HirOpcode::WriteToThis { .. }
                | HirOpcode::WriteToClass { .. }
        )
    }

    /// True for imports of externally defined names.
    pub fn is_import(&self) -> bool {
        matches!(
            self,
            HirOpcode::ImportLocalVariable { .. }
                | HirOpcode::ImportInstanceVariable { .. }
                | HirOpcode::ImportClassVariable { .. }
        )
    }

    /// Short mnemonic.
    pub fn name(&self) -> &'static str {
        match self {
            HirOpcode::Constant(_) => "Constant",
            HirOpcode::Phi { .. } => "Phi",
            HirOpcode::Assign { .. } => "Assign",
            HirOpcode::LoadArgument { .. } => "LoadArgument",
            HirOpcode::ImportLocalVariable { .. } => "ImportLocalVariable",
            HirOpcode::ImportInstanceVariable { .. } => "ImportInstanceVariable",
            HirOpcode::ImportClassVariable { .. } => "ImportClassVariable",
            HirOpcode::Message { .. } => "Message",
            HirOpcode::MethodReturn => "MethodReturn",
            HirOpcode::StoreReturn { .. } => "StoreReturn",
            HirOpcode::Branch { .. } => "Branch",
            HirOpcode::BranchIfTrue { .. } => "BranchIfTrue",
            HirOpcode::BlockLiteral { .. } => "BlockLiteral",
            HirOpcode::ReadFromFrame { .. } => "ReadFromFrame",
            HirOpcode::WriteToFrame { .. } => "WriteToFrame",
            HirOpcode::ReadFromThis { .. } => "ReadFromThis",
            HirOpcode::WriteToThis { .. } => "WriteToThis",
            HirOpcode::ReadFromClass { .. } => "ReadFromClass",
            HirOpcode::WriteToClass { .. } => "WriteToClass",
            HirOpcode::ReadFromContext { .. } => "ReadFromContext",
            HirOpcode::RouteToSuperclass { .. } => "RouteToSuperclass",
            HirOpcode::LoadOuterFrame { .. } => "LoadOuterFrame",
        }
    }
}

/// One HIR node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hir {
    /// Value number
    pub id: HirId,
    /// Operation
    pub opcode: HirOpcode,
    /// Types the value may take
    pub type_flags: TypeFlags,
    /// HIRs that read this value
    pub consumers: BTreeSet<HirId>,
    /// Owning block
    pub block: BlockId,
}

impl Hir {
    /// Values this HIR reads.
    pub fn reads(&self) -> Vec<HirId> {
        self.opcode.reads()
    }
}
