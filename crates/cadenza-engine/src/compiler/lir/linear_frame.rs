//! Linearized frame: the instruction list the back end works on

use std::collections::{BTreeMap, BTreeSet};

use cadenza_sdk::TypeFlags;
use serde::Serialize;

use super::{Lir, LirOpcode, Location, VReg};
use crate::compiler::hir::{BlockId, HirId};
use crate::jit::lifetime::LifetimeInterval;
use crate::runtime::Symbol;

/// Instruction positions `[from, to)` of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockRange {
    /// Position of the block's label
    pub from: usize,
    /// One past the block's last instruction
    pub to: usize,
}

impl BlockRange {
    /// True if `position` is inside the block.
    #[inline]
    pub fn contains(&self, position: usize) -> bool {
        self.from <= position && position < self.to
    }
}

/// A frame flattened into one instruction list in reverse postorder.
///
/// Tables indexed by block id have an entry for every block of the HIR
/// frame; unreachable blocks have `None` entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinearFrame {
    /// Method or block name
    pub name: Symbol,
    /// Instructions; a position is an index into this list
    pub instructions: Vec<Lir>,
    /// Blocks in linear order
    pub block_order: Vec<BlockId>,
    /// Label position of each block
    pub block_labels: Vec<Option<usize>>,
    /// Instruction range of each block
    pub block_ranges: Vec<Option<BlockRange>>,
    /// Type flags of each virtual register
    pub vreg_flags: Vec<TypeFlags>,
    /// Position of the instruction defining each virtual register
    pub vreg_definitions: Vec<usize>,
    /// Register each HIR value was lowered to
    pub hir_to_vreg: BTreeMap<HirId, VReg>,
    /// Registers live on entry to each block, phis excluded
    pub live_in: Vec<BTreeSet<VReg>>,
    /// Lifetime pieces of each virtual register, sorted by start
    pub value_lifetimes: Vec<Vec<LifetimeInterval>>,
    /// Positions where each allocatable register is unavailable
    pub register_reservations: Vec<LifetimeInterval>,
    /// Spill slots in use, scratch slot 0 included
    pub spill_slot_count: usize,
}

impl LinearFrame {
    /// Empty frame for `block_count` HIR blocks.
    pub fn new(name: Symbol, block_count: usize) -> Self {
        Self {
            name,
            block_labels: vec![None; block_count],
            block_ranges: vec![None; block_count],
            live_in: vec![BTreeSet::new(); block_count],
            ..Self::default()
        }
    }

    /// Number of HIR blocks the tables cover.
    pub fn block_count(&self) -> usize {
        self.block_labels.len()
    }

    /// Number of virtual registers.
    pub fn vreg_count(&self) -> usize {
        self.vreg_flags.len()
    }

    /// Allocate a virtual register.
    pub fn new_vreg(&mut self, flags: TypeFlags) -> VReg {
        let vreg = VReg(self.vreg_flags.len() as u32);
        self.vreg_flags.push(flags);
        self.vreg_definitions.push(usize::MAX);
        vreg
    }

    /// Append an instruction, recording where its outputs are defined.
    pub fn push(&mut self, opcode: LirOpcode) -> usize {
        let position = self.instructions.len();
        for output in opcode.outputs() {
            if let Some(definition) = self.vreg_definitions.get_mut(output.index()) {
                *definition = position;
            }
        }
        if let LirOpcode::Label { block, .. } = &opcode {
            if let Some(label) = self.block_labels.get_mut(block.index()) {
                *label = Some(position);
            }
        }
        self.instructions.push(Lir::new(opcode));
        position
    }

    /// Instruction range of `block`.
    pub fn block_range(&self, block: BlockId) -> Option<BlockRange> {
        self.block_ranges.get(block.index()).copied().flatten()
    }

    /// Label position of `block`.
    pub fn label_position(&self, block: BlockId) -> Option<usize> {
        self.block_labels.get(block.index()).copied().flatten()
    }

    /// True if the instruction at `position` is a label.
    pub fn is_label(&self, position: usize) -> bool {
        matches!(
            self.instructions.get(position).map(|lir| &lir.opcode),
            Some(LirOpcode::Label { .. })
        )
    }

    /// Label operation of `block`.
    pub fn label(&self, block: BlockId) -> Option<&LirOpcode> {
        let position = self.label_position(block)?;
        self.instructions.get(position).map(|lir| &lir.opcode)
    }

    /// Predecessors of `block`, in phi input order.
    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        match self.label(block) {
            Some(LirOpcode::Label { predecessors, .. }) => predecessors,
            _ => &[],
        }
    }

    /// Successors of `block`, in branch order.
    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        match self.label(block) {
            Some(LirOpcode::Label { successors, .. }) => successors,
            _ => &[],
        }
    }

    /// Position of the last instruction of `predecessor` that transfers
    /// control to `successor`.
    pub fn exit_position(&self, predecessor: BlockId, successor: BlockId) -> Option<usize> {
        let range = self.block_range(predecessor)?;
        (range.from..range.to).rev().find(|position| {
            match &self.instructions[*position].opcode {
                LirOpcode::Branch { target } | LirOpcode::BranchIfTrue { target, .. } => *target == successor,
                _ => false,
            }
        })
    }

    /// Lifetime piece of `vreg` covering `position`.
    pub fn piece_at(&self, vreg: VReg, position: usize) -> Option<&LifetimeInterval> {
        self.value_lifetimes
            .get(vreg.index())?
            .iter()
            .find(|piece| piece.covers(position))
    }

    /// Location of `vreg` at `position`, once allocation has run.
    pub fn location_at(&self, vreg: VReg, position: usize) -> Option<Location> {
        self.instructions.get(position)?.locations.get(&vreg).copied()
    }

    /// Type flags of `vreg`.
    pub fn flags(&self, vreg: VReg) -> TypeFlags {
        self.vreg_flags.get(vreg.index()).copied().unwrap_or(TypeFlags::ALL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lir::{Operand, PhiLir, Reserved};
    use cadenza_sdk::Slot;

    fn two_blocks() -> LinearFrame {
        let mut frame = LinearFrame::new(Symbol::hash_of("f"), 2);
        let value = frame.new_vreg(TypeFlags::INTEGER);
        frame.block_order = vec![BlockId(0), BlockId(1)];
        frame.push(LirOpcode::Label {
            block: BlockId(0),
            predecessors: Vec::new(),
            successors: vec![BlockId(1)],
            phis: Vec::new(),
        });
        frame.push(LirOpcode::LoadConstant {
            output: value,
            value: Slot::make_int32(1),
        });
        frame.push(LirOpcode::Branch { target: BlockId(1) });
        let merged = frame.new_vreg(TypeFlags::INTEGER);
        frame.push(LirOpcode::Label {
            block: BlockId(1),
            predecessors: vec![BlockId(0)],
            successors: Vec::new(),
            phis: vec![PhiLir {
                output: merged,
                inputs: vec![value],
            }],
        });
        frame.push(LirOpcode::StoreToPointer {
            pointer: Operand::Reserved(Reserved::Stack),
            offset: 16,
            value: Operand::Value(merged),
        });
        frame.block_ranges = vec![Some(BlockRange { from: 0, to: 3 }), Some(BlockRange { from: 3, to: 5 })];
        frame
    }

    #[test]
    fn test_push_records_definitions_and_labels() {
        let frame = two_blocks();
        assert_eq!(frame.vreg_definitions, vec![1, 3]);
        assert_eq!(frame.label_position(BlockId(1)), Some(3));
        assert!(frame.is_label(3));
        assert!(!frame.is_label(4));
    }

    #[test]
    fn test_edges() {
        let frame = two_blocks();
        assert_eq!(frame.successors(BlockId(0)), &[BlockId(1)]);
        assert_eq!(frame.predecessors(BlockId(1)), &[BlockId(0)]);
        assert_eq!(frame.exit_position(BlockId(0), BlockId(1)), Some(2));
        assert_eq!(frame.exit_position(BlockId(1), BlockId(0)), None);
    }
}
