//! Structural checks between pipeline stages
//!
//! Each function checks the output of one stage and reports the first
//! broken invariant. The pipeline runs them when
//! [`PipelineConfig::validate`](crate::pipeline::PipelineConfig) is set.

use std::collections::{BTreeMap, BTreeSet};

use crate::compiler::hir::{BlockId, Frame, HirId, HirOpcode};
use crate::compiler::lir::{LinearFrame, LirOpcode, Location, VReg};
use crate::jit::LiveRange;

/// A broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidateError {
    /// Argument names and defaults differ in length
    #[error("{names} argument names but {defaults} defaults")]
    ArgumentDefaults {
        /// Names
        names: usize,
        /// Defaults
        defaults: usize,
    },

    /// A block is listed by more than one scope, or under the wrong id
    #[error("block {0} is listed twice or out of place")]
    DuplicateBlock(BlockId),

    /// A block was never sealed
    #[error("block {0} is not sealed")]
    UnsealedBlock(BlockId),

    /// A value's id differs from its arena index
    #[error("value at index {index} has id {id}")]
    ValueId {
        /// Arena index
        index: usize,
        /// Stored id
        id: HirId,
    },

    /// A HIR reads a value that does not exist
    #[error("{reader} reads undefined {value}")]
    UndefinedRead {
        /// Reader
        reader: HirId,
        /// Missing value
        value: HirId,
    },

    /// A live value sits in no block
    #[error("{0} is not placed in any block")]
    Unplaced(HirId),

    /// A value is read where its definition does not dominate the reader
    #[error("{reader} reads {value} before it is defined on every path")]
    NotDominated {
        /// Reader
        reader: HirId,
        /// Value read
        value: HirId,
    },

    /// Consumer sets are not the inverse of read sets
    #[error("{consumer} and {value} disagree about a read")]
    ConsumerMismatch {
        /// Read value
        value: HirId,
        /// Reader
        consumer: HirId,
    },

    /// A phi input count differs from its block's predecessor count
    #[error("{phi} has {inputs} inputs for {predecessors} predecessors")]
    PhiArity {
        /// The phi
        phi: HirId,
        /// Its inputs
        inputs: usize,
        /// Predecessors of its block
        predecessors: usize,
    },

    /// A phi with at most one distinct input survived
    #[error("{0} is a trivial phi")]
    TrivialPhi(HirId),

    /// The label table does not match the block count
    #[error("{actual} block labels for {expected} blocks")]
    LabelCount {
        /// HIR block count
        expected: usize,
        /// Table length
        actual: usize,
    },

    /// A block in the linear order has no label
    #[error("block {0} has no label")]
    MissingLabel(BlockId),

    /// A vreg is defined twice
    #[error("{0} is defined more than once")]
    Redefinition(VReg),

    /// A vreg is read before, or without, its definition
    #[error("{value} is read at {position} before it is defined")]
    ReadBeforeDefinition {
        /// The value
        value: VReg,
        /// The reader
        position: usize,
    },

    /// Block ranges are not contiguous or leave instructions uncovered
    #[error("block ranges break at block {0}")]
    BlockRanges(BlockId),

    /// An interval does not start at its definition
    #[error("{value} starts at {start}, defined at {definition}")]
    IntervalStart {
        /// The value
        value: VReg,
        /// Interval start
        start: usize,
        /// Definition
        definition: usize,
    },

    /// A usage lies outside the value's interval
    #[error("{value} is used at {usage} outside its interval")]
    UsageOutsideInterval {
        /// The value
        value: VReg,
        /// The usage
        usage: usize,
    },

    /// Two intervals share a register at the same position
    #[error("register r{register} holds two values at {position}")]
    RegisterOverlap {
        /// The register
        register: u8,
        /// First shared position
        position: usize,
    },

    /// A usage falls in a spilled or unallocated piece
    #[error("{value} is not in a register at its use at {position}")]
    UsageNotInRegister {
        /// The value
        value: VReg,
        /// The usage
        position: usize,
    },

    /// A spill slot outside the frame's spill area
    #[error("{value} uses spill slot {slot} of {count}")]
    InvalidSpillSlot {
        /// The value
        value: VReg,
        /// Slot index
        slot: u32,
        /// Slots in the frame
        count: usize,
    },

    /// Edge moves leave a value in the wrong place
    #[error("edge {from} -> {to} does not deliver {value}")]
    Resolution {
        /// Predecessor
        from: BlockId,
        /// Successor
        to: BlockId,
        /// The value that went missing
        value: VReg,
    },
}

// ============================================================================
// HIR
// ============================================================================

/// Check a HIR frame and every frame nested in it.
pub fn validate_frame(frame: &Frame) -> Result<(), ValidateError> {
    if frame.argument_names.len() != frame.argument_defaults.len() {
        return Err(ValidateError::ArgumentDefaults {
            names: frame.argument_names.len(),
            defaults: frame.argument_defaults.len(),
        });
    }

    let mut seen = BTreeSet::new();
    for scope in &frame.scopes {
        for block in &scope.blocks {
            if !seen.insert(*block) {
                return Err(ValidateError::DuplicateBlock(*block));
            }
        }
    }
    for (index, block) in frame.blocks.iter().enumerate() {
        if block.id.index() != index {
            return Err(ValidateError::DuplicateBlock(block.id));
        }
        if !block.sealed {
            return Err(ValidateError::UnsealedBlock(block.id));
        }
    }

    for (index, hir) in frame.values.iter().enumerate() {
        let Some(hir) = hir else { continue };
        if hir.id.index() != index {
            return Err(ValidateError::ValueId { index, id: hir.id });
        }
        for read in hir.opcode.reads() {
            let value = frame.hir(read).ok_or(ValidateError::UndefinedRead {
                reader: hir.id,
                value: read,
            })?;
            if !value.consumers.contains(&hir.id) {
                return Err(ValidateError::ConsumerMismatch {
                    value: read,
                    consumer: hir.id,
                });
            }
        }
        for consumer in &hir.consumers {
            let reads = frame.hir(*consumer).is_some_and(|c| c.opcode.reads().contains(&hir.id));
            if !reads {
                return Err(ValidateError::ConsumerMismatch {
                    value: hir.id,
                    consumer: *consumer,
                });
            }
        }

        match &hir.opcode {
            HirOpcode::Phi { inputs, .. } => {
                let predecessors = frame.block(hir.block).predecessors.len();
                if inputs.len() != predecessors {
                    return Err(ValidateError::PhiArity {
                        phi: hir.id,
                        inputs: inputs.len(),
                        predecessors,
                    });
                }
                let distinct: BTreeSet<HirId> = inputs.iter().copied().filter(|input| *input != hir.id).collect();
                if distinct.len() <= 1 {
                    return Err(ValidateError::TrivialPhi(hir.id));
                }
            }
            HirOpcode::BlockLiteral { frame: inner, .. } => validate_frame(inner)?,
            _ => {}
        }
    }
    validate_dominance(frame)
}

/// Every read is defined earlier in the reader's block or in a block that
/// dominates it. A phi input must dominate the matching predecessor.
fn validate_dominance(frame: &Frame) -> Result<(), ValidateError> {
    // Phis take position 0, statements count from 1.
    let mut positions = BTreeMap::new();
    for block in &frame.blocks {
        for phi in &block.phis {
            positions.insert(*phi, (block.id, 0));
        }
        for (index, statement) in block.statements.iter().enumerate() {
            positions.insert(*statement, (block.id, index + 1));
        }
    }
    let place = |id: HirId| positions.get(&id).copied().ok_or(ValidateError::Unplaced(id));
    let dominates = |dominator: BlockId, block: BlockId| {
        frame
            .sealed(block)
            .is_some_and(|sealed| sealed.is_dominated_by(frame, dominator))
    };

    for hir in frame.hirs() {
        let (block, position) = place(hir.id)?;
        let not_dominated = |value: HirId| ValidateError::NotDominated { reader: hir.id, value };
        if let HirOpcode::Phi { inputs, .. } = &hir.opcode {
            let predecessors = &frame.block(block).predecessors;
            for (input, predecessor) in inputs.iter().zip(predecessors) {
                if *input == hir.id {
                    continue;
                }
                let (defined_in, _) = place(*input)?;
                if !dominates(defined_in, *predecessor) {
                    return Err(not_dominated(*input));
                }
            }
            continue;
        }
        for value in hir.reads() {
            let (defined_in, defined_at) = place(value)?;
            let ordered = if defined_in == block {
                defined_at < position
            } else {
                dominates(defined_in, block)
            };
            if !ordered {
                return Err(not_dominated(value));
            }
        }
    }
    Ok(())
}

// ============================================================================
// LIR
// ============================================================================

/// Check the serialized form of a frame with `block_count` blocks.
pub fn validate_linear_frame(linear: &LinearFrame, block_count: usize) -> Result<(), ValidateError> {
    if linear.block_labels.len() != block_count || linear.block_order.len() > block_count {
        return Err(ValidateError::LabelCount {
            expected: block_count,
            actual: linear.block_labels.len(),
        });
    }
    for block in &linear.block_order {
        if linear.label_position(*block).is_none() {
            return Err(ValidateError::MissingLabel(*block));
        }
    }

    let mut defined = BTreeSet::new();
    for (position, lir) in linear.instructions.iter().enumerate() {
        if !matches!(lir.opcode, LirOpcode::Label { .. }) {
            for value in lir.opcode.inputs() {
                if !defined.contains(&value) {
                    return Err(ValidateError::ReadBeforeDefinition { value, position });
                }
            }
        }
        for value in lir.opcode.outputs() {
            if !defined.insert(value) {
                return Err(ValidateError::Redefinition(value));
            }
        }
    }

    // Phi inputs may arrive over a back edge, so only require a definition.
    for (position, lir) in linear.instructions.iter().enumerate() {
        if let LirOpcode::Label { phis, .. } = &lir.opcode {
            for input in phis.iter().flat_map(|phi| phi.inputs.iter()) {
                if !defined.contains(input) {
                    return Err(ValidateError::ReadBeforeDefinition { value: *input, position });
                }
            }
        }
    }
    Ok(())
}

/// Check block ranges and the intervals from lifetime analysis.
pub fn validate_lifetimes(linear: &LinearFrame) -> Result<(), ValidateError> {
    let mut next = 0;
    for block in &linear.block_order {
        let range = linear.block_range(*block).ok_or(ValidateError::BlockRanges(*block))?;
        if range.from != next || range.to <= range.from {
            return Err(ValidateError::BlockRanges(*block));
        }
        next = range.to;
    }
    if next != linear.instructions.len() {
        if let Some(last) = linear.block_order.last() {
            return Err(ValidateError::BlockRanges(*last));
        }
    }

    for (index, pieces) in linear.value_lifetimes.iter().enumerate() {
        let value = VReg(index as u32);
        let pieces: Vec<_> = pieces.iter().filter(|piece| !piece.is_empty()).collect();
        let Some(start) = pieces.iter().map(|piece| piece.start()).min() else {
            continue;
        };
        let definition = linear.vreg_definitions.get(index).copied().unwrap_or(usize::MAX);
        if start != definition {
            return Err(ValidateError::IntervalStart {
                value,
                start,
                definition,
            });
        }
        for piece in &pieces {
            if let Some(usage) = piece.usages.iter().find(|usage| !piece.covers(**usage)) {
                return Err(ValidateError::UsageOutsideInterval { value, usage: *usage });
            }
        }
    }
    Ok(())
}

// ============================================================================
// Allocation
// ============================================================================

/// Check register assignments and spill slots.
pub fn validate_allocation(linear: &LinearFrame) -> Result<(), ValidateError> {
    // register -> (owner, range); reservations have no owner
    let mut by_register: BTreeMap<u8, Vec<(Option<VReg>, LiveRange)>> = BTreeMap::new();
    let pieces = linear
        .value_lifetimes
        .iter()
        .flatten()
        .chain(linear.register_reservations.iter());
    for piece in pieces {
        if let Some(register) = piece.register {
            let ranges = by_register.entry(register).or_default();
            ranges.extend(piece.ranges.iter().map(|range| (piece.value, *range)));
        }
    }
    for (register, ranges) in &by_register {
        for (i, (owner, a)) in ranges.iter().enumerate() {
            for (other, b) in &ranges[i + 1..] {
                if owner.is_some() && owner == other {
                    continue;
                }
                let from = a.from.max(b.from);
                if from < a.to.min(b.to) {
                    return Err(ValidateError::RegisterOverlap {
                        register: *register,
                        position: from,
                    });
                }
            }
        }
    }

    for (index, pieces) in linear.value_lifetimes.iter().enumerate() {
        let value = VReg(index as u32);
        for piece in pieces {
            if let Some(position) = piece.usages.first().copied().filter(|_| piece.register.is_none()) {
                return Err(ValidateError::UsageNotInRegister { value, position });
            }
            if let Some(slot) = piece.spill_slot {
                if slot.index() as usize >= linear.spill_slot_count {
                    return Err(ValidateError::InvalidSpillSlot {
                        value,
                        slot: slot.index(),
                        count: linear.spill_slot_count,
                    });
                }
            }
        }
    }
    Ok(())
}

// ============================================================================
// Resolution
// ============================================================================

/// Simulate every edge's moves and check each live-in value and phi
/// lands where the successor expects it.
pub fn validate_resolution(linear: &LinearFrame) -> Result<(), ValidateError> {
    for successor in &linear.block_order {
        let Some(label) = linear.label_position(*successor) else {
            continue;
        };
        let LirOpcode::Label { predecessors, phis, .. } = &linear.instructions[label].opcode else {
            continue;
        };
        for (slot, predecessor) in predecessors.iter().enumerate() {
            let Some(exit) = linear.exit_position(*predecessor, *successor) else {
                continue;
            };

            let mut state: BTreeMap<Location, VReg> = linear.instructions[exit]
                .locations
                .iter()
                .map(|(value, location)| (*location, *value))
                .collect();
            apply(&mut state, &linear.instructions[exit].edge_moves);
            apply(&mut state, &linear.instructions[label].moves);
            apply(&mut state, &linear.instructions[label].edge_moves);

            let mut expected: Vec<(VReg, VReg)> = linear
                .live_in
                .get(successor.index())
                .map(|live| live.iter().map(|value| (*value, *value)).collect())
                .unwrap_or_default();
            expected.extend(
                phis.iter()
                    .filter_map(|phi| phi.inputs.get(slot).map(|input| (*input, phi.output))),
            );
            for (input, output) in expected {
                let delivered = linear
                    .location_at(output, label)
                    .and_then(|location| state.get(&location))
                    .is_some_and(|held| *held == input);
                if !delivered {
                    return Err(ValidateError::Resolution {
                        from: *predecessor,
                        to: *successor,
                        value: output,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Apply a parallel move set to a location-to-value map.
fn apply(state: &mut BTreeMap<Location, VReg>, moves: &BTreeMap<Location, Location>) {
    let updates: Vec<(Location, Option<VReg>)> = moves
        .iter()
        .map(|(destination, origin)| (*destination, state.get(origin).copied()))
        .collect();
    for (destination, value) in updates {
        match value {
            Some(value) => {
                state.insert(destination, value);
            }
            None => {
                state.remove(&destination);
            }
        }
    }
}
