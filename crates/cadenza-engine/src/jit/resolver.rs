//! Data-flow resolution across block boundaries
//!
//! After allocation a value can sit in different places at the end of a
//! predecessor and the start of its successor, and every phi needs its
//! input copied into place. For each edge this pass collects those moves
//! and attaches them where they run on that edge only: the predecessor's
//! last instruction when it has one successor, the successor's label when
//! it has one predecessor, or the predecessor's final branch when the
//! successor is its last target.

use log::debug;

use crate::compiler::hir::BlockId;
use crate::compiler::lir::{LinearFrame, LirOpcode, Location, MoveSet, VReg};

/// Resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The edge needs moves but no instruction runs on it alone
    #[error("critical edge {from} -> {to} needs a block of its own")]
    CriticalEdge {
        /// Predecessor
        from: BlockId,
        /// Successor
        to: BlockId,
    },

    /// A live value was not allocated at an edge endpoint
    #[error("{value} has no location at position {position}")]
    MissingLocation {
        /// The value
        value: VReg,
        /// Where it was expected
        position: usize,
    },

    /// Two values need the same location on one edge
    #[error("edge {from} -> {to} moves two values into {destination}")]
    Conflict {
        /// Predecessor
        from: BlockId,
        /// Successor
        to: BlockId,
        /// Contested location
        destination: Location,
    },
}

/// Attach edge moves to `linear`.
pub fn resolve(linear: &mut LinearFrame) -> Result<(), ResolveError> {
    let mut edges = 0;
    let mut moves = 0;
    for successor in linear.block_order.clone() {
        let Some(label) = linear.label_position(successor) else {
            continue;
        };
        let predecessors = linear.predecessors(successor).to_vec();
        for (slot, predecessor) in predecessors.iter().enumerate() {
            let set = edge_moves(linear, *predecessor, successor, slot, label)?;
            if set.is_empty() {
                continue;
            }
            edges += 1;
            moves += set.len();
            let site = attachment(linear, *predecessor, successor)?;
            let target = &mut linear.instructions[site].edge_moves;
            for (destination, origin) in set {
                match target.get(&destination) {
                    Some(existing) if *existing != origin => {
                        return Err(ResolveError::Conflict {
                            from: *predecessor,
                            to: successor,
                            destination,
                        });
                    }
                    _ => {
                        target.insert(destination, origin);
                    }
                }
            }
        }
    }
    debug!("resolved frame {}: {} moves on {} edges", linear.name, moves, edges);
    Ok(())
}

/// Moves needed on the edge `predecessor -> successor`; `slot` is the
/// predecessor's index among the successor's predecessors.
fn edge_moves(
    linear: &LinearFrame,
    predecessor: BlockId,
    successor: BlockId,
    slot: usize,
    label: usize,
) -> Result<MoveSet, ResolveError> {
    let mut moves = MoveSet::new();
    let Some(exit) = linear.exit_position(predecessor, successor) else {
        return Ok(moves);
    };
    let locate = |value: VReg, position: usize| {
        linear
            .location_at(value, position)
            .ok_or(ResolveError::MissingLocation { value, position })
    };

    let mut transfers: Vec<(VReg, VReg)> = linear
        .live_in
        .get(successor.index())
        .map(|live| live.iter().map(|value| (*value, *value)).collect())
        .unwrap_or_default();
    if let Some(LirOpcode::Label { phis, .. }) = linear.label(successor) {
        for phi in phis {
            if let Some(input) = phi.inputs.get(slot) {
                transfers.push((*input, phi.output));
            }
        }
    }

    for (input, output) in transfers {
        let from = locate(input, exit)?;
        let to = locate(output, label)?;
        if from == to {
            continue;
        }
        if let Some(existing) = moves.insert(to, from) {
            if existing != from {
                return Err(ResolveError::Conflict {
                    from: predecessor,
                    to: successor,
                    destination: to,
                });
            }
        }
    }
    Ok(moves)
}

/// Instruction the edge's moves attach to.
fn attachment(linear: &LinearFrame, predecessor: BlockId, successor: BlockId) -> Result<usize, ResolveError> {
    let critical = ResolveError::CriticalEdge {
        from: predecessor,
        to: successor,
    };
    let successors = linear.successors(predecessor);
    if successors.len() == 1 {
        return linear
            .block_range(predecessor)
            .map(|range| range.to - 1)
            .ok_or(critical);
    }
    if linear.predecessors(successor).len() == 1 {
        return linear.label_position(successor).ok_or(critical);
    }
    if successors.last() == Some(&successor) {
        let range = linear.block_range(predecessor).ok_or(critical.clone())?;
        if matches!(linear.instructions[range.to - 1].opcode, LirOpcode::Branch { .. }) {
            return Ok(range.to - 1);
        }
    }
    Err(critical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lir::linear_frame::BlockRange;
    use crate::compiler::lir::{PhiLir, SpillSlot};
    use crate::runtime::Symbol;
    use cadenza_sdk::{Slot, TypeFlags};

    // b0: v0 = 1; branch b1
    // b1: v1 = phi(v0); store v1
    fn edge_frame(from: Location, to: Location) -> LinearFrame {
        let mut frame = LinearFrame::new(Symbol::hash_of("f"), 2);
        let v0 = frame.new_vreg(TypeFlags::INTEGER);
        let v1 = frame.new_vreg(TypeFlags::INTEGER);
        frame.push(LirOpcode::Label {
            block: BlockId(0),
            predecessors: Vec::new(),
            successors: vec![BlockId(1)],
            phis: Vec::new(),
        });
        frame.push(LirOpcode::LoadConstant {
            output: v0,
            value: Slot::make_int32(1),
        });
        frame.push(LirOpcode::Branch { target: BlockId(1) });
        frame.push(LirOpcode::Label {
            block: BlockId(1),
            predecessors: vec![BlockId(0)],
            successors: Vec::new(),
            phis: vec![PhiLir {
                output: v1,
                inputs: vec![v0],
            }],
        });
        frame.block_order = vec![BlockId(0), BlockId(1)];
        frame.block_ranges = vec![Some(BlockRange { from: 0, to: 3 }), Some(BlockRange { from: 3, to: 4 })];
        frame.live_in = vec![Default::default(), Default::default()];
        frame.instructions[1].locations.insert(v0, from);
        frame.instructions[2].locations.insert(v0, from);
        frame.instructions[3].locations.insert(v1, to);
        frame
    }

    #[test]
    fn test_phi_move_on_single_exit() {
        let spill = Location::Spill(SpillSlot::new(1).unwrap());
        let mut frame = edge_frame(Location::Register(0), spill);
        resolve(&mut frame).unwrap();
        assert_eq!(frame.instructions[2].edge_moves.get(&spill), Some(&Location::Register(0)));
        assert!(frame.instructions[3].edge_moves.is_empty());
    }

    #[test]
    fn test_same_location_needs_no_move() {
        let mut frame = edge_frame(Location::Register(1), Location::Register(1));
        resolve(&mut frame).unwrap();
        assert!(frame.instructions.iter().all(|lir| lir.edge_moves.is_empty()));
    }

    #[test]
    fn test_missing_location() {
        let mut frame = edge_frame(Location::Register(0), Location::Register(1));
        frame.instructions[2].locations.clear();
        assert_eq!(
            resolve(&mut frame),
            Err(ResolveError::MissingLocation {
                value: VReg(0),
                position: 2
            })
        );
    }
}
