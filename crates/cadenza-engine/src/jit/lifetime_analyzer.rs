//! Lifetime analysis over a linear frame
//!
//! Walks blocks in reverse linear order, building one interval per virtual
//! register and the set of registers live into each block. Values live
//! into a loop header stay live until the end of the loop's last block.
//! Every interrupt reserves all allocatable registers for its position.

use std::collections::BTreeSet;

use log::debug;

use crate::compiler::lir::{LinearFrame, LirOpcode, VReg};
use crate::jit::lifetime::LifetimeInterval;

/// Fill in `value_lifetimes`, `live_in`, and `register_reservations` for
/// `registers` allocatable registers.
pub fn analyze_lifetimes(linear: &mut LinearFrame, registers: usize) {
    let mut intervals: Vec<LifetimeInterval> = (0..linear.vreg_count())
        .map(|i| LifetimeInterval::new(VReg(i as u32)))
        .collect();
    let mut live_in = vec![BTreeSet::new(); linear.block_count()];

    for (order_index, block) in linear.block_order.iter().enumerate().rev() {
        let Some(range) = linear.block_range(*block) else {
            continue;
        };

        let mut live: BTreeSet<VReg> = BTreeSet::new();
        for successor in linear.successors(*block) {
            live.extend(live_in[successor.index()].iter().copied());
            let Some(LirOpcode::Label { predecessors, phis, .. }) = linear.label(*successor) else {
                continue;
            };
            if let Some(slot) = predecessors.iter().position(|pred| pred == block) {
                live.extend(phis.iter().filter_map(|phi| phi.inputs.get(slot).copied()));
            }
        }

        for value in &live {
            intervals[value.index()].add_range(range.from, range.to);
        }

        for position in (range.from..range.to).rev() {
            let opcode = &linear.instructions[position].opcode;
            if let LirOpcode::Label { phis, .. } = opcode {
                for phi in phis {
                    intervals[phi.output.index()].set_from(position);
                    live.remove(&phi.output);
                }
                continue;
            }
            for output in opcode.outputs() {
                let interval = &mut intervals[output.index()];
                interval.set_from(position);
                interval.add_usage(position);
                live.remove(&output);
            }
            for input in opcode.inputs() {
                let interval = &mut intervals[input.index()];
                interval.add_range(range.from, position + 1);
                interval.add_usage(position);
                live.insert(input);
            }
        }

        // A predecessor at or after the header closes a loop
        let loop_end = linear
            .predecessors(*block)
            .iter()
            .filter_map(|pred| linear.block_range(*pred))
            .filter(|pred_range| pred_range.from >= range.from)
            .map(|pred_range| pred_range.to)
            .max();
        if let Some(loop_end) = loop_end {
            for value in &live {
                intervals[value.index()].add_range(range.from, loop_end);
            }
            for inner in &linear.block_order[order_index + 1..] {
                let inside = linear
                    .block_range(*inner)
                    .is_some_and(|inner_range| inner_range.to <= loop_end);
                if inside {
                    live_in[inner.index()].extend(live.iter().copied());
                }
            }
        }

        live_in[block.index()] = live;
    }

    let mut reservations: Vec<LifetimeInterval> = (0..registers)
        .map(|register| LifetimeInterval::reservation(register as u8))
        .collect();
    for (position, lir) in linear.instructions.iter().enumerate() {
        if lir.opcode.is_interrupt() {
            for reservation in &mut reservations {
                reservation.add_range(position, position + 1);
            }
        }
    }

    debug!(
        "analyzed lifetimes of frame {}: {} intervals over {} positions",
        linear.name,
        intervals.len(),
        linear.instructions.len()
    );

    linear.value_lifetimes = intervals.into_iter().map(|interval| vec![interval]).collect();
    linear.live_in = live_in;
    linear.register_reservations = reservations;
}
