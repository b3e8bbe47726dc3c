//! Linear-scan register allocation with interval splitting
//!
//! Follows Wimmer and Mössenböck: intervals are taken in order of start
//! position and given the register that stays free longest. When every
//! register is taken, either the current interval or the interval whose
//! next use is furthest away is split and the part without uses is
//! spilled. Register reservations take part as fixed intervals.
//!
//! After the scan every instruction records where each live value is, and
//! split points inside a block get the move that carries a value from one
//! piece to the next. Split points at block boundaries are left to the
//! resolver.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::compiler::lir::{LinearFrame, SpillSlot, VReg};
use crate::jit::lifetime::LifetimeInterval;

/// Allocation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    /// Every register is needed at the position the value must be in one
    #[error("no register available for {value} at position {position}")]
    AllocationFailure {
        /// Value being allocated
        value: VReg,
        /// Where it needs a register
        position: usize,
    },

    /// Fewer allocatable registers than one instruction can use
    #[error("register allocation needs at least 2 allocatable registers, got {0}")]
    TooFewRegisters(usize),
}

/// Assign a register or spill slot to every lifetime piece of `linear`,
/// using `registers` allocatable registers.
pub fn allocate_registers(linear: &mut LinearFrame, registers: usize) -> Result<(), AllocationError> {
    if registers < 2 {
        return Err(AllocationError::TooFewRegisters(registers));
    }
    let mut allocator = Allocator::new(linear, registers);
    allocator.run()?;
    allocator.finish(linear);
    Ok(())
}

struct Allocator {
    registers: usize,
    intervals: Vec<LifetimeInterval>,
    unhandled: BinaryHeap<Reverse<(usize, usize)>>,
    active: Vec<usize>,
    inactive: Vec<usize>,
    handled: Vec<usize>,
    // Owner of spill slot `i + 1`
    spill_owners: Vec<VReg>,
    spill_slots: FxHashMap<VReg, SpillSlot>,
    value_ends: Vec<usize>,
}

impl Allocator {
    fn new(linear: &mut LinearFrame, registers: usize) -> Self {
        let mut allocator = Self {
            registers,
            intervals: Vec::new(),
            unhandled: BinaryHeap::new(),
            active: Vec::new(),
            inactive: Vec::new(),
            handled: Vec::new(),
            spill_owners: Vec::new(),
            spill_slots: FxHashMap::default(),
            value_ends: Vec::new(),
        };
        for reservation in linear.register_reservations.iter().take(registers) {
            if !reservation.is_empty() {
                allocator.intervals.push(reservation.clone());
                allocator.inactive.push(allocator.intervals.len() - 1);
            }
        }
        for pieces in std::mem::take(&mut linear.value_lifetimes) {
            let end = pieces.iter().map(LifetimeInterval::end).max().unwrap_or(0);
            allocator.value_ends.push(end);
            for piece in pieces {
                allocator.push_unhandled(piece);
            }
        }
        allocator
    }

    fn push_unhandled(&mut self, interval: LifetimeInterval) {
        if interval.is_empty() {
            return;
        }
        let start = interval.start();
        self.intervals.push(interval);
        self.unhandled.push(Reverse((start, self.intervals.len() - 1)));
    }

    fn value(&self, id: usize) -> VReg {
        self.intervals[id].value.unwrap_or(VReg(u32::MAX))
    }

    fn run(&mut self) -> Result<(), AllocationError> {
        while let Some(Reverse((position, current))) = self.unhandled.pop() {
            self.advance(position);
            if !self.try_allocate_free(current, position) {
                self.allocate_blocked(current, position)?;
            }
            if self.intervals[current].register.is_some() {
                self.active.push(current);
            } else {
                self.handled.push(current);
            }
        }
        Ok(())
    }

    /// Retire intervals that ended and swap those that entered or left a
    /// lifetime hole.
    fn advance(&mut self, position: usize) {
        let active = std::mem::take(&mut self.active);
        let inactive = std::mem::take(&mut self.inactive);
        for id in active {
            let interval = &self.intervals[id];
            if interval.end() <= position {
                self.handled.push(id);
            } else if !interval.covers(position) {
                self.inactive.push(id);
            } else {
                self.active.push(id);
            }
        }
        for id in inactive {
            let interval = &self.intervals[id];
            if interval.end() <= position {
                self.handled.push(id);
            } else if interval.covers(position) {
                self.active.push(id);
            } else {
                self.inactive.push(id);
            }
        }
    }

    fn register_of(&self, id: usize) -> usize {
        self.intervals[id].register.map_or(usize::MAX, usize::from)
    }

    fn try_allocate_free(&mut self, current: usize, position: usize) -> bool {
        let mut free_until = vec![usize::MAX; self.registers];
        for id in &self.active {
            if let Some(slot) = free_until.get_mut(self.register_of(*id)) {
                *slot = 0;
            }
        }
        for id in &self.inactive {
            if let Some(intersection) = self.intervals[*id].intersection(&self.intervals[current]) {
                if let Some(slot) = free_until.get_mut(self.register_of(*id)) {
                    *slot = (*slot).min(intersection);
                }
            }
        }

        let (register, until) = best_register(&free_until);
        if until <= position {
            return false;
        }
        self.intervals[current].register = Some(register as u8);
        trace!("assign {} -> r{} at {}", self.value(current), register, position);
        if until < self.intervals[current].end() {
            let tail = self.intervals[current].split_at(until);
            trace!("split {} at {} (r{} taken)", self.value(current), until, register);
            self.push_unhandled(tail);
        }
        true
    }

    fn allocate_blocked(&mut self, current: usize, position: usize) -> Result<(), AllocationError> {
        let mut next_use = vec![usize::MAX; self.registers];
        let mut block_position = vec![usize::MAX; self.registers];
        for id in &self.active {
            let register = self.register_of(*id);
            if register >= self.registers {
                continue;
            }
            let interval = &self.intervals[*id];
            if interval.is_fixed() {
                next_use[register] = 0;
                block_position[register] = 0;
            } else {
                let next = interval.next_usage_from(position).unwrap_or(usize::MAX);
                next_use[register] = next_use[register].min(next);
            }
        }
        for id in &self.inactive {
            let register = self.register_of(*id);
            if register >= self.registers {
                continue;
            }
            let interval = &self.intervals[*id];
            let Some(intersection) = interval.intersection(&self.intervals[current]) else {
                continue;
            };
            if interval.is_fixed() {
                block_position[register] = block_position[register].min(intersection);
                next_use[register] = next_use[register].min(intersection);
            } else {
                let next = interval.next_usage_from(position).unwrap_or(usize::MAX);
                next_use[register] = next_use[register].min(next);
            }
        }

        let (register, furthest) = best_register(&next_use);
        let value = self.value(current);
        let failure = AllocationError::AllocationFailure { value, position };

        let Some(first_use) = self.intervals[current].first_usage() else {
            self.spill(current, position);
            return Ok(());
        };
        if first_use > furthest {
            // Every register is wanted before this value is
            if first_use <= self.intervals[current].start() {
                return Err(failure);
            }
            let tail = self.intervals[current].split_at(first_use);
            self.spill(current, position);
            self.push_unhandled(tail);
            return Ok(());
        }
        if furthest <= position || block_position[register] <= position {
            return Err(failure);
        }

        self.intervals[current].register = Some(register as u8);
        trace!("assign {} -> r{} at {} (evicting)", value, register, position);
        if block_position[register] < self.intervals[current].end() {
            let tail = self.intervals[current].split_at(block_position[register]);
            trace!("split {} at {} (r{} reserved)", value, block_position[register], register);
            self.push_unhandled(tail);
        }
        self.evict(register, current, position);
        Ok(())
    }

    /// Take `register` away from every other interval that overlaps
    /// `current` from `position` on.
    fn evict(&mut self, register: usize, current: usize, position: usize) {
        let holds = |interval: &LifetimeInterval| {
            !interval.is_fixed() && interval.register.map(usize::from) == Some(register)
        };

        let mut evicted = Vec::new();
        let intervals = &self.intervals;
        self.active.retain(|id| {
            let keep = *id == current || !holds(&intervals[*id]);
            if !keep {
                evicted.push(*id);
            }
            keep
        });
        self.inactive.retain(|id| {
            let interval = &intervals[*id];
            let keep = !holds(interval) || interval.intersection(&intervals[current]).is_none();
            if !keep {
                evicted.push(*id);
            }
            keep
        });

        for id in evicted {
            self.split_and_spill(id, position);
        }
    }

    /// Spill `id` from `position` until its next use; the remainder goes
    /// back to be allocated again.
    fn split_and_spill(&mut self, id: usize, position: usize) {
        let tail = if self.intervals[id].start() >= position {
            self.intervals[id].register = None;
            id
        } else {
            let mut tail = self.intervals[id].split_at(position);
            tail.register = None;
            self.handled.push(id);
            self.intervals.push(tail);
            self.intervals.len() - 1
        };
        if self.intervals[tail].is_empty() {
            return;
        }
        trace!("evict {} at {}", self.value(tail), position);

        let start = self.intervals[tail].start();
        match self.intervals[tail].next_usage_from(position) {
            None => {
                self.spill(tail, position);
                self.handled.push(tail);
            }
            Some(next) if next > start => {
                let rest = self.intervals[tail].split_at(next);
                self.spill(tail, position);
                self.handled.push(tail);
                self.push_unhandled(rest);
            }
            Some(_) => {
                self.unhandled.push(Reverse((start, tail)));
            }
        }
    }

    fn spill(&mut self, id: usize, position: usize) {
        let value = self.value(id);
        let slot = match self.spill_slots.get(&value) {
            Some(slot) => *slot,
            None => {
                let ends = &self.value_ends;
                let reusable = self
                    .spill_owners
                    .iter()
                    .position(|owner| ends.get(owner.index()).is_some_and(|end| *end <= position));
                let index = match reusable {
                    Some(index) => {
                        self.spill_owners[index] = value;
                        index
                    }
                    None => {
                        self.spill_owners.push(value);
                        self.spill_owners.len() - 1
                    }
                };
                // Index 0 is the scratch slot
                let Some(slot) = SpillSlot::new(index as u32 + 1) else {
                    return;
                };
                self.spill_slots.insert(value, slot);
                slot
            }
        };
        let interval = &mut self.intervals[id];
        interval.register = None;
        interval.spill_slot = Some(slot);
        trace!("spill {} [{}, {}) -> s{}", value, interval.start(), interval.end(), slot.index());
    }

    /// Write pieces, locations, and split moves back into the frame.
    fn finish(self, linear: &mut LinearFrame) {
        let mut pieces: Vec<Vec<LifetimeInterval>> = vec![Vec::new(); linear.vreg_count()];
        for interval in self.intervals {
            if let Some(value) = interval.value {
                if !interval.is_empty() {
                    if let Some(list) = pieces.get_mut(value.index()) {
                        list.push(interval);
                    }
                }
            }
        }
        for list in &mut pieces {
            list.sort_by_key(LifetimeInterval::start);
        }

        for (index, list) in pieces.iter().enumerate() {
            let value = VReg(index as u32);
            for piece in list {
                let Some(location) = piece.location() else {
                    continue;
                };
                for range in &piece.ranges {
                    for position in range.from..range.to.min(linear.instructions.len()) {
                        linear.instructions[position].locations.insert(value, location);
                    }
                }
            }
            for pair in list.windows(2) {
                let (head, tail) = (&pair[0], &pair[1]);
                let boundary = tail.start();
                if head.end() != boundary || linear.is_label(boundary) {
                    continue;
                }
                if let (Some(from), Some(to)) = (head.location(), tail.location()) {
                    if from != to {
                        linear.instructions[boundary].moves.insert(to, from);
                    }
                }
            }
        }

        linear.spill_slot_count = 1 + self.spill_owners.len();
        debug!(
            "allocated frame {}: {} pieces, {} spill slots",
            linear.name,
            pieces.iter().map(Vec::len).sum::<usize>(),
            linear.spill_slot_count
        );
        linear.value_lifetimes = pieces;
    }
}

/// Register with the highest score; the lowest such register on ties.
fn best_register(scores: &[usize]) -> (usize, usize) {
    let mut best = (0, scores.first().copied().unwrap_or(0));
    for (register, score) in scores.iter().enumerate().skip(1) {
        if *score > best.1 {
            best = (register, *score);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::hir::BlockId;
    use crate::compiler::lir::linear_frame::BlockRange;
    use crate::compiler::lir::{InterruptPayload, LirOpcode, Location, Operand, Reserved};
    use crate::jit::lifetime_analyzer::analyze_lifetimes;
    use crate::runtime::{InterruptCode, Symbol};
    use cadenza_sdk::{Slot, TypeFlags};

    fn single_block(body: impl FnOnce(&mut LinearFrame)) -> LinearFrame {
        let mut frame = LinearFrame::new(Symbol::hash_of("f"), 1);
        frame.push(LirOpcode::Label {
            block: BlockId(0),
            predecessors: Vec::new(),
            successors: Vec::new(),
            phis: Vec::new(),
        });
        body(&mut frame);
        frame.block_order = vec![BlockId(0)];
        frame.block_ranges[0] = Some(BlockRange {
            from: 0,
            to: frame.instructions.len(),
        });
        frame
    }

    fn constant(frame: &mut LinearFrame, value: i32) -> VReg {
        let output = frame.new_vreg(TypeFlags::INTEGER);
        frame.push(LirOpcode::LoadConstant {
            output,
            value: Slot::make_int32(value),
        });
        output
    }

    fn store(frame: &mut LinearFrame, offset: i32, value: VReg) {
        frame.push(LirOpcode::StoreToPointer {
            pointer: Operand::Reserved(Reserved::Stack),
            offset,
            value: Operand::Value(value),
        });
    }

    #[test]
    fn test_disjoint_values_share_a_register() {
        let mut frame = single_block(|frame| {
            let a = constant(frame, 1);
            store(frame, 16, a);
            let b = constant(frame, 2);
            store(frame, 32, b);
        });
        analyze_lifetimes(&mut frame, 2);
        allocate_registers(&mut frame, 2).unwrap();
        assert_eq!(frame.location_at(VReg(0), 1), Some(Location::Register(0)));
        assert_eq!(frame.location_at(VReg(1), 3), Some(Location::Register(0)));
        assert_eq!(frame.spill_slot_count, 1);
    }

    #[test]
    fn test_pressure_spills_the_furthest_use() {
        // Three values live at once with two registers
        let mut frame = single_block(|frame| {
            let a = constant(frame, 1);
            let b = constant(frame, 2);
            let c = constant(frame, 3);
            store(frame, 16, c);
            store(frame, 32, b);
            store(frame, 48, a);
        });
        analyze_lifetimes(&mut frame, 2);
        allocate_registers(&mut frame, 2).unwrap();

        // `a` is used last, so it leaves its register when `c` arrives
        assert!(matches!(frame.location_at(VReg(0), 3), Some(Location::Spill(_))));
        assert!(matches!(frame.location_at(VReg(0), 6), Some(Location::Register(_))));
        assert!(frame.spill_slot_count >= 2);
        // The spill and reload show up as split moves
        assert!(frame.instructions[3]
            .moves
            .values()
            .any(|origin| matches!(origin, Location::Register(_))));
        assert!(frame.instructions[6]
            .moves
            .values()
            .any(|origin| matches!(origin, Location::Spill(_))));
        for position in 0..frame.instructions.len() {
            let registers: Vec<_> = frame.instructions[position]
                .locations
                .values()
                .filter(|location| matches!(location, Location::Register(_)))
                .collect();
            let mut unique = registers.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(registers.len(), unique.len(), "register shared at {}", position);
        }
    }

    #[test]
    fn test_interrupt_forces_spill() {
        let mut frame = single_block(|frame| {
            let a = constant(frame, 1);
            frame.push(LirOpcode::Interrupt {
                code: InterruptCode::FatalError,
                payload: InterruptPayload::None,
            });
            store(frame, 16, a);
        });
        analyze_lifetimes(&mut frame, 2);
        allocate_registers(&mut frame, 2).unwrap();
        assert!(matches!(frame.location_at(VReg(0), 2), Some(Location::Spill(_))));
        assert!(matches!(frame.location_at(VReg(0), 3), Some(Location::Register(_))));
    }

    #[test]
    fn test_too_few_registers() {
        let mut frame = single_block(|_| {});
        analyze_lifetimes(&mut frame, 1);
        assert_eq!(
            allocate_registers(&mut frame, 1),
            Err(AllocationError::TooFewRegisters(1))
        );
    }
}
