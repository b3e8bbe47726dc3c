//! Sequentializes parallel moves
//!
//! A [`MoveSet`] describes copies that all happen at once. The scheduler
//! turns it into an ordered instruction sequence: a destination that no
//! pending move still reads is written first, and cycles are broken with
//! a temporary. A two-register cycle is swapped in place with `xorr`.
//! Cycles through spill slots pass every value through registers,
//! borrowing one through scratch slot 0 when none is free.

use log::trace;

use super::traits::{Jit, Reg};
use crate::compiler::lir::{Location, MoveSet};

/// Spill slot index of the scheduler's scratch word.
const SCRATCH_SLOT: u32 = 0;

/// Scheduling errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// Two different origins move into the same destination
    #[error("{destination} is the destination of both {first} and {second}")]
    AmbiguousDestination {
        /// Contested destination
        destination: Location,
        /// Origin already recorded
        first: Location,
        /// Conflicting origin
        second: Location,
    },

    /// A spill to spill copy needs a carrier register and none is left
    #[error("no temporary register left to move into {destination}")]
    NoTemporary {
        /// Destination of the blocked move
        destination: Location,
    },

    /// The spill slot does not fit a stack offset
    #[error("spill slot {0} is out of range")]
    SpillOutOfRange(u32),
}

/// Build a move set from `(origin, destination)` pairs. Identity pairs
/// are dropped.
pub fn move_set<I>(pairs: I) -> Result<MoveSet, ScheduleError>
where
    I: IntoIterator<Item = (Location, Location)>,
{
    let mut moves = MoveSet::new();
    for (origin, destination) in pairs {
        if origin == destination {
            continue;
        }
        if let Some(first) = moves.insert(destination, origin) {
            if first != origin {
                return Err(ScheduleError::AmbiguousDestination {
                    destination,
                    first,
                    second: origin,
                });
            }
        }
    }
    Ok(moves)
}

/// Register, spill slot, or the scratch slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Site {
    Register(u8),
    Spill(u32),
}

impl Site {
    const SCRATCH: Site = Site::Spill(SCRATCH_SLOT);

    fn from_location(location: Location) -> Self {
        match location {
            Location::Register(register) => Site::Register(register),
            Location::Spill(slot) => Site::Spill(slot.index()),
        }
    }

    fn location(self) -> Option<Location> {
        match self {
            Site::Register(register) => Some(Location::Register(register)),
            Site::Spill(index) => crate::compiler::lir::SpillSlot::new(index).map(Location::Spill),
        }
    }
}

/// Stack offset of spill slot `index`, relative to the stack register.
pub fn spill_offset(index: u32) -> Option<i32> {
    let offset = (i64::from(index) + 1).checked_mul(8)?;
    i32::try_from(-offset).ok()
}

/// Emit `moves` into `jit`. `free_register`, when given, is an allocatable
/// register that holds nothing live and may be clobbered. `registers` is
/// the number of allocatable registers; one of them is borrowed through
/// the scratch slot when a cycle through spill slots needs a carrier.
pub fn schedule_moves<J: Jit + ?Sized>(
    jit: &mut J,
    moves: &MoveSet,
    free_register: Option<u8>,
    registers: usize,
) -> Result<(), ScheduleError> {
    let mut pending: Vec<(Site, Site)> = moves
        .iter()
        .filter(|(destination, origin)| destination != origin)
        .map(|(destination, origin)| (Site::from_location(*destination), Site::from_location(*origin)))
        .collect();
    let free_register = free_register.filter(|register| {
        let site = Site::Register(*register);
        !pending.iter().any(|(destination, origin)| *destination == site || *origin == site)
    });
    let mut scheduler = Scheduler {
        jit,
        free_register,
        registers,
    };

    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|(destination, _)| !pending.iter().any(|(_, origin)| origin == destination));
        if let Some(index) = ready {
            let (destination, origin) = pending.remove(index);
            scheduler.emit_move(destination, origin, &pending)?;
            continue;
        }

        // Only cycles are left, and the lowest destination starts one.
        let (destination, origin) = pending[0];
        let cycle = cycle_from(&pending, destination);
        if cycle.iter().any(|site| matches!(site, Site::Spill(_))) {
            trace!("rotate cycle {:?}", cycle);
            pending.retain(|(site, _)| !cycle.contains(site));
            scheduler.rotate(cycle)?;
            continue;
        }

        let swap = pending
            .iter()
            .position(|(other_destination, other_origin)| *other_destination == origin && *other_origin == destination);
        if let (Some(swap), Site::Register(a), Site::Register(b)) = (swap, destination, origin) {
            trace!("swap r{} <-> r{}", a, b);
            let (a, b) = (Reg(i32::from(a)), Reg(i32::from(b)));
            scheduler.jit.xorr(a, a, b);
            scheduler.jit.xorr(b, b, a);
            scheduler.jit.xorr(a, a, b);
            pending.remove(swap);
            pending.retain(|entry| *entry != (destination, origin));
            continue;
        }

        let temporary = match scheduler.free_register {
            Some(register) => Site::Register(register),
            None => Site::SCRATCH,
        };
        trace!("break cycle at {:?} through {:?}", destination, temporary);
        scheduler.emit_move(temporary, destination, &pending)?;
        for entry in pending.iter_mut() {
            if entry.1 == destination {
                entry.1 = temporary;
            }
        }
    }
    Ok(())
}

/// Members of the cycle through `start`, in the order `cycle[i] <- cycle[i + 1]`
/// with the last member reading `start`.
fn cycle_from(pending: &[(Site, Site)], start: Site) -> Vec<Site> {
    let origin_of = |site: Site| {
        pending
            .iter()
            .find(|(destination, _)| *destination == site)
            .map(|(_, origin)| *origin)
    };
    let mut cycle = vec![start];
    let mut next = origin_of(start);
    while let Some(site) = next {
        if site == start || cycle.len() > pending.len() {
            break;
        }
        cycle.push(site);
        next = origin_of(site);
    }
    cycle
}

struct Scheduler<'a, J: Jit + ?Sized> {
    jit: &'a mut J,
    free_register: Option<u8>,
    registers: usize,
}

impl<J: Jit + ?Sized> Scheduler<'_, J> {
    fn offset(index: u32) -> Result<i32, ScheduleError> {
        spill_offset(index).ok_or(ScheduleError::SpillOutOfRange(index))
    }

    /// `destination = origin`. `pending` are the moves still to run, used
    /// to decide which temporaries are busy.
    fn emit_move(&mut self, destination: Site, origin: Site, pending: &[(Site, Site)]) -> Result<(), ScheduleError> {
        match (destination, origin) {
            (Site::Register(target), Site::Register(value)) => {
                self.jit.movr(Reg(i32::from(target)), Reg(i32::from(value)));
            }
            (Site::Register(target), Site::Spill(index)) => {
                self.jit.ldxi_l(Reg(i32::from(target)), Reg::STACK, Self::offset(index)?);
            }
            (Site::Spill(index), Site::Register(value)) => {
                self.jit.stxi_l(Self::offset(index)?, Reg::STACK, Reg(i32::from(value)));
            }
            (Site::Spill(to), Site::Spill(from)) => {
                let busy = |site: Site| pending.iter().any(|(_, o)| *o == site);
                let carrier = self.free_register.filter(|register| !busy(Site::Register(*register)));
                if let Some(register) = carrier {
                    let register = Reg(i32::from(register));
                    self.jit.ldxi_l(register, Reg::STACK, Self::offset(from)?);
                    self.jit.stxi_l(Self::offset(to)?, Reg::STACK, register);
                } else if !busy(Site::SCRATCH) && from != SCRATCH_SLOT && to != SCRATCH_SLOT {
                    let borrowed = Reg(i32::from(u8::from(self.free_register == Some(0))));
                    let scratch = Self::offset(SCRATCH_SLOT)?;
                    self.jit.stxi_l(scratch, Reg::STACK, borrowed);
                    self.jit.ldxi_l(borrowed, Reg::STACK, Self::offset(from)?);
                    self.jit.stxi_l(Self::offset(to)?, Reg::STACK, borrowed);
                    self.jit.ldxi_l(borrowed, Reg::STACK, scratch);
                } else {
                    return Err(ScheduleError::NoTemporary {
                        destination: destination.location().unwrap_or(Location::Register(0)),
                    });
                }
            }
        }
        Ok(())
    }

    /// Lowest allocatable register outside `cycle` other than the free one.
    fn spare_register(&self, cycle: &[Site]) -> Option<u8> {
        (0..self.registers)
            .filter_map(|register| u8::try_from(register).ok())
            .filter(|register| Some(*register) != self.free_register)
            .find(|register| !cycle.contains(&Site::Register(*register)))
    }

    /// Run a cycle with at least one spill member. Values only travel
    /// through registers: a register member and a temporary take turns
    /// holding the value in flight, so no spill to spill copy is emitted.
    /// A cycle of spill slots alone first swaps a spare register in.
    fn rotate(&mut self, mut cycle: Vec<Site>) -> Result<(), ScheduleError> {
        let blocked = ScheduleError::NoTemporary {
            destination: cycle
                .iter()
                .find_map(|site| match site {
                    Site::Spill(_) => site.location(),
                    Site::Register(_) => None,
                })
                .unwrap_or(Location::Register(0)),
        };

        let joined = match cycle.iter().position(|site| matches!(site, Site::Register(_))) {
            Some(at) => {
                cycle.rotate_left(at);
                None
            }
            None => {
                let register = self.spare_register(&cycle).ok_or(blocked.clone())?;
                cycle.insert(0, Site::Register(register));
                Some(Site::Register(register))
            }
        };
        let (temporary, borrowed) = match self.free_register {
            Some(register) => (Site::Register(register), false),
            None => (Site::Register(self.spare_register(&cycle).ok_or(blocked)?), true),
        };

        if borrowed {
            self.emit_move(Site::SCRATCH, temporary, &[])?;
        }
        if let Some(joined) = joined {
            let first = cycle[1];
            self.emit_move(temporary, first, &[])?;
            self.emit_move(first, joined, &[])?;
            self.emit_move(joined, temporary, &[])?;
        }

        let head = cycle[0];
        let (mut carrier, mut spare) = (head, temporary);
        for site in cycle[1..].iter().rev() {
            self.emit_move(spare, *site, &[])?;
            self.emit_move(*site, carrier, &[])?;
            std::mem::swap(&mut carrier, &mut spare);
        }
        if carrier != head {
            self.emit_move(head, carrier, &[])?;
        }

        if borrowed {
            self.emit_move(temporary, Site::SCRATCH, &[])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lir::SpillSlot;
    use crate::jit::opcode::{Instruction, OpcodeReadIterator};
    use crate::jit::virtual_jit::VirtualJit;

    fn r(n: u8) -> Location {
        Location::Register(n)
    }

    fn s(n: u32) -> Location {
        Location::Spill(SpillSlot::new(n).unwrap())
    }

    fn schedule(pairs: &[(Location, Location)], free: Option<u8>) -> Vec<Instruction> {
        let moves = move_set(pairs.iter().copied()).unwrap();
        let mut jit = VirtualJit::new(1024);
        schedule_moves(&mut jit, &moves, free, 4).unwrap();
        OpcodeReadIterator::new(jit.bytes()).map(|d| d.unwrap().1).collect()
    }

    fn movr(target: i32, value: i32) -> Instruction {
        Instruction::Movr {
            target: Reg(target),
            value: Reg(value),
        }
    }

    #[test]
    fn test_chain_writes_unread_destinations_first() {
        let code = schedule(&[(r(3), r(2)), (r(2), r(1)), (r(1), r(0))], None);
        assert_eq!(code, vec![movr(0, 1), movr(1, 2), movr(2, 3)]);
    }

    #[test]
    fn test_register_swap_uses_xor() {
        let code = schedule(&[(r(0), r(1)), (r(1), r(0))], None);
        assert_eq!(code.len(), 3);
        assert!(code.iter().all(|i| matches!(i, Instruction::Xorr { .. })));
        assert_eq!(
            code[0],
            Instruction::Xorr {
                target: Reg(0),
                a: Reg(0),
                b: Reg(1)
            }
        );
    }

    #[test]
    fn test_three_cycle_goes_through_scratch_slot() {
        // r0 -> r1 -> r2 -> r0
        let code = schedule(&[(r(0), r(1)), (r(1), r(2)), (r(2), r(0))], None);
        assert_eq!(
            code[0],
            Instruction::StxiL {
                offset: -8,
                address: Reg::STACK,
                value: Reg(0)
            }
        );
        assert_eq!(code.len(), 4);
        assert_eq!(
            code[3],
            Instruction::LdxiL {
                target: Reg(1),
                address: Reg::STACK,
                offset: -8
            }
        );
    }

    #[test]
    fn test_fan_out() {
        let code = schedule(&[(r(0), r(1)), (r(0), s(2))], None);
        assert_eq!(
            code,
            vec![
                movr(1, 0),
                Instruction::StxiL {
                    offset: -24,
                    address: Reg::STACK,
                    value: Reg(0)
                }
            ]
        );
    }

    #[test]
    fn test_spill_to_spill_with_free_register() {
        let code = schedule(&[(s(1), s(2))], Some(3));
        assert_eq!(
            code,
            vec![
                Instruction::LdxiL {
                    target: Reg(3),
                    address: Reg::STACK,
                    offset: -16
                },
                Instruction::StxiL {
                    offset: -24,
                    address: Reg::STACK,
                    value: Reg(3)
                },
            ]
        );
    }

    #[test]
    fn test_spill_to_spill_borrows_register() {
        let code = schedule(&[(s(1), s(2))], None);
        assert_eq!(code.len(), 4);
        assert_eq!(
            code[0],
            Instruction::StxiL {
                offset: -8,
                address: Reg::STACK,
                value: Reg(0)
            }
        );
        assert_eq!(
            code[3],
            Instruction::LdxiL {
                target: Reg(0),
                address: Reg::STACK,
                offset: -8
            }
        );
    }

    #[test]
    fn test_ambiguous_destination() {
        let result = move_set([(r(0), r(2)), (r(1), r(2))]);
        assert!(matches!(result, Err(ScheduleError::AmbiguousDestination { .. })));
    }

    #[test]
    fn test_register_spill_swap_borrows_a_register() {
        let code = schedule(&[(r(0), s(1)), (s(1), r(0))], None);
        let load = |target: i32, offset: i32| Instruction::LdxiL {
            target: Reg(target),
            address: Reg::STACK,
            offset,
        };
        let store = |offset: i32, value: i32| Instruction::StxiL {
            offset,
            address: Reg::STACK,
            value: Reg(value),
        };
        assert_eq!(code, vec![store(-8, 1), load(1, -16), store(-16, 0), movr(0, 1), load(1, -8)]);
    }

    #[test]
    fn test_register_spill_swap_with_free_register() {
        let code = schedule(&[(r(0), s(1)), (s(1), r(0))], Some(2));
        assert_eq!(code.len(), 3);
        assert!(!code.iter().any(|i| matches!(i, Instruction::StxiL { offset: -8, .. })));
    }

    #[test]
    fn test_spill_swap_without_free_register() {
        let code = schedule(&[(s(1), s(2)), (s(2), s(1))], None);
        assert_eq!(code.first(), Some(&Instruction::StxiL {
            offset: -8,
            address: Reg::STACK,
            value: Reg(1)
        }));
        assert_eq!(code.last(), Some(&Instruction::LdxiL {
            target: Reg(1),
            address: Reg::STACK,
            offset: -8
        }));
    }

    #[test]
    fn test_cycle_needs_two_registers() {
        let moves = move_set([(s(1), s(2)), (s(2), s(1))]).unwrap();
        let mut jit = VirtualJit::new(256);
        assert!(matches!(
            schedule_moves(&mut jit, &moves, None, 1),
            Err(ScheduleError::NoTemporary { .. })
        ));
    }
}
