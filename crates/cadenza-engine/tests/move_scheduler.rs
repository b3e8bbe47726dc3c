//! Move scheduler tests: every schedule is executed on the virtual machine
//! and the resulting registers and spill slots are compared with what the
//! parallel move set asks for.

use cadenza_engine::compiler::lir::{Location, MoveSet, SpillSlot};
use cadenza_engine::jit::move_scheduler::{move_set, schedule_moves, spill_offset, ScheduleError};
use cadenza_engine::jit::virtual_machine::STACK_BASE;
use cadenza_engine::runtime::Symbol;
use cadenza_engine::{FunctionDef, Jit, Reg, Slot, VirtualJit, VirtualMachine, VmOutcome};

const REGISTERS: u8 = 6;
const SPILLS: u32 = 4;
const FREE_REGISTER: u8 = 6;
const CARRIER: Reg = Reg(7);
const DUMP_BASE: i32 = 32;

fn register(n: u8) -> Location {
    Location::Register(n)
}

fn spill(n: u32) -> Location {
    Location::Spill(SpillSlot::new(n).unwrap())
}

fn initial_value(location: Location) -> Slot {
    match location {
        Location::Register(n) => Slot::make_int32(100 + i32::from(n)),
        Location::Spill(slot) => Slot::make_int32(200 + slot.index() as i32),
    }
}

fn all_locations() -> Vec<Location> {
    (0..REGISTERS)
        .map(register)
        .chain((1..=SPILLS).map(spill))
        .collect()
}

fn dump_offset(location: Location) -> i32 {
    let index = match location {
        Location::Register(n) => i32::from(n),
        Location::Spill(slot) => i32::from(REGISTERS) + slot.index() as i32,
    };
    DUMP_BASE + index * 8
}

fn function(bytecode: Vec<u8>) -> FunctionDef {
    FunctionDef {
        name: Symbol::hash_of("moves"),
        argument_names: vec![Symbol::hash_of("this")],
        default_values: vec![Slot::NIL],
        variable_names: Vec::new(),
        prototype_frame: vec![Slot::NIL],
        has_var_args: false,
        primitive: None,
        bytecode,
    }
}

/// Seed every location, run the schedule, and dump every location above
/// the stack pointer. Returns the final value of each location.
fn execute(moves: &MoveSet, free_register: Option<u8>) -> Result<Vec<(Location, Slot)>, ScheduleError> {
    let mut jit = VirtualJit::new(16 * 1024);
    for n in 1..=SPILLS {
        jit.movi_u(CARRIER, initial_value(spill(n)).as_bits());
        jit.stxi_l(spill_offset(n).unwrap(), Reg::STACK, CARRIER);
    }
    for n in 0..REGISTERS {
        jit.movi_u(Reg(i32::from(n)), initial_value(register(n)).as_bits());
    }

    schedule_moves(&mut jit, moves, free_register, usize::from(REGISTERS))?;

    for location in all_locations() {
        match location {
            Location::Register(n) => jit.stxi_l(dump_offset(location), Reg::STACK, Reg(i32::from(n))),
            Location::Spill(slot) => {
                jit.ldxi_l(CARRIER, Reg::STACK, spill_offset(slot.index()).unwrap());
                jit.stxi_l(dump_offset(location), Reg::STACK, CARRIER);
            }
        }
    }
    jit.ret();
    assert!(!jit.has_overflowed());

    let mut vm = VirtualMachine::new();
    let outcome = vm.run(&function(jit.into_bytes()), &[]).unwrap();
    assert!(matches!(outcome, VmOutcome::Returned(_)));

    let stack_pointer = STACK_BASE + 32 * 1024;
    Ok(all_locations()
        .into_iter()
        .map(|location| {
            let address = stack_pointer + dump_offset(location) as u64;
            (location, Slot::from_bits(vm.read_word(address).unwrap()))
        })
        .collect())
}

fn assert_moves_applied(moves: &MoveSet, free_register: Option<u8>) {
    let finals = execute(moves, free_register).unwrap();
    for (location, value) in finals {
        let origin = moves.get(&location).copied().unwrap_or(location);
        assert_eq!(
            value,
            initial_value(origin),
            "{} should hold the value of {} after {:?}",
            location,
            origin,
            moves
        );
    }
}

fn permutations(items: &[Location]) -> Vec<Vec<Location>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut result = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head);
            result.push(tail);
        }
    }
    result
}

fn permutation_moves(domain: &[Location], image: &[Location]) -> MoveSet {
    move_set(domain.iter().copied().zip(image.iter().copied())).unwrap()
}

// =============================================================================
// SHAPES
// =============================================================================

mod shapes {
    use super::*;

    #[test]
    fn test_empty_set_emits_nothing() {
        let mut jit = VirtualJit::new(64);
        schedule_moves(&mut jit, &MoveSet::new(), None, usize::from(REGISTERS)).unwrap();
        assert_eq!(jit.current_address(), 0);
    }

    #[test]
    fn test_chain() {
        let moves = move_set([(register(0), register(1)), (register(1), register(2)), (spill(1), register(0))]).unwrap();
        assert_moves_applied(&moves, None);
    }

    #[test]
    fn test_fan_out_from_one_origin() {
        let moves = move_set([
            (register(0), register(1)),
            (register(0), spill(1)),
            (register(0), spill(2)),
            (register(0), register(3)),
        ])
        .unwrap();
        assert_moves_applied(&moves, None);
    }

    #[test]
    fn test_register_swap_without_free_register() {
        let moves = move_set([(register(0), register(1)), (register(1), register(0))]).unwrap();
        assert_moves_applied(&moves, None);
    }

    #[test]
    fn test_register_spill_swap() {
        let moves = move_set([(register(2), spill(3)), (spill(3), register(2))]).unwrap();
        assert_moves_applied(&moves, Some(FREE_REGISTER));
    }

    #[test]
    fn test_spill_chain_borrows_a_register() {
        let moves = move_set([(spill(1), spill(2)), (spill(2), spill(3))]).unwrap();
        assert_moves_applied(&moves, None);
    }

    #[test]
    fn test_spill_cycle_with_free_register() {
        let moves = move_set([(spill(1), spill(2)), (spill(2), spill(3)), (spill(3), spill(1))]).unwrap();
        assert_moves_applied(&moves, Some(FREE_REGISTER));
    }

    #[test]
    fn test_two_disjoint_cycles() {
        let moves = move_set([
            (register(0), register(1)),
            (register(1), register(2)),
            (register(2), register(0)),
            (spill(1), register(3)),
            (register(3), spill(2)),
            (spill(2), spill(1)),
        ])
        .unwrap();
        assert_moves_applied(&moves, Some(FREE_REGISTER));
    }

    #[test]
    fn test_register_spill_swap_without_free_register() {
        let moves = move_set([(register(2), spill(3)), (spill(3), register(2))]).unwrap();
        assert_moves_applied(&moves, None);
    }

    #[test]
    fn test_spill_swap_without_free_register() {
        let moves = move_set([(spill(1), spill(2)), (spill(2), spill(1))]).unwrap();
        assert_moves_applied(&moves, None);
    }

    #[test]
    fn test_spill_cycle_beside_a_register_cycle() {
        let moves = move_set([
            (register(0), register(1)),
            (register(1), register(0)),
            (spill(1), spill(2)),
            (spill(2), spill(3)),
            (spill(3), spill(1)),
        ])
        .unwrap();
        assert_moves_applied(&moves, None);
    }
}

// =============================================================================
// PERMUTATIONS
// =============================================================================

mod permutation_sets {
    use super::*;

    #[test]
    fn test_every_register_permutation_without_free_register() {
        let domain: Vec<Location> = (0..4).map(register).collect();
        for image in permutations(&domain) {
            assert_moves_applied(&permutation_moves(&domain, &image), None);
        }
    }

    #[test]
    fn test_every_mixed_permutation_with_free_register() {
        let domain = vec![register(0), register(1), register(2), spill(1), spill(2)];
        for image in permutations(&domain) {
            assert_moves_applied(&permutation_moves(&domain, &image), Some(FREE_REGISTER));
        }
    }

    #[test]
    fn test_every_mixed_permutation_without_free_register() {
        let domain = vec![register(0), register(1), spill(1), spill(2), spill(3)];
        for image in permutations(&domain) {
            assert_moves_applied(&permutation_moves(&domain, &image), None);
        }
    }

    #[test]
    fn test_free_register_inside_the_set_is_ignored() {
        let domain: Vec<Location> = (0..3).map(register).collect();
        for image in permutations(&domain) {
            assert_moves_applied(&permutation_moves(&domain, &image), Some(0));
        }
    }
}
