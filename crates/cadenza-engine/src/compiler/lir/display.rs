//! Pretty-printing for LIR
//!
//! Display implementations for debugging and dump output.

use std::fmt;

use super::{InterruptPayload, LinearFrame, Lir, LirOpcode, Location, MoveSet, Operand, Reserved, VReg};

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reserved(Reserved::Context) => write!(f, "context"),
            Operand::Reserved(Reserved::Stack) => write!(f, "stack"),
            Operand::Reserved(Reserved::Frame) => write!(f, "frame"),
            Operand::Value(vreg) => write!(f, "{}", vreg),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Register(register) => write!(f, "r{}", register),
            Location::Spill(slot) => write!(f, "s{}", slot.index()),
        }
    }
}

fn write_moves(f: &mut fmt::Formatter<'_>, label: &str, moves: &MoveSet) -> fmt::Result {
    if moves.is_empty() {
        return Ok(());
    }
    write!(f, " ; {}", label)?;
    for (destination, origin) in moves {
        write!(f, " {}<-{}", destination, origin)?;
    }
    Ok(())
}

impl fmt::Display for LirOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LirOpcode::Label {
                block,
                predecessors,
                phis,
                ..
            } => {
                write!(f, "{}:", block)?;
                if !predecessors.is_empty() {
                    write!(f, " ; preds:")?;
                    for pred in predecessors {
                        write!(f, " {}", pred)?;
                    }
                }
                for phi in phis {
                    write!(f, "\n    {} = phi", phi.output)?;
                    for (i, input) in phi.inputs.iter().enumerate() {
                        write!(f, "{} {}", if i == 0 { "" } else { "," }, input)?;
                    }
                }
                Ok(())
            }
            LirOpcode::LoadConstant { output, value } => write!(f, "{} = load_constant {}", output, value),
            LirOpcode::LoadFromPointer { output, pointer, offset } => {
                write!(f, "{} = load [{} {:+}]", output, pointer, offset)
            }
            LirOpcode::StoreToPointer { pointer, offset, value } => {
                write!(f, "store [{} {:+}] = {}", pointer, offset, value)
            }
            LirOpcode::Branch { target } => write!(f, "branch {}", target),
            LirOpcode::BranchIfTrue { condition, target } => write!(f, "branch_if_true {}, {}", condition, target),
            LirOpcode::BranchToRegister { address } => write!(f, "branch_to_register {}", address),
            LirOpcode::Interrupt { code, payload } => {
                write!(f, "interrupt {:?}", code)?;
                match payload {
                    InterruptPayload::None => Ok(()),
                    InterruptPayload::Dispatch {
                        record,
                        argument_count,
                        keyword_argument_count,
                        is_super,
                    } => write!(
                        f,
                        " record {:+} args {} keywords {}{}",
                        record,
                        argument_count,
                        keyword_argument_count,
                        if *is_super { " super" } else { "" }
                    ),
                    InterruptPayload::Allocate { size } => write!(f, " size {}", size),
                }
            }
        }
    }
}

impl fmt::Display for Lir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        write_moves(f, "moves", &self.moves)?;
        write_moves(f, "edge", &self.edge_moves)
    }
}

impl fmt::Display for LinearFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "linear frame {} (vregs: {}, spill slots: {}) {{",
            self.name,
            self.vreg_count(),
            self.spill_slot_count
        )?;
        for (position, lir) in self.instructions.iter().enumerate() {
            if matches!(lir.opcode, LirOpcode::Label { .. }) {
                writeln!(f, "  {:4} {}", position, lir)?;
            } else {
                writeln!(f, "  {:4}   {}", position, lir)?;
            }
        }
        writeln!(f, "}}")
    }
}
