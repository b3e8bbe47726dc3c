//! Pretty-printing for HIR
//!
//! Display implementations for debugging and dump output. Symbols print as
//! hashes; resolve them through the symbol table for readable names.

use std::fmt;

use super::{AssignTarget, Block, BlockId, Frame, Hir, HirId, HirOpcode, ScopeId};

impl fmt::Display for HirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, ids: &[HirId]) -> fmt::Result {
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", id)?;
    }
    Ok(())
}

fn write_frame(f: &mut fmt::Formatter<'_>, frame: Option<HirId>) -> fmt::Result {
    match frame {
        Some(id) => write!(f, "{}", id),
        None => write!(f, "frame"),
    }
}

impl fmt::Display for AssignTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignTarget::Local { slot } => write!(f, "local[{}]", slot),
            AssignTarget::Outer { frame, slot } => write!(f, "{}[{}]", frame, slot),
            AssignTarget::Instance { this, index } => write!(f, "{}.ivar[{}]", this, index),
            AssignTarget::Class { class_variables, index } => write!(f, "{}.cvar[{}]", class_variables, index),
        }
    }
}

impl fmt::Display for HirOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HirOpcode::Constant(value) => write!(f, "constant {}", value),
            HirOpcode::Phi { inputs, name } => {
                write!(f, "phi ")?;
                if let Some(name) = name {
                    write!(f, "{} ", name)?;
                }
                write!(f, "[")?;
                write_list(f, inputs)?;
                write!(f, "]")
            }
            HirOpcode::Assign { name, value, target } => write!(f, "assign {} = {} -> {}", name, value, target),
            HirOpcode::LoadArgument { index } => write!(f, "load_argument {}", index),
            HirOpcode::ImportLocalVariable { name, frame, index } => {
                write!(f, "import_local {} {}[{}]", name, frame, index)
            }
            HirOpcode::ImportInstanceVariable { name, this, index } => {
                write!(f, "import_ivar {} {}[{}]", name, this, index)
            }
            HirOpcode::ImportClassVariable {
                name,
                class_variables,
                index,
            } => write!(f, "import_cvar {} {}[{}]", name, class_variables, index),
            HirOpcode::Message {
                selector,
                arguments,
                keyword_arguments,
            } => {
                write!(f, "message {} (", selector)?;
                write_list(f, arguments)?;
                if !keyword_arguments.is_empty() {
                    write!(f, "; ")?;
                    write_list(f, keyword_arguments)?;
                }
                write!(f, ")")
            }
            HirOpcode::MethodReturn => write!(f, "method_return"),
            HirOpcode::StoreReturn { value } => write!(f, "store_return {}", value),
            HirOpcode::Branch { target } => write!(f, "branch {}", target),
            HirOpcode::BranchIfTrue { condition, target } => write!(f, "branch_if_true {}, {}", condition, target),
            HirOpcode::BlockLiteral {
                frame,
                captures,
                function_def,
            } => {
                write!(f, "block_literal {} ({} blocks", frame.name, frame.blocks.len())?;
                if !captures.is_empty() {
                    write!(f, ", captures")?;
                    for (name, id) in captures {
                        write!(f, " {}={}", name, id)?;
                    }
                }
                if let Some(def) = function_def {
                    write!(f, ", def {}", def)?;
                }
                write!(f, ")")
            }
            HirOpcode::ReadFromFrame { frame, index } => {
                write!(f, "read_frame ")?;
                write_frame(f, *frame)?;
                write!(f, "[{}]", index)
            }
            HirOpcode::WriteToFrame { frame, index, value } => {
                write!(f, "write_frame ")?;
                write_frame(f, *frame)?;
                write!(f, "[{}] = {}", index, value)
            }
            HirOpcode::ReadFromThis { this, index } => write!(f, "read_this {}[{}]", this, index),
            HirOpcode::WriteToThis { this, index, value } => write!(f, "write_this {}[{}] = {}", this, index, value),
            HirOpcode::ReadFromClass { class_variables, index } => {
                write!(f, "read_class {}[{}]", class_variables, index)
            }
            HirOpcode::WriteToClass {
                class_variables,
                index,
                value,
            } => write!(f, "write_class {}[{}] = {}", class_variables, index, value),
            HirOpcode::ReadFromContext { offset } => write!(f, "read_context +{}", offset),
            HirOpcode::RouteToSuperclass { this } => write!(f, "route_to_superclass {}", this),
            HirOpcode::LoadOuterFrame { inner } => {
                write!(f, "load_outer_frame ")?;
                write_frame(f, *inner)
            }
        }
    }
}

impl fmt::Display for Hir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.opcode.produces_value() {
            write!(f, "{}: {} = {}", self.id, self.type_flags, self.opcode)
        } else {
            write!(f, "{}", self.opcode)
        }
    }
}

/// Display adapter for a block, which needs its frame to print HIRs.
pub struct BlockDisplay<'a> {
    frame: &'a Frame,
    block: &'a Block,
}

impl fmt::Display for BlockDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  {} ({}):", self.block.id, self.block.scope)?;
        if !self.block.predecessors.is_empty() {
            write!(f, " ; preds:")?;
            for pred in &self.block.predecessors {
                write!(f, " {}", pred)?;
            }
        }
        writeln!(f)?;
        for id in self.block.phis.iter().chain(&self.block.statements) {
            if let Some(hir) = self.frame.hir(*id) {
                writeln!(f, "    {}", hir)?;
            }
        }
        Ok(())
    }
}

impl Frame {
    /// Display adapter for one block.
    pub fn display_block(&self, id: BlockId) -> BlockDisplay<'_> {
        BlockDisplay {
            frame: self,
            block: self.block(id),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "frame {} (args: {}, vars: {}) {{",
            self.name,
            self.argument_names.len(),
            self.variable_names.len()
        )?;
        for block in self.reverse_postorder() {
            write!(f, "{}", self.display_block(block))?;
        }
        writeln!(f, "}}")?;
        for id in &self.inner_blocks {
            if let Some(Hir {
                opcode: HirOpcode::BlockLiteral { frame, .. },
                ..
            }) = self.hir(*id)
            {
                writeln!(f, "; inner frame of {}", id)?;
                write!(f, "{}", frame)?;
            }
        }
        Ok(())
    }
}
