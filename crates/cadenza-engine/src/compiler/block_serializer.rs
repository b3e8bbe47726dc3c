//! Block serializer
//!
//! Flattens a HIR frame into a [`LinearFrame`]: blocks in reverse
//! postorder, each opened by a label carrying its phis, each HIR lowered to
//! loads, stores, branches, and interrupts against the stack record, the
//! heap frame, and the machine state.
//!
//! The frame must have been through the name saver, and every block literal
//! in it must already carry its compiled function definition.

use std::collections::BTreeSet;

use cadenza_sdk::{Slot, TypeFlags, SLOT_SIZE, STACK_SLOT_SIZE};
use log::debug;

use crate::compiler::hir::{BlockId, Frame, Hir, HirId, HirOpcode};
use crate::compiler::lir::linear_frame::BlockRange;
use crate::compiler::lir::{InterruptPayload, LinearFrame, LirOpcode, Operand, PhiLir, Reserved, VReg};
use crate::runtime::{offsets, InterruptCode};

/// Serialization errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializeError {
    /// An assignment or import the name saver should have rewritten
    #[error("unsaved name operation {opcode} at {id}")]
    UnsavedName {
        /// The HIR
        id: HirId,
        /// Its mnemonic
        opcode: &'static str,
    },

    /// A block literal whose inner frame was not compiled first
    #[error("block literal {0} has no compiled function definition")]
    MissingFunctionDef(HirId),

    /// A value read before any HIR defined it
    #[error("value {0} has no virtual register")]
    UndefinedValue(HirId),
}

/// Byte offset of argument `index` in a stack record.
pub fn argument_offset(index: usize) -> i32 {
    ((index + 2) * STACK_SLOT_SIZE) as i32
}

/// Byte offset of the return-value slot in a stack record.
pub const RETURN_SLOT_OFFSET: i32 = STACK_SLOT_SIZE as i32;

/// Byte offset of heap frame slot `index`; the outer frame pointer is at 0.
pub fn frame_slot_offset(index: usize) -> i32 {
    ((index + 1) * SLOT_SIZE) as i32
}

/// Byte offset of instance or class variable `index`.
pub fn variable_offset(index: usize) -> i32 {
    (index * SLOT_SIZE) as i32
}

/// Size of a function object: outer frame pointer and function definition.
pub const FUNCTION_OBJECT_SIZE: u32 = 2 * SLOT_SIZE as u32;

/// Lower `frame` to LIR.
pub fn serialize(frame: &Frame) -> Result<LinearFrame, SerializeError> {
    BlockSerializer::new(frame).run()
}

struct BlockSerializer<'a> {
    frame: &'a Frame,
    linear: LinearFrame,
    order: Vec<BlockId>,
    reachable: BTreeSet<BlockId>,
    // Receivers marked for superclass lookup
    super_receivers: BTreeSet<HirId>,
}

impl<'a> BlockSerializer<'a> {
    fn new(frame: &'a Frame) -> Self {
        let order = frame.reverse_postorder();
        let reachable = order.iter().copied().collect();
        Self {
            frame,
            linear: LinearFrame::new(frame.name, frame.blocks.len()),
            order,
            reachable,
            super_receivers: BTreeSet::new(),
        }
    }

    fn run(mut self) -> Result<LinearFrame, SerializeError> {
        self.number_values()?;
        let order = std::mem::take(&mut self.order);
        for block in &order {
            self.serialize_block(*block)?;
        }

        let end = self.linear.instructions.len();
        for (i, block) in order.iter().enumerate() {
            let from = self.linear.label_position(*block).unwrap_or(end);
            let to = order
                .get(i + 1)
                .and_then(|next| self.linear.label_position(*next))
                .unwrap_or(end);
            self.linear.block_ranges[block.index()] = Some(BlockRange { from, to });
        }
        self.linear.block_order = order;

        debug!(
            "serialized frame {}: {} blocks, {} instructions, {} vregs",
            self.frame.name,
            self.linear.block_order.len(),
            self.linear.instructions.len(),
            self.linear.vreg_count()
        );
        Ok(self.linear)
    }

    /// Give every value-producing HIR a register up front, so phis can
    /// name inputs defined later in linear order.
    fn number_values(&mut self) -> Result<(), SerializeError> {
        for block in &self.order {
            let block = self.frame.block(*block);
            for id in block.phis.iter().chain(&block.statements) {
                let Some(hir) = self.frame.hir(*id) else {
                    continue;
                };
                if let HirOpcode::RouteToSuperclass { this } = hir.opcode {
                    let receiver = self.vreg(this)?;
                    self.linear.hir_to_vreg.insert(hir.id, receiver);
                    self.super_receivers.insert(hir.id);
                    continue;
                }
                if hir.opcode.produces_value() {
                    let vreg = self.linear.new_vreg(hir.type_flags);
                    self.linear.hir_to_vreg.insert(hir.id, vreg);
                }
            }
        }
        Ok(())
    }

    fn vreg(&self, id: HirId) -> Result<VReg, SerializeError> {
        self.linear
            .hir_to_vreg
            .get(&id)
            .copied()
            .ok_or(SerializeError::UndefinedValue(id))
    }

    fn pointer(&self, frame: Option<HirId>) -> Result<Operand, SerializeError> {
        match frame {
            Some(id) => Ok(Operand::Value(self.vreg(id)?)),
            None => Ok(Operand::Reserved(Reserved::Frame)),
        }
    }

    fn serialize_block(&mut self, id: BlockId) -> Result<(), SerializeError> {
        let block = self.frame.block(id);
        // Unreachable predecessors contribute no phi inputs
        let kept: Vec<usize> = block
            .predecessors
            .iter()
            .enumerate()
            .filter(|(_, pred)| self.reachable.contains(pred))
            .map(|(i, _)| i)
            .collect();
        let predecessors = kept.iter().map(|i| block.predecessors[*i]).collect();

        let mut phis = Vec::with_capacity(block.phis.len());
        for phi in &block.phis {
            let Some(Hir {
                opcode: HirOpcode::Phi { inputs, .. },
                ..
            }) = self.frame.hir(*phi)
            else {
                continue;
            };
            let mut lowered = Vec::with_capacity(kept.len());
            for i in &kept {
                if let Some(input) = inputs.get(*i) {
                    lowered.push(self.vreg(*input)?);
                }
            }
            phis.push(PhiLir {
                output: self.vreg(*phi)?,
                inputs: lowered,
            });
        }

        self.linear.push(LirOpcode::Label {
            block: id,
            predecessors,
            successors: block.successors.clone(),
            phis,
        });

        for statement in &block.statements {
            if let Some(hir) = self.frame.hir(*statement) {
                self.serialize_hir(hir)?;
            }
        }
        Ok(())
    }

    fn serialize_hir(&mut self, hir: &Hir) -> Result<(), SerializeError> {
        match &hir.opcode {
            HirOpcode::Constant(value) => {
                let output = self.vreg(hir.id)?;
                self.linear.push(LirOpcode::LoadConstant { output, value: *value });
            }
            HirOpcode::LoadArgument { index } => {
                self.load(hir.id, Operand::Reserved(Reserved::Stack), argument_offset(*index))?;
            }
            HirOpcode::ReadFromContext { offset } => {
                self.load(hir.id, Operand::Reserved(Reserved::Context), *offset)?;
            }
            HirOpcode::LoadOuterFrame { inner } => {
                let pointer = self.pointer(*inner)?;
                self.load(hir.id, pointer, 0)?;
            }
            HirOpcode::ReadFromFrame { frame, index } => {
                let pointer = self.pointer(*frame)?;
                self.load(hir.id, pointer, frame_slot_offset(*index))?;
            }
            HirOpcode::WriteToFrame { frame, index, value } => {
                let pointer = self.pointer(*frame)?;
                self.store(pointer, frame_slot_offset(*index), *value)?;
            }
            HirOpcode::ReadFromThis { this, index } => {
                let pointer = Operand::Value(self.vreg(*this)?);
                self.load(hir.id, pointer, variable_offset(*index))?;
            }
            HirOpcode::WriteToThis { this, index, value } => {
                let pointer = Operand::Value(self.vreg(*this)?);
                self.store(pointer, variable_offset(*index), *value)?;
            }
            HirOpcode::ReadFromClass { class_variables, index } => {
                let pointer = Operand::Value(self.vreg(*class_variables)?);
                self.load(hir.id, pointer, variable_offset(*index))?;
            }
            HirOpcode::WriteToClass {
                class_variables,
                index,
                value,
            } => {
                let pointer = Operand::Value(self.vreg(*class_variables)?);
                self.store(pointer, variable_offset(*index), *value)?;
            }
            HirOpcode::RouteToSuperclass { .. } => {}
            HirOpcode::Message {
                selector,
                arguments,
                keyword_arguments,
            } => {
                let is_super = arguments
                    .first()
                    .is_some_and(|receiver| self.super_receivers.contains(receiver));
                let slots = 2 + arguments.len() + keyword_arguments.len();
                let record = -((slots * STACK_SLOT_SIZE) as i32);
                let stack = Operand::Reserved(Reserved::Stack);

                let selector_value = self.constant(selector.slot(), TypeFlags::SYMBOL);
                self.linear.push(LirOpcode::StoreToPointer {
                    pointer: stack,
                    offset: record + RETURN_SLOT_OFFSET,
                    value: Operand::Value(selector_value),
                });
                for (i, argument) in arguments.iter().chain(keyword_arguments).enumerate() {
                    self.store(stack, record + argument_offset(i), *argument)?;
                }
                self.linear.push(LirOpcode::Interrupt {
                    code: InterruptCode::Dispatch,
                    payload: InterruptPayload::Dispatch {
                        record,
                        argument_count: arguments.len() as u32,
                        keyword_argument_count: (keyword_arguments.len() / 2) as u32,
                        is_super,
                    },
                });
                self.load(hir.id, stack, record + RETURN_SLOT_OFFSET)?;
            }
            HirOpcode::StoreReturn { value } => {
                self.store(Operand::Reserved(Reserved::Stack), RETURN_SLOT_OFFSET, *value)?;
            }
            HirOpcode::MethodReturn => {
                let address = self.linear.new_vreg(TypeFlags::RAW_POINTER);
                self.linear.push(LirOpcode::LoadFromPointer {
                    output: address,
                    pointer: Operand::Reserved(Reserved::Stack),
                    offset: 0,
                });
                self.linear.push(LirOpcode::BranchToRegister { address });
            }
            HirOpcode::Branch { target } => {
                self.linear.push(LirOpcode::Branch { target: *target });
            }
            HirOpcode::BranchIfTrue { condition, target } => {
                let condition = self.vreg(*condition)?;
                self.linear.push(LirOpcode::BranchIfTrue {
                    condition,
                    target: *target,
                });
            }
            HirOpcode::BlockLiteral { function_def, .. } => {
                let def = function_def.ok_or(SerializeError::MissingFunctionDef(hir.id))?;
                self.linear.push(LirOpcode::Interrupt {
                    code: InterruptCode::AllocateMemory,
                    payload: InterruptPayload::Allocate {
                        size: FUNCTION_OBJECT_SIZE,
                    },
                });
                let object = self.vreg(hir.id)?;
                self.linear.push(LirOpcode::LoadFromPointer {
                    output: object,
                    pointer: Operand::Reserved(Reserved::Context),
                    offset: offsets::ALLOCATION_RESULT,
                });
                self.linear.push(LirOpcode::StoreToPointer {
                    pointer: Operand::Value(object),
                    offset: 0,
                    value: Operand::Reserved(Reserved::Frame),
                });
                let def = self.constant(def, TypeFlags::OBJECT);
                self.linear.push(LirOpcode::StoreToPointer {
                    pointer: Operand::Value(object),
                    offset: SLOT_SIZE as i32,
                    value: Operand::Value(def),
                });
            }
            HirOpcode::Phi { .. } => {}
            HirOpcode::Assign { .. }
            | HirOpcode::ImportLocalVariable { .. }
            | HirOpcode::ImportInstanceVariable { .. }
            | HirOpcode::ImportClassVariable { .. } => {
                return Err(SerializeError::UnsavedName {
                    id: hir.id,
                    opcode: hir.opcode.name(),
                });
            }
        }
        Ok(())
    }

    fn load(&mut self, id: HirId, pointer: Operand, offset: i32) -> Result<(), SerializeError> {
        let output = self.vreg(id)?;
        self.linear.push(LirOpcode::LoadFromPointer { output, pointer, offset });
        Ok(())
    }

    fn store(&mut self, pointer: Operand, offset: i32, value: HirId) -> Result<(), SerializeError> {
        let value = Operand::Value(self.vreg(value)?);
        self.linear.push(LirOpcode::StoreToPointer { pointer, offset, value });
        Ok(())
    }

    fn constant(&mut self, value: Slot, flags: TypeFlags) -> VReg {
        let output = self.linear.new_vreg(flags);
        self.linear.push(LirOpcode::LoadConstant { output, value });
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast_builder::AstBuilder;
    use crate::compiler::block_builder::BlockBuilder;
    use crate::compiler::name_saver::save_names;
    use crate::parser::parse_interpreter;
    use crate::runtime::ThreadContext;

    fn serialize_source(source: &str) -> Result<LinearFrame, SerializeError> {
        let mut context = ThreadContext::new().unwrap();
        let tree = parse_interpreter(source).unwrap();
        let ast = AstBuilder::new(&mut context, source, &tree.tokens)
            .build_interpreter(&tree.root)
            .unwrap();
        let name = context.intern("interpret").unwrap();
        let mut frame = BlockBuilder::new(&context, None, name)
            .unwrap()
            .build_frame(&ast)
            .unwrap();
        save_names(&mut frame);
        serialize(&frame)
    }

    fn names(linear: &LinearFrame) -> Vec<&'static str> {
        linear.instructions.iter().map(|lir| lir.opcode.name()).collect()
    }

    #[test]
    fn test_nil() {
        let linear = serialize_source("nil").unwrap();
        assert_eq!(
            names(&linear),
            vec!["Label", "LoadConstant", "StoreToPointer", "LoadFromPointer", "BranchToRegister"]
        );
        assert!(matches!(
            linear.instructions[1].opcode,
            LirOpcode::LoadConstant { value, .. } if value == Slot::NIL
        ));
        assert!(matches!(
            linear.instructions[2].opcode,
            LirOpcode::StoreToPointer {
                pointer: Operand::Reserved(Reserved::Stack),
                offset: 16,
                ..
            }
        ));
        assert_eq!(linear.block_ranges[0], Some(BlockRange { from: 0, to: 5 }));
    }

    #[test]
    fn test_message_writes_record() {
        let linear = serialize_source("1 + 2").unwrap();
        let interrupt = linear
            .instructions
            .iter()
            .find_map(|lir| match lir.opcode {
                LirOpcode::Interrupt {
                    payload: InterruptPayload::Dispatch {
                        record, argument_count, ..
                    },
                    ..
                } => Some((record, argument_count)),
                _ => None,
            })
            .unwrap();
        assert_eq!(interrupt, (-64, 2));
        let stores: Vec<i32> = linear
            .instructions
            .iter()
            .filter_map(|lir| match lir.opcode {
                LirOpcode::StoreToPointer {
                    pointer: Operand::Reserved(Reserved::Stack),
                    offset,
                    ..
                } if offset < 0 => Some(offset),
                _ => None,
            })
            .collect();
        assert_eq!(stores, vec![-48, -32, -16]);
    }

    #[test]
    fn test_if_lowers_phi_on_label() {
        let linear = serialize_source("var x = 1; if(x, { 2 }, { 3 })").unwrap();
        assert_eq!(linear.block_order.len(), 4);
        let join = linear.block_order[3];
        match linear.label(join) {
            Some(LirOpcode::Label { predecessors, phis, .. }) => {
                assert_eq!(predecessors.len(), 2);
                assert_eq!(phis.len(), 1);
                assert_eq!(phis[0].inputs.len(), 2);
            }
            other => panic!("expected label, got {:?}", other),
        }
    }

    #[test]
    fn test_block_literal_allocates() {
        let mut context = ThreadContext::new().unwrap();
        let source = "{ 1 }";
        let tree = parse_interpreter(source).unwrap();
        let ast = AstBuilder::new(&mut context, source, &tree.tokens)
            .build_interpreter(&tree.root)
            .unwrap();
        let name = context.intern("interpret").unwrap();
        let mut frame = BlockBuilder::new(&context, None, name)
            .unwrap()
            .build_frame(&ast)
            .unwrap();
        save_names(&mut frame);
        let literal = frame.inner_blocks[0];
        assert_eq!(serialize(&frame), Err(SerializeError::MissingFunctionDef(literal)));

        if let Some(HirOpcode::BlockLiteral { function_def, .. }) = frame.hir_mut(literal).map(|hir| &mut hir.opcode) {
            *function_def = Some(Slot::make_pointer(0x4000_0000_0000).unwrap());
        }
        let linear = serialize(&frame).unwrap();
        let names = names(&linear);
        let start = names.iter().position(|name| *name == "Interrupt").unwrap();
        assert_eq!(
            &names[start..start + 5],
            &["Interrupt", "LoadFromPointer", "StoreToPointer", "LoadConstant", "StoreToPointer"]
        );
    }
}
