//! AST to HIR lowering
//!
//! SSA form is built on the fly while the AST is lowered, following Braun
//! et al., "Simple and Efficient Construction of Static Single Assignment
//! Form". Each block maps names to their latest value. A read that misses
//! the local map walks the predecessors, placing phis where control flow
//! merges, and reads that reach the frame entry resolve against the
//! enclosing frames, the receiver's class, and a few special names.
//!
//! Frames nest: lowering a block literal pushes a new frame. Names an inner
//! frame reads from an enclosing frame are imported through a chain of
//! `LoadOuterFrame` hops, and the enclosing frame marks their slots as
//! captured.

use cadenza_sdk::{Slot, TypeFlags};
use log::debug;
use rustc_hash::FxHashMap;

use crate::compiler::ast::{Ast, BlockAst, DefineAst, IfAst, MessageAst, MultiAssignAst, NameAst, WhileAst};
use crate::compiler::error::BuildError;
use crate::compiler::hir::{
    AssignTarget, BlockId, Frame, Hir, HirId, HirOpcode, NameKey, Placement, SealedBlock, UnsealedBlock,
};
use crate::parser::Span;
use crate::runtime::{offsets, Symbol, ThreadContext};

/// Names the builder treats specially.
#[derive(Debug, Clone, Copy)]
struct Names {
    this: Symbol,
    super_: Symbol,
    this_method: Symbol,
    this_process: Symbol,
    this_thread: Symbol,
    current_environment: Symbol,
    value: Symbol,
    at: Symbol,
    copy_to_end: Symbol,
}

impl Names {
    fn intern(context: &ThreadContext) -> Result<Self, BuildError> {
        Ok(Self {
            this: context.intern("this")?,
            super_: context.intern("super")?,
            this_method: context.intern("thisMethod")?,
            this_process: context.intern("thisProcess")?,
            this_thread: context.intern("thisThread")?,
            current_environment: context.intern("currentEnvironment")?,
            value: context.intern("value")?,
            at: context.intern("at")?,
            copy_to_end: context.intern("copyToEnd")?,
        })
    }

    fn is_reserved(&self, name: Symbol) -> bool {
        [
            self.this,
            self.super_,
            self.this_method,
            self.this_process,
            self.this_thread,
        ]
        .contains(&name)
    }
}

/// A frame under construction.
struct FrameState {
    frame: Frame,
    /// Block receiving new statements
    block: BlockId,
    /// Values captured by the block literal currently being lowered inside
    /// this frame
    captures: Vec<(Symbol, HirId)>,
    /// `LoadOuterFrame` chain; entry `i` is `i + 1` hops out
    hops: Vec<HirId>,
    /// Where each incomplete phi's name was first read
    phi_spans: FxHashMap<HirId, Span>,
    /// Phis whose inputs are still being collected
    pending_phis: Vec<HirId>,
}

impl FrameState {
    fn new(frame: Frame) -> Self {
        let block = frame.entry;
        Self {
            frame,
            block,
            captures: Vec::new(),
            hops: Vec::new(),
            phi_spans: FxHashMap::default(),
            pending_phis: Vec::new(),
        }
    }
}

/// Lowers a [`BlockAst`] to a [`Frame`] in SSA form.
pub struct BlockBuilder<'a> {
    context: &'a ThreadContext,
    /// Class whose instance and class variables are visible
    class: Option<Symbol>,
    method_name: Symbol,
    names: Names,
    /// Frames being built, outermost first
    frames: Vec<FrameState>,
}

impl<'a> BlockBuilder<'a> {
    /// Create a builder for a method of `class`, or for interpreted code
    /// when `class` is `None`.
    pub fn new(context: &'a ThreadContext, class: Option<Symbol>, method_name: Symbol) -> Result<Self, BuildError> {
        Ok(Self {
            context,
            class,
            method_name,
            names: Names::intern(context)?,
            frames: Vec::new(),
        })
    }

    /// Lower a method or interpreter body. Block literals inside it become
    /// nested frames owned by their `BlockLiteral` HIRs.
    pub fn build_frame(&mut self, ast: &BlockAst) -> Result<Frame, BuildError> {
        self.build_frame_named(ast, self.method_name)
    }

    fn build_frame_named(&mut self, ast: &BlockAst, name: Symbol) -> Result<Frame, BuildError> {
        let mut frame = Frame::new(
            name,
            ast.argument_names.clone(),
            ast.argument_defaults.clone(),
            ast.has_var_args,
        );
        frame.primitive = ast.primitive;
        self.frames.push(FrameState::new(frame));
        let result = self.build_body(ast);
        let state = self
            .frames
            .pop()
            .ok_or_else(|| BuildError::invalid_syntax("unbalanced frame nesting", ast.span))?;
        result?;

        let mut frame = state.frame;
        frame.prototype_frame = frame
            .argument_defaults
            .iter()
            .copied()
            .chain(std::iter::repeat(Slot::NIL).take(frame.variable_names.len()))
            .collect();
        debug!(
            "built frame {} at depth {}: {} blocks, {} values, {} captured slots",
            self.context.name_of(name),
            self.frames.len(),
            frame.blocks.len(),
            frame.hirs().count(),
            frame.captured_slots.len()
        );
        Ok(frame)
    }

    fn build_body(&mut self, ast: &BlockAst) -> Result<(), BuildError> {
        let value = self.build_sequence(&ast.statements)?;
        if !self.returned() {
            self.method_return(value);
        }
        Ok(())
    }

    // ========================================================================
    // Frame state
    // ========================================================================

    fn level(&self) -> usize {
        self.frames.len() - 1
    }

    fn frame(&self, level: usize) -> &Frame {
        &self.frames[level].frame
    }

    fn frame_mut(&mut self, level: usize) -> &mut Frame {
        &mut self.frames[level].frame
    }

    fn current_block(&self) -> BlockId {
        self.frames[self.level()].block
    }

    fn set_current_block(&mut self, block: BlockId) {
        let level = self.level();
        self.frames[level].block = block;
    }

    /// True if the current block already ends in a method return.
    fn returned(&self) -> bool {
        self.frame(self.level()).block(self.current_block()).has_method_return
    }

    /// Append to the current block. Nothing is appended after a method
    /// return; the result is then a placeholder nil.
    fn append(&mut self, opcode: HirOpcode, type_flags: TypeFlags) -> HirId {
        let level = self.level();
        let block = self.current_block();
        if self.returned() {
            return self.frame_mut(level).constant(block, Slot::NIL, Placement::Front);
        }
        self.frame_mut(level).add_hir(block, opcode, type_flags, Placement::Append)
    }

    fn constant(&mut self, value: Slot) -> HirId {
        let level = self.level();
        let block = self.current_block();
        let placement = if self.returned() { Placement::Front } else { Placement::Append };
        self.frame_mut(level).constant(block, value, placement)
    }

    /// Add a HIR at the import cursor of a frame's entry block.
    fn import(&mut self, level: usize, opcode: HirOpcode, type_flags: TypeFlags) -> HirId {
        let frame = self.frame_mut(level);
        let entry = frame.entry;
        frame.add_hir(entry, opcode, type_flags, Placement::Import)
    }

    fn import_constant(&mut self, level: usize, value: Slot) -> HirId {
        let frame = self.frame_mut(level);
        let entry = frame.entry;
        frame.constant(entry, value, Placement::Import)
    }

    fn bind(&mut self, level: usize, block: BlockId, key: NameKey, value: HirId) {
        self.frame_mut(level).block_mut(block).revisions.insert(key, value);
    }

    fn new_block(&mut self, scope: crate::compiler::hir::ScopeId) -> UnsealedBlock {
        let level = self.level();
        self.frame_mut(level).new_block(scope)
    }

    fn add_predecessor(&mut self, block: &UnsealedBlock, predecessor: BlockId) {
        let level = self.level();
        self.frame_mut(level).add_predecessor(block, predecessor);
    }

    /// Append a terminating branch to `block`.
    fn branch(&mut self, block: BlockId, opcode: HirOpcode) {
        let level = self.level();
        self.frame_mut(level)
            .add_hir(block, opcode, TypeFlags::NONE, Placement::Append);
    }

    fn method_return(&mut self, value: HirId) {
        self.append(HirOpcode::StoreReturn { value }, TypeFlags::NONE);
        self.append(HirOpcode::MethodReturn, TypeFlags::NONE);
        let level = self.level();
        let block = self.current_block();
        self.frame_mut(level).block_mut(block).has_method_return = true;
    }

    // ========================================================================
    // Name resolution
    // ========================================================================

    /// Value of `name` as read at the end of `block` in frame `level`.
    fn find_name(&mut self, level: usize, block: BlockId, name: Symbol, span: Span) -> Result<HirId, BuildError> {
        let frame = self.frame(level);
        let key = frame.name_key(frame.block(block).scope, name);
        self.find_value(level, block, key, span)
    }

    fn find_value(&mut self, level: usize, block: BlockId, key: NameKey, span: Span) -> Result<HirId, BuildError> {
        let frame = self.frame(level);
        let target = frame.block(block);
        if let Some(value) = target.revisions.get(&key) {
            return Ok(frame.resolve(*value));
        }

        let undeclared = key.scope == frame.root_scope && frame.lookup_declaration(frame.root_scope, key.name).is_none();
        if undeclared {
            if let Some(class) = self.context.class_library.class(key.name) {
                let object = class.object;
                let value = self.frame_mut(level).constant(block, object, Placement::Front);
                self.bind(level, block, key, value);
                return Ok(value);
            }
        }

        let frame = self.frame(level);
        let target = frame.block(block);
        if !target.sealed {
            let phi = self.frame_mut(level).add_hir(
                block,
                HirOpcode::Phi {
                    inputs: Vec::new(),
                    name: Some(key.name),
                },
                TypeFlags::NONE,
                Placement::Phi,
            );
            let state = &mut self.frames[level];
            state.frame.block_mut(block).incomplete_phis.push((key, phi));
            state.phi_spans.insert(phi, span);
            self.bind(level, block, key, phi);
            return Ok(phi);
        }

        let predecessors = target.predecessors.clone();
        let is_entry = block == frame.entry;
        let value = match predecessors.as_slice() {
            [] if is_entry => self.find_external(level, key, span)?,
            // Unreachable block
            [] => self.frame_mut(level).constant(block, Slot::NIL, Placement::Front),
            [single] => self.find_value(level, *single, key, span)?,
            _ => {
                let phi = self.frame_mut(level).add_hir(
                    block,
                    HirOpcode::Phi {
                        inputs: Vec::new(),
                        name: Some(key.name),
                    },
                    TypeFlags::NONE,
                    Placement::Phi,
                );
                self.bind(level, block, key, phi);
                self.fill_phi(level, phi, &predecessors, key, span)?;
                self.try_remove_trivial(level, phi)
            }
        };
        self.bind(level, block, key, value);
        Ok(value)
    }

    fn fill_phi(
        &mut self,
        level: usize,
        phi: HirId,
        predecessors: &[BlockId],
        key: NameKey,
        span: Span,
    ) -> Result<(), BuildError> {
        self.frames[level].pending_phis.push(phi);
        for predecessor in predecessors {
            let input = self.find_value(level, *predecessor, key, span)?;
            self.frame_mut(level).add_phi_input(phi, input);
        }
        self.frames[level].pending_phis.retain(|p| *p != phi);
        Ok(())
    }

    /// Replace `phi` by its only distinct input, if it has one. Phis that
    /// read the removed phi may become trivial in turn.
    fn try_remove_trivial(&mut self, level: usize, phi: HirId) -> HirId {
        let frame = self.frame(level);
        let Some(Hir {
            opcode: HirOpcode::Phi { inputs, .. },
            block,
            consumers,
            ..
        }) = frame.hir(phi)
        else {
            return frame.resolve(phi);
        };

        let mut same = None;
        for input in inputs.iter().map(|input| frame.resolve(*input)) {
            if Some(input) == same || input == phi {
                continue;
            }
            if same.is_some() {
                return phi;
            }
            same = Some(input);
        }

        let block = *block;
        let users: Vec<HirId> = consumers.iter().copied().filter(|user| *user != phi).collect();
        let frame = self.frame_mut(level);
        let replacement = match same {
            Some(value) => value,
            None => frame.constant(block, Slot::NIL, Placement::Front),
        };
        frame.replace_uses(phi, replacement);
        frame.remove_hir(phi);

        for user in users {
            let is_phi = matches!(
                self.frame(level).hir(user).map(|hir| &hir.opcode),
                Some(HirOpcode::Phi { .. })
            );
            if is_phi && !self.frames[level].pending_phis.contains(&user) {
                self.try_remove_trivial(level, user);
            }
        }
        self.frame(level).resolve(replacement)
    }

    /// Mark a block's predecessor set final and complete its phis.
    fn seal(&mut self, block: UnsealedBlock) -> Result<SealedBlock, BuildError> {
        let level = self.level();
        let (sealed, incomplete) = self.frame_mut(level).mark_sealed(block);
        let predecessors = self.frame(level).block(sealed.id()).predecessors.clone();
        for (key, phi) in incomplete {
            let span = self.frames[level].phi_spans.remove(&phi).unwrap_or_default();
            self.fill_phi(level, phi, &predecessors, key, span)?;
            self.try_remove_trivial(level, phi);
        }
        Ok(sealed)
    }

    /// Resolve a name that no block of frame `level` binds.
    fn find_external(&mut self, level: usize, key: NameKey, span: Span) -> Result<HirId, BuildError> {
        let name = key.name;
        let names = self.names;

        // Inside a block literal, `this` is the receiver of the method.
        if name == names.this && level > 0 {
            return self.import_outer(level, 0, name, 0, span);
        }

        let frame = self.frame(level);
        if let Some(index) = frame.argument_names.iter().position(|n| *n == name) {
            return Ok(self.import(level, HirOpcode::LoadArgument { index }, TypeFlags::ALL));
        }
        if key.scope != frame.root_scope || frame.lookup_declaration(frame.root_scope, name).is_some() {
            // Declared in this frame but not yet assigned
            return Ok(self.import_constant(level, Slot::NIL));
        }

        if name == names.super_ {
            let entry = self.frame(level).entry;
            let this = self.find_name(level, entry, names.this, span)?;
            return Ok(self.import(level, HirOpcode::RouteToSuperclass { this }, TypeFlags::ALL));
        }
        if name == names.this_method {
            return Ok(self.import_constant(level, self.method_name.slot()));
        }
        if name == names.this_process {
            return Ok(self.import_constant(level, self.context.this_process));
        }
        if name == names.this_thread {
            return Ok(self.import_constant(level, self.context.this_thread));
        }
        if name == names.current_environment {
            let process = self.import_constant(level, self.context.this_process);
            return Ok(self.import(
                level,
                HirOpcode::Message {
                    selector: names.current_environment,
                    arguments: vec![process],
                    keyword_arguments: Vec::new(),
                },
                TypeFlags::ALL,
            ));
        }

        if let Some((outer, slot)) = self.enclosing_declaration(level, name) {
            return self.import_outer(level, outer, name, slot, span);
        }

        let context = self.context;
        if let Some(class) = self.class {
            let library = &context.class_library;
            if let Some(index) = library.find_instance_variable(class, name) {
                let entry = self.frame(level).entry;
                let this = self.find_name(level, entry, names.this, span)?;
                return Ok(self.import(
                    level,
                    HirOpcode::ImportInstanceVariable { name, this, index },
                    TypeFlags::ALL,
                ));
            }
            if let Some(index) = library.find_class_variable(class, name) {
                let class_variables = self.class_variables(level);
                return Ok(self.import(
                    level,
                    HirOpcode::ImportClassVariable {
                        name,
                        class_variables,
                        index,
                    },
                    TypeFlags::ALL,
                ));
            }
            if let Some(value) = library.find_constant(class, name) {
                return Ok(self.import_constant(level, value));
            }
        }

        Err(BuildError::UndefinedName {
            name: context.name_of(name),
            span,
        })
    }

    /// Innermost enclosing frame whose current scope declares `name`.
    fn enclosing_declaration(&self, level: usize, name: Symbol) -> Option<(usize, usize)> {
        (0..level).rev().find_map(|outer| {
            let state = &self.frames[outer];
            let scope = state.frame.block(state.block).scope;
            state
                .frame
                .lookup_declaration(scope, name)
                .map(|(_, slot)| (outer, slot))
        })
    }

    /// Import slot `slot` of the frame at `outer` into the frame at `level`.
    fn import_outer(
        &mut self,
        level: usize,
        outer: usize,
        name: Symbol,
        slot: usize,
        span: Span,
    ) -> Result<HirId, BuildError> {
        let outer_block = self.frames[outer].block;
        let captured = self.find_name(outer, outer_block, name, span)?;
        let state = &mut self.frames[outer];
        state.frame.captured_slots.insert(slot);
        if !state.captures.iter().any(|(n, _)| *n == name) {
            state.captures.push((name, captured));
        }
        let frame = self.outer_frame(level, level - outer);
        Ok(self.import(
            level,
            HirOpcode::ImportLocalVariable { name, frame, index: slot },
            TypeFlags::ALL,
        ))
    }

    /// Heap frame `hops` levels out from the frame at `level`.
    fn outer_frame(&mut self, level: usize, hops: usize) -> HirId {
        while self.frames[level].hops.len() < hops {
            let inner = self.frames[level].hops.last().copied();
            let id = self.import(level, HirOpcode::LoadOuterFrame { inner }, TypeFlags::RAW_POINTER);
            self.frames[level].hops.push(id);
        }
        self.frames[level].hops[hops - 1]
    }

    fn class_variables(&mut self, level: usize) -> HirId {
        self.import(
            level,
            HirOpcode::ReadFromContext {
                offset: offsets::CLASS_VARIABLES,
            },
            TypeFlags::RAW_POINTER,
        )
    }

    /// Storage an assignment to an undeclared name maps to.
    fn external_target(&mut self, level: usize, name: NameAst) -> Result<AssignTarget, BuildError> {
        let names = self.names;
        if names.is_reserved(name.name) {
            return Err(BuildError::invalid_syntax(
                format!("cannot assign to '{}'", self.context.name_of(name.name)),
                name.span,
            ));
        }
        if let Some((outer, slot)) = self.enclosing_declaration(level, name.name) {
            self.frame_mut(outer).captured_slots.insert(slot);
            let frame = self.outer_frame(level, level - outer);
            return Ok(AssignTarget::Outer { frame, slot });
        }

        let context = self.context;
        if let Some(class) = self.class {
            let library = &context.class_library;
            if let Some(index) = library.find_instance_variable(class, name.name) {
                let entry = self.frame(level).entry;
                let this = self.find_name(level, entry, names.this, name.span)?;
                return Ok(AssignTarget::Instance { this, index });
            }
            if let Some(index) = library.find_class_variable(class, name.name) {
                let class_variables = self.class_variables(level);
                return Ok(AssignTarget::Class { class_variables, index });
            }
        }
        Err(BuildError::UndefinedName {
            name: context.name_of(name.name),
            span: name.span,
        })
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn build_sequence(&mut self, statements: &[Ast]) -> Result<HirId, BuildError> {
        let mut value = None;
        for statement in statements {
            if self.returned() {
                break;
            }
            value = Some(self.build_value(statement)?);
        }
        match value {
            Some(value) => Ok(value),
            None => Ok(self.constant(Slot::NIL)),
        }
    }

    /// Lower one expression, returning its value.
    fn build_value(&mut self, ast: &Ast) -> Result<HirId, BuildError> {
        if self.returned() {
            return Ok(self.constant(Slot::NIL));
        }
        match ast {
            Ast::Empty => Ok(self.constant(Slot::NIL)),
            Ast::Sequence(statements) => self.build_sequence(statements),
            Ast::Constant(value) => Ok(self.constant(*value)),
            Ast::Name(name) => {
                let level = self.level();
                let block = self.current_block();
                self.find_name(level, block, name.name, name.span)
            }
            Ast::Message(message) => self.build_message(message),
            Ast::Block(block) => self.build_block_literal(block),
            Ast::If(conditional) => self.build_if(conditional),
            Ast::While(lp) => self.build_while(lp),
            Ast::Assign(assign) => {
                let value = self.build_value(&assign.value)?;
                self.assign(assign.name, value)?;
                Ok(value)
            }
            Ast::Define(define) => self.build_define(define),
            Ast::MethodReturn(value) => {
                let value = self.build_value(value)?;
                self.method_return(value);
                Ok(value)
            }
            Ast::MultiAssign(multi) => self.build_multi_assign(multi),
        }
    }

    fn build_message(&mut self, message: &MessageAst) -> Result<HirId, BuildError> {
        let mut arguments = Vec::with_capacity(message.arguments.len());
        for argument in &message.arguments {
            arguments.push(self.build_value(argument)?);
        }
        let mut keyword_arguments = Vec::with_capacity(message.keyword_arguments.len() * 2);
        for (key, value) in &message.keyword_arguments {
            keyword_arguments.push(self.constant(key.slot()));
            keyword_arguments.push(self.build_value(value)?);
        }
        Ok(self.append(
            HirOpcode::Message {
                selector: message.selector,
                arguments,
                keyword_arguments,
            },
            TypeFlags::ALL,
        ))
    }

    fn build_block_literal(&mut self, block: &BlockAst) -> Result<HirId, BuildError> {
        let level = self.level();
        let saved = std::mem::take(&mut self.frames[level].captures);
        let frame = self.build_frame_named(block, self.names.value)?;
        let captures = std::mem::replace(&mut self.frames[level].captures, saved);
        Ok(self.append(
            HirOpcode::BlockLiteral {
                frame: Box::new(frame),
                captures,
                function_def: None,
            },
            TypeFlags::OBJECT,
        ))
    }

    fn build_define(&mut self, define: &DefineAst) -> Result<HirId, BuildError> {
        let value = self.build_value(&define.value)?;
        let level = self.level();
        let block = self.current_block();
        let scope = self.frame(level).block(block).scope;
        let slot = self.frame_mut(level).declare_variable(scope, define.name.name);
        self.append(
            HirOpcode::Assign {
                name: define.name.name,
                value,
                target: AssignTarget::Local { slot },
            },
            TypeFlags::NONE,
        );
        let key = NameKey {
            name: define.name.name,
            scope,
        };
        self.bind(level, block, key, value);
        Ok(value)
    }

    fn assign(&mut self, name: NameAst, value: HirId) -> Result<(), BuildError> {
        let level = self.level();
        let block = self.current_block();
        let scope = self.frame(level).block(block).scope;
        let target = match self.frame(level).lookup_declaration(scope, name.name) {
            Some((_, slot)) => AssignTarget::Local { slot },
            None => self.external_target(level, name)?,
        };
        let key = self.frame(level).name_key(scope, name.name);
        self.append(
            HirOpcode::Assign {
                name: name.name,
                value,
                target,
            },
            TypeFlags::NONE,
        );
        self.bind(level, block, key, value);
        Ok(())
    }

    fn build_multi_assign(&mut self, multi: &MultiAssignAst) -> Result<HirId, BuildError> {
        let array = self.build_value(&multi.array_value)?;
        let count = multi.targets.len();
        for (i, target) in multi.targets.iter().enumerate() {
            let selector = if multi.last_is_remain && i + 1 == count {
                self.names.copy_to_end
            } else {
                self.names.at
            };
            let index = self.constant(Slot::make_int32(i as i32));
            let element = self.append(
                HirOpcode::Message {
                    selector,
                    arguments: vec![array, index],
                    keyword_arguments: Vec::new(),
                },
                TypeFlags::ALL,
            );
            self.assign(*target, element)?;
        }
        Ok(array)
    }

    // ========================================================================
    // Control flow
    // ========================================================================

    fn build_if(&mut self, conditional: &IfAst) -> Result<HirId, BuildError> {
        let condition = self.build_value(&conditional.condition)?;
        if self.returned() {
            return Ok(condition);
        }
        let level = self.level();
        let before = self.current_block();
        let scope = self.frame(level).block(before).scope;

        let true_scope = self.frame_mut(level).new_scope(scope);
        let true_block = self.new_block(true_scope);
        self.add_predecessor(&true_block, before);
        let false_scope = self.frame_mut(level).new_scope(scope);
        let false_block = self.new_block(false_scope);
        self.add_predecessor(&false_block, before);
        self.branch(
            before,
            HirOpcode::BranchIfTrue {
                condition,
                target: true_block.id(),
            },
        );
        self.branch(before, HirOpcode::Branch { target: false_block.id() });

        let join = self.new_block(scope);
        let true_arm = self.build_arm(true_block, &conditional.true_block.statements, &join)?;
        let false_arm = self.build_arm(false_block, &conditional.false_block.statements, &join)?;
        let join = self.seal(join)?;
        self.set_current_block(join.id());

        let value = match (true_arm, false_arm) {
            (Some(true_value), Some(false_value)) => {
                let frame = self.frame_mut(level);
                let phi = frame.add_hir(
                    join.id(),
                    HirOpcode::Phi {
                        inputs: Vec::new(),
                        name: None,
                    },
                    TypeFlags::NONE,
                    Placement::Phi,
                );
                frame.add_phi_input(phi, true_value);
                frame.add_phi_input(phi, false_value);
                self.try_remove_trivial(level, phi)
            }
            (Some(value), None) | (None, Some(value)) => value,
            (None, None) => {
                let value = self.constant(Slot::NIL);
                self.frame_mut(level).block_mut(join.id()).has_method_return = true;
                value
            }
        };
        Ok(value)
    }

    /// Lower one arm of an `if` into `entry`, wiring it to `join` unless it
    /// returns. Returns the arm's value if control reaches the join.
    fn build_arm(
        &mut self,
        entry: UnsealedBlock,
        statements: &[Ast],
        join: &UnsealedBlock,
    ) -> Result<Option<HirId>, BuildError> {
        let entry = self.seal(entry)?;
        self.set_current_block(entry.id());
        let value = self.build_sequence(statements)?;
        if self.returned() {
            return Ok(None);
        }
        let exit = self.current_block();
        self.branch(exit, HirOpcode::Branch { target: join.id() });
        self.add_predecessor(join, exit);
        Ok(Some(value))
    }

    fn build_while(&mut self, lp: &WhileAst) -> Result<HirId, BuildError> {
        let level = self.level();
        let before = self.current_block();
        let scope = self.frame(level).block(before).scope;

        let condition_scope = self.frame_mut(level).new_scope(scope);
        let header = self.new_block(condition_scope);
        self.add_predecessor(&header, before);
        self.branch(before, HirOpcode::Branch { target: header.id() });
        self.set_current_block(header.id());

        let condition = self.build_sequence(&lp.condition_block.statements)?;
        if self.returned() {
            self.seal(header)?;
            return Ok(condition);
        }
        let condition_exit = self.current_block();

        let body_scope = self.frame_mut(level).new_scope(scope);
        let body = self.new_block(body_scope);
        let exit = self.new_block(scope);
        self.add_predecessor(&body, condition_exit);
        self.add_predecessor(&exit, condition_exit);
        self.branch(
            condition_exit,
            HirOpcode::BranchIfTrue {
                condition,
                target: body.id(),
            },
        );
        self.branch(condition_exit, HirOpcode::Branch { target: exit.id() });

        let body = self.seal(body)?;
        self.set_current_block(body.id());
        self.build_sequence(&lp.repeat_block.statements)?;
        if !self.returned() {
            let body_exit = self.current_block();
            self.branch(body_exit, HirOpcode::Branch { target: header.id() });
            self.add_predecessor(&header, body_exit);
        }
        self.seal(header)?;
        let exit = self.seal(exit)?;
        self.set_current_block(exit.id());
        Ok(self.constant(Slot::NIL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast_builder::AstBuilder;
    use crate::parser::parse_interpreter;

    fn build_in(context: &mut ThreadContext, class: Option<Symbol>, source: &str) -> Result<Frame, BuildError> {
        let tree = parse_interpreter(source).unwrap();
        let ast = AstBuilder::new(context, source, &tree.tokens)
            .build_interpreter(&tree.root)
            .unwrap();
        let name = context.intern("interpret").unwrap();
        BlockBuilder::new(context, class, name)?.build_frame(&ast)
    }

    fn build(source: &str) -> (ThreadContext, Frame) {
        let mut context = ThreadContext::new().unwrap();
        let frame = build_in(&mut context, None, source).unwrap();
        (context, frame)
    }

    fn opcodes(frame: &Frame, block: BlockId) -> Vec<&'static str> {
        let block = frame.block(block);
        block
            .phis
            .iter()
            .chain(&block.statements)
            .filter_map(|id| frame.hir(*id))
            .map(|hir| hir.opcode.name())
            .collect()
    }

    fn phis(frame: &Frame) -> Vec<&Hir> {
        frame
            .hirs()
            .filter(|hir| matches!(hir.opcode, HirOpcode::Phi { .. }))
            .collect()
    }

    fn inner_frame(frame: &Frame) -> &Frame {
        match frame.hir(frame.inner_blocks[0]).map(|hir| &hir.opcode) {
            Some(HirOpcode::BlockLiteral { frame, .. }) => frame,
            other => panic!("expected block literal, got {:?}", other),
        }
    }

    #[test]
    fn test_nil_returns_constant() {
        let (_, frame) = build("nil");
        assert_eq!(frame.blocks.len(), 1);
        assert_eq!(opcodes(&frame, frame.entry), vec!["Constant", "StoreReturn", "MethodReturn"]);
        assert!(frame.block(frame.entry).has_method_return);
    }

    #[test]
    fn test_define_then_add() {
        let (context, frame) = build("var x = 2; x + 3");
        assert_eq!(
            opcodes(&frame, frame.entry),
            vec!["Constant", "Assign", "Constant", "Message", "StoreReturn", "MethodReturn"]
        );
        let message = frame
            .hirs()
            .find(|hir| matches!(hir.opcode, HirOpcode::Message { .. }))
            .unwrap();
        let HirOpcode::Message { selector, arguments, .. } = &message.opcode else {
            unreachable!()
        };
        assert_eq!(context.name_of(*selector), "+");
        let two = frame.hir(arguments[0]).unwrap();
        assert_eq!(two.opcode, HirOpcode::Constant(Slot::make_int32(2)));
        assert_eq!(frame.variable_names.len(), 1);
        assert_eq!(frame.prototype_frame, vec![Slot::NIL, Slot::NIL]);
    }

    #[test]
    fn test_if_joins_with_phi() {
        let (_, frame) = build("if(true, {1}, {2})");
        assert_eq!(frame.blocks.len(), 4);
        let phis = phis(&frame);
        assert_eq!(phis.len(), 1);
        let HirOpcode::Phi { inputs, name } = &phis[0].opcode else {
            unreachable!()
        };
        assert_eq!(*name, None);
        assert_eq!(inputs.len(), 2);
        assert_eq!(frame.hir(inputs[0]).unwrap().opcode, HirOpcode::Constant(Slot::make_int32(1)));
        assert_eq!(frame.hir(inputs[1]).unwrap().opcode, HirOpcode::Constant(Slot::make_int32(2)));
        assert_eq!(frame.block(phis[0].block).predecessors.len(), 2);
    }

    #[test]
    fn test_unchanged_name_needs_no_phi() {
        let (_, frame) = build("var x = 1; if(true, {2}); x");
        assert!(phis(&frame)
            .iter()
            .all(|phi| matches!(phi.opcode, HirOpcode::Phi { name: None, .. })));
        let last = frame.block(BlockId(3)).statements.clone();
        let store = frame.hir(last[last.len() - 2]).unwrap();
        assert_eq!(store.opcode.name(), "StoreReturn");
        let HirOpcode::StoreReturn { value } = store.opcode else {
            unreachable!()
        };
        assert_eq!(frame.hir(value).unwrap().opcode, HirOpcode::Constant(Slot::make_int32(1)));
    }

    #[test]
    fn test_while_loop_carries_phi() {
        let (_, frame) = build("var i = 0; while({i < 10}, {i = i + 1}); i");
        let phis = phis(&frame);
        assert_eq!(phis.len(), 1);
        let HirOpcode::Phi { inputs, .. } = &phis[0].opcode else {
            unreachable!()
        };
        assert_eq!(inputs.len(), 2);
        assert_eq!(frame.hir(inputs[0]).unwrap().opcode, HirOpcode::Constant(Slot::make_int32(0)));
        assert_eq!(frame.hir(inputs[1]).unwrap().opcode.name(), "Message");
        assert!(frame.blocks.iter().all(|block| block.sealed));
    }

    #[test]
    fn test_block_literal_has_own_frame() {
        let (_, frame) = build("{ arg a, b; a + b }.value(4, 5)");
        let inner = inner_frame(&frame);
        assert_eq!(inner.argument_names.len(), 3);
        assert_eq!(
            opcodes(inner, inner.entry),
            vec!["LoadArgument", "LoadArgument", "Message", "StoreReturn", "MethodReturn"]
        );
        let message = frame
            .hirs()
            .find(|hir| matches!(hir.opcode, HirOpcode::Message { .. }))
            .unwrap();
        assert_eq!(message.reads()[0], frame.inner_blocks[0]);
    }

    #[test]
    fn test_closure_imports_outer_variable() {
        let (_, frame) = build("var x = 1; { x + 1 }");
        assert!(frame.captured_slots.contains(&1));
        let inner = inner_frame(&frame);
        let imports: Vec<_> = opcodes(inner, inner.entry);
        assert_eq!(imports[0], "LoadOuterFrame");
        assert_eq!(imports[1], "ImportLocalVariable");
        let Some(HirOpcode::BlockLiteral { captures, .. }) = frame.hir(frame.inner_blocks[0]).map(|h| &h.opcode) else {
            unreachable!()
        };
        assert_eq!(captures.len(), 1);
    }

    #[test]
    fn test_nested_closure_chains_hops() {
        let (_, frame) = build("var x = 1; { { x } }");
        let middle = inner_frame(&frame);
        assert!(middle.hirs().all(|hir| !hir.opcode.is_import()));
        let innermost = inner_frame(middle);
        let hops = innermost
            .hirs()
            .filter(|hir| matches!(hir.opcode, HirOpcode::LoadOuterFrame { .. }))
            .count();
        assert_eq!(hops, 2);
    }

    #[test]
    fn test_assign_to_outer_variable() {
        let (_, frame) = build("var x = 1; { x = 2 }");
        let inner = inner_frame(&frame);
        let assign = inner
            .hirs()
            .find(|hir| matches!(hir.opcode, HirOpcode::Assign { .. }))
            .unwrap();
        assert!(matches!(
            assign.opcode,
            HirOpcode::Assign {
                target: AssignTarget::Outer { slot: 1, .. },
                ..
            }
        ));
        assert!(frame.captured_slots.contains(&1));
    }

    #[test]
    fn test_explicit_return_is_not_doubled() {
        let (_, frame) = build("^1");
        assert_eq!(opcodes(&frame, frame.entry), vec!["Constant", "StoreReturn", "MethodReturn"]);
    }

    #[test]
    fn test_returning_arm_has_no_join_edge() {
        let (_, frame) = build("if(true, {^1}, {2}); 3");
        assert!(phis(&frame).is_empty());
        let join = frame.blocks.last().unwrap();
        assert_eq!(join.predecessors.len(), 1);
    }

    #[test]
    fn test_class_name_is_constant() {
        let (context, frame) = build("Array");
        let array = context.class_library.class(context.intern("Array").unwrap()).unwrap().object;
        assert_eq!(frame.hir(HirId(0)).unwrap().opcode, HirOpcode::Constant(array));
    }

    #[test]
    fn test_undefined_name() {
        let mut context = ThreadContext::new().unwrap();
        let err = build_in(&mut context, None, "nope + 1").unwrap_err();
        assert!(matches!(err, BuildError::UndefinedName { ref name, .. } if name == "nope"));
    }

    #[test]
    fn test_instance_and_class_variables() {
        let mut context = ThreadContext::new().unwrap();
        let point = context
            .class_library
            .define_class(&context.symbols, &mut context.heap, "Point", Some("Object"))
            .unwrap();
        let x = context.intern("x").unwrap();
        let count = context.intern("count").unwrap();
        context.class_library.add_instance_variable(point, x).unwrap();
        context.class_library.add_class_variable(point, count, Slot::make_int32(0)).unwrap();
        let frame = build_in(&mut context, Some(point), "count = x").unwrap();
        let names: Vec<_> = opcodes(&frame, frame.entry);
        assert_eq!(&names[..3], &["LoadArgument", "ImportInstanceVariable", "ReadFromContext"]);
        assert!(frame.hirs().any(|hir| matches!(
            hir.opcode,
            HirOpcode::Assign {
                target: AssignTarget::Class { .. },
                ..
            }
        )));
    }

    #[test]
    fn test_this_in_closure_comes_from_method() {
        let (_, frame) = build("{ this }");
        let inner = inner_frame(&frame);
        assert!(inner
            .hirs()
            .any(|hir| matches!(hir.opcode, HirOpcode::ImportLocalVariable { index: 0, .. })));
        assert!(frame.captured_slots.contains(&0));
    }
}
