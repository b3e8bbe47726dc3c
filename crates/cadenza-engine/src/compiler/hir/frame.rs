//! Frames, scopes, and blocks
//!
//! A [`Frame`] owns everything: the HIR arena, the blocks, and the scope
//! tree. Blocks point at their scope and scopes at their blocks by index.
//!
//! Blocks start out unsealed while their predecessor set may still grow.
//! [`UnsealedBlock`] is the only handle that can add predecessors, and
//! sealing consumes it, so a sealed block can never gain a new edge.

use std::collections::BTreeSet;

use cadenza_sdk::{Slot, TypeFlags};
use rustc_hash::FxHashMap;
use serde::Serialize;

use super::{BlockId, Hir, HirId, HirOpcode, ScopeId};
use crate::runtime::Symbol;

/// A name as seen from one scope: the name plus the scope declaring it.
/// Arguments and names defined outside the frame use the root scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NameKey {
    /// The name
    pub name: Symbol,
    /// Declaring scope
    pub scope: ScopeId,
}

/// Basic block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    /// Block id, unique in the frame
    pub id: BlockId,
    /// Owning scope
    pub scope: ScopeId,
    /// Phis, evaluated on entry
    pub phis: Vec<HirId>,
    /// Statements in order; the last one of a block with successors is a branch
    pub statements: Vec<HirId>,
    /// Predecessors, in the order their edges were added
    pub predecessors: Vec<BlockId>,
    /// Successors, in branch order
    pub successors: Vec<BlockId>,
    /// Constant bits to the constant defined in this block
    pub constant_values: FxHashMap<u64, HirId>,
    /// Every constant defined in this block
    pub constant_ids: BTreeSet<HirId>,
    /// Ends in a method return
    pub has_method_return: bool,
    /// Most recent value of each name bound in this block
    #[serde(skip)]
    pub revisions: FxHashMap<NameKey, HirId>,
    /// Predecessor set is final
    pub sealed: bool,
    /// Phis created before sealing, completed when the block is sealed
    pub incomplete_phis: Vec<(NameKey, HirId)>,
}

/// Lexical scope.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Scope {
    /// Enclosing scope; `None` for the root
    pub parent: Option<ScopeId>,
    /// Blocks in this scope, in creation order
    pub blocks: Vec<BlockId>,
    /// Names declared here with their heap frame slots
    pub names: Vec<(Symbol, usize)>,
    /// Nested scopes
    pub sub_scopes: Vec<ScopeId>,
}

/// Handle to a block that may still gain predecessors.
#[derive(Debug, PartialEq, Eq)]
pub struct UnsealedBlock(BlockId);

impl UnsealedBlock {
    /// Block id.
    pub fn id(&self) -> BlockId {
        self.0
    }
}

/// Handle to a block whose predecessor set is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedBlock(BlockId);

impl SealedBlock {
    /// Block id.
    pub fn id(self) -> BlockId {
        self.0
    }

    /// True if every path from the frame entry to this block passes
    /// through `dominator`.
    pub fn is_dominated_by(self, frame: &Frame, dominator: BlockId) -> bool {
        if dominator == self.0 || dominator == frame.entry {
            return true;
        }
        // Reachable from the entry without passing the dominator means not dominated.
        let mut visited = vec![false; frame.blocks.len()];
        let mut stack = vec![frame.entry];
        while let Some(block) = stack.pop() {
            if block == dominator || visited[block.index()] {
                continue;
            }
            if block == self.0 {
                return false;
            }
            visited[block.index()] = true;
            stack.extend(frame.blocks[block.index()].successors.iter().copied());
        }
        true
    }
}

/// Where a new HIR goes in its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// After the last statement
    Append,
    /// Before the first statement
    Front,
    /// At the frame's import cursor in the entry block
    Import,
    /// In the block's phi list
    Phi,
}

/// A method or function literal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    /// Selector or `value`
    pub name: Symbol,
    /// HIR arena; removed entries are `None`
    pub values: Vec<Option<Hir>>,
    /// Blocks by id
    pub blocks: Vec<Block>,
    /// Scopes by id
    pub scopes: Vec<Scope>,
    /// Scope holding the arguments
    pub root_scope: ScopeId,
    /// First block; also where imports are placed
    pub entry: BlockId,
    /// Argument names, `this` first
    pub argument_names: Vec<Symbol>,
    /// Literal default values, parallel to `argument_names`
    pub argument_defaults: Vec<Slot>,
    /// Last argument collects the rest
    pub has_var_args: bool,
    /// Variable names in declaration order
    pub variable_names: Vec<Symbol>,
    /// Initial heap frame contents
    pub prototype_frame: Vec<Slot>,
    /// `BlockLiteral` HIRs of this frame
    pub inner_blocks: Vec<HirId>,
    /// Heap frame slots that inner frames read or write
    pub captured_slots: BTreeSet<usize>,
    /// Runtime primitive replacing the body
    pub primitive: Option<Symbol>,
    /// Insertion point for imports in the entry block
    pub import_cursor: usize,
    /// Replaced value ids and their replacements
    #[serde(skip)]
    forwards: FxHashMap<HirId, HirId>,
}

impl Frame {
    /// Create a frame with a root scope holding the arguments and a sealed
    /// entry block.
    pub fn new(
        name: Symbol,
        argument_names: Vec<Symbol>,
        argument_defaults: Vec<Slot>,
        has_var_args: bool,
    ) -> Self {
        let root = Scope {
            names: argument_names.iter().copied().enumerate().map(|(i, n)| (n, i)).collect(),
            ..Scope::default()
        };
        let mut frame = Frame {
            name,
            values: Vec::new(),
            blocks: Vec::new(),
            scopes: vec![root],
            root_scope: ScopeId(0),
            entry: BlockId(0),
            argument_names,
            argument_defaults,
            has_var_args,
            variable_names: Vec::new(),
            prototype_frame: Vec::new(),
            inner_blocks: Vec::new(),
            captured_slots: BTreeSet::new(),
            primitive: None,
            import_cursor: 0,
            forwards: FxHashMap::default(),
        };
        let entry = frame.new_block(ScopeId(0));
        frame.mark_sealed(entry);
        frame
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    /// Create a scope nested in `parent`.
    pub fn new_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent: Some(parent),
            ..Scope::default()
        });
        self.scopes[parent.index()].sub_scopes.push(id);
        id
    }

    /// Declare a variable in `scope`, returning its heap frame slot.
    pub fn declare_variable(&mut self, scope: ScopeId, name: Symbol) -> usize {
        let slot = self.argument_names.len() + self.variable_names.len();
        self.variable_names.push(name);
        self.scopes[scope.index()].names.push((name, slot));
        slot
    }

    /// Declaration of `name` visible from `scope`, innermost first.
    pub fn lookup_declaration(&self, scope: ScopeId, name: Symbol) -> Option<(ScopeId, usize)> {
        let mut next = Some(scope);
        while let Some(id) = next {
            let scope = &self.scopes[id.index()];
            if let Some((_, slot)) = scope.names.iter().rev().find(|(n, _)| *n == name) {
                return Some((id, *slot));
            }
            next = scope.parent;
        }
        None
    }

    /// Key under which `name` is tracked when read from `scope`.
    pub fn name_key(&self, scope: ScopeId, name: Symbol) -> NameKey {
        let scope = self
            .lookup_declaration(scope, name)
            .map(|(scope, _)| scope)
            .unwrap_or(self.root_scope);
        NameKey { name, scope }
    }

    // ========================================================================
    // Blocks
    // ========================================================================

    /// Create an unsealed block in `scope`.
    pub fn new_block(&mut self, scope: ScopeId) -> UnsealedBlock {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            id,
            scope,
            phis: Vec::new(),
            statements: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            constant_values: FxHashMap::default(),
            constant_ids: BTreeSet::new(),
            has_method_return: false,
            revisions: FxHashMap::default(),
            sealed: false,
            incomplete_phis: Vec::new(),
        });
        self.scopes[scope.index()].blocks.push(id);
        UnsealedBlock(id)
    }

    /// Record the edge `predecessor -> block`.
    pub fn add_predecessor(&mut self, block: &UnsealedBlock, predecessor: BlockId) {
        self.blocks[block.0.index()].predecessors.push(predecessor);
        self.blocks[predecessor.index()].successors.push(block.0);
    }

    /// Mark `block` sealed. The caller completes the returned incomplete phis.
    pub fn mark_sealed(&mut self, block: UnsealedBlock) -> (SealedBlock, Vec<(NameKey, HirId)>) {
        let entry = &mut self.blocks[block.0.index()];
        entry.sealed = true;
        let incomplete = std::mem::take(&mut entry.incomplete_phis);
        (SealedBlock(block.0), incomplete)
    }

    /// Block by id.
    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Mutable block by id.
    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// Sealed handle for a block already marked sealed.
    pub fn sealed(&self, id: BlockId) -> Option<SealedBlock> {
        self.blocks.get(id.index()).filter(|b| b.sealed).map(|_| SealedBlock(id))
    }

    /// Blocks reachable from the entry in reverse postorder. Successors
    /// are visited last-first, so a loop body precedes the loop exit.
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut postorder = Vec::with_capacity(self.blocks.len());
        // (block, next successor to visit, counting down)
        let mut stack = vec![(self.entry, self.blocks[self.entry.index()].successors.len())];
        visited[self.entry.index()] = true;
        while let Some((block, remaining)) = stack.pop() {
            if remaining == 0 {
                postorder.push(block);
                continue;
            }
            stack.push((block, remaining - 1));
            let successor = self.blocks[block.index()].successors[remaining - 1];
            if !visited[successor.index()] {
                visited[successor.index()] = true;
                stack.push((successor, self.blocks[successor.index()].successors.len()));
            }
        }
        postorder.reverse();
        postorder
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// HIR by id, if it has not been removed.
    #[inline]
    pub fn hir(&self, id: HirId) -> Option<&Hir> {
        self.values.get(id.index()).and_then(Option::as_ref)
    }

    /// Mutable HIR by id.
    #[inline]
    pub fn hir_mut(&mut self, id: HirId) -> Option<&mut Hir> {
        self.values.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Live HIRs in id order.
    pub fn hirs(&self) -> impl Iterator<Item = &Hir> {
        self.values.iter().flatten()
    }

    /// Add a HIR to `block`, registering it as a consumer of its reads.
    pub fn add_hir(&mut self, block: BlockId, mut opcode: HirOpcode, type_flags: TypeFlags, placement: Placement) -> HirId {
        let id = HirId(self.values.len() as u32);
        for read in opcode.reads() {
            let current = self.resolve(read);
            if current != read {
                opcode.replace_input(read, current);
            }
        }
        for read in opcode.reads() {
            if let Some(hir) = self.hir_mut(read) {
                hir.consumers.insert(id);
            }
        }
        if matches!(opcode, HirOpcode::BlockLiteral { .. }) {
            self.inner_blocks.push(id);
        }
        self.values.push(Some(Hir {
            id,
            opcode,
            type_flags,
            consumers: BTreeSet::new(),
            block,
        }));

        let entry = self.entry;
        let cursor = self.import_cursor;
        let target = &mut self.blocks[block.index()];
        match placement {
            Placement::Append => target.statements.push(id),
            Placement::Front => {
                target.statements.insert(0, id);
                if block == entry {
                    self.import_cursor += 1;
                }
            }
            Placement::Import => {
                let index = cursor.min(target.statements.len());
                target.statements.insert(index, id);
                self.import_cursor = index + 1;
            }
            Placement::Phi => target.phis.push(id),
        }
        id
    }

    /// Shared constant for `value` in `block`, creating it if needed. An
    /// import of a constant the entry block already holds past the import
    /// cursor moves it up to the cursor, so later imports may read it.
    pub fn constant(&mut self, block: BlockId, value: Slot, placement: Placement) -> HirId {
        if let Some(id) = self.blocks[block.index()].constant_values.get(&value.as_bits()).copied() {
            if placement == Placement::Import && block == self.entry {
                self.hoist_to_import_cursor(id);
            }
            return id;
        }
        let id = self.add_hir(block, HirOpcode::Constant(value), value.type_flags(), placement);
        let target = &mut self.blocks[block.index()];
        target.constant_values.insert(value.as_bits(), id);
        target.constant_ids.insert(id);
        id
    }

    fn hoist_to_import_cursor(&mut self, id: HirId) {
        let cursor = self.import_cursor;
        let statements = &mut self.blocks[self.entry.index()].statements;
        if let Some(position) = statements.iter().position(|s| *s == id) {
            if position >= cursor {
                statements.remove(position);
                statements.insert(cursor.min(statements.len()), id);
                self.import_cursor = cursor + 1;
            }
        }
    }

    /// Append an input to a phi.
    pub fn add_phi_input(&mut self, phi: HirId, input: HirId) {
        let input = self.resolve(input);
        let input_flags = self.hir(input).map(|h| h.type_flags).unwrap_or(TypeFlags::ALL);
        if let Some(hir) = self.hir_mut(input) {
            hir.consumers.insert(phi);
        }
        if let Some(hir) = self.hir_mut(phi) {
            if let HirOpcode::Phi { inputs, .. } = &mut hir.opcode {
                inputs.push(input);
            }
            hir.type_flags |= input_flags;
        }
    }

    /// Follow replacements of `id` to the value that stands for it now.
    pub fn resolve(&self, mut id: HirId) -> HirId {
        while let Some(next) = self.forwards.get(&id) {
            id = *next;
        }
        id
    }

    /// Make every reader of `old` read `new` instead, including name
    /// bindings, and remember the replacement.
    pub fn replace_uses(&mut self, old: HirId, new: HirId) {
        if old == new {
            return;
        }
        let consumers = self
            .hir_mut(old)
            .map(|h| std::mem::take(&mut h.consumers))
            .unwrap_or_default();
        for consumer in consumers {
            if consumer == old {
                continue;
            }
            if let Some(hir) = self.hir_mut(consumer) {
                hir.opcode.replace_input(old, new);
            }
            if let Some(hir) = self.hir_mut(new) {
                hir.consumers.insert(consumer);
            }
        }
        for block in &mut self.blocks {
            for value in block.revisions.values_mut() {
                if *value == old {
                    *value = new;
                }
            }
        }
        self.forwards.insert(old, new);
    }

    /// Remove a HIR from its block and the arena.
    pub fn remove_hir(&mut self, id: HirId) {
        let Some(hir) = self.values.get_mut(id.index()).and_then(Option::take) else {
            return;
        };
        for read in hir.opcode.reads() {
            if let Some(input) = self.hir_mut(read) {
                input.consumers.remove(&id);
            }
        }
        let entry = self.entry;
        let block = &mut self.blocks[hir.block.index()];
        block.phis.retain(|p| *p != id);
        if let Some(position) = block.statements.iter().position(|s| *s == id) {
            block.statements.remove(position);
            if hir.block == entry && position < self.import_cursor {
                self.import_cursor -= 1;
            }
        }
        if let HirOpcode::Constant(value) = hir.opcode {
            block.constant_values.remove(&value.as_bits());
            block.constant_ids.remove(&id);
        }
        self.inner_blocks.retain(|b| *b != id);
    }

    /// Replace the opcode of `id`, keeping consumer sets consistent.
    pub fn set_opcode(&mut self, id: HirId, opcode: HirOpcode) {
        let old_reads = self.hir(id).map(|h| h.opcode.reads()).unwrap_or_default();
        for read in old_reads {
            if let Some(input) = self.hir_mut(read) {
                input.consumers.remove(&id);
            }
        }
        for read in opcode.reads() {
            if let Some(input) = self.hir_mut(read) {
                input.consumers.insert(id);
            }
        }
        if let Some(hir) = self.hir_mut(id) {
            hir.opcode = opcode;
        }
    }

    /// Number of heap frame slots.
    pub fn frame_slots(&self) -> usize {
        self.argument_names.len() + self.variable_names.len()
    }
}
