//! Name saver
//!
//! After SSA construction an `Assign` only records which name a value was
//! bound to. This pass decides which bindings must reach memory:
//!
//! - locals no inner frame sees live purely in SSA values, so their
//!   assignments are dropped;
//! - captured locals, enclosing-frame variables, instance variables, and
//!   class variables are written back with `WriteTo*`;
//! - imports become the matching `ReadFrom*`.
//!
//! Captured arguments are copied into the heap frame on entry. Running the
//! pass on its own output changes nothing.

use std::collections::BTreeSet;

use cadenza_sdk::TypeFlags;
use log::debug;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::compiler::hir::{AssignTarget, Frame, HirId, HirOpcode, Placement};

/// Where a named binding lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NameClass {
    /// Only in SSA values
    Local,
    /// In a heap frame slot an inner or outer frame can see
    Captured,
    /// In an instance variable of the receiver
    Instance,
    /// In a class variable
    Class,
}

impl NameClass {
    fn of(target: &AssignTarget, captured_slots: &BTreeSet<usize>) -> Self {
        match target {
            AssignTarget::Local { slot } if captured_slots.contains(slot) => NameClass::Captured,
            AssignTarget::Local { .. } => NameClass::Local,
            AssignTarget::Outer { .. } => NameClass::Captured,
            AssignTarget::Instance { .. } => NameClass::Instance,
            AssignTarget::Class { .. } => NameClass::Class,
        }
    }
}

/// What the pass did to one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NameSaverReport {
    /// Assignments dropped
    pub removed_assigns: usize,
    /// Assignments turned into stores
    pub stores: usize,
    /// Imports turned into loads
    pub loads: usize,
}

/// Run the pass over `frame` and every frame nested in it.
pub fn save_names(frame: &mut Frame) -> NameSaverReport {
    let mut report = NameSaverReport::default();
    save_frame(frame, &mut report);
    report
}

fn save_frame(frame: &mut Frame, report: &mut NameSaverReport) {
    for id in frame.inner_blocks.clone() {
        if let Some(HirOpcode::BlockLiteral { frame: inner, .. }) = frame.hir_mut(id).map(|hir| &mut hir.opcode) {
            save_frame(inner, report);
        }
    }

    spill_captured_arguments(frame, report);

    for block in frame.reverse_postorder() {
        // Last value stored to each location in this block
        let mut stored: FxHashMap<StoreKey, HirId> = FxHashMap::default();
        for id in frame.block(block).statements.clone() {
            let Some(hir) = frame.hir(id) else {
                continue;
            };
            match hir.opcode.clone() {
                HirOpcode::Assign { value, target, .. } => {
                    let class = NameClass::of(&target, &frame.captured_slots);
                    let key = StoreKey::of(&target);
                    if class == NameClass::Local || stored.get(&key) == Some(&value) {
                        frame.remove_hir(id);
                        report.removed_assigns += 1;
                        continue;
                    }
                    stored.insert(key, value);
                    frame.set_opcode(id, store_for(target, value));
                    report.stores += 1;
                }
                HirOpcode::ImportLocalVariable { frame: outer, index, .. } => {
                    frame.set_opcode(
                        id,
                        HirOpcode::ReadFromFrame {
                            frame: Some(outer),
                            index,
                        },
                    );
                    report.loads += 1;
                }
                HirOpcode::ImportInstanceVariable { this, index, .. } => {
                    frame.set_opcode(id, HirOpcode::ReadFromThis { this, index });
                    report.loads += 1;
                }
                HirOpcode::ImportClassVariable {
                    class_variables, index, ..
                } => {
                    frame.set_opcode(id, HirOpcode::ReadFromClass { class_variables, index });
                    report.loads += 1;
                }
                HirOpcode::Message { .. } => stored.clear(),
                _ => {}
            }
        }
    }

    debug!(
        "saved names of frame {}: {:?} ({} captured slots)",
        frame.name,
        report,
        frame.captured_slots.len()
    );
}

/// Storage location of an assignment, for spotting repeated stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StoreKey {
    Frame(Option<HirId>, usize),
    This(HirId, usize),
    Class(HirId, usize),
}

impl StoreKey {
    fn of(target: &AssignTarget) -> Self {
        match *target {
            AssignTarget::Local { slot } => StoreKey::Frame(None, slot),
            AssignTarget::Outer { frame, slot } => StoreKey::Frame(Some(frame), slot),
            AssignTarget::Instance { this, index } => StoreKey::This(this, index),
            AssignTarget::Class { class_variables, index } => StoreKey::Class(class_variables, index),
        }
    }
}

fn store_for(target: AssignTarget, value: HirId) -> HirOpcode {
    match target {
        AssignTarget::Local { slot } => HirOpcode::WriteToFrame {
            frame: None,
            index: slot,
            value,
        },
        AssignTarget::Outer { frame, slot } => HirOpcode::WriteToFrame {
            frame: Some(frame),
            index: slot,
            value,
        },
        AssignTarget::Instance { this, index } => HirOpcode::WriteToThis { this, index, value },
        AssignTarget::Class { class_variables, index } => HirOpcode::WriteToClass {
            class_variables,
            index,
            value,
        },
    }
}

/// Copy each captured argument into its heap frame slot at frame entry.
fn spill_captured_arguments(frame: &mut Frame, report: &mut NameSaverReport) {
    let entry = frame.entry;
    let argument_count = frame.argument_names.len();
    let captured: Vec<usize> = frame
        .captured_slots
        .iter()
        .copied()
        .filter(|slot| *slot < argument_count)
        .collect();
    for index in captured {
        let already_stored = frame.block(entry).statements.iter().any(|id| {
            matches!(
                frame.hir(*id).map(|hir| &hir.opcode),
                Some(HirOpcode::WriteToFrame { frame: None, index: i, .. }) if *i == index
            )
        });
        if already_stored {
            continue;
        }
        let loaded = frame
            .block(entry)
            .statements
            .iter()
            .copied()
            .find(|id| matches!(frame.hir(*id).map(|hir| &hir.opcode), Some(HirOpcode::LoadArgument { index: i }) if *i == index));
        let value = match loaded {
            Some(value) => value,
            None => frame.add_hir(entry, HirOpcode::LoadArgument { index }, TypeFlags::ALL, Placement::Import),
        };
        frame.add_hir(
            entry,
            HirOpcode::WriteToFrame {
                frame: None,
                index,
                value,
            },
            TypeFlags::NONE,
            Placement::Import,
        );
        report.stores += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast_builder::AstBuilder;
    use crate::compiler::block_builder::BlockBuilder;
    use crate::parser::parse_interpreter;
    use crate::runtime::ThreadContext;

    fn build(source: &str) -> Frame {
        let mut context = ThreadContext::new().unwrap();
        let tree = parse_interpreter(source).unwrap();
        let ast = AstBuilder::new(&mut context, source, &tree.tokens)
            .build_interpreter(&tree.root)
            .unwrap();
        let name = context.intern("interpret").unwrap();
        BlockBuilder::new(&context, None, name)
            .unwrap()
            .build_frame(&ast)
            .unwrap()
    }

    fn names(frame: &Frame) -> Vec<&'static str> {
        let mut names = Vec::new();
        for block in frame.reverse_postorder() {
            let block = frame.block(block);
            for id in block.phis.iter().chain(&block.statements) {
                if let Some(hir) = frame.hir(*id) {
                    names.push(hir.opcode.name());
                }
            }
        }
        names
    }

    fn inner(frame: &Frame) -> &Frame {
        match frame.hir(frame.inner_blocks[0]).map(|hir| &hir.opcode) {
            Some(HirOpcode::BlockLiteral { frame, .. }) => frame,
            other => panic!("expected block literal, got {:?}", other),
        }
    }

    #[test]
    fn test_local_assign_is_removed() {
        let mut frame = build("var x = 2; x + 3");
        let report = save_names(&mut frame);
        assert_eq!(report.removed_assigns, 1);
        assert_eq!(names(&frame), vec!["Constant", "Constant", "Message", "StoreReturn", "MethodReturn"]);
    }

    #[test]
    fn test_captured_local_is_written() {
        let mut frame = build("var x = 1; { x }");
        save_names(&mut frame);
        assert!(frame
            .hirs()
            .any(|hir| matches!(hir.opcode, HirOpcode::WriteToFrame { frame: None, index: 1, .. })));
        let inner = inner(&frame);
        assert!(inner
            .hirs()
            .any(|hir| matches!(hir.opcode, HirOpcode::ReadFromFrame { frame: Some(_), index: 1 })));
        assert!(!inner.hirs().any(|hir| hir.opcode.is_import()));
    }

    #[test]
    fn test_outer_assign_is_written() {
        let mut frame = build("var x = 1; { x = 2 }");
        save_names(&mut frame);
        let inner = inner(&frame);
        assert!(inner
            .hirs()
            .any(|hir| matches!(hir.opcode, HirOpcode::WriteToFrame { frame: Some(_), index: 1, .. })));
    }

    #[test]
    fn test_captured_argument_is_spilled() {
        let mut frame = build("{ arg a; { a } }");
        save_names(&mut frame);
        let middle = inner(&frame);
        assert!(middle.captured_slots.contains(&1));
        let entry = middle.block(middle.entry);
        let write = entry
            .statements
            .iter()
            .filter_map(|id| middle.hir(*id))
            .find(|hir| matches!(hir.opcode, HirOpcode::WriteToFrame { frame: None, index: 1, .. }));
        assert!(write.is_some());
    }

    #[test]
    fn test_repeated_store_is_dropped() {
        let mut frame = build("var x = 1; x = x; { x }");
        let report = save_names(&mut frame);
        assert_eq!(report.removed_assigns, 1);
    }

    #[test]
    fn test_pass_is_idempotent() {
        let mut frame = build("var x = 1, y = 2; { x = y }; if(x, { y = 3 }); y");
        save_names(&mut frame);
        let once = frame.clone();
        let report = save_names(&mut frame);
        assert_eq!(report, NameSaverReport::default());
        assert_eq!(frame, once);
    }
}
