//! C4: GlobalDuplicator (spec.md §4.4).
//!
//! Runs once per module, after C3's signature rewriting and before C5 starts touching function
//! bodies (spec.md §5: "globals-duplicated (C4, once per module) → body-duplicated (C5-C7)") so
//! every later pass can assume a protected global's `_dup` sibling already exists.
//!
//! `D` itself only ever pairs `Value`s (see [`crate::dupmap::DuplicateMap`]); a global variable
//! is a module-scope entity, not a value inside any one function's body, so its duplicate is
//! recorded directly on [`crate::ir::GlobalVarData::duplicate`] instead — C5/C6/C7 consult that
//! field whenever they need to resolve a `GlobalValueAddr` operand's protected counterpart.

use crate::annotate::Annotations;
use crate::closure::ProtectionSets;
use crate::config::HardenConfig;
use crate::ir::{GlobalId, GlobalVarData, Module};
use crate::report::HardenReport;

/// Global names this pass never duplicates regardless of annotation, because the runtime/linker
/// gives them fixed meaning (spec.md §4.4 "not a reserved name").
pub(crate) const RESERVED_GLOBAL_NAMES: &[&str] = &["llvm.global_ctors", "llvm.global_dtors"];

pub fn run(
    module: &mut Module,
    sets: &ProtectionSets,
    annotations: &Annotations,
    config: &HardenConfig,
    report: &mut HardenReport,
) {
    let ids: Vec<GlobalId> = module.globals.keys().collect();
    for id in ids {
        if !sets.is_harden_global(id) {
            continue;
        }
        if module.globals[id].duplicate.is_some() {
            continue;
        }
        if !is_eligible(&module.globals[id], annotations, id) {
            log::debug!("global {id:?} is protected but not eligible for duplication (spec.md §4.4), skipping");
            continue;
        }
        duplicate_global(module, id, config);
        report.globals_duplicated += 1;
    }
}

fn is_eligible(g: &GlobalVarData, annotations: &Annotations, id: GlobalId) -> bool {
    g.is_mutable_storage()
        && !annotations.is_excluded_global(id)
        && !g.name.ends_with("_dup")
        && !RESERVED_GLOBAL_NAMES.contains(&g.name.as_str())
}

fn duplicate_global(module: &mut Module, id: GlobalId, config: &HardenConfig) {
    let mut dup = module.globals[id].clone();
    dup.name = format!("{}_dup", dup.name);
    // The duplicate vtable's own slot list is built by C8 once it has duplicated the functions
    // those slots point at, not here.
    dup.vtable_slots = None;
    dup.duplicate = None;

    // spec.md §4.4: only fall back to the default `.dup` section when `g` carries neither an
    // explicit section *nor* an initializer — an initialized global without a section still
    // belongs wherever the front end's default data placement would put it, not in `.dup`.
    if dup.section.is_none() && dup.initializer.is_none() {
        dup.section = Some(config.duplicate_section.clone());
    }

    let dup_id = module.globals.push(dup);
    module.globals[id].duplicate = Some(dup_id);
}
