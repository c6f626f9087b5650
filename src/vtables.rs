//! C8: VTableDuplicator (spec.md §4.8).
//!
//! The literal protocol rewrites a constructor's duplicate body (`f_dup`) to store a GEP into a
//! freshly duplicated vtable (`V_dup`) whose slots point at each virtual method's own `_dup`.
//! Under this crate's architecture there is no separate `f_dup` function object — [`crate::instdup`]
//! (C5) duplicates a `HardenFn`'s body in place — so step 4 ("rewrite the vtable store in
//! `f_dup`") is already handled for free: once `V` carries a `.duplicate`, C5's generic
//! `GlobalValueAddr` handling (`dup_global_value`) redirects the cloned vtable-pointer store to
//! `V_dup` on its own, the same way it does for any other protected global.
//!
//! What's left for this pass, and the reason it still exists as its own component rather than
//! folding into C4: `V_dup`'s slot list. Since no virtual method has a distinct duplicate
//! address to point at either, each slot in `V_dup` names the same function as the corresponding
//! slot in `V` — duplicating the vtable *global* still protects against a corrupted vtable
//! pointer or a flipped function-pointer entry, which is the data this pass actually guards
//! (VTableDuplicator hardens the vtable's storage, not a second copy of virtual dispatch).

use crate::closure::ProtectionSets;
use crate::config::HardenConfig;
use crate::ir::{ExternalName, FuncId, GlobalId, GlobalValueData, InstructionData, Module, ValueDef};
use crate::report::HardenReport;

pub fn run(module: &mut Module, sets: &ProtectionSets, config: &HardenConfig, report: &mut HardenReport) {
    let mut ctor_ids: Vec<FuncId> = sets
        .harden_fns
        .iter()
        .copied()
        .filter(|&id| ExternalName::named(module.functions[id].name.clone()).is_constructor_name())
        .collect();
    ctor_ids.sort();

    for ctor_id in ctor_ids {
        let Some(vtable_id) = find_vtable_store_target(module, ctor_id) else { continue };
        if module.globals[vtable_id].vtable_slots.is_none() {
            log::debug!("constructor {ctor_id:?}'s vtable {vtable_id:?} has no recognized slot array, skipping (spec.md §4.8 step 1)");
            continue;
        }
        ensure_vtable_duplicated(module, vtable_id, config);
        report.constructors_fixed += 1;
    }
}

fn find_vtable_store_target(module: &Module, ctor_id: FuncId) -> Option<GlobalId> {
    let func = &module.functions[ctor_id].function;
    for inst in func.dfg.insts() {
        let InstructionData::Store { value, .. } = &func.dfg[inst] else { continue };
        let ValueDef::Result(def_inst, _) = func.dfg.value_def(*value) else { continue };
        let InstructionData::GlobalValueAddr { global_value } = &func.dfg[def_inst] else { continue };
        let GlobalValueData::Symbol { name, .. } = &func.dfg.global_values[*global_value] else { continue };
        let id = name.as_str().and_then(|n| module.global_named(n))?;
        if module.globals[id].vtable_slots.is_some() {
            return Some(id);
        }
    }
    None
}

fn ensure_vtable_duplicated(module: &mut Module, vtable_id: GlobalId, config: &HardenConfig) {
    let slots = module.globals[vtable_id].vtable_slots.clone().expect("checked by caller");

    let dup_id = match module.globals[vtable_id].duplicate {
        Some(id) => id,
        None => {
            let mut dup = module.globals[vtable_id].clone();
            dup.name = format!("{}_dup", dup.name);
            dup.vtable_slots = None;
            dup.duplicate = None;
            if dup.section.is_none() {
                dup.section = Some(config.duplicate_section.clone());
            }
            let id = module.globals.push(dup);
            module.globals[vtable_id].duplicate = Some(id);
            id
        }
    };

    if module.globals[dup_id].vtable_slots.is_none() {
        module.globals[dup_id].vtable_slots = Some(slots);
    }
}
