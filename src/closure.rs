//! C2: ProtectionClosure (spec.md §4.2).
//!
//! Computes `HardenFns`/`HardenVars` as the transitive closure of everything reachable from the
//! `to_harden` seeds, driven by an explicit worklist — per spec.md §9's design note, this never
//! recurses into the call graph, so a cycle of mutually-calling protected functions terminates
//! naturally once the worklist runs dry.

use std::collections::VecDeque;

use crate::annotate::{AnnotationKind, Annotations};
use crate::fx::FxHashSet;
use crate::ir::{AnnotationTarget, FuncId, GlobalId, GlobalValueData, InstructionData, Module, Value};

/// A value tracked by `HardenVars`: either a module-level global, or a value local to one
/// function's body (an instruction result or block parameter) that protection has spread to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtectedVar {
    Global(GlobalId),
    Local(FuncId, Value),
}

/// `HardenFns`/`HardenVars`, computed once by [`compute`] (spec.md §3).
#[derive(Clone, Default)]
pub struct ProtectionSets {
    pub harden_fns: FxHashSet<FuncId>,
    pub harden_vars: FxHashSet<ProtectedVar>,
}

impl ProtectionSets {
    pub fn is_harden_fn(&self, id: FuncId) -> bool {
        self.harden_fns.contains(&id)
    }

    pub fn is_harden_global(&self, id: GlobalId) -> bool {
        self.harden_vars.contains(&ProtectedVar::Global(id))
    }

    pub fn is_harden_local(&self, func: FuncId, value: Value) -> bool {
        self.harden_vars.contains(&ProtectedVar::Local(func, value))
    }
}

enum Work {
    Var(ProtectedVar),
    Fn(FuncId),
}

pub fn compute(module: &Module, annotations: &Annotations) -> ProtectionSets {
    let mut sets = ProtectionSets::default();
    let mut worklist: VecDeque<Work> = VecDeque::new();

    // Step 1: seed from annotations.
    for (id, _) in module.functions.iter() {
        if annotations.get(AnnotationTarget::Func(id)) == Some(AnnotationKind::ToHarden) {
            add_fn(&mut sets, &mut worklist, id);
        }
    }
    for (id, _) in module.globals.iter() {
        if annotations.get(AnnotationTarget::Global(id)) == Some(AnnotationKind::ToHarden) {
            add_var(&mut sets, &mut worklist, ProtectedVar::Global(id));
        }
    }

    // Steps 2 and 3 share one worklist so a newly-protected global can add call-site protections
    // and a newly-protected function can add vtable/call-site globals, all to the same fixed
    // point, rather than iterating two separate passes to convergence.
    while let Some(item) = worklist.pop_front() {
        match item {
            Work::Var(var) => propagate_var(module, var, &mut sets, &mut worklist),
            Work::Fn(id) => propagate_fn(module, id, annotations, &mut sets, &mut worklist),
        }
    }

    sets
}

fn add_fn(sets: &mut ProtectionSets, worklist: &mut VecDeque<Work>, id: FuncId) {
    if sets.harden_fns.insert(id) {
        worklist.push_back(Work::Fn(id));
    }
}

fn add_var(sets: &mut ProtectionSets, worklist: &mut VecDeque<Work>, var: ProtectedVar) {
    if sets.harden_vars.insert(var) {
        worklist.push_back(Work::Var(var));
    }
}

/// Step 2: walk every use of `var` across the whole module. A store propagates to its value
/// operand, a load to its result, a call argument to the callee.
fn propagate_var(module: &Module, var: ProtectedVar, sets: &mut ProtectionSets, worklist: &mut VecDeque<Work>) {
    for (func_id, record) in module.functions.iter() {
        let func = &record.function;
        for inst in func.dfg.insts() {
            match &func.dfg[inst] {
                InstructionData::Store { value, addr, .. } => {
                    if value_matches(module, func_id, *addr, var, &func.dfg) {
                        add_var(sets, worklist, ProtectedVar::Local(func_id, *value));
                    }
                }
                InstructionData::Load { addr, .. } => {
                    if value_matches(module, func_id, *addr, var, &func.dfg) {
                        let result = func.dfg.first_result(inst);
                        add_var(sets, worklist, ProtectedVar::Local(func_id, result));
                    }
                }
                InstructionData::Call { func_ref, args } => {
                    let touches = args
                        .as_slice(&func.dfg.value_lists)
                        .iter()
                        .any(|&arg| value_matches(module, func_id, arg, var, &func.dfg));
                    if touches {
                        if let Some(callee_name) = func.dfg.ext_funcs[*func_ref].name.as_str() {
                            if let Some(callee) = module.function_named(callee_name) {
                                add_fn(sets, worklist, callee);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// Does `candidate` refer to the same variable as `var`? For a `ProtectedVar::Global`, this
/// means `candidate` is a `GlobalValueAddr` whose symbol name resolves to that global; for a
/// `ProtectedVar::Local`, direct value identity within the same function.
fn value_matches(
    module: &Module,
    func_id: FuncId,
    candidate: Value,
    var: ProtectedVar,
    dfg: &crate::ir::DataFlowGraph,
) -> bool {
    match var {
        ProtectedVar::Local(f, v) => f == func_id && v == candidate,
        ProtectedVar::Global(g) => {
            let crate::ir::ValueDef::Result(inst, _) = dfg.value_def(candidate) else {
                return false;
            };
            let InstructionData::GlobalValueAddr { global_value } = &dfg[inst] else {
                return false;
            };
            let GlobalValueData::Symbol { name, .. } = &dfg.global_values[*global_value] else {
                return false;
            };
            name.as_str().and_then(|n| module.global_named(n)) == Some(g)
        }
    }
}

/// Step 3: constructor vtable harvesting, then direct call-site propagation.
fn propagate_fn(
    module: &Module,
    id: FuncId,
    annotations: &Annotations,
    sets: &mut ProtectionSets,
    worklist: &mut VecDeque<Work>,
) {
    let record = &module.functions[id];
    let func = &record.function;

    if crate::ir::ExternalName::named(record.name.clone()).is_constructor_name() {
        if let Some(vtable) = find_vtable_store_target(module, func) {
            if let Some(slots) = &module.globals[vtable].vtable_slots {
                for &slot_fn in slots {
                    add_fn(sets, worklist, slot_fn);
                }
            }
        }
    }

    for inst in func.dfg.insts() {
        if let InstructionData::Call { func_ref, .. } = &func.dfg[inst] {
            let Some(callee_name) = func.dfg.ext_funcs[*func_ref].name.as_str() else { continue };
            let Some(callee) = module.function_named(callee_name) else { continue };
            let excluded = matches!(
                annotations.get(AnnotationTarget::Func(callee)),
                Some(AnnotationKind::Exclude) | Some(AnnotationKind::ToDuplicate)
            );
            if !excluded {
                add_fn(sets, worklist, callee);
            }
        }
    }
}

/// Find the vtable global stored by a constructor: a `Store` of a `GlobalValueAddr` pointing at
/// a global with recorded `vtable_slots`.
fn find_vtable_store_target(module: &Module, func: &crate::ir::Function) -> Option<GlobalId> {
    for inst in func.dfg.insts() {
        let InstructionData::Store { value, .. } = &func.dfg[inst] else { continue };
        let crate::ir::ValueDef::Result(def_inst, _) = func.dfg.value_def(*value) else { continue };
        let InstructionData::GlobalValueAddr { global_value } = &func.dfg[def_inst] else { continue };
        let GlobalValueData::Symbol { name, .. } = &func.dfg.global_values[*global_value] else { continue };
        if let Some(id) = name.as_str().and_then(|n| module.global_named(n)) {
            if module.globals[id].vtable_slots.is_some() {
                return Some(id);
            }
        }
    }
    None
}
