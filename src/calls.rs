//! C7: CallRewriter (spec.md §4.7).
//!
//! Three cases, not the four the literal wording lists — this crate's [`crate::instdup`] (C5)
//! duplicates a `HardenFn`'s body *in place*, inside the same `Function`, rather than cloning a
//! parallel `f_dup` function object, and its own incoming parameters are never doubled (only the
//! return side is, by [`crate::retbyref`]). Under that architecture a call to a `HardenFn` callee
//! has nothing to redirect to and nothing extra to pass: the callee has no wider parameter list
//! waiting for a duplicate. So the spec's step 2 ("redirect to `f_dup`") and step 4 ("refresh
//! pointers after an un-duplicated callee") collapse into the same observable behavior — refresh
//! any pointer argument with a registered duplicate after the call returns, regardless of whether
//! the callee happens to be a `HardenFn` — leaving:
//!
//! 1. duplication-worthy intrinsics / `to_duplicate`-annotated callees: clone the call itself.
//! 2. indirect calls: synthesize a doubled-parameter signature and call through it.
//! 3. everything else: refresh pointer arguments after the call.

use crate::annotate::{AnnotationKind, Annotations};
use crate::closure::ProtectionSets;
use crate::config::HardenConfig;
use crate::cursor::{Cursor, FuncCursor};
use crate::dupmap::DuplicateMap;
use crate::fx::FxHashMap;
use crate::ir::{
    AnnotationTarget, FuncId, Function, Inst, InstructionData, LibCall, MemFlags, Module,
    Signature, Type, Value, ValueList,
};
use crate::report::HardenReport;

pub fn run(
    module: &mut Module,
    sets: &ProtectionSets,
    annotations: &Annotations,
    dupmap: &mut DuplicateMap,
    config: &HardenConfig,
    report: &mut HardenReport,
) {
    let name_to_id: FxHashMap<String, FuncId> = module.functions.iter().map(|(id, r)| (r.name.clone(), id)).collect();
    let mut ids: Vec<FuncId> = sets.harden_fns.iter().copied().collect();
    ids.sort();
    for id in ids {
        rewrite_calls_in_function(&mut module.functions[id].function, &name_to_id, annotations, dupmap, config, report);
    }
}

fn rewrite_calls_in_function(
    func: &mut Function,
    name_to_id: &FxHashMap<String, FuncId>,
    annotations: &Annotations,
    dupmap: &mut DuplicateMap,
    config: &HardenConfig,
    report: &mut HardenReport,
) {
    let sites: Vec<Inst> = func.dfg.insts().filter(|&i| is_call(&func.dfg[i])).collect();
    for inst in sites {
        match func.dfg[inst].clone() {
            InstructionData::Call { func_ref, .. } => {
                let callee_name = func.dfg.ext_funcs[func_ref].name.clone();
                let intrinsic = callee_name.as_str().and_then(LibCall::recognize).is_some();
                let to_duplicate = callee_name
                    .as_str()
                    .and_then(|n| name_to_id.get(n))
                    .is_some_and(|&id| annotations.get(AnnotationTarget::Func(id)) == Some(AnnotationKind::ToDuplicate));

                if intrinsic || to_duplicate {
                    clone_call(func, inst, dupmap, report);
                } else {
                    refresh_pointer_args_after_call(func, inst, dupmap);
                }
            }
            InstructionData::IndirectCall { .. } => rewrite_indirect_call(func, inst, dupmap, config),
            _ => {}
        }
    }
}

fn is_call(data: &InstructionData) -> bool {
    matches!(data, InstructionData::Call { .. } | InstructionData::IndirectCall { .. })
}

/// Branch 1: clone the call and rewrite its operands to duplicates, the same trivial-elision
/// rule C5 applies to stores (spec.md §4.5) — if no operand has a duplicate, the clone would be
/// bit-identical, so skip it rather than create dead, unreachable machinery.
fn clone_call(func: &mut Function, inst: Inst, dupmap: &mut DuplicateMap, report: &mut HardenReport) {
    let mut data = func.dfg[inst].clone();
    data.map_values(&mut func.dfg.value_lists, |v| dupmap.duplicate_of(v).unwrap_or(v));
    if data == func.dfg[inst] {
        log::trace!("call {inst:?} has no protected operand, trivial duplication elided");
        report.trivial_duplications_elided += 1;
        return;
    }

    let clone = func.dfg.make_inst(data);
    let mut cur = FuncCursor::new(func).at_inst(inst);
    cur.goto_after_inst(inst);
    cur.insert_inst(clone);

    let orig_results: Vec<Value> = func.dfg.inst_results(inst).to_vec();
    for orig_result in orig_results {
        let ty = func.dfg.value_type(orig_result);
        let clone_result = func.dfg.append_result(clone, ty);
        dupmap.insert(orig_result, clone_result);
    }
}

/// Branch 3 ("not duplicated"), folded in with the literal branch 2 per this module's doc
/// comment: `tmp = load orig; store tmp, dup` for every pointer argument the call might have
/// mutated through.
fn refresh_pointer_args_after_call(func: &mut Function, inst: Inst, dupmap: &DuplicateMap) {
    let args: Vec<Value> = func.dfg.inst_args(inst).to_vec();
    let mut after = inst;
    for v in args {
        if func.dfg.value_type(v) != Type::Ptr {
            continue;
        }
        let Some(dup_ptr) = dupmap.duplicate_of(v) else { continue };

        let mut cur = FuncCursor::new(func).at_inst(after);
        cur.goto_after_inst(after);
        let load_inst = cur.ins(InstructionData::Load { ty: Type::Ptr, flags: MemFlags::new(), addr: v, offset: 0 });
        let tmp = cur.dfg_mut().append_result(load_inst, Type::Ptr);
        let store_inst = cur.ins(InstructionData::Store { flags: MemFlags::new(), value: tmp, addr: dup_ptr, offset: 0 });
        after = store_inst;
    }
}

/// Branch 2 (literal spec numbering, i.e. indirect calls): synthesize a doubled-parameter
/// signature and rewrite the argument list to match (spec.md §4.7 step 3). No bitcast
/// instruction is needed to retarget the callee: pointers are already opaque in this IR (spec.md
/// §3), so a function-pointer `Value` carries no type the new `SigRef` needs to agree with.
fn rewrite_indirect_call(func: &mut Function, inst: Inst, dupmap: &DuplicateMap, config: &HardenConfig) {
    let (sig_ref, callee, args) = {
        let InstructionData::IndirectCall { sig_ref, callee, args } = &func.dfg[inst] else { unreachable!() };
        (*sig_ref, *callee, args.as_slice(&func.dfg.value_lists).to_vec())
    };
    if !args.iter().any(|&v| dupmap.duplicate_of(v).is_some()) {
        return;
    }

    let orig_sig = func.dfg.signatures[sig_ref].clone();
    let new_sig = Signature { params: orig_sig.doubled_params(config.alternate_memmap), returns: orig_sig.returns };
    let new_sig_ref = func.dfg.make_signature(new_sig);

    let mut new_args = ValueList::default();
    if config.alternate_memmap {
        for &v in &args {
            new_args.push(v, &mut func.dfg.value_lists);
            new_args.push(dupmap.duplicate_of(v).unwrap_or(v), &mut func.dfg.value_lists);
        }
    } else {
        for &v in &args {
            new_args.push(v, &mut func.dfg.value_lists);
        }
        for &v in &args {
            new_args.push(dupmap.duplicate_of(v).unwrap_or(v), &mut func.dfg.value_lists);
        }
    }
    func.dfg[inst] = InstructionData::IndirectCall { sig_ref: new_sig_ref, callee, args: new_args };
}
