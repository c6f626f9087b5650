//! C3: ReturnByReferenceRewrite (spec.md §4.3).
//!
//! Runs before InstructionDuplicator (spec.md §5: "ReturnByReferenceRewrite runs before
//! InstructionDuplicator so the latter sees uniform void-return signatures") so C5 never has to
//! special-case a scalar return. Every `HardenFns` function returning a non-void value becomes a
//! void function with two trailing pointer out-parameters; every `return e` becomes a store to
//! the first out-parameter followed by a void return. C5's ordinary Store-duplication rule is
//! what later clones that store into the second out-parameter once `e`'s defining instruction is
//! itself duplicated and registered in `D` — this pass only needs to emit one store, not two.
//!
//! This is also the pass spec.md §3 puts in charge of the other half of a `HardenFn`'s signature:
//! "whose signatures must acquire duplicated parameters." C3 already owns every `HardenFn`'s
//! signature rewrite and already walks every call site in the module to keep callers in sync
//! (`rewrite_call_sites` below), which is exactly the mechanism doubling incoming arguments needs
//! too, so it lives here rather than as a separate component. A `to_duplicate`-annotated function
//! is skipped by both halves of this pass: its call sites are handled by [`crate::calls`]'s
//! whole-call cloning instead, and widening its own signature here would fight that — see
//! `s2_protected_global_is_duplicated_and_its_to_duplicate_caller_clones_the_call` in
//! `pipeline.rs`, which relies on `mem_inc` keeping its original single-pointer signature.

use crate::annotate::{AnnotationKind, Annotations};
use crate::closure::ProtectionSets;
use crate::cursor::{Cursor, FuncCursor};
use crate::dupmap::DuplicateMap;
use crate::ir::{AnnotationTarget, Function, FuncId, Inst, InstructionData, MemFlags, Module, Type, Value, ValueList};

pub fn run(module: &mut Module, sets: &ProtectionSets, annotations: &Annotations, dupmap: &mut DuplicateMap) {
    let mut ids: Vec<FuncId> = sets
        .harden_fns
        .iter()
        .copied()
        .filter(|&id| !call_site_cloned_instead_of_widened(annotations, id))
        .collect();
    ids.sort();

    let mut rewritten: Vec<(FuncId, Option<Type>)> = Vec::new();
    for id in ids {
        let returns = module.functions[id].function.signature.returns.clone();
        if returns.len() > 1 {
            log::debug!("function {id:?} already returns more than one value, skipping C3");
            continue;
        }
        let elem_ty = returns.first().copied();
        widen_params(&mut module.functions[id].function, dupmap);
        if elem_ty.is_some() {
            rewrite_returns(&mut module.functions[id].function, dupmap);
        }
        rewritten.push((id, elem_ty));
    }

    for (callee, elem_ty) in rewritten {
        rewrite_call_sites(module, callee, elem_ty, dupmap);
    }
}

/// `to_duplicate`/`exclude`-annotated functions never get their own signature widened here: their
/// call sites are handled by [`crate::calls`] instead (cloning the whole call for `to_duplicate`,
/// leaving `exclude` alone entirely).
fn call_site_cloned_instead_of_widened(annotations: &Annotations, id: FuncId) -> bool {
    matches!(
        annotations.get(AnnotationTarget::Func(id)),
        Some(AnnotationKind::ToDuplicate) | Some(AnnotationKind::Exclude)
    )
}

/// Append a duplicate block parameter for each of `func`'s original parameters and pair each
/// original with its duplicate in `D` (spec.md §3: a `HardenFn`'s signature "must acquire
/// duplicated parameters"). The duplicates are always appended after every original — this IR's
/// block params can only be pushed onto the end of a block's param list, never inserted at an
/// arbitrary position, so interleaving a function's *own* incoming parameters the way
/// `alternate_memmap` interleaves a synthesized callee-side signature (`Signature::doubled_params`,
/// used by indirect-call rewriting) isn't achievable here: those params already exist, appended in
/// the front end's order, before C3 ever runs.
fn widen_params(func: &mut Function, dupmap: &mut DuplicateMap) {
    let Some(entry) = func.layout.entry_block() else { return };
    let orig_params: Vec<Value> = func.dfg.block_params(entry).to_vec();
    for &p in &orig_params {
        let ty = func.dfg.value_type(p);
        let dup = func.dfg.append_block_param(entry, ty);
        dupmap.insert(p, dup);
    }
    let orig_types = func.signature.params.clone();
    func.signature.params = orig_types.iter().chain(orig_types.iter()).copied().collect();
}

/// Convert every `return e` in `func`'s body into a store to the first out-parameter followed by
/// a void return, and give `func`'s (already parameter-widened) signature its trailing out-pointer
/// pair.
fn rewrite_returns(func: &mut Function, dupmap: &mut DuplicateMap) {
    func.signature = func.signature.with_trailing_out_params();

    let entry = func.layout.entry_block().expect("a hardened function has a body");
    let out0 = func.dfg.append_block_param(entry, Type::Ptr);
    let out1 = func.dfg.append_block_param(entry, Type::Ptr);
    dupmap.insert(out0, out1);

    let returns: Vec<Inst> = func
        .layout
        .blocks()
        .flat_map(|b| func.layout.block_insts(b).to_vec())
        .filter(|&inst| matches!(func.dfg[inst], InstructionData::Return { .. }))
        .collect();

    for inst in returns {
        let value = {
            let InstructionData::Return { args } = &func.dfg[inst] else { unreachable!() };
            args.as_slice(&func.dfg.value_lists).first().copied()
        };
        if let Some(e) = value {
            let mut cur = FuncCursor::new(func).at_inst(inst);
            cur.ins(InstructionData::Store { flags: MemFlags::new(), value: e, addr: out0, offset: 0 });
        }
        func.dfg[inst] = InstructionData::Return { args: ValueList::default() };
    }
}

/// Step 2: rewrite every call site of `callee` across the whole module, in every function that
/// declares it, including `callee` itself (a recursive call sees its own already-rewritten
/// signature). `elem_ty` is `None` for a void-returning `HardenFn`: its call sites still gain
/// doubled arguments, just no trailing out-pointer pair.
fn rewrite_call_sites(module: &mut Module, callee: FuncId, elem_ty: Option<Type>, dupmap: &mut DuplicateMap) {
    let callee_name = module.functions[callee].name.clone();
    let new_sig = module.functions[callee].function.signature.clone();

    let caller_ids: Vec<FuncId> = module.functions.keys().collect();
    for caller_id in caller_ids {
        rewrite_call_sites_in(&mut module.functions[caller_id].function, &callee_name, &new_sig, elem_ty, dupmap);
    }
}

fn rewrite_call_sites_in(
    func: &mut Function,
    callee_name: &crate::ir::ExternalName,
    new_sig: &crate::ir::Signature,
    elem_ty: Option<Type>,
    dupmap: &mut DuplicateMap,
) {
    let matching_refs: Vec<crate::ir::FuncRef> = func
        .dfg
        .ext_funcs
        .iter()
        .filter(|(_, ext)| &ext.name == callee_name)
        .map(|(r, _)| r)
        .collect();
    if matching_refs.is_empty() {
        return;
    }
    for &func_ref in &matching_refs {
        func.dfg.ext_funcs[func_ref].signature = new_sig.clone();
    }

    let calls: Vec<Inst> = func
        .layout
        .blocks()
        .flat_map(|b| func.layout.block_insts(b).to_vec())
        .filter(|&inst| {
            matches!(&func.dfg[inst], InstructionData::Call { func_ref, .. } if matching_refs.contains(func_ref))
        })
        .collect();

    for inst in calls {
        rewrite_one_call(func, inst, elem_ty, dupmap);
    }
}

/// Double every existing argument (spec.md §4.7 step 2), falling back to the original value when
/// the caller has no registered duplicate for it — the same "grey area" fallback
/// [`crate::instdup::duplicate_pure`] and [`crate::calls::clone_call`] already use for a caller
/// that was never itself hardened. Then, for a non-void callee, allocate two out-slots, pass their
/// addresses as trailing call arguments, load the original value back out of the first slot, and
/// redirect every use of the call's old scalar result to that freshly loaded value (spec.md §4.3).
fn rewrite_one_call(func: &mut Function, call_inst: Inst, elem_ty: Option<Type>, dupmap: &mut DuplicateMap) {
    let (func_ref, old_args) = {
        let InstructionData::Call { func_ref, args } = &func.dfg[call_inst] else { unreachable!() };
        (*func_ref, args.as_slice(&func.dfg.value_lists).to_vec())
    };
    let old_result: Option<Value> = func.dfg.inst_results(call_inst).first().copied();

    let dup_args: Vec<Value> = old_args.iter().map(|&v| dupmap.duplicate_of(v).unwrap_or(v)).collect();

    let out_ptrs = elem_ty.map(|ty| {
        let mut cur = FuncCursor::new(func).at_inst(call_inst);
        let a0 = cur.ins(InstructionData::Alloca { ty, align: 0 });
        let out0 = cur.dfg_mut().append_result(a0, Type::Ptr);
        let a1 = cur.ins(InstructionData::Alloca { ty, align: 0 });
        let out1 = cur.dfg_mut().append_result(a1, Type::Ptr);
        (out0, out1)
    });

    let mut new_args = ValueList::default();
    for &v in old_args.iter().chain(dup_args.iter()) {
        new_args.push(v, &mut func.dfg.value_lists);
    }
    if let Some((out0, out1)) = out_ptrs {
        new_args.push(out0, &mut func.dfg.value_lists);
        new_args.push(out1, &mut func.dfg.value_lists);
    }
    func.dfg[call_inst] = InstructionData::Call { func_ref, args: new_args };

    if let Some((out0_ptr, out1_ptr)) = out_ptrs {
        dupmap.insert(out0_ptr, out1_ptr);
        if let Some(old_result) = old_result {
            let load_val = {
                let ty = elem_ty.expect("out_ptrs only built when elem_ty is Some");
                let mut cur = FuncCursor::new(func).at_inst(call_inst);
                cur.goto_after_inst(call_inst);
                let load_inst = cur.ins(InstructionData::Load { ty, flags: MemFlags::new(), addr: out0_ptr, offset: 0 });
                cur.dfg_mut().append_result(load_inst, ty)
            };
            func.dfg.replace_value_uses(old_result, load_val);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ExtFuncData, ExternalName, FuncRecord, Linkage, Signature};

    fn returning_function(name: &str) -> Function {
        let sig = Signature { params: vec![Type::I32], returns: vec![Type::I32] };
        let mut func = Function::new(ExternalName::named(name), sig);
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let a = func.dfg.append_block_param(block, Type::I32);
        let one = func.dfg.make_inst(InstructionData::Iconst { ty: Type::I32, imm: 1 });
        let one_val = func.dfg.append_result(one, Type::I32);
        let mut cur = FuncCursor::new(&mut func).at_bottom(block);
        cur.insert_inst(one);
        let sum = cur.ins(InstructionData::Binary { opcode: crate::ir::BinaryOp::Iadd, ty: Type::I32, args: [a, one_val] });
        let sum_val = cur.dfg_mut().append_result(sum, Type::I32);
        cur.ins(InstructionData::Return { args: ValueList::default() });
        // Patch the return to actually carry `sum_val` (cursor can't express an initial
        // non-empty ValueList inline without a pool reference of its own).
        let ret = func.layout.last_inst(block).unwrap();
        let mut list = ValueList::default();
        list.push(sum_val, &mut func.dfg.value_lists);
        func.dfg[ret] = InstructionData::Return { args: list };
        func
    }

    #[test]
    fn rewritten_function_gains_two_out_pointer_params_and_stores_into_the_first() {
        let mut module = Module::new();
        let id = module.functions.push(FuncRecord {
            name: "f".into(),
            linkage: Linkage::External,
            function: returning_function("f"),
        });
        let mut sets = ProtectionSets::default();
        sets.harden_fns.insert(id);
        let mut dupmap = DuplicateMap::new();
        let annotations = Annotations::default();

        run(&mut module, &sets, &annotations, &mut dupmap);

        let func = &module.functions[id].function;
        assert_eq!(func.signature.params, vec![Type::I32, Type::I32, Type::Ptr, Type::Ptr]);
        assert!(func.signature.returns.is_empty());

        let entry = func.layout.entry_block().unwrap();
        let params = func.dfg.block_params(entry);
        assert_eq!(params.len(), 4);
        let a = params[0];
        let a_dup = params[1];
        let out0 = params[2];
        let out1 = params[3];
        assert_eq!(dupmap.duplicate_of(a), Some(a_dup));
        assert_eq!(dupmap.duplicate_of(out0), Some(out1));

        let stores: Vec<_> = func
            .layout
            .block_insts(entry)
            .iter()
            .filter(|&&i| matches!(func.dfg[i], InstructionData::Store { .. }))
            .collect();
        assert_eq!(stores.len(), 1);
        let InstructionData::Store { addr, .. } = func.dfg[*stores[0]] else { unreachable!() };
        assert_eq!(addr, out0);

        let rets: Vec<_> = func
            .layout
            .block_insts(entry)
            .iter()
            .filter(|&&i| matches!(func.dfg[i], InstructionData::Return { .. }))
            .collect();
        assert_eq!(rets.len(), 1);
        let InstructionData::Return { args } = &func.dfg[*rets[0]] else { unreachable!() };
        assert!(args.as_slice(&func.dfg.value_lists).is_empty());
    }

    #[test]
    fn call_sites_gain_two_allocas_and_load_the_first_slot_back() {
        let mut module = Module::new();
        let callee_id = module.functions.push(FuncRecord {
            name: "f".into(),
            linkage: Linkage::External,
            function: returning_function("f"),
        });

        let mut caller = Function::new(ExternalName::named("caller"), Signature::new());
        let block = caller.dfg.make_block();
        caller.layout.append_block(block);
        let arg = caller.dfg.append_block_param(block, Type::I32);
        let func_ref = caller.dfg.make_ext_func(ExtFuncData {
            name: ExternalName::named("f"),
            signature: Signature { params: vec![Type::I32], returns: vec![Type::I32] },
        });
        let call_result;
        {
            let mut cur = FuncCursor::new(&mut caller).at_bottom(block);
            let mut args = ValueList::default();
            args.push(arg, &mut cur.dfg_mut().value_lists);
            let call = cur.ins(InstructionData::Call { func_ref, args });
            call_result = cur.dfg_mut().append_result(call, Type::I32);
            cur.ins(InstructionData::Return { args: ValueList::default() });
        }
        let consumer = caller.dfg.make_inst(InstructionData::Unary {
            opcode: crate::ir::UnaryOp::Ineg,
            ty: Type::I32,
            arg: call_result,
        });
        let last = caller.layout.last_inst(block).unwrap();
        caller.layout.insert_inst(consumer, last);

        let caller_id = module.functions.push(FuncRecord {
            name: "caller".into(),
            linkage: Linkage::External,
            function: caller,
        });

        let mut sets = ProtectionSets::default();
        sets.harden_fns.insert(callee_id);
        let mut dupmap = DuplicateMap::new();
        let annotations = Annotations::default();
        run(&mut module, &sets, &annotations, &mut dupmap);

        let caller_func = &module.functions[caller_id].function;
        let allocas = caller_func
            .dfg
            .insts()
            .filter(|&i| matches!(caller_func.dfg[i], InstructionData::Alloca { .. }))
            .count();
        assert_eq!(allocas, 2);

        // `caller` was never itself hardened, so it has no registered duplicate for `arg`: the
        // grey-area fallback passes `arg` itself as the second copy (spec.md §4.7 step 2).
        let InstructionData::Call { args, .. } = &caller_func.dfg[caller_func
            .dfg
            .insts()
            .find(|&i| matches!(caller_func.dfg[i], InstructionData::Call { .. }))
            .unwrap()]
        else {
            unreachable!()
        };
        assert_eq!(args.as_slice(&caller_func.dfg.value_lists).len(), 4);

        // The old call result no longer appears as the consumer's operand: it was redirected to
        // the value loaded back out of the first out-slot.
        let consumer_inst = caller_func
            .dfg
            .insts()
            .find(|&i| matches!(caller_func.dfg[i], InstructionData::Unary { .. }))
            .unwrap();
        let InstructionData::Unary { arg, .. } = caller_func.dfg[consumer_inst] else { unreachable!() };
        assert_ne!(arg, call_result);
    }
}
