//! C5: InstructionDuplicator (spec.md §4.5).
//!
//! Per-function driver for every function in `HardenFns`. Snapshots the function's instructions
//! in program order first, then dispatches each by `Opcode::class()` — the snapshot means a
//! clone inserted mid-sweep is never itself revisited in the same pass, which is what spec.md's
//! "invokes `duplicate(I)` on every instruction not yet present in D" amounts to once every
//! instruction in a HardenFn is duplicated unconditionally (this crate's "full-body duplication"
//! reading of §4.2/§9: `HardenVars` drives which *functions* join `HardenFns`, not which
//! instructions inside an already-hardened function get cloned).
//!
//! Terminators are the one class this pass never touches: "single-threaded control flow is a
//! shared resource" (spec.md §4.5), so branch/switch/return consistency is entirely C6/C7's job.
//! Calls are skipped here too, deferred whole to C7 (spec.md §4.7).

use cranelift_entity::PrimaryMap;

use crate::closure::ProtectionSets;
use crate::config::HardenConfig;
use crate::cursor::{Cursor, FuncCursor};
use crate::dupmap::DuplicateMap;
use crate::ir::{
    Block, DataFlowGraph, ExternalName, Function, FuncId, GlobalId, GlobalValue, GlobalValueData,
    GlobalVarData, Inst, InstClass, InstructionData, Module, Opcode, Value,
};
use crate::report::HardenReport;

pub fn run(
    module: &mut Module,
    sets: &ProtectionSets,
    dupmap: &mut DuplicateMap,
    config: &HardenConfig,
    report: &mut HardenReport,
) {
    let mut ids: Vec<FuncId> = sets.harden_fns.iter().copied().collect();
    ids.sort();
    for id in ids {
        let name = module.functions[id].name.to_string();
        duplicate_function(&mut module.functions[id].function, &module.globals, dupmap, config, report);
        report.record_function_duplicated(id, name);
    }
}

fn duplicate_function(
    func: &mut Function,
    globals: &PrimaryMap<GlobalId, GlobalVarData>,
    dupmap: &mut DuplicateMap,
    config: &HardenConfig,
    report: &mut HardenReport,
) {
    let program_order: Vec<Inst> = func
        .layout
        .blocks()
        .flat_map(|b| func.layout.block_insts(b).to_vec())
        .collect();

    for inst in program_order {
        if already_duplicated(func, dupmap, inst) {
            continue;
        }
        match func.dfg[inst].opcode().class() {
            InstClass::Alloca => duplicate_alloca(func, inst, dupmap, config),
            InstClass::Pure => duplicate_pure(func, inst, globals, dupmap),
            InstClass::Store => duplicate_store_class(func, inst, dupmap, report),
            InstClass::Terminator => {}
            InstClass::Call => {}
        }
    }
}

fn already_duplicated(func: &Function, dupmap: &DuplicateMap, inst: Inst) -> bool {
    func.dfg.inst_results(inst).iter().any(|&v| dupmap.is_paired(v))
}

fn insert_inst_after(func: &mut Function, after: Inst, new_inst: Inst) {
    let mut cur = FuncCursor::new(func).at_inst(after);
    cur.goto_after_inst(after);
    cur.insert_inst(new_inst);
}

/// An alloca is a landing-pad slot — and must never be duplicated — when a store of
/// `__cxa_begin_catch`'s result targets it (spec.md §4.5).
fn is_landing_pad_alloca(func: &Function, alloca_inst: Inst) -> bool {
    let slot = func.dfg.first_result(alloca_inst);
    for inst in func.dfg.insts() {
        let InstructionData::Store { value, addr, .. } = &func.dfg[inst] else { continue };
        if *addr != slot {
            continue;
        }
        let crate::ir::ValueDef::Result(def_inst, _) = func.dfg.value_def(*value) else { continue };
        let InstructionData::Call { func_ref, .. } = &func.dfg[def_inst] else { continue };
        if func.dfg.ext_funcs[*func_ref].name.as_str() == Some("__cxa_begin_catch") {
            return true;
        }
    }
    false
}

/// The last instruction of the contiguous run of `alloca`s at the top of `entry` — where a clone
/// lands when `alternate_memmap` is off (spec.md §4.5).
fn alloca_prefix_end(func: &Function, entry: Block) -> Inst {
    let insts = func.layout.block_insts(entry);
    let mut last = insts[0];
    for &inst in insts {
        if func.dfg[inst].opcode() == Opcode::Alloca {
            last = inst;
        } else {
            break;
        }
    }
    last
}

fn duplicate_alloca(func: &mut Function, inst: Inst, dupmap: &mut DuplicateMap, config: &HardenConfig) {
    if is_landing_pad_alloca(func, inst) {
        log::trace!("alloca {inst:?} is a landing-pad slot, not duplicating (spec.md §4.5)");
        return;
    }
    let (ty, align) = match func.dfg[inst] {
        InstructionData::Alloca { ty, align } => (ty, align),
        _ => unreachable!(),
    };
    let orig_result = func.dfg.first_result(inst);
    let clone = func.dfg.make_inst(InstructionData::Alloca { ty, align });
    let clone_result = func.dfg.append_result(clone, ty);

    let entry = func.layout.entry_block();
    let insert_after = if !config.alternate_memmap && entry == func.layout.inst_block(inst) {
        alloca_prefix_end(func, entry.expect("inst_block matched an entry block"))
    } else {
        inst
    };
    insert_inst_after(func, insert_after, clone);
    dupmap.insert(orig_result, clone_result);
}

/// Resolve a constant-expression global-value chain's duplicate, recursing through `Load`/
/// `IAddImm` to the ultimate `Symbol` base (spec.md §4.5: "for inline constant-expression GEPs
/// whose base is a protected global, materialize a parallel constant-expression GEP over the
/// duplicate base"). A base that resolves to no protected global, or to no global at all (an
/// external symbol), is kept unchanged — full-body duplication still clones the instruction that
/// reads it, it just addresses the same storage both times.
fn dup_global_value(dfg: &mut DataFlowGraph, globals: &PrimaryMap<GlobalId, GlobalVarData>, gv: GlobalValue) -> GlobalValue {
    let data = dfg.global_values[gv].clone();
    let new_data = match data {
        GlobalValueData::Symbol { name, offset } => {
            let dup_name = name
                .as_str()
                .and_then(|n| find_global(globals, n))
                .and_then(|id| globals[id].duplicate)
                .map(|dup_id| ExternalName::named(globals[dup_id].name.clone()));
            GlobalValueData::Symbol { name: dup_name.unwrap_or(name), offset }
        }
        GlobalValueData::Load { base, offset, global_type } => {
            GlobalValueData::Load { base: dup_global_value(dfg, globals, base), offset, global_type }
        }
        GlobalValueData::IAddImm { base, offset, global_type } => {
            GlobalValueData::IAddImm { base: dup_global_value(dfg, globals, base), offset, global_type }
        }
    };
    dfg.make_global_value(new_data)
}

fn find_global(globals: &PrimaryMap<GlobalId, GlobalVarData>, name: &str) -> Option<GlobalId> {
    globals.iter().find(|(_, g)| g.name == name).map(|(id, _)| id)
}

fn duplicate_pure(func: &mut Function, inst: Inst, globals: &PrimaryMap<GlobalId, GlobalVarData>, dupmap: &mut DuplicateMap) {
    let mut data = func.dfg[inst].clone();

    if let InstructionData::GlobalValueAddr { global_value } = data {
        let new_gv = dup_global_value(&mut func.dfg, globals, global_value);
        data = InstructionData::GlobalValueAddr { global_value: new_gv };
    } else {
        data.map_values(&mut func.dfg.value_lists, |v| dupmap.duplicate_of(v).unwrap_or(v));
    }

    let clone = func.dfg.make_inst(data);
    insert_inst_after(func, inst, clone);

    let orig_results: Vec<Value> = func.dfg.inst_results(inst).to_vec();
    for orig_result in orig_results {
        let ty = func.dfg.value_type(orig_result);
        let clone_result = func.dfg.append_result(clone, ty);
        dupmap.insert(orig_result, clone_result);
    }
}

fn duplicate_store_class(func: &mut Function, inst: Inst, dupmap: &mut DuplicateMap, report: &mut HardenReport) {
    let mut data = func.dfg[inst].clone();
    data.map_values(&mut func.dfg.value_lists, |v| dupmap.duplicate_of(v).unwrap_or(v));

    if data == func.dfg[inst] {
        log::trace!("store {inst:?} has no protected operand, trivial duplication elided (spec.md §4.5)");
        report.trivial_duplications_elided += 1;
        return;
    }

    let clone = func.dfg.make_inst(data);
    insert_inst_after(func, inst, clone);

    let orig_results: Vec<Value> = func.dfg.inst_results(inst).to_vec();
    for orig_result in orig_results {
        let ty = func.dfg.value_type(orig_result);
        let clone_result = func.dfg.append_result(clone, ty);
        dupmap.insert(orig_result, clone_result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ExtFuncData, FuncRecord, GlobalType, Linkage, MemFlags, Signature, Type};

    fn sets_with(id: FuncId) -> ProtectionSets {
        let mut sets = ProtectionSets::default();
        sets.harden_fns.insert(id);
        sets
    }

    #[test]
    fn alloca_is_cloned_into_the_entry_block_prefix_and_paired_in_d() {
        let mut func = Function::new(ExternalName::named("f"), Signature::new());
        let entry = func.dfg.make_block();
        func.layout.append_block(entry);
        let a0 = func.dfg.make_inst(InstructionData::Alloca { ty: Type::I32, align: 0 });
        func.layout.append_inst(a0, entry);
        func.dfg.append_result(a0, Type::Ptr);
        let ret = func.dfg.make_inst(InstructionData::Return { args: Default::default() });
        func.layout.append_inst(ret, entry);

        let mut module = Module::new();
        let id = module.functions.push(FuncRecord { name: "f".into(), linkage: Linkage::Internal, function: func });
        let sets = sets_with(id);
        let mut dupmap = DuplicateMap::new();
        let config = HardenConfig::default();
        let mut report = HardenReport::new();

        run(&mut module, &sets, &mut dupmap, &config, &mut report);

        let f = &module.functions[id].function;
        let insts = f.layout.block_insts(entry);
        assert_eq!(insts.len(), 3, "original alloca, its clone, and the untouched return");
        assert_eq!(insts[2], ret, "the clone lands before the return, inside the alloca prefix");
        let orig_result = f.dfg.first_result(a0);
        assert!(dupmap.is_paired(orig_result));
    }

    #[test]
    fn iconst_is_cloned_as_a_pure_instruction_and_its_result_is_paired() {
        let mut func = Function::new(ExternalName::named("f"), Signature::new());
        let entry = func.dfg.make_block();
        func.layout.append_block(entry);
        let c = func.dfg.make_inst(InstructionData::Iconst { ty: Type::I32, imm: 1 });
        func.layout.append_inst(c, entry);
        let c_val = func.dfg.append_result(c, Type::I32);

        let mut module = Module::new();
        let id = module.functions.push(FuncRecord { name: "f".into(), linkage: Linkage::Internal, function: func });
        let sets = sets_with(id);
        let mut dupmap = DuplicateMap::new();
        let config = HardenConfig::default();
        let mut report = HardenReport::new();

        run(&mut module, &sets, &mut dupmap, &config, &mut report);

        let f = &module.functions[id].function;
        assert_eq!(f.layout.block_insts(entry).len(), 2);
        assert!(dupmap.is_paired(c_val));
    }

    #[test]
    fn a_store_with_no_protected_operand_is_trivially_elided() {
        let mut func = Function::new(ExternalName::named("f"), Signature::new());
        let entry = func.dfg.make_block();
        func.layout.append_block(entry);
        let p = func.dfg.append_block_param(entry, Type::Ptr);
        let q = func.dfg.append_block_param(entry, Type::Ptr);
        let st = func.dfg.make_inst(InstructionData::Store { flags: MemFlags::new(), value: q, addr: p, offset: 0 });
        func.layout.append_inst(st, entry);

        let mut module = Module::new();
        let id = module.functions.push(FuncRecord { name: "f".into(), linkage: Linkage::Internal, function: func });
        let sets = sets_with(id);
        let mut dupmap = DuplicateMap::new();
        let config = HardenConfig::default();
        let mut report = HardenReport::new();

        run(&mut module, &sets, &mut dupmap, &config, &mut report);

        let f = &module.functions[id].function;
        assert_eq!(f.layout.block_insts(entry), &[st], "no clone was inserted");
        assert_eq!(report.trivial_duplications_elided, 1);
    }

    #[test]
    fn a_store_of_a_duplicated_value_is_cloned_and_its_pointer_operand_is_left_alone() {
        let mut func = Function::new(ExternalName::named("f"), Signature::new());
        let entry = func.dfg.make_block();
        func.layout.append_block(entry);
        let p = func.dfg.append_block_param(entry, Type::Ptr);
        let c = func.dfg.make_inst(InstructionData::Iconst { ty: Type::I32, imm: 1 });
        func.layout.append_inst(c, entry);
        let c_val = func.dfg.append_result(c, Type::I32);
        let st = func.dfg.make_inst(InstructionData::Store { flags: MemFlags::new(), value: c_val, addr: p, offset: 0 });
        func.layout.append_inst(st, entry);

        let mut module = Module::new();
        let id = module.functions.push(FuncRecord { name: "f".into(), linkage: Linkage::Internal, function: func });
        let sets = sets_with(id);
        let mut dupmap = DuplicateMap::new();
        let config = HardenConfig::default();
        let mut report = HardenReport::new();

        run(&mut module, &sets, &mut dupmap, &config, &mut report);

        let f = &module.functions[id].function;
        assert_eq!(f.layout.block_insts(entry).len(), 4, "iconst clone and store clone were both inserted");
        assert_eq!(report.trivial_duplications_elided, 0);
        let clone_inst = f.layout.block_insts(entry)[3];
        let InstructionData::Store { value, addr, .. } = f.dfg[clone_inst] else { panic!("expected a store") };
        assert_eq!(value, dupmap.duplicate_of(c_val).unwrap());
        assert_eq!(addr, p, "p has no duplicate, so the clone still addresses p");
    }

    #[test]
    fn a_landing_pad_alloca_is_never_duplicated() {
        let mut func = Function::new(ExternalName::named("f"), Signature::new());
        let entry = func.dfg.make_block();
        func.layout.append_block(entry);
        let slot = func.dfg.make_inst(InstructionData::Alloca { ty: Type::Ptr, align: 0 });
        func.layout.append_inst(slot, entry);
        let slot_val = func.dfg.append_result(slot, Type::Ptr);

        let ext = func.dfg.make_ext_func(ExtFuncData { name: ExternalName::named("__cxa_begin_catch"), signature: Signature::new() });
        let call = func.dfg.make_inst(InstructionData::Call { func_ref: ext, args: Default::default() });
        func.layout.append_inst(call, entry);
        let call_val = func.dfg.append_result(call, Type::Ptr);
        let st = func.dfg.make_inst(InstructionData::Store { flags: MemFlags::new(), value: call_val, addr: slot_val, offset: 0 });
        func.layout.append_inst(st, entry);

        let mut module = Module::new();
        let id = module.functions.push(FuncRecord { name: "f".into(), linkage: Linkage::Internal, function: func });
        let sets = sets_with(id);
        let mut dupmap = DuplicateMap::new();
        let config = HardenConfig::default();
        let mut report = HardenReport::new();

        run(&mut module, &sets, &mut dupmap, &config, &mut report);

        assert!(!dupmap.is_paired(slot_val));
    }

    #[test]
    fn a_global_value_addr_over_a_protected_global_is_redirected_to_the_dup_symbol() {
        let mut module = Module::new();
        let g = module.globals.push(GlobalVarData {
            name: "counter".into(),
            ty: GlobalType::Scalar(Type::I32),
            linkage: Linkage::Internal,
            align: None,
            section: None,
            thread_local: false,
            initializer: Some(vec![0; 4]),
            vtable_slots: None,
            duplicate: None,
        });
        let dup = module.globals.push(GlobalVarData {
            name: "counter_dup".into(),
            ty: GlobalType::Scalar(Type::I32),
            linkage: Linkage::Internal,
            align: None,
            section: Some(".dup".into()),
            thread_local: false,
            initializer: Some(vec![0; 4]),
            vtable_slots: None,
            duplicate: None,
        });
        module.globals[g].duplicate = Some(dup);

        let mut func = Function::new(ExternalName::named("f"), Signature::new());
        let entry = func.dfg.make_block();
        func.layout.append_block(entry);
        let gv = func.dfg.make_global_value(GlobalValueData::Symbol { name: ExternalName::named("counter"), offset: 0 });
        let addr_inst = func.dfg.make_inst(InstructionData::GlobalValueAddr { global_value: gv });
        func.layout.append_inst(addr_inst, entry);
        func.dfg.append_result(addr_inst, Type::Ptr);

        let id = module.functions.push(FuncRecord { name: "f".into(), linkage: Linkage::Internal, function: func });
        let sets = sets_with(id);
        let mut dupmap = DuplicateMap::new();
        let config = HardenConfig::default();
        let mut report = HardenReport::new();

        run(&mut module, &sets, &mut dupmap, &config, &mut report);

        let f = &module.functions[id].function;
        let clone_inst = f.layout.block_insts(entry)[1];
        let InstructionData::GlobalValueAddr { global_value } = f.dfg[clone_inst] else { panic!("expected a global value addr") };
        let GlobalValueData::Symbol { name, .. } = &f.dfg.global_values[global_value] else { panic!("expected a symbol") };
        assert_eq!(name.as_str(), Some("counter_dup"));
    }
}
