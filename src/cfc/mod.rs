//! Control-flow checking by signatures (spec.md §6's "external collaborator" — CFCSS/RASM). This
//! crate's IR already has the primitive the literature's register-transfer description of CFCSS
//! exists to emulate: a block parameter. Classic CFCSS threads a running "signature" through a
//! dedicated register, XOR-updated at each edge by a compile-time adjusting constant, because the
//! source IRs it was designed for have no phi/block-parameter concept. Here the running signature
//! is just another value flowing through a trailing block parameter — every edge into a checked
//! block carries, as an extra argument, the constant signature of the block it left, and the
//! checked block compares that argument against its own assigned signature before falling through
//! to its real body.
//!
//! [`cfcss`] and [`rasm`] share this edge-threading mechanism and differ only in *which* blocks
//! get a distinct signature and *which* blocks are actually checked — see each module's own doc
//! comment.
//!
//! A block reached (even partly) through a [`crate::ir::InstructionData::Switch`] edge is left
//! unguarded: `Switch` carries no argument list for any of its targets (this IR models it as a
//! bare `{value, table, default}`, spec.md §3's closed opcode list has no jump-table argument
//! form), so there is no edge to thread a signature through. This is logged, not silently dropped.

mod cfcss;
mod rasm;

use crate::annotate::{AnnotationKind, Annotations};
use crate::config::{CfcMode, HardenConfig, INTER_RASM_DEFAULT_SIGNATURE};
use crate::cursor::{Cursor, FuncCursor};
use crate::flowgraph::ControlFlowGraph;
use crate::fx::FxHashMap;
use crate::ir::condcodes::IntCC;
use crate::ir::{
    AnnotationTarget, Block, ExtFuncData, ExternalName, FuncId, FuncRef, Function, Inst,
    InstructionData, Module, Signature, Type, Value, ValueList,
};
use crate::report::HardenReport;

pub(crate) type SignatureMap = FxHashMap<Block, u64>;

/// The two ways of deciding block signatures and check placement (spec.md §6 `cfc-mode`).
pub(crate) trait SignatureScheme {
    /// Assign every reachable block a signature. Implementations may give two different blocks
    /// the same signature (RASM does, deliberately, for straight-line chains).
    fn assign(&self, func: &Function, cfg: &ControlFlowGraph) -> SignatureMap;

    /// Does `block` need its own runtime comparison, or does its inherited signature already
    /// prove it was reached correctly?
    fn needs_check(&self, block: Block, cfg: &ControlFlowGraph, sigs: &SignatureMap) -> bool;
}

pub fn run(module: &mut Module, annotations: &Annotations, config: &HardenConfig, report: &mut HardenReport) {
    if config.cfc_mode == CfcMode::Disabled {
        return;
    }
    let mut ids: Vec<FuncId> = module.functions.keys().collect();
    ids.sort();
    for id in ids {
        let runtime_sig = annotations.get(AnnotationTarget::Func(id)) == Some(AnnotationKind::RuntimeSig);
        harden_function(&mut module.functions[id].function, runtime_sig, config, report);
    }
}

fn harden_function(func: &mut Function, runtime_sig: bool, config: &HardenConfig, report: &mut HardenReport) {
    let cfg = ControlFlowGraph::with_function(func);
    let Some(entry) = func.layout.entry_block() else { return };

    let sigs = match config.cfc_mode {
        CfcMode::Cfcss => cfcss::Cfcss.assign(func, &cfg),
        CfcMode::Rasm | CfcMode::InterRasm => rasm::Rasm.assign(func, &cfg),
        CfcMode::Disabled => return,
    };

    let blocks: Vec<Block> = func.layout.blocks().filter(|&b| b != entry).collect();
    for block in blocks {
        if has_switch_predecessor(func, &cfg, block) {
            log::debug!("block {block:?} has a switch predecessor, CFC cannot thread a signature through it, skipping");
            continue;
        }
        let checked = match config.cfc_mode {
            CfcMode::Cfcss => cfcss::Cfcss.needs_check(block, &cfg, &sigs),
            CfcMode::Rasm | CfcMode::InterRasm => rasm::Rasm.needs_check(block, &cfg, &sigs),
            CfcMode::Disabled => false,
        };
        if checked {
            guard_block(func, &cfg, block, &sigs, report);
        }
    }

    if runtime_sig && config.cfc_mode == CfcMode::InterRasm {
        guard_entry_with_inter_signature(func, entry, report);
    }
}

fn has_switch_predecessor(func: &Function, cfg: &ControlFlowGraph, block: Block) -> bool {
    cfg.pred_iter(block).any(|p| matches!(func.dfg[p.inst], InstructionData::Switch { .. }))
}

fn make_handler_ref(cur: &mut FuncCursor) -> FuncRef {
    cur.dfg_mut().make_ext_func(ExtFuncData { name: ExternalName::named("SignatureMismatch_Handler"), signature: Signature::new() })
}

fn make_error_block(cur: &mut FuncCursor) -> Block {
    let block = cur.dfg_mut().make_block();
    let handler = make_handler_ref(cur);
    let call = cur.dfg_mut().make_inst(InstructionData::Call { func_ref: handler, args: ValueList::default() });
    let ret = cur.dfg_mut().make_inst(InstructionData::Return { args: ValueList::default() });
    cur.layout_mut().append_block(block);
    cur.layout_mut().append_inst(call, block);
    cur.layout_mut().append_inst(ret, block);
    block
}

/// Append the predecessor's assigned signature as an edge argument, one per incoming edge, then
/// split `block` so a mismatched signature diverts into a dedicated error block instead of
/// falling into `block`'s real body.
fn guard_block(func: &mut Function, cfg: &ControlFlowGraph, block: Block, sigs: &SignatureMap, report: &mut HardenReport) {
    let preds: Vec<_> = cfg.pred_iter(block).collect();
    for pred in &preds {
        let sig = sigs[&pred.block];
        let c_val = {
            let mut cur = FuncCursor::new(func).at_inst(pred.inst);
            let c = cur.ins(InstructionData::Iconst { ty: Type::I64, imm: sig as i64 });
            cur.dfg_mut().append_result(c, Type::I64)
        };
        append_edge_arg(func, pred.inst, block, c_val);
    }

    let g = func.dfg.append_block_param(block, Type::I64);
    let expected = sigs[&block] as i64;

    let body_block = func.dfg.make_block();
    let first = func.layout.first_inst(block).expect("checked block has a real body to guard");
    func.layout.split_block(body_block, first);

    let mut cur = FuncCursor::new(func).at_bottom(block);
    let expected_val = {
        let c = cur.ins(InstructionData::Iconst { ty: Type::I64, imm: expected });
        cur.dfg_mut().append_result(c, Type::I64)
    };
    let cmp = cur.ins(InstructionData::IntCompare { cc: IntCC::Equal, args: [g, expected_val] });
    let cond = cur.dfg_mut().append_result(cmp, Type::Bool);
    let error_block = make_error_block(&mut cur);
    cur.ins(InstructionData::Brif {
        condition: cond,
        then_dst: body_block,
        then_args: ValueList::default(),
        else_dst: error_block,
        else_args: ValueList::default(),
    });

    report.signature_checks_inserted += 1;
}

fn append_edge_arg(func: &mut Function, inst: Inst, target: Block, value: Value) {
    let mut data = func.dfg[inst].clone();
    match &mut data {
        InstructionData::Jump { args, .. } => args.push(value, &mut func.dfg.value_lists),
        InstructionData::Brif { then_dst, then_args, else_dst, else_args, .. } => {
            if *then_dst == target {
                then_args.push(value, &mut func.dfg.value_lists);
            }
            if *else_dst == target {
                else_args.push(value, &mut func.dfg.value_lists);
            }
        }
        other => unreachable!("switch predecessors are filtered out before this point: {other:?}"),
    }
    func.dfg[inst] = data;
}

/// `runtime_sig` functions under inter-RASM check their entry against the fixed inter-procedural
/// constant (spec.md §6) instead of a per-function signature, since separately compiled callers
/// have no shared whole-program signature assignment to agree on.
fn guard_entry_with_inter_signature(func: &mut Function, entry: Block, report: &mut HardenReport) {
    let g = func.dfg.append_block_param(entry, Type::I64);
    func.signature.params.push(Type::I64);

    let body_block = func.dfg.make_block();
    let Some(first) = func.layout.first_inst(entry) else { return };
    func.layout.split_block(body_block, first);

    let mut cur = FuncCursor::new(func).at_bottom(entry);
    let expected_val = {
        let c = cur.ins(InstructionData::Iconst { ty: Type::I64, imm: INTER_RASM_DEFAULT_SIGNATURE });
        cur.dfg_mut().append_result(c, Type::I64)
    };
    let cmp = cur.ins(InstructionData::IntCompare { cc: IntCC::Equal, args: [g, expected_val] });
    let cond = cur.dfg_mut().append_result(cmp, Type::Bool);
    let error_block = make_error_block(&mut cur);
    cur.ins(InstructionData::Brif {
        condition: cond,
        then_dst: body_block,
        then_args: ValueList::default(),
        else_dst: error_block,
        else_args: ValueList::default(),
    });

    report.signature_checks_inserted += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ExternalName as EName, FuncRecord, Linkage, Signature as Sig};

    fn diamond() -> (Function, Block, Block, Block, Block) {
        let mut func = Function::new(EName::named("f"), Sig::new());
        let entry = func.dfg.make_block();
        let left = func.dfg.make_block();
        let right = func.dfg.make_block();
        let merge = func.dfg.make_block();
        func.layout.append_block(entry);
        func.layout.append_block(left);
        func.layout.append_block(right);
        func.layout.append_block(merge);

        let cond = func.dfg.append_block_param(entry, Type::Bool);
        let br = func.dfg.make_inst(InstructionData::Brif {
            condition: cond,
            then_dst: left,
            then_args: ValueList::default(),
            else_dst: right,
            else_args: ValueList::default(),
        });
        func.layout.append_inst(br, entry);

        let j0 = func.dfg.make_inst(InstructionData::Jump { destination: merge, args: ValueList::default() });
        func.layout.append_inst(j0, left);
        let j1 = func.dfg.make_inst(InstructionData::Jump { destination: merge, args: ValueList::default() });
        func.layout.append_inst(j1, right);

        let ret = func.dfg.make_inst(InstructionData::Return { args: ValueList::default() });
        func.layout.append_inst(ret, merge);

        (func, entry, left, right, merge)
    }

    #[test]
    fn cfcss_guards_every_non_entry_block_with_a_threaded_signature() {
        let (func, _entry, left, right, merge) = diamond();
        let mut module = Module::new();
        let id = module.functions.push(FuncRecord { name: "f".into(), linkage: Linkage::Internal, function: func });
        let annotations = Annotations::default();
        let mut config = HardenConfig::default();
        config.cfc_mode = CfcMode::Cfcss;
        let mut report = HardenReport::new();

        run(&mut module, &annotations, &config, &mut report);

        assert_eq!(report.signature_checks_inserted, 3, "left, right, and merge each get a check");
        let f = &module.functions[id].function;
        assert!(!f.dfg.block_params(merge).is_empty(), "merge got a threaded signature param");
        let _ = (left, right);
    }

    #[test]
    fn rasm_skips_the_single_predecessor_chain_link() {
        let mut func = Function::new(EName::named("f"), Sig::new());
        let entry = func.dfg.make_block();
        let middle = func.dfg.make_block();
        let tail = func.dfg.make_block();
        func.layout.append_block(entry);
        func.layout.append_block(middle);
        func.layout.append_block(tail);
        let j0 = func.dfg.make_inst(InstructionData::Jump { destination: middle, args: ValueList::default() });
        func.layout.append_inst(j0, entry);
        let j1 = func.dfg.make_inst(InstructionData::Jump { destination: tail, args: ValueList::default() });
        func.layout.append_inst(j1, middle);
        let ret = func.dfg.make_inst(InstructionData::Return { args: ValueList::default() });
        func.layout.append_inst(ret, tail);

        let mut module = Module::new();
        module.functions.push(FuncRecord { name: "f".into(), linkage: Linkage::Internal, function: func });
        let annotations = Annotations::default();
        let mut config = HardenConfig::default();
        config.cfc_mode = CfcMode::Rasm;
        let mut report = HardenReport::new();

        run(&mut module, &annotations, &config, &mut report);

        assert_eq!(report.signature_checks_inserted, 0, "a straight-line chain never diverges, so RASM checks nothing");
    }

    #[test]
    fn disabled_cfc_mode_leaves_the_function_untouched() {
        let (func, ..) = diamond();
        let mut module = Module::new();
        module.functions.push(FuncRecord { name: "f".into(), linkage: Linkage::Internal, function: func });
        let annotations = Annotations::default();
        let config = HardenConfig::default();
        let mut report = HardenReport::new();

        run(&mut module, &annotations, &config, &mut report);

        assert_eq!(report.signature_checks_inserted, 0);
    }
}
