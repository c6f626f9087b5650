//! RASM: instead of giving every block its own signature and checking every edge like
//! [`super::cfcss`], a block with exactly one predecessor that itself has exactly one successor
//! inherits that predecessor's signature unchanged — the edge can't diverge, so there is nothing
//! to check. Branch and merge points still get a fresh signature and a real comparison. This is
//! the "fewer signature-update instructions on straight-line code" tradeoff the RASM literature
//! describes, expressed here as signature *reuse* along unambiguous chains rather than as a
//! distinct instruction-selection scheme.

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function};

use super::{SignatureMap, SignatureScheme};

pub(super) struct Rasm;

impl SignatureScheme for Rasm {
    fn assign(&self, func: &Function, cfg: &ControlFlowGraph) -> SignatureMap {
        let mut sigs = SignatureMap::default();
        let mut next_id = 1u64;
        for block in func.layout.blocks() {
            let preds: Vec<_> = cfg.pred_iter(block).collect();
            let inherited = match preds.as_slice() {
                [p] if cfg.succ_iter(p.block).count() == 1 => sigs.get(&p.block).copied(),
                _ => None,
            };
            let sig = inherited.unwrap_or_else(|| {
                let id = next_id;
                next_id += 1;
                id
            });
            sigs.insert(block, sig);
        }
        sigs
    }

    fn needs_check(&self, block: Block, cfg: &ControlFlowGraph, sigs: &SignatureMap) -> bool {
        let preds: Vec<_> = cfg.pred_iter(block).collect();
        match preds.as_slice() {
            [] => false,
            [p] => sigs.get(&p.block) != Some(&sigs[&block]),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ExternalName, InstructionData, Signature, ValueList};

    #[test]
    fn a_straight_chain_reuses_one_signature_throughout() {
        let mut func = Function::new(ExternalName::named("f"), Signature::new());
        let a = func.dfg.make_block();
        let b = func.dfg.make_block();
        let c = func.dfg.make_block();
        func.layout.append_block(a);
        func.layout.append_block(b);
        func.layout.append_block(c);
        let j0 = func.dfg.make_inst(InstructionData::Jump { destination: b, args: ValueList::default() });
        func.layout.append_inst(j0, a);
        let j1 = func.dfg.make_inst(InstructionData::Jump { destination: c, args: ValueList::default() });
        func.layout.append_inst(j1, b);

        let cfg = ControlFlowGraph::with_function(&func);
        let sigs = Rasm.assign(&func, &cfg);

        assert_eq!(sigs[&a], sigs[&b]);
        assert_eq!(sigs[&b], sigs[&c]);
        assert!(!Rasm.needs_check(b, &cfg, &sigs));
        assert!(!Rasm.needs_check(c, &cfg, &sigs));
    }

    #[test]
    fn a_branch_gives_each_successor_its_own_signature() {
        let mut func = Function::new(ExternalName::named("f"), Signature::new());
        let entry = func.dfg.make_block();
        let left = func.dfg.make_block();
        let right = func.dfg.make_block();
        func.layout.append_block(entry);
        func.layout.append_block(left);
        func.layout.append_block(right);
        let cond = func.dfg.append_block_param(entry, crate::ir::Type::Bool);
        let br = func.dfg.make_inst(InstructionData::Brif {
            condition: cond,
            then_dst: left,
            then_args: ValueList::default(),
            else_dst: right,
            else_args: ValueList::default(),
        });
        func.layout.append_inst(br, entry);

        let cfg = ControlFlowGraph::with_function(&func);
        let sigs = Rasm.assign(&func, &cfg);

        assert_ne!(sigs[&left], sigs[&right], "entry has two successors, so neither edge is a chain link");
        assert!(Rasm.needs_check(left, &cfg, &sigs));
        assert!(Rasm.needs_check(right, &cfg, &sigs));
    }

    #[test]
    fn a_merge_point_always_needs_a_check() {
        let mut func = Function::new(ExternalName::named("f"), Signature::new());
        let left = func.dfg.make_block();
        let right = func.dfg.make_block();
        let merge = func.dfg.make_block();
        func.layout.append_block(left);
        func.layout.append_block(right);
        func.layout.append_block(merge);
        let j0 = func.dfg.make_inst(InstructionData::Jump { destination: merge, args: ValueList::default() });
        func.layout.append_inst(j0, left);
        let j1 = func.dfg.make_inst(InstructionData::Jump { destination: merge, args: ValueList::default() });
        func.layout.append_inst(j1, right);

        let cfg = ControlFlowGraph::with_function(&func);
        let sigs = Rasm.assign(&func, &cfg);

        assert!(Rasm.needs_check(merge, &cfg, &sigs));
    }
}
