//! A control flow graph: mappings of basic blocks to their predecessors and successors.
//!
//! Grounded in the teacher's `flowgraph::ControlFlowGraph`, with `bforest`'s balanced-tree
//! maps/sets (tuned for the huge functions a register allocator sees) replaced by
//! `FxHashMap`/`Vec` — this pass never sees a function large enough for that to matter, and the
//! simpler representation is easier to keep correct while hand-rewriting instruction duplication.

use cranelift_entity::SecondaryMap;

use crate::ir::{Block, Function, Inst};

/// A predecessor edge: the block it originates from and the branch instruction that is its
/// terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPredecessor {
    pub block: Block,
    pub inst: Inst,
}

impl BlockPredecessor {
    pub fn new(block: Block, inst: Inst) -> Self {
        Self { block, inst }
    }
}

#[derive(Clone, Default)]
struct CfgNode {
    predecessors: Vec<BlockPredecessor>,
    successors: Vec<Block>,
}

/// Maps every block in a function to its predecessors and successors, recomputed in full by
/// [`Self::compute`]. C6/C7 consult predecessors when deciding whether a synchronization point's
/// predecessor must be split versus reused; [`crate::dominator_tree::DominatorTree`] is built
/// directly on top of this.
pub struct ControlFlowGraph {
    nodes: SecondaryMap<Block, CfgNode>,
    valid: bool,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self { nodes: SecondaryMap::new(), valid: false }
    }

    pub fn with_function(func: &Function) -> Self {
        let mut cfg = Self::new();
        cfg.compute(func);
        cfg
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.valid = false;
    }

    pub fn compute(&mut self, func: &Function) {
        self.clear();
        for block in func.layout.blocks() {
            if let Some(inst) = func.layout.last_inst(block) {
                for dest in func.dfg[inst].branch_destinations() {
                    self.add_edge(block, inst, dest);
                }
            }
        }
        self.valid = true;
    }

    fn add_edge(&mut self, from: Block, from_inst: Inst, to: Block) {
        self.nodes[from].successors.push(to);
        self.nodes[to].predecessors.push(BlockPredecessor::new(from, from_inst));
    }

    pub fn pred_iter(&self, block: Block) -> impl Iterator<Item = BlockPredecessor> + '_ {
        self.nodes[block].predecessors.iter().copied()
    }

    pub fn pred_count(&self, block: Block) -> usize {
        self.nodes[block].predecessors.len()
    }

    pub fn succ_iter(&self, block: Block) -> impl Iterator<Item = Block> + '_ {
        self.nodes[block].successors.iter().copied()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ControlFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}
