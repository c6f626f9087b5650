//! Function layout: the order of blocks in a function, and of instructions within a block.
//!
//! The teacher's `ir::layout::Layout` keeps this order as sequence-numbered doubly linked lists
//! so that splicing is O(1) and comparisons are O(1). This pass runs over whole-program IR once,
//! not inside a register allocator's hot loop, so a plain `Vec`-backed order (grounded on the
//! same public shape: block order, per-block instruction order, `split_block`, `insert_inst`) is
//! simpler to get right and is what [`crate::cursor::FuncCursor`] and [`crate::checks`] (C6)
//! build on.

use cranelift_entity::SecondaryMap;

use crate::ir::{Block, Inst};

#[derive(Clone, Default)]
pub struct Layout {
    block_order: Vec<Block>,
    block_insts: SecondaryMap<Block, Vec<Inst>>,
    inst_block: SecondaryMap<Inst, Option<Block>>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.block_order.iter().copied()
    }

    pub fn is_block_inserted(&self, block: Block) -> bool {
        self.block_order.contains(&block)
    }

    pub fn entry_block(&self) -> Option<Block> {
        self.block_order.first().copied()
    }

    pub fn last_block(&self) -> Option<Block> {
        self.block_order.last().copied()
    }

    pub fn next_block(&self, block: Block) -> Option<Block> {
        let idx = self.block_order.iter().position(|&b| b == block)?;
        self.block_order.get(idx + 1).copied()
    }

    pub fn prev_block(&self, block: Block) -> Option<Block> {
        let idx = self.block_order.iter().position(|&b| b == block)?;
        idx.checked_sub(1).and_then(|i| self.block_order.get(i).copied())
    }

    pub fn append_block(&mut self, block: Block) {
        debug_assert!(!self.is_block_inserted(block));
        self.block_order.push(block);
    }

    /// Insert `block` immediately before `before` in block order.
    pub fn insert_block(&mut self, block: Block, before: Block) {
        debug_assert!(!self.is_block_inserted(block));
        let idx = self.block_order.iter().position(|&b| b == before).expect("before block not in layout");
        self.block_order.insert(idx, block);
    }

    /// Insert `block` immediately after `after` in block order. Used by C6 step 2 to place the
    /// verification block `V` between the split predecessor `P` and `I`'s block.
    pub fn insert_block_after(&mut self, block: Block, after: Block) {
        debug_assert!(!self.is_block_inserted(block));
        let idx = self.block_order.iter().position(|&b| b == after).expect("after block not in layout");
        self.block_order.insert(idx + 1, block);
    }

    pub fn block_insts(&self, block: Block) -> &[Inst] {
        &self.block_insts[block]
    }

    pub fn inst_block(&self, inst: Inst) -> Option<Block> {
        self.inst_block[inst]
    }

    pub fn append_inst(&mut self, inst: Inst, block: Block) {
        debug_assert!(self.inst_block[inst].is_none());
        self.block_insts[block].push(inst);
        self.inst_block[inst] = Some(block);
    }

    /// Insert `inst` immediately before `before`, in `before`'s block.
    pub fn insert_inst(&mut self, inst: Inst, before: Inst) {
        debug_assert!(self.inst_block[inst].is_none());
        let block = self.inst_block[before].expect("before instruction not in layout");
        let insts = &mut self.block_insts[block];
        let pos = insts.iter().position(|&i| i == before).expect("before instruction not in its block's list");
        insts.insert(pos, inst);
        self.inst_block[inst] = Some(block);
    }

    pub fn remove_inst(&mut self, inst: Inst) {
        if let Some(block) = self.inst_block[inst].take() {
            self.block_insts[block].retain(|&i| i != inst);
        }
    }

    pub fn first_inst(&self, block: Block) -> Option<Inst> {
        self.block_insts[block].first().copied()
    }

    pub fn last_inst(&self, block: Block) -> Option<Inst> {
        self.block_insts[block].last().copied()
    }

    pub fn next_inst(&self, inst: Inst) -> Option<Inst> {
        let block = self.inst_block[inst]?;
        let insts = &self.block_insts[block];
        let idx = insts.iter().position(|&i| i == inst)?;
        insts.get(idx + 1).copied()
    }

    pub fn prev_inst(&self, inst: Inst) -> Option<Inst> {
        let block = self.inst_block[inst]?;
        let insts = &self.block_insts[block];
        let idx = insts.iter().position(|&i| i == inst)?;
        idx.checked_sub(1).and_then(|i| insts.get(i).copied())
    }

    /// Split `block` so that `split_at` and every instruction following it in program order move
    /// into `new_block`, which is inserted immediately after `block` in layout order. `block`
    /// retains everything before `split_at`. This is the first step of C6's protocol (spec.md
    /// §4.6 step 1: "Split the containing block just before instruction `I`").
    pub fn split_block(&mut self, new_block: Block, split_at: Inst) {
        let block = self.inst_block[split_at].expect("split_at not in layout");
        debug_assert!(!self.is_block_inserted(new_block));
        let insts = &mut self.block_insts[block];
        let pos = insts.iter().position(|&i| i == split_at).expect("split_at not in block");
        let tail: Vec<Inst> = insts.split_off(pos);
        for &inst in &tail {
            self.inst_block[inst] = Some(new_block);
        }
        self.block_insts[new_block] = tail;
        self.insert_block_after(new_block, block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    fn blocks(n: u32) -> Vec<Block> {
        (0..n).map(Block::new).collect()
    }

    fn insts(n: u32) -> Vec<Inst> {
        (0..n).map(Inst::new).collect()
    }

    #[test]
    fn split_block_moves_tail_into_new_block_after_original() {
        let bs = blocks(2);
        let is = insts(3);
        let mut layout = Layout::new();
        layout.append_block(bs[0]);
        for &i in &is {
            layout.append_inst(i, bs[0]);
        }
        layout.split_block(bs[1], is[1]);

        assert_eq!(layout.block_insts(bs[0]), &[is[0]]);
        assert_eq!(layout.block_insts(bs[1]), &[is[1], is[2]]);
        assert_eq!(layout.blocks().collect::<Vec<_>>(), vec![bs[0], bs[1]]);
        assert_eq!(layout.inst_block(is[2]), Some(bs[1]));
    }

    #[test]
    fn insert_block_after_preserves_relative_order() {
        let bs = blocks(3);
        let mut layout = Layout::new();
        layout.append_block(bs[0]);
        layout.append_block(bs[2]);
        layout.insert_block_after(bs[1], bs[0]);
        assert_eq!(layout.blocks().collect::<Vec<_>>(), bs);
    }

    #[test]
    fn next_and_prev_inst_walk_block_order() {
        let bs = blocks(1);
        let is = insts(3);
        let mut layout = Layout::new();
        layout.append_block(bs[0]);
        for &i in &is {
            layout.append_inst(i, bs[0]);
        }
        assert_eq!(layout.next_inst(is[0]), Some(is[1]));
        assert_eq!(layout.prev_inst(is[2]), Some(is[1]));
        assert_eq!(layout.next_inst(is[2]), None);
    }

    #[test]
    fn insert_inst_before_splices_in_program_order() {
        let bs = blocks(1);
        let is = insts(3);
        let mut layout = Layout::new();
        layout.append_block(bs[0]);
        layout.append_inst(is[0], bs[0]);
        layout.append_inst(is[2], bs[0]);
        layout.insert_inst(is[1], is[2]);
        assert_eq!(layout.block_insts(bs[0]), &[is[0], is[1], is[2]]);
    }

    #[test]
    fn remove_inst_detaches_from_block_and_layout() {
        let bs = blocks(1);
        let is = insts(2);
        let mut layout = Layout::new();
        layout.append_block(bs[0]);
        layout.append_inst(is[0], bs[0]);
        layout.append_inst(is[1], bs[0]);
        layout.remove_inst(is[0]);
        assert_eq!(layout.block_insts(bs[0]), &[is[1]]);
        assert_eq!(layout.inst_block(is[0]), None);
    }
}
