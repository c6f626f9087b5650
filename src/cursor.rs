//! Cursor library.
//!
//! A `FuncCursor` holds a mutable reference to a whole `Function` together with a navigable
//! position in its `Layout`, the way the teacher's `cursor::FuncCursor` does. C6 uses it to split
//! blocks and splice in verification blocks; C5 and C7 use it to insert duplicate/refresh
//! instructions right after the instruction that produced their operands.

use crate::ir::{Block, DataFlowGraph, Function, Inst, InstructionData};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CursorPosition {
    Nowhere,
    At(Inst),
    Before(Block),
    After(Block),
}

/// Common navigation operations shared by cursor types. The teacher implements this over both a
/// whole-function cursor and a single-block-encoding cursor; this crate only ever needs the
/// former, but keeps the trait split because it is where the default navigation methods live.
pub trait Cursor {
    fn position(&self) -> CursorPosition;
    fn set_position(&mut self, pos: CursorPosition);
    fn layout(&self) -> &crate::ir::Layout;
    fn layout_mut(&mut self) -> &mut crate::ir::Layout;

    fn at_position(mut self, pos: CursorPosition) -> Self
    where
        Self: Sized,
    {
        self.set_position(pos);
        self
    }

    fn at_inst(mut self, inst: Inst) -> Self
    where
        Self: Sized,
    {
        self.goto_inst(inst);
        self
    }

    fn at_top(mut self, block: Block) -> Self
    where
        Self: Sized,
    {
        self.goto_top(block);
        self
    }

    fn at_bottom(mut self, block: Block) -> Self
    where
        Self: Sized,
    {
        self.goto_bottom(block);
        self
    }

    fn current_block(&self) -> Option<Block> {
        match self.position() {
            CursorPosition::Nowhere => None,
            CursorPosition::At(inst) => self.layout().inst_block(inst),
            CursorPosition::Before(block) | CursorPosition::After(block) => Some(block),
        }
    }

    fn current_inst(&self) -> Option<Inst> {
        match self.position() {
            CursorPosition::At(inst) => Some(inst),
            _ => None,
        }
    }

    fn goto_inst(&mut self, inst: Inst) {
        debug_assert!(self.layout().inst_block(inst).is_some());
        self.set_position(CursorPosition::At(inst));
    }

    fn goto_after_inst(&mut self, inst: Inst) {
        debug_assert!(self.layout().inst_block(inst).is_some());
        let new_pos = if let Some(next) = self.layout().next_inst(inst) {
            CursorPosition::At(next)
        } else {
            CursorPosition::After(self.layout().inst_block(inst).expect("instruction removed?"))
        };
        self.set_position(new_pos);
    }

    fn goto_top(&mut self, block: Block) {
        debug_assert!(self.layout().is_block_inserted(block));
        self.set_position(CursorPosition::Before(block));
    }

    fn goto_bottom(&mut self, block: Block) {
        debug_assert!(self.layout().is_block_inserted(block));
        self.set_position(CursorPosition::After(block));
    }

    fn next_block(&mut self) -> Option<Block> {
        let next = if let Some(block) = self.current_block() {
            self.layout().next_block(block)
        } else {
            self.layout().entry_block()
        };
        self.set_position(match next {
            Some(block) => CursorPosition::Before(block),
            None => CursorPosition::Nowhere,
        });
        next
    }

    fn next_inst(&mut self) -> Option<Inst> {
        match self.position() {
            CursorPosition::Nowhere | CursorPosition::After(..) => None,
            CursorPosition::At(inst) => {
                if let Some(next) = self.layout().next_inst(inst) {
                    self.set_position(CursorPosition::At(next));
                    Some(next)
                } else {
                    let block = self.layout().inst_block(inst).expect("instruction removed?");
                    self.set_position(CursorPosition::After(block));
                    None
                }
            }
            CursorPosition::Before(block) => {
                if let Some(next) = self.layout().first_inst(block) {
                    self.set_position(CursorPosition::At(next));
                    Some(next)
                } else {
                    self.set_position(CursorPosition::After(block));
                    None
                }
            }
        }
    }

    fn prev_inst(&mut self) -> Option<Inst> {
        match self.position() {
            CursorPosition::Nowhere | CursorPosition::Before(..) => None,
            CursorPosition::At(inst) => {
                if let Some(prev) = self.layout().prev_inst(inst) {
                    self.set_position(CursorPosition::At(prev));
                    Some(prev)
                } else {
                    let block = self.layout().inst_block(inst).expect("instruction removed?");
                    self.set_position(CursorPosition::Before(block));
                    None
                }
            }
            CursorPosition::After(block) => {
                if let Some(prev) = self.layout().last_inst(block) {
                    self.set_position(CursorPosition::At(prev));
                    Some(prev)
                } else {
                    self.set_position(CursorPosition::Before(block));
                    None
                }
            }
        }
    }

    /// Insert `inst` (already created in the DFG) at the current position.
    fn insert_inst(&mut self, inst: Inst) {
        match self.position() {
            CursorPosition::Nowhere | CursorPosition::Before(..) => panic!("invalid insert_inst position"),
            CursorPosition::At(cur) => self.layout_mut().insert_inst(inst, cur),
            CursorPosition::After(block) => self.layout_mut().append_inst(inst, block),
        }
    }

    fn remove_inst(&mut self) -> Inst {
        let inst = self.current_inst().expect("no instruction to remove");
        self.next_inst();
        self.layout_mut().remove_inst(inst);
        inst
    }

    /// Split the block at the current instruction and switch to it, the way C6 step 1/2 does to
    /// carve out the predecessor `P` and the verification block `V`.
    fn insert_block(&mut self, new_block: Block) {
        match self.position() {
            CursorPosition::At(inst) => {
                self.layout_mut().split_block(new_block, inst);
                return;
            }
            CursorPosition::Nowhere => self.layout_mut().append_block(new_block),
            CursorPosition::Before(block) => self.layout_mut().insert_block(new_block, block),
            CursorPosition::After(block) => self.layout_mut().insert_block_after(new_block, block),
        }
        self.set_position(CursorPosition::After(new_block));
    }
}

/// A cursor over a whole function: its `DataFlowGraph` and `Layout` together.
pub struct FuncCursor<'f> {
    pos: CursorPosition,
    pub func: &'f mut Function,
}

impl<'f> FuncCursor<'f> {
    pub fn new(func: &'f mut Function) -> Self {
        Self { pos: CursorPosition::Nowhere, func }
    }

    pub fn dfg(&self) -> &DataFlowGraph {
        &self.func.dfg
    }

    pub fn dfg_mut(&mut self) -> &mut DataFlowGraph {
        &mut self.func.dfg
    }

    /// Build `data` in the DFG and insert it at the current position, returning the new
    /// instruction. This plays the role the teacher's `InsertBuilder`/`InstBuilder` generated
    /// code plays, collapsed into one call since this IR has no per-opcode builder codegen.
    pub fn ins(&mut self, data: InstructionData) -> Inst {
        let inst = self.func.dfg.make_inst(data);
        self.insert_inst(inst);
        inst
    }
}

impl<'f> Cursor for FuncCursor<'f> {
    fn position(&self) -> CursorPosition {
        self.pos
    }

    fn set_position(&mut self, pos: CursorPosition) {
        self.pos = pos;
    }

    fn layout(&self) -> &crate::ir::Layout {
        &self.func.layout
    }

    fn layout_mut(&mut self) -> &mut crate::ir::Layout {
        &mut self.func.layout
    }
}
