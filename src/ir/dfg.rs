//! Data flow graph tracking instructions, values, and blocks.
//!
//! Mirrors the teacher's `ir::dfg::DataFlowGraph`: instructions, block parameters, and
//! signatures/ext-funcs/globals/jump-tables/constants referenced from instructions all live
//! here, keyed by entity reference; the *order* blocks and instructions appear in a function is
//! tracked separately by [`crate::ir::layout::Layout`].

use std::fmt;
use std::ops::{Index, IndexMut};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use cranelift_entity::{PrimaryMap, SecondaryMap};

use crate::ir::constant::ConstantPool;
use crate::ir::instructions::{InstructionData, ValueList, ValueListPool};
use crate::ir::{Block, ExtFuncData, FuncRef, GlobalValue, GlobalValueData, Inst, JumpTable, JumpTableData, SigRef, Signature, Type, Value};

/// Where a value comes from: either a block parameter or the Nth result of an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueDef {
    Param(Block, usize),
    Result(Inst, usize),
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
enum ValueData {
    Param { ty: Type, block: Block, num: u16 },
    Result { ty: Type, inst: Inst, num: u16 },
}

#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct BlockData {
    params: ValueList,
}

impl BlockData {
    pub fn params<'a>(&self, pool: &'a ValueListPool) -> &'a [Value] {
        self.params.as_slice(pool)
    }
}

#[derive(Clone, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct DataFlowGraph {
    insts: PrimaryMap<Inst, InstructionData>,
    results: SecondaryMap<Inst, ValueList>,
    blocks: PrimaryMap<Block, BlockData>,
    values: PrimaryMap<Value, ValueData>,
    pub value_lists: ValueListPool,
    pub signatures: PrimaryMap<SigRef, Signature>,
    pub ext_funcs: PrimaryMap<FuncRef, ExtFuncData>,
    pub global_values: PrimaryMap<GlobalValue, GlobalValueData>,
    pub jump_tables: PrimaryMap<JumpTable, JumpTableData>,
    pub constants: ConstantPool,
}

impl Index<Inst> for DataFlowGraph {
    type Output = InstructionData;
    fn index(&self, inst: Inst) -> &InstructionData {
        &self.insts[inst]
    }
}

impl IndexMut<Inst> for DataFlowGraph {
    fn index_mut(&mut self, inst: Inst) -> &mut InstructionData {
        &mut self.insts[inst]
    }
}

impl DataFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_inst(&mut self, data: InstructionData) -> Inst {
        let inst = self.insts.push(data);
        debug_assert_eq!(self.results.len(), inst.as_u32() as usize);
        self.results.push(ValueList::default());
        inst
    }

    /// Append a new result of type `ty` to `inst`, returning the fresh [`Value`].
    pub fn append_result(&mut self, inst: Inst, ty: Type) -> Value {
        let num = self.results[inst].len(&self.value_lists) as u16;
        let value = self.values.push(ValueData::Result { ty, inst, num });
        self.results[inst].push(value, &mut self.value_lists);
        value
    }

    pub fn inst_results(&self, inst: Inst) -> &[Value] {
        self.results[inst].as_slice(&self.value_lists)
    }

    pub fn first_result(&self, inst: Inst) -> Value {
        self.inst_results(inst)[0]
    }

    pub fn inst_args(&self, inst: Inst) -> smallvec::SmallVec<[Value; 4]> {
        self.insts[inst].arguments(&self.value_lists)
    }

    /// Rewrite every `Value` operand of `inst` through `f` in place (see
    /// [`InstructionData::map_values`]).
    pub fn map_inst_values(&mut self, inst: Inst, f: impl FnMut(Value) -> Value) {
        self.insts[inst].map_values(&mut self.value_lists, f);
    }

    /// Replace every use of `old` with `new` across every instruction in this function's body.
    /// Used whenever a pass retires a value — C3 redirecting a call's old scalar result to a
    /// freshly loaded out-parameter, C5 splicing a trivially-elided clone back out.
    pub fn replace_value_uses(&mut self, old: Value, new: Value) {
        let insts: Vec<Inst> = self.insts().collect();
        for inst in insts {
            self.map_inst_values(inst, |v| if v == old { new } else { v });
        }
    }

    pub fn make_block(&mut self) -> Block {
        self.blocks.push(BlockData::default())
    }

    pub fn append_block_param(&mut self, block: Block, ty: Type) -> Value {
        let num = self.blocks[block].params.len(&self.value_lists) as u16;
        let value = self.values.push(ValueData::Param { ty, block, num });
        self.blocks[block].params.push(value, &mut self.value_lists);
        value
    }

    pub fn block_params(&self, block: Block) -> &[Value] {
        self.blocks[block].params(&self.value_lists)
    }

    pub fn value_type(&self, value: Value) -> Type {
        match self.values[value] {
            ValueData::Param { ty, .. } | ValueData::Result { ty, .. } => ty,
        }
    }

    pub fn value_def(&self, value: Value) -> ValueDef {
        match self.values[value] {
            ValueData::Param { block, num, .. } => ValueDef::Param(block, num as usize),
            ValueData::Result { inst, num, .. } => ValueDef::Result(inst, num as usize),
        }
    }

    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    /// Every instruction ever created in this DFG, in creation order (not program order — use
    /// [`crate::ir::Layout::block_insts`] for that).
    pub fn insts(&self) -> impl Iterator<Item = Inst> + '_ {
        self.insts.keys()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.values.keys()
    }

    pub fn make_ext_func(&mut self, data: ExtFuncData) -> FuncRef {
        self.ext_funcs.push(data)
    }

    pub fn make_signature(&mut self, sig: Signature) -> SigRef {
        self.signatures.push(sig)
    }

    pub fn make_global_value(&mut self, data: GlobalValueData) -> GlobalValue {
        self.global_values.push(data)
    }

    pub fn make_jump_table(&mut self, data: JumpTableData) -> JumpTable {
        self.jump_tables.push(data)
    }
}

impl fmt::Debug for DataFlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFlowGraph")
            .field("num_insts", &self.num_insts())
            .field("num_blocks", &self.num_blocks())
            .field("num_values", &self.num_values())
            .finish()
    }
}
