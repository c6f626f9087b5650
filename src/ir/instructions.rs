//! The finite opcode set of the IR (spec.md §3): `alloca, load, store, binary, unary, cmp, gep,
//! phi, select, cast, call/invoke, branch/switch/return, intrinsic, atomic-rmw, cmpxchg`.
//!
//! Unlike the teacher's `ir::instructions`, which is mostly generated from a `meta/` opcode
//! description and packs every format into a fixed 16-byte `InstructionData`, this module is
//! hand-written directly against the closed opcode list above: there is no target-specific
//! lowering downstream, so there is no benefit to the teacher's dense binary encoding. The shape
//! — `Opcode` as the dispatch tag, `InstructionData` as the per-opcode payload, value lists
//! stored in a `ListPool` to keep `InstructionData` small and `Copy`-ish — is kept.

use std::fmt;

use cranelift_entity::{EntityList, ListPool};
use smallvec::SmallVec;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use crate::ir::condcodes::{FloatCC, IntCC};
use crate::ir::libcall::LibCall;
use crate::ir::{AtomicRmwOp, Block, Constant, FuncRef, GlobalValue, JumpTable, MemFlags, SigRef, Type, Value};

pub type ValueList = EntityList<Value>;
pub type ValueListPool = ListPool<Value>;

/// A scalar binary arithmetic/bitwise operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum BinaryOp {
    Iadd,
    Isub,
    Imul,
    Udiv,
    Sdiv,
    Urem,
    Srem,
    Band,
    Bor,
    Bxor,
    Shl,
    Ushr,
    Sshr,
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
}

/// A scalar unary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum UnaryOp {
    Ineg,
    Bnot,
    Fneg,
    Fabs,
}

/// A value-preserving or value-converting cast.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum CastOp {
    Bitcast,
    Trunc,
    Sext,
    Zext,
    FpExt,
    FpTrunc,
    IntToPtr,
    PtrToInt,
    FpToSi,
    FpToUi,
    SiToFp,
    UiToFp,
}

/// The opcode of an instruction: the dispatch tag consulted by every pass that classifies
/// instructions (most directly `instdup::classify`, which mirrors spec.md §4.5's five-way
/// dispatch).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Opcode {
    Alloca,
    Load,
    Store,
    Binary(BinaryOp),
    Unary(UnaryOp),
    Icmp,
    Fcmp,
    Gep,
    Phi,
    Select,
    Cast(CastOp),
    Call,
    Invoke,
    IndirectCall,
    Jump,
    Brif,
    Switch,
    Return,
    Intrinsic,
    AtomicRmw,
    Cmpxchg,
    GlobalValueAddr,
    Iconst,
    Fconst,
    ConstantAddr,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A class of instruction as spec.md §4.5 dispatches on it when deciding how `duplicate(I)`
/// treats an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstClass {
    Alloca,
    Pure,
    Store,
    Terminator,
    Call,
}

impl Opcode {
    pub fn class(self) -> InstClass {
        match self {
            Opcode::Alloca => InstClass::Alloca,
            Opcode::Load
            | Opcode::Gep
            | Opcode::Binary(_)
            | Opcode::Unary(_)
            | Opcode::Icmp
            | Opcode::Fcmp
            | Opcode::Phi
            | Opcode::Select
            | Opcode::Cast(_)
            | Opcode::Iconst
            | Opcode::Fconst
            | Opcode::GlobalValueAddr
            | Opcode::ConstantAddr => InstClass::Pure,
            Opcode::Store | Opcode::AtomicRmw | Opcode::Cmpxchg => InstClass::Store,
            Opcode::Jump | Opcode::Brif | Opcode::Switch | Opcode::Return => InstClass::Terminator,
            Opcode::Call | Opcode::Invoke | Opcode::IndirectCall | Opcode::Intrinsic => InstClass::Call,
        }
    }

    pub fn is_terminator(self) -> bool {
        self.class() == InstClass::Terminator
    }
}

/// The payload of an instruction, keyed by [`Opcode`]. Value lists longer than a couple of
/// entries (call arguments, switch arms, phi incomings) are stored in a [`ValueListPool`] rather
/// than inline, the way the teacher keeps `InstructionData` compact.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum InstructionData {
    Alloca { ty: Type, align: u32 },
    Iconst { ty: Type, imm: i64 },
    Fconst { ty: Type, bits: u64 },
    Unary { opcode: UnaryOp, ty: Type, arg: Value },
    Binary { opcode: BinaryOp, ty: Type, args: [Value; 2] },
    Load { ty: Type, flags: MemFlags, addr: Value, offset: i32 },
    Store { flags: MemFlags, value: Value, addr: Value, offset: i32 },
    Gep { ty: Type, base: Value, indices: ValueList },
    IntCompare { cc: IntCC, args: [Value; 2] },
    FloatCompare { cc: FloatCC, args: [Value; 2] },
    Phi { ty: Type, blocks: SmallVec<[Block; 4]>, values: ValueList },
    Select { args: [Value; 3] },
    Cast { opcode: CastOp, ty: Type, arg: Value },
    Call { func_ref: FuncRef, args: ValueList },
    Invoke { func_ref: FuncRef, args: ValueList, normal: Block, unwind: Block },
    IndirectCall { sig_ref: SigRef, callee: Value, args: ValueList },
    Jump { destination: Block, args: ValueList },
    Brif { condition: Value, then_dst: Block, then_args: ValueList, else_dst: Block, else_args: ValueList },
    Switch { value: Value, table: JumpTable, default: Block },
    Return { args: ValueList },
    AtomicRmw { op: AtomicRmwOp, flags: MemFlags, addr: Value, value: Value },
    Cmpxchg { flags: MemFlags, addr: Value, expected: Value, replacement: Value },
    Intrinsic { libcall: LibCall, args: ValueList },
    GlobalValueAddr { global_value: GlobalValue },
    ConstantAddr { constant: Constant },
}

impl InstructionData {
    pub fn opcode(&self) -> Opcode {
        match self {
            InstructionData::Alloca { .. } => Opcode::Alloca,
            InstructionData::Iconst { .. } => Opcode::Iconst,
            InstructionData::Fconst { .. } => Opcode::Fconst,
            InstructionData::Unary { opcode, .. } => Opcode::Unary(*opcode),
            InstructionData::Binary { opcode, .. } => Opcode::Binary(*opcode),
            InstructionData::Load { .. } => Opcode::Load,
            InstructionData::Store { .. } => Opcode::Store,
            InstructionData::Gep { .. } => Opcode::Gep,
            InstructionData::IntCompare { .. } => Opcode::Icmp,
            InstructionData::FloatCompare { .. } => Opcode::Fcmp,
            InstructionData::Phi { .. } => Opcode::Phi,
            InstructionData::Select { .. } => Opcode::Select,
            InstructionData::Cast { opcode, .. } => Opcode::Cast(*opcode),
            InstructionData::Call { .. } => Opcode::Call,
            InstructionData::Invoke { .. } => Opcode::Invoke,
            InstructionData::IndirectCall { .. } => Opcode::IndirectCall,
            InstructionData::Jump { .. } => Opcode::Jump,
            InstructionData::Brif { .. } => Opcode::Brif,
            InstructionData::Switch { .. } => Opcode::Switch,
            InstructionData::Return { .. } => Opcode::Return,
            InstructionData::AtomicRmw { .. } => Opcode::AtomicRmw,
            InstructionData::Cmpxchg { .. } => Opcode::Cmpxchg,
            InstructionData::Intrinsic { .. } => Opcode::Intrinsic,
            InstructionData::GlobalValueAddr { .. } => Opcode::GlobalValueAddr,
            InstructionData::ConstantAddr { .. } => Opcode::ConstantAddr,
        }
    }

    /// Every `Value` operand this instruction reads, in slot order. Used by C5's operand-rewrite
    /// rule and by C6 when it enumerates an instruction's comparable operands.
    pub fn arguments<'a>(&'a self, pool: &'a ValueListPool) -> SmallVec<[Value; 4]> {
        match self {
            InstructionData::Alloca { .. }
            | InstructionData::Iconst { .. }
            | InstructionData::Fconst { .. }
            | InstructionData::GlobalValueAddr { .. }
            | InstructionData::ConstantAddr { .. } => SmallVec::new(),
            InstructionData::Unary { arg, .. } | InstructionData::Cast { arg, .. } => {
                SmallVec::from_slice(&[*arg])
            }
            InstructionData::Binary { args, .. }
            | InstructionData::IntCompare { args, .. }
            | InstructionData::FloatCompare { args, .. } => SmallVec::from_slice(args),
            InstructionData::Load { addr, .. } => SmallVec::from_slice(&[*addr]),
            InstructionData::Store { value, addr, .. } => SmallVec::from_slice(&[*value, *addr]),
            InstructionData::Gep { base, indices, .. } => {
                let mut v = SmallVec::from_slice(&[*base]);
                v.extend(indices.as_slice(pool).iter().copied());
                v
            }
            InstructionData::Phi { values, .. } => SmallVec::from_slice(values.as_slice(pool)),
            InstructionData::Select { args } => SmallVec::from_slice(args),
            InstructionData::Call { args, .. } | InstructionData::Intrinsic { args, .. } => {
                SmallVec::from_slice(args.as_slice(pool))
            }
            InstructionData::Invoke { args, .. } => SmallVec::from_slice(args.as_slice(pool)),
            InstructionData::IndirectCall { callee, args, .. } => {
                let mut v = SmallVec::from_slice(&[*callee]);
                v.extend(args.as_slice(pool).iter().copied());
                v
            }
            InstructionData::Jump { args, .. } => SmallVec::from_slice(args.as_slice(pool)),
            InstructionData::Brif { condition, then_args, else_args, .. } => {
                let mut v = SmallVec::from_slice(&[*condition]);
                v.extend(then_args.as_slice(pool).iter().copied());
                v.extend(else_args.as_slice(pool).iter().copied());
                v
            }
            InstructionData::Switch { value, .. } => SmallVec::from_slice(&[*value]),
            InstructionData::Return { args } => SmallVec::from_slice(args.as_slice(pool)),
            InstructionData::AtomicRmw { addr, value, .. } => SmallVec::from_slice(&[*addr, *value]),
            InstructionData::Cmpxchg { addr, expected, replacement, .. } => {
                SmallVec::from_slice(&[*addr, *expected, *replacement])
            }
        }
    }

    /// Rewrite every `Value` operand in place through `f`. This is the mechanical half of C5's
    /// operand-rewrite rule (spec.md §4.5): "for each operand slot `i` ... if the original operand
    /// `v` has a duplicate `v'`, replace slot `i` with `v'`" — callers pass a closure that looks
    /// `v` up in the [`crate::dupmap::DuplicateMap`] and returns either `v'` or `v` unchanged.
    /// PHI predecessor blocks are untouched, matching spec.md §4.5's note that "PHIs retain their
    /// original predecessor identity".
    pub fn map_values(&mut self, pool: &mut ValueListPool, mut f: impl FnMut(Value) -> Value) {
        match self {
            InstructionData::Alloca { .. }
            | InstructionData::Iconst { .. }
            | InstructionData::Fconst { .. }
            | InstructionData::GlobalValueAddr { .. }
            | InstructionData::ConstantAddr { .. } => {}
            InstructionData::Unary { arg, .. } | InstructionData::Cast { arg, .. } => {
                *arg = f(*arg);
            }
            InstructionData::Binary { args, .. }
            | InstructionData::IntCompare { args, .. }
            | InstructionData::FloatCompare { args, .. } => {
                for a in args.iter_mut() {
                    *a = f(*a);
                }
            }
            InstructionData::Load { addr, .. } => *addr = f(*addr),
            InstructionData::Store { value, addr, .. } => {
                *value = f(*value);
                *addr = f(*addr);
            }
            InstructionData::Gep { base, indices, .. } => {
                *base = f(*base);
                for v in indices.as_mut_slice(pool) {
                    *v = f(*v);
                }
            }
            InstructionData::Phi { values, .. } => {
                for v in values.as_mut_slice(pool) {
                    *v = f(*v);
                }
            }
            InstructionData::Select { args } => {
                for a in args.iter_mut() {
                    *a = f(*a);
                }
            }
            InstructionData::Call { args, .. } | InstructionData::Intrinsic { args, .. } => {
                for v in args.as_mut_slice(pool) {
                    *v = f(*v);
                }
            }
            InstructionData::Invoke { args, .. } => {
                for v in args.as_mut_slice(pool) {
                    *v = f(*v);
                }
            }
            InstructionData::IndirectCall { callee, args, .. } => {
                *callee = f(*callee);
                for v in args.as_mut_slice(pool) {
                    *v = f(*v);
                }
            }
            InstructionData::Jump { args, .. } => {
                for v in args.as_mut_slice(pool) {
                    *v = f(*v);
                }
            }
            InstructionData::Brif { condition, then_args, else_args, .. } => {
                *condition = f(*condition);
                for v in then_args.as_mut_slice(pool) {
                    *v = f(*v);
                }
                for v in else_args.as_mut_slice(pool) {
                    *v = f(*v);
                }
            }
            InstructionData::Switch { value, .. } => *value = f(*value),
            InstructionData::Return { args } => {
                for v in args.as_mut_slice(pool) {
                    *v = f(*v);
                }
            }
            InstructionData::AtomicRmw { addr, value, .. } => {
                *addr = f(*addr);
                *value = f(*value);
            }
            InstructionData::Cmpxchg { addr, expected, replacement, .. } => {
                *addr = f(*addr);
                *expected = f(*expected);
                *replacement = f(*replacement);
            }
        }
    }

    /// Blocks this instruction may transfer control to, for [`crate::flowgraph::ControlFlowGraph`]
    /// construction. Empty for non-terminators.
    pub fn branch_destinations(&self) -> SmallVec<[Block; 2]> {
        match self {
            InstructionData::Jump { destination, .. } => SmallVec::from_slice(&[*destination]),
            InstructionData::Brif { then_dst, else_dst, .. } => {
                SmallVec::from_slice(&[*then_dst, *else_dst])
            }
            InstructionData::Invoke { normal, unwind, .. } => {
                SmallVec::from_slice(&[*normal, *unwind])
            }
            _ => SmallVec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn opcode_classifies_by_spec_dispatch() {
        assert_eq!(Opcode::Alloca.class(), InstClass::Alloca);
        assert_eq!(Opcode::Load.class(), InstClass::Pure);
        assert_eq!(Opcode::Store.class(), InstClass::Store);
        assert_eq!(Opcode::Jump.class(), InstClass::Terminator);
        assert_eq!(Opcode::Call.class(), InstClass::Call);
    }

    #[test]
    fn binary_arguments_are_in_slot_order() {
        let pool = ValueListPool::new();
        let a = Value::new(0);
        let b = Value::new(1);
        let inst = InstructionData::Binary { opcode: BinaryOp::Iadd, ty: Type::I32, args: [a, b] };
        assert_eq!(inst.arguments(&pool).as_slice(), &[a, b]);
    }

    #[test]
    fn gep_arguments_include_base_then_indices() {
        let mut pool = ValueListPool::new();
        let base = Value::new(0);
        let i0 = Value::new(1);
        let i1 = Value::new(2);
        let mut indices = ValueList::default();
        indices.push(i0, &mut pool);
        indices.push(i1, &mut pool);
        let inst = InstructionData::Gep { ty: Type::I32, base, indices };
        assert_eq!(inst.arguments(&pool).as_slice(), &[base, i0, i1]);
    }

    #[test]
    fn map_values_rewrites_every_operand_slot() {
        let mut pool = ValueListPool::new();
        let a = Value::new(0);
        let b = Value::new(1);
        let a2 = Value::new(2);
        let mut inst = InstructionData::Binary { opcode: BinaryOp::Iadd, ty: Type::I32, args: [a, b] };
        inst.map_values(&mut pool, |v| if v == a { a2 } else { v });
        assert_eq!(inst.arguments(&pool).as_slice(), &[a2, b]);
    }

    #[test]
    fn brif_destinations_are_then_then_else() {
        let pool = ValueListPool::new();
        let then_dst = Block::new(1);
        let else_dst = Block::new(2);
        let inst = InstructionData::Brif {
            condition: Value::new(0),
            then_dst,
            then_args: ValueList::default(),
            else_dst,
            else_args: ValueList::default(),
        };
        assert_eq!(inst.branch_destinations().as_slice(), &[then_dst, else_dst]);
        let _ = pool;
    }
}
