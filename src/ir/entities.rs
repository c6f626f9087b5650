//! Entity references.
//!
//! Instructions and functions refer to other parts of the module through small `u32`-wrapping
//! index types rather than Rust references, the way `cranelift-codegen`'s `ir::entities` does:
//! entity references are compact, `Copy`, and keep distinct kinds of index from being confused
//! with each other at the type level. Each type below is backed by `cranelift_entity`'s
//! `entity_impl!` macro, which is also what allocates the `PrimaryMap`/`SecondaryMap` storage
//! used throughout `ir::dfg` and `ir::module`.

use cranelift_entity::entity_impl;

/// A reference to an SSA value.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// A reference to a basic block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// A reference to an instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// A reference to an external function declared in a function's preamble (the callee of a
/// direct `call`/`invoke`).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncRef(u32);
entity_impl!(FuncRef, "fn");

/// A reference to a call signature declared in a function's preamble.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SigRef(u32);
entity_impl!(SigRef, "sig");

/// A reference to a global-value addressing computation (spec.md §4.5: "inline constant-
/// expression GEPs whose base is a protected global").
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalValue(u32);
entity_impl!(GlobalValue, "gv");

/// A reference to a jump table attached to a `switch` instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JumpTable(u32);
entity_impl!(JumpTable, "jt");

/// A reference to a pooled array constant (spec.md §4.6 point 3).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Constant(u32);
entity_impl!(Constant, "const");

/// A reference to a function at module scope, as opposed to [`FuncRef`] which is scoped to a
/// single function's preamble.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(u32);
entity_impl!(FuncId, "func");

/// A reference to a module-level global variable.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(u32);
entity_impl!(GlobalId, "global");
