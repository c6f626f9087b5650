//! The IR data model (spec.md §3): modules, functions, blocks, instructions, values.

pub mod atomic_rmw_op;
pub mod condcodes;
pub mod constant;
pub mod dfg;
pub mod entities;
pub mod extfunc;
pub mod extname;
pub mod function;
pub mod globalvalue;
pub mod instructions;
pub mod jumptable;
pub mod layout;
pub mod libcall;
pub mod memflags;
pub mod module;
pub mod types;

pub use atomic_rmw_op::AtomicRmwOp;
pub use constant::{ConstantData, ConstantPool};
pub use dfg::{BlockData, DataFlowGraph, ValueDef};
pub use entities::{Block, Constant, FuncId, FuncRef, GlobalId, GlobalValue, Inst, JumpTable, SigRef, Value};
pub use extfunc::{ExtFuncData, Signature};
pub use extname::ExternalName;
pub use function::Function;
pub use globalvalue::GlobalValueData;
pub use instructions::{BinaryOp, CastOp, InstClass, InstructionData, Opcode, UnaryOp, ValueList, ValueListPool};
pub use jumptable::JumpTableData;
pub use layout::Layout;
pub use libcall::LibCall;
pub use memflags::MemFlags;
pub use module::{AnnotationTarget, CtorEntry, FuncRecord, GlobalVarData, Linkage, Module};
pub use types::{GlobalType, Type};
