//! Global-value addressing computations.
//!
//! These are the constant-expression computations that address a module-level global: a plain
//! symbolic reference, a load through another global value, or an offset from one. Trimmed from
//! the teacher's `ir::globalvalue::GlobalValueData`, which also models a VM-context pointer —
//! this pass has no embedder VM context, so that variant is dropped.

use std::fmt;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use crate::ir::{ExternalName, GlobalValue, Type};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum GlobalValueData {
    /// A symbolic reference to a named global, resolved later by the linker.
    Symbol { name: ExternalName, offset: i64 },
    /// Loaded through another global value, which must itself evaluate to a pointer.
    Load { base: GlobalValue, offset: i32, global_type: Type },
    /// An offset from another global value (e.g. a field address inside an aggregate global,
    /// spec.md §4.5's "inline constant-expression GEPs whose base is a protected global").
    IAddImm { base: GlobalValue, offset: i64, global_type: Type },
}

impl GlobalValueData {
    pub fn global_type(&self) -> Option<Type> {
        match self {
            GlobalValueData::Symbol { .. } => None,
            GlobalValueData::Load { global_type, .. } | GlobalValueData::IAddImm { global_type, .. } => {
                Some(*global_type)
            }
        }
    }

    /// The base this computation is relative to, if any. Used by C5 to find whether a
    /// constant-expression GEP's ultimate base is a protected global.
    pub fn base(&self) -> Option<GlobalValue> {
        match self {
            GlobalValueData::Symbol { .. } => None,
            GlobalValueData::Load { base, .. } | GlobalValueData::IAddImm { base, .. } => Some(*base),
        }
    }
}

impl fmt::Display for GlobalValueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlobalValueData::Symbol { name, offset } => write!(f, "symbol {name}+{offset}"),
            GlobalValueData::Load { base, offset, global_type } => {
                write!(f, "load.{global_type} {base}+{offset}")
            }
            GlobalValueData::IAddImm { base, offset, global_type } => {
                write!(f, "iadd_imm.{global_type} {base}, {offset}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn load_and_iadd_imm_expose_their_base() {
        let base = GlobalValue::new(0);
        let load = GlobalValueData::Load { base, offset: 0, global_type: Type::I32 };
        let iadd = GlobalValueData::IAddImm { base, offset: 4, global_type: Type::I32 };
        assert_eq!(load.base(), Some(base));
        assert_eq!(iadd.base(), Some(base));
        assert_eq!(GlobalValueData::Symbol { name: ExternalName::named("g"), offset: 0 }.base(), None);
    }
}
