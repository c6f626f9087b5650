//! The whole-program module: an ordered collection of global values and functions (spec.md §3).
//!
//! There is no teacher file this maps to one-to-one — `cranelift-codegen` itself never models a
//! whole linked program, that is `cranelift-module`'s job one layer up — so this is grounded on
//! the *shape* cranelift-module uses (`FuncId`/`DataId`-keyed tables, a `Linkage` enum) applied to
//! the flat, already-linked module spec.md §6 takes as input.

use std::fmt;

use cranelift_entity::PrimaryMap;

use crate::ir::{Function, FuncId, GlobalId, GlobalType};

/// Symbol linkage, trimmed to the handful of kinds spec.md's passes actually branch on:
/// C4 copies a global's linkage onto its duplicate; C9 requires the ctor array keep
/// `Appending` linkage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Linkage {
    External,
    Internal,
    Weak,
    Common,
    Private,
    Appending,
}

/// A module-level global variable.
#[derive(Clone, Debug)]
pub struct GlobalVarData {
    pub name: String,
    pub ty: GlobalType,
    pub linkage: Linkage,
    /// Byte alignment; `None` means the natural alignment of `ty`.
    pub align: Option<u32>,
    /// `None` means no explicit section (spec.md §4.4: eligible for the synthesized `.dup`
    /// section when this global is the *duplicate* side of a pair).
    pub section: Option<String>,
    pub thread_local: bool,
    /// Little-endian bytes of the initializer, or `None` for an external declaration.
    pub initializer: Option<Vec<u8>>,
    /// `Some(slots)` when this global's initializer is a constant array of function-pointer
    /// relocations — a vtable (spec.md §4.8) — one entry per slot, in initializer order. `None`
    /// for ordinary scalar/array data globals, whose initializer is plain bytes with no
    /// relocations to track.
    pub vtable_slots: Option<Vec<FuncId>>,
    /// Set by C4 on the original half of a duplicated pair, pointing at its `_dup` sibling.
    /// `None` on a global that was never eligible, and on the `_dup` sibling itself (it is not
    /// itself an original in need of a further duplicate).
    pub duplicate: Option<GlobalId>,
}

impl GlobalVarData {
    /// Is this global eligible for duplication in the first place (spec.md §4.4: "not a
    /// function, not a constant, not a reserved name, not annotated exclude, not already ending
    /// in `_dup`")? This checks the structural half of that test; annotation/name-reservation are
    /// checked by the caller.
    pub fn is_mutable_storage(&self) -> bool {
        self.initializer.is_some() || self.linkage == Linkage::External
    }
}

/// One entry of the module's global-constructor array (spec.md §4.9).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CtorEntry {
    pub priority: u32,
    pub ctor: FuncId,
    /// Opaque `data` pointer LLVM-style ctor arrays carry alongside `{prio, ctor}`.
    pub data: Option<GlobalId>,
}

#[derive(Clone)]
pub struct FuncRecord {
    pub name: String,
    pub linkage: Linkage,
    pub function: Function,
}

#[derive(Clone, Default)]
pub struct Module {
    pub functions: PrimaryMap<FuncId, FuncRecord>,
    pub globals: PrimaryMap<GlobalId, GlobalVarData>,
    /// The module's global-constructor array, if one is present. `None` if the input program has
    /// no static constructors to run.
    pub ctors: Option<Vec<CtorEntry>>,
    /// `(target-name, annotation-string)` pairs lifted from the front-end's distinguished
    /// annotation-array global (spec.md §4.1). `AnnotationCollector` (C1) is the sole consumer.
    pub raw_annotations: Vec<(AnnotationTarget, String)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnnotationTarget {
    Func(FuncId),
    Global(GlobalId),
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function_named(&self, name: &str) -> Option<FuncId> {
        self.functions.iter().find(|(_, f)| f.name == name).map(|(id, _)| id)
    }

    pub fn global_named(&self, name: &str) -> Option<GlobalId> {
        self.globals.iter().find(|(_, g)| g.name == name).map(|(id, _)| id)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("functions", &self.functions.len())
            .field("globals", &self.globals.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ExternalName, Signature, Type};

    #[test]
    fn lookup_by_name_finds_registered_entities() {
        let mut module = Module::new();
        let id = module.functions.push(FuncRecord {
            name: "main".into(),
            linkage: Linkage::External,
            function: Function::new(ExternalName::named("main"), Signature::new()),
        });
        assert_eq!(module.function_named("main"), Some(id));
        assert_eq!(module.function_named("nope"), None);
        let _ = Type::I32;
    }
}
