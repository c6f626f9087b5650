//! C9: CtorFixup (spec.md §4.9).
//!
//! The literal protocol retargets each `{prio, ctor, data}` entry at `dup(ctor)` when the ctor
//! was hardened. Like [`crate::calls`] (C7) and [`crate::vtables`] (C8), that presupposes a
//! separate `_dup` function object to retarget to; this crate's [`crate::instdup`] (C5)
//! duplicates a `HardenFn`'s body in place instead, so the entry in `Module::ctors` already names
//! the one function object whose body runs both streams — there is no second `FuncId` to swap in.
//!
//! What survives as this pass's real job: the module's constructor array is rebuilt fresh (spec.md
//! §4.9's "replace the existing array with a freshly built one"), which gives a single place to
//! assert the invariants the rest of the pipeline is supposed to have already preserved — the
//! reserved array global, if the front end emitted one under its reserved name, must still carry
//! `Linkage::Appending` and must never have been duplicated by C4 ([`crate::globals`] keeps the
//! same name reserved) — and to record, per entry, whether its constructor ended up hardened.

use crate::closure::ProtectionSets;
use crate::globals::RESERVED_GLOBAL_NAMES;
use crate::ir::{CtorEntry, Linkage, Module};
use crate::report::HardenReport;

/// Kept as the first entry of `crate::globals::RESERVED_GLOBAL_NAMES`.
const RESERVED_CTOR_ARRAY_NAME: &str = "llvm.global_ctors";

pub fn run(module: &mut Module, sets: &ProtectionSets, report: &mut HardenReport) {
    debug_assert_eq!(RESERVED_GLOBAL_NAMES[0], RESERVED_CTOR_ARRAY_NAME);
    let Some(entries) = module.ctors.take() else { return };

    if let Some(id) = module.global_named(RESERVED_CTOR_ARRAY_NAME) {
        let g = &module.globals[id];
        if g.linkage != Linkage::Appending {
            log::warn!("{RESERVED_CTOR_ARRAY_NAME} lost its appending linkage before C9 ran");
        }
        if g.duplicate.is_some() {
            log::warn!("{RESERVED_CTOR_ARRAY_NAME} was duplicated despite being a reserved name");
        }
    }

    let mut fresh: Vec<CtorEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        if sets.is_harden_fn(entry.ctor) {
            log::debug!("ctor {:?} runs its hardened, in-place-duplicated body; no separate dup entry to point at (spec.md §4.9)", entry.ctor);
            report.ctors_fixed += 1;
        }
        fresh.push(entry);
    }
    module.ctors = Some(fresh);
}
