//! `eddi-harden`: an EDDI/CFCSS hardening pass for a small SSA-style IR (spec.md §1).
//!
//! Given a [`ir::Module`] and an annotation table naming the functions and globals a front end
//! wants protected against transient bit-flip faults, [`pipeline::Context::harden`] runs the nine
//! components described in spec.md §4 (C1 `annotate` through C9 `ctorfixup`) in the order §5
//! mandates, then the optional control-flow-checking collaborator ([`cfc`]) if configured. The
//! output is the same `Module`, hardened in place: protected values are computed twice and
//! compared at synchronization points, protected globals gain a `_dup` sibling, and protected
//! functions gain the out-parameters and checks that make the duplication observable to callers.
//!
//! This crate never decides *how* a detected mismatch is handled at the machine level — spec.md
//! §1 scopes that to the embedder — it only ever emits a call to a well-known
//! `SignatureMismatch_Handler`/fault-detected symbol and leaves linking it to a concrete recovery
//! routine (reset, trap, logging) to whoever links the hardened module.

pub mod annotate;
pub mod calls;
pub mod cfc;
pub mod checks;
pub mod closure;
pub mod config;
pub mod ctorfixup;
pub mod cursor;
pub mod dominator_tree;
pub mod dupmap;
pub mod error;
pub mod flowgraph;
pub mod fx;
pub mod globals;
pub mod instdup;
pub mod ir;
pub mod pipeline;
pub mod report;
pub mod retbyref;
pub mod vtables;

pub use config::{CfcMode, DuplicationMode, HardenConfig};
pub use error::{HardenError, HardenResult};
pub use pipeline::Context;
pub use report::HardenReport;
