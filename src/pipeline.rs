//! The driver: runs C1 through C9, then the optional CFC collaborator, in the order spec.md §5
//! mandates.
//!
//! Grounded on the teacher's `context::Context`: one struct holding the thing being transformed,
//! one method per compilation step, and a single entry point that calls them in sequence. This
//! pipeline has no equivalent of the teacher's per-step `CompileResult`/caching story — spec.md's
//! own passes are a fixed, one-shot sequence over a whole module rather than a per-function,
//! resumable compile — so `Context` here is a thin sequencer, not a cache.

use crate::annotate::{self, Annotations};
use crate::calls;
use crate::cfc;
use crate::checks;
use crate::closure::{self, ProtectionSets};
use crate::config::HardenConfig;
use crate::ctorfixup;
use crate::dupmap::DuplicateMap;
use crate::error::HardenResult;
use crate::globals;
use crate::instdup;
use crate::ir::Module;
use crate::report::HardenReport;
use crate::retbyref;
use crate::vtables;

/// Owns the module being hardened and the configuration steering it. `harden` is the only entry
/// point most callers need; the individual step methods are exposed for callers (and tests) that
/// want to inspect intermediate state between components.
pub struct Context {
    pub module: Module,
    pub config: HardenConfig,
}

impl Context {
    pub fn new(module: Module, config: HardenConfig) -> Self {
        Self { module, config }
    }

    /// Run C1 (`AnnotationCollector`) through C9 (`CtorFixup`), then CFC if `config.cfc_mode`
    /// asks for it, and write the side-output CSV if `config.report_path` is set.
    ///
    /// The order is fixed by spec.md §5: annotations and the protection closure must exist
    /// before anything else runs; signatures are rewritten (C3) before globals are duplicated
    /// (C4) so C4 never has to account for a return-by-reference out-parameter; globals are
    /// duplicated once, module-wide, before any function body is touched (C5-C7); constructors
    /// and the ctor array are fixed up last (C8, C9), since both consult state every earlier
    /// pass produces. CFC is a separate concern layered on top (spec.md §1) and only ever reads
    /// `Annotations`, so it can run after everything else unconditionally.
    pub fn harden(&mut self) -> HardenResult<HardenReport> {
        let annotations = annotate::collect(&self.module);
        let sets = closure::compute(&self.module, &annotations);
        let mut dupmap = DuplicateMap::new();
        let mut report = HardenReport::new();

        retbyref::run(&mut self.module, &sets, &annotations, &mut dupmap);
        globals::run(&mut self.module, &sets, &annotations, &self.config, &mut report);
        instdup::run(&mut self.module, &sets, &mut dupmap, &self.config, &mut report);
        checks::run(&mut self.module, &sets, &mut dupmap, &self.config, &mut report);
        calls::run(&mut self.module, &sets, &annotations, &mut dupmap, &self.config, &mut report);
        vtables::run(&mut self.module, &sets, &self.config, &mut report);
        ctorfixup::run(&mut self.module, &sets, &mut report);
        cfc::run(&mut self.module, &annotations, &self.config, &mut report);

        log::info!(
            "hardened {} function(s), {} global(s), {} check(s), {} signature check(s), {} trivial duplication(s) elided",
            report.functions_duplicated.len(),
            report.globals_duplicated,
            report.checks_inserted,
            report.signature_checks_inserted,
            report.trivial_duplications_elided,
        );

        if let Some(path) = &self.config.report_path {
            report.write_csv(path)?;
        }

        Ok(report)
    }

    /// C1+C2 only, for callers that want `Annotations`/`ProtectionSets` without running the rest
    /// of the pipeline (e.g. a front end deciding whether a module needs hardening at all).
    pub fn classify(&self) -> (Annotations, ProtectionSets) {
        let annotations = annotate::collect(&self.module);
        let sets = closure::compute(&self.module, &annotations);
        (annotations, sets)
    }
}
