//! The pipeline's persisted side-output (spec.md §6): "a CSV listing every function whose body
//! was duplicated, for use by downstream passes (e.g. CFC) to skip."
//!
//! Grounded on the teacher's plain-text diagnostic outputs (e.g. `timing::Profile`'s `Display`
//! impl writing a flat report) rather than any generic serialization: this is one fixed, narrow
//! table, so a hand-written writer is clearer than pulling in `csv` for a single column shape.

use std::fmt::Write as _;
use std::io;
use std::path::Path;

use crate::ir::FuncId;

/// Running counts of what the pipeline did, accumulated as C1-C9 execute. Exposed mainly so a
/// driver can log a one-line summary and so tests can assert on pass behavior without inspecting
/// the module directly.
#[derive(Clone, Debug, Default)]
pub struct HardenReport {
    pub functions_duplicated: Vec<(FuncId, String)>,
    pub globals_duplicated: usize,
    pub checks_inserted: usize,
    pub trivial_duplications_elided: usize,
    pub constructors_fixed: usize,
    pub ctors_fixed: usize,
    pub signature_checks_inserted: usize,
}

impl HardenReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_function_duplicated(&mut self, id: FuncId, name: impl Into<String>) {
        self.functions_duplicated.push((id, name.into()));
    }

    /// Render the "functions whose body was duplicated" table as CSV, one `name` per row, the
    /// shape downstream passes like CFC consume to decide what to skip.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("function\n");
        for (_, name) in &self.functions_duplicated {
            writeln!(out, "{name}").expect("writing to a String cannot fail");
        }
        out
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, self.to_csv())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn csv_has_header_and_one_row_per_duplicated_function() {
        let mut report = HardenReport::new();
        report.record_function_duplicated(FuncId::new(0), "add");
        report.record_function_duplicated(FuncId::new(1), "mem_inc");
        assert_eq!(report.to_csv(), "function\nadd\nmem_inc\n");
    }
}
