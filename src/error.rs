//! Error taxonomy (spec.md §7): hard failures the pipeline cannot proceed past, kept distinct
//! from the non-fatal "structural precondition unmet" warnings individual components log and
//! route around (e.g. C8 skipping a malformed vtable initializer).
//!
//! Grounded on the teacher's `result::CodegenResult`/`CodegenError` pairing: a `thiserror` enum
//! plus a crate-wide `Result` alias, rather than `anyhow`'s type-erased error, since callers
//! downstream (a driver, or a test) want to match on the failure kind.

use thiserror::Error;

use crate::ir::{FuncId, GlobalId};

pub type HardenResult<T> = Result<T, HardenError>;

#[derive(Debug, Error)]
pub enum HardenError {
    /// C1 found two distinct annotations on the same entity, or an annotation string it doesn't
    /// recognize. Spec.md §4.1 says extras are "silently discarded", so this variant is raised
    /// only for a genuinely malformed annotation table (e.g. one whose target doesn't resolve to
    /// any function or global in the module), not for a duplicate.
    #[error("annotation targets unknown entity `{0}`")]
    UnknownAnnotationTarget(String),

    /// C9 requires the ctor array variable to retain its reserved name and appending linkage
    /// (spec.md §4.9); violating that is a hard error, not a warning, since there is no sound
    /// fallback rewrite.
    #[error("global constructor array `{0}` is missing required appending linkage")]
    CtorArrayNotAppending(String),

    /// The module re-entered an earlier per-function duplication state (spec.md §4.11 forbids
    /// this).
    #[error("function {0:?} re-entered state {1} after already reaching it")]
    StateReentry(FuncId, &'static str),

    /// A protected global's duplicate could not be found where one was expected to already exist
    /// (e.g. C8 materializing a duplicated vtable whose element global has no `_dup` pairing).
    #[error("global {0:?} has no registered duplicate")]
    MissingGlobalDuplicate(GlobalId),

    /// A protected function's `_dup` variant could not be found where C7/C9 expected one.
    #[error("function {0:?} has no registered duplicate")]
    MissingFunctionDuplicate(FuncId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "config-toml")]
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_human_readable() {
        let err = HardenError::InvalidConfig("alternate_memmap requires check-at-stores".into());
        assert_eq!(err.to_string(), "invalid configuration: alternate_memmap requires check-at-stores");
    }
}
