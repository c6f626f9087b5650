//! Pipeline configuration (spec.md §6): the handful of flags that steer check placement,
//! memory layout, and the CFC collaborator.
//!
//! Grounded on the teacher's `settings`/`Flags` story: a plain struct of typed knobs, serialized
//! with `serde` and loaded from TOML the way `cranelift-codegen`'s own settings can be built from
//! a `Configurable` key/value source, but without that crate's `Setting`-descriptor indirection —
//! this pipeline has a fixed, small option set rather than a target-specific one discovered at
//! build time.

use std::path::Path;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use crate::error::{HardenError, HardenResult};

/// Check-placement strategy (spec.md §6 `duplication-mode`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "enable-serde", serde(rename_all = "kebab-case"))]
pub enum DuplicationMode {
    /// All stores and branches get a consistency check.
    #[default]
    Eddi,
    /// Selective EDDI: only branches and calls are checked.
    Seddi,
    /// Full Duplication with Selective Checking: only multi-predecessor blocks are checked.
    Fdsc,
}

impl DuplicationMode {
    pub fn checks_at_stores(self) -> bool {
        matches!(self, DuplicationMode::Eddi)
    }

    pub fn checks_at_branches(self) -> bool {
        matches!(self, DuplicationMode::Eddi | DuplicationMode::Seddi)
    }

    pub fn checks_at_calls(self) -> bool {
        matches!(self, DuplicationMode::Seddi)
    }

    /// FDSC filters every check site down to multi-predecessor blocks only.
    pub fn multi_predecessor_only(self) -> bool {
        matches!(self, DuplicationMode::Fdsc)
    }
}

/// Control-flow-checking collaborator selection (spec.md §6 `cfc-mode`); `None` disables CFC
/// entirely, since it is an optional pass layered on top of the EDDI core (spec.md §1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "enable-serde", serde(rename_all = "kebab-case"))]
pub enum CfcMode {
    #[default]
    Disabled,
    Cfcss,
    Rasm,
    InterRasm,
}

/// Default inter-procedural RASM signature (spec.md §6: "inter-RASM uses a default signature of
/// `-0xDEAD`").
pub const INTER_RASM_DEFAULT_SIGNATURE: i64 = -0xDEAD;

#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "enable-serde", serde(rename_all = "kebab-case"))]
pub struct HardenConfig {
    #[cfg_attr(feature = "enable-serde", serde(default))]
    pub duplication_mode: DuplicationMode,

    /// Interleaved (`a, a_dup, b, b_dup, …`) vs segregated (`a, b, …, a_dup, b_dup, …`)
    /// placement of originals and duplicates, in both argument lists (C7) and global layout (C4).
    #[cfg_attr(feature = "enable-serde", serde(default))]
    pub alternate_memmap: bool,

    /// Section name for duplicated globals that have no section of their own (spec.md §4.4
    /// default is `.dup`).
    #[cfg_attr(feature = "enable-serde", serde(default = "default_duplicate_section"))]
    pub duplicate_section: String,

    /// Whether duplicate instructions/globals inherit the debug location of their original.
    #[cfg_attr(feature = "enable-serde", serde(default))]
    pub debug_info: bool,

    #[cfg_attr(feature = "enable-serde", serde(default))]
    pub cfc_mode: CfcMode,

    /// Path to write the side-output CSV (spec.md §6: "a CSV listing every function whose body
    /// was duplicated"). `None` disables the side-output.
    #[cfg_attr(feature = "enable-serde", serde(default))]
    pub report_path: Option<String>,
}

fn default_duplicate_section() -> String {
    ".dup".to_owned()
}

impl Default for HardenConfig {
    fn default() -> Self {
        Self {
            duplication_mode: DuplicationMode::default(),
            alternate_memmap: false,
            duplicate_section: default_duplicate_section(),
            debug_info: false,
            cfc_mode: CfcMode::default(),
            report_path: None,
        }
    }
}

impl HardenConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "config-toml")]
    pub fn from_toml_str(text: &str) -> HardenResult<Self> {
        toml::from_str(text).map_err(HardenError::from)
    }

    #[cfg(feature = "config-toml")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> HardenResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    #[cfg(not(feature = "config-toml"))]
    pub fn from_toml_file(_path: impl AsRef<Path>) -> HardenResult<Self> {
        Err(HardenError::InvalidConfig(
            "config-toml feature is disabled".to_owned(),
        ))
    }
}
