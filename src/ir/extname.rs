//! External names.
//!
//! Every pass that needs to recognize an entity by name — C1's annotation-array lookup, C2's
//! constructor-pattern match (`C::C(…)`), C7's `memcpy`-family recognition, C9's reserved
//! ctor-array name — needs the real (demangled) name string, so unlike the teacher's
//! `ExternalName` (an opaque namespace/index pair meant only to round-trip through a linker
//! symbol table) this one simply carries the name.

use std::fmt;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use crate::ir::LibCall;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum ExternalName {
    /// A demangled symbol name, e.g. `A::A()` or `main`.
    Named(String),
    /// A well-known runtime library routine.
    LibCall(LibCall),
}

impl ExternalName {
    pub fn named(name: impl Into<String>) -> Self {
        ExternalName::Named(name.into())
    }

    /// Matches the constructor-pattern `C::C(…)` spec.md §4.2 uses to recognize C++
    /// constructors during closure computation.
    pub fn is_constructor_name(&self) -> bool {
        let ExternalName::Named(name) = self else {
            return false;
        };
        let Some(paren) = name.find('(') else {
            return false;
        };
        let prefix = &name[..paren];
        let Some((class, ctor)) = prefix.rsplit_once("::") else {
            return false;
        };
        !class.is_empty() && class == ctor
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExternalName::Named(s) => Some(s.as_str()),
            ExternalName::LibCall(_) => None,
        }
    }
}

impl fmt::Display for ExternalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalName::Named(s) => f.write_str(s),
            ExternalName::LibCall(lc) => write!(f, "%{lc}"),
        }
    }
}
