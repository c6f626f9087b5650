//! Memory operation flags.
//!
//! Trimmed from the teacher's `ir::memflags` down to the bits this pass actually inspects:
//! `volatile` drives the AnnotationCollector's forced-exclude rule for volatile globals
//! (spec.md §4.1), `notrap`/`aligned` are carried through duplication unchanged so a
//! duplicated load/store keeps the same semantics as its original.

use std::fmt;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

enum FlagBit {
    Notrap,
    Aligned,
    Volatile,
}

const NAMES: [&str; 3] = ["notrap", "aligned", "volatile"];

/// Flags for memory operations like load/store.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct MemFlags {
    bits: u8,
}

impl MemFlags {
    pub fn new() -> Self {
        Self { bits: 0 }
    }

    fn read(self, bit: FlagBit) -> bool {
        self.bits & (1 << bit as usize) != 0
    }

    fn set(&mut self, bit: FlagBit) {
        self.bits |= 1 << bit as usize
    }

    pub fn notrap(self) -> bool {
        self.read(FlagBit::Notrap)
    }

    pub fn set_notrap(&mut self) {
        self.set(FlagBit::Notrap)
    }

    pub fn aligned(self) -> bool {
        self.read(FlagBit::Aligned)
    }

    pub fn set_aligned(&mut self) {
        self.set(FlagBit::Aligned)
    }

    /// A volatile access. Per spec.md §4.1, globals accessed this way are forcibly classified
    /// `exclude` by the AnnotationCollector: duplicating a volatile access would change its
    /// observable side-effect count, which is never sound.
    pub fn volatile(self) -> bool {
        self.read(FlagBit::Volatile)
    }

    pub fn set_volatile(&mut self) {
        self.set(FlagBit::Volatile)
    }

    pub fn with_volatile(mut self) -> Self {
        self.set_volatile();
        self
    }
}

impl fmt::Display for MemFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, n) in NAMES.iter().enumerate() {
            if self.bits & (1 << i) != 0 {
                write!(f, " {n}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volatile_round_trips() {
        let flags = MemFlags::new().with_volatile();
        assert!(flags.volatile());
        assert!(!flags.notrap());
    }

    #[test]
    fn display_lists_set_bits() {
        let mut flags = MemFlags::new();
        flags.set_aligned();
        flags.set_notrap();
        assert_eq!(flags.to_string(), " notrap aligned");
    }
}
