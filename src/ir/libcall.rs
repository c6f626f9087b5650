//! Well-known runtime routines that C7 (CallRewriter) recognizes as duplication-worthy
//! intrinsics (spec.md §4.7 step 1: "memcpy variants").
//!
//! Grounded in the teacher's `ir::libcall::LibCall`, trimmed to the handful of routines whose
//! effect is "copy/set some bytes" — exactly the intrinsics worth cloning rather than calling
//! once and refreshing afterward, because a single-bit flip during the copy would otherwise
//! corrupt one of the two streams without being observed by either.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum LibCall {
    Memcpy,
    Memmove,
    Memset,
    Bzero,
}

impl LibCall {
    pub fn all() -> &'static [LibCall] {
        &[LibCall::Memcpy, LibCall::Memmove, LibCall::Memset, LibCall::Bzero]
    }

    /// Recognize a callee's external symbol name as one of these intrinsics, for C7's
    /// "is `f` a duplication-worthy intrinsic" test on otherwise-opaque external calls.
    pub fn recognize(symbol: &str) -> Option<LibCall> {
        symbol.parse().ok()
    }
}

impl fmt::Display for LibCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LibCall::Memcpy => "memcpy",
            LibCall::Memmove => "memmove",
            LibCall::Memset => "memset",
            LibCall::Bzero => "bzero",
        };
        f.write_str(s)
    }
}

impl FromStr for LibCall {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memcpy" => Ok(LibCall::Memcpy),
            "memmove" => Ok(LibCall::Memmove),
            "memset" => Ok(LibCall::Memset),
            "bzero" | "__bzero" => Ok(LibCall::Bzero),
            _ => Err(()),
        }
    }
}
