//! External function declarations and call signatures.
//!
//! Trimmed from the teacher's `ir::extfunc`: no `CallConv`/ABI register-allocation detail
//! survives because this pass never reaches a register allocator. What remains is exactly what
//! C3 (return-by-reference) and C7 (call rewriting) need: an ordered parameter/return type list
//! they can double.

use std::fmt;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use crate::ir::{ExternalName, Type};

/// A function signature: ordered parameter types and an ordered (possibly empty) list of return
/// types. `returns.len() > 1` does not occur in the input IR (spec.md §3: procedural functions
/// return at most one value); it becomes possible transiently on the *duplicated* signature C3
/// never actually produces, since C3 converts the return value into two void out-parameters
/// instead of a second return slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Signature {
    pub params: Vec<Type>,
    pub returns: Vec<Type>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    /// The signature of `f_dup` once C3 has converted a non-void return into two trailing
    /// pointer out-parameters (spec.md §4.3): same params, plus `ptr, ptr`, returning void.
    pub fn with_trailing_out_params(&self) -> Signature {
        let mut params = self.params.clone();
        if !self.returns.is_empty() {
            params.push(Type::Ptr);
            params.push(Type::Ptr);
        }
        Signature { params, returns: Vec::new() }
    }

    /// The doubled parameter list C7 step 2/3 builds for a call to a duplicated function,
    /// either interleaved (`a0, a0', a1, a1', …`) or segregated (`a0, a1, …, a0', a1', …`)
    /// according to the `alternate_memmap` configuration flag.
    pub fn doubled_params(&self, interleaved: bool) -> Vec<Type> {
        if interleaved {
            self.params.iter().flat_map(|ty| [*ty, *ty]).collect()
        } else {
            self.params.iter().chain(self.params.iter()).copied().collect()
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ")")?;
        if let Some(r) = self.returns.first() {
            write!(f, " -> {r}")?;
        }
        Ok(())
    }
}

/// An external function declared in a function's preamble: the callee of a direct `call`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ExtFuncData {
    pub name: ExternalName,
    pub signature: Signature,
}
