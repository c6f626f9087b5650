//! Pooled array constants (spec.md §4.6 point 3: "Array of non-aggregate elements").
//!
//! Inserting identical bytes twice returns the same [`Constant`] handle, the way the teacher's
//! `ir::constant::ConstantPool` deduplicates.

use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use cranelift_entity::{EntityRef, PrimaryMap};

use crate::ir::Constant;

#[derive(Clone, Hash, Eq, PartialEq, Debug, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ConstantData(Vec<u8>);

impl ConstantData {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for ConstantData {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl fmt::Display for ConstantData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ConstantPool {
    handles_to_values: PrimaryMap<Constant, ConstantData>,
    values_to_handles: BTreeMap<ConstantData, Constant>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `data`, returning the existing handle if this data was already pooled.
    pub fn insert(&mut self, data: ConstantData) -> Constant {
        if let Some(handle) = self.values_to_handles.get(&data) {
            return *handle;
        }
        let handle = self.handles_to_values.push(data.clone());
        self.values_to_handles.insert(data, handle);
        handle
    }

    pub fn get(&self, handle: Constant) -> &ConstantData {
        &self.handles_to_values[handle]
    }

    pub fn len(&self) -> usize {
        self.handles_to_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles_to_values.is_empty()
    }
}
