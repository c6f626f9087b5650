//! Intermediate representation of a function.
//!
//! Owns all of its basic blocks and instructions, the way the teacher's `ir::function::Function`
//! does. Trimmed: no stack-slot table (this IR models `alloca` as a plain instruction, not a
//! frame-allocated slot, since there is no register allocator downstream to consult it), no
//! encodings/locations (those are back-end concerns).

use std::fmt;

use crate::ir::{DataFlowGraph, ExternalName, Layout, Signature};

#[derive(Clone)]
pub struct Function {
    pub name: ExternalName,
    pub signature: Signature,
    pub dfg: DataFlowGraph,
    pub layout: Layout,
}

impl Function {
    pub fn new(name: ExternalName, signature: Signature) -> Self {
        Self { name, signature, dfg: DataFlowGraph::new(), layout: Layout::new() }
    }

    pub fn with_name_signature(name: ExternalName, signature: Signature) -> Self {
        Self::new(name, signature)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("blocks", &self.dfg.num_blocks())
            .field("insts", &self.dfg.num_insts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;

    #[test]
    fn new_function_has_empty_body() {
        let f = Function::new(ExternalName::named("f"), Signature::new());
        assert_eq!(f.dfg.num_blocks(), 0);
        assert_eq!(f.dfg.num_insts(), 0);
        let _ = Type::I32;
    }
}
