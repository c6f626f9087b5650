//! CFCSS (Oh, Shirvani, McCluskey 2002): every block gets its own unique signature, and every
//! block is checked on entry. Simple, at the cost of a comparison on every single edge — RASM
//! (see [`super::rasm`]) exists specifically to cut that cost down for straight-line code.

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function};

use super::{SignatureMap, SignatureScheme};

pub(super) struct Cfcss;

impl SignatureScheme for Cfcss {
    fn assign(&self, func: &Function, _cfg: &ControlFlowGraph) -> SignatureMap {
        func.layout.blocks().enumerate().map(|(i, b)| (b, (i as u64) + 1)).collect()
    }

    fn needs_check(&self, _block: Block, _cfg: &ControlFlowGraph, _sigs: &SignatureMap) -> bool {
        true
    }
}
