//! `FxHashMap`/`FxHashSet` aliases, as the teacher's `src/fx.rs` defines them.
//!
//! `rustc_hash`'s FxHash is non-cryptographic and faster than the default SipHash; every map
//! keyed by an entity reference in this crate (the `D` relation, protection sets, worklists)
//! uses it rather than `std::collections::HashMap`.

pub use rustc_hash::{FxHashMap, FxHashSet};
