// Speculative values layered over the state store

mod layer;
mod set;

pub use layer::{Override, OverrideLayer, OverrideToken};
pub use set::OverrideSet;
