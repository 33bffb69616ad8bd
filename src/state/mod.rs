// Authoritative state store fed by the indexer

mod entity;
mod store;

pub use entity::{Entity, StateUpdate};
pub use store::StateStore;
