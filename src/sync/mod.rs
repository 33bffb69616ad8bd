// Indexer synchronization feed into the state store

mod feed;

pub use feed::{initial_sync, initial_sync_models, run_sync_feed, SyncModel, SyncSource};

use crate::model::{AttributeValue, EntityId};
use serde::{Deserialize, Serialize};


/// One authoritative (entity, attribute, value) observation from the indexer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncUpdate {
    pub entity_id: EntityId,
    pub value: AttributeValue,
    /// Block the value was indexed at, when the feed reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<u64>,
}

impl SyncUpdate {
    pub fn new(entity_id: EntityId, value: AttributeValue, block: u64) -> Self {
        Self {
            entity_id,
            value,
            block: Some(block),
        }
    }
}

/// Everything the indexer ingested for one block, delivered together
///
/// The store's sync watermark only reaches `block` once every update in the
/// batch has been applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBatch {
    pub block: u64,
    pub updates: Vec<SyncUpdate>,
}

impl SyncBatch {
    pub fn new(block: u64, updates: Vec<SyncUpdate>) -> Self {
        Self { block, updates }
    }
}
