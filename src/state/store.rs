use crate::model::{Attribute, AttributeValue, EntityId};
use crate::state::entity::{Entity, StateUpdate};
use crate::sync::{SyncBatch, SyncUpdate};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// State store holding the last authoritative value per (entity, attribute)
///
/// Only the sync feed writes here. Readers that must honor speculative
/// values go through [`crate::overrides::OverrideLayer`] instead.
pub struct StateStore {
    /// Lock-free concurrent map for fast reads
    entities: DashMap<EntityId, Entity>,

    /// Broadcast channel for state change events
    state_tx: broadcast::Sender<StateUpdate>,

    /// Highest block the sync feed has ingested
    watermark_tx: watch::Sender<u64>,

    /// True during initial sync; broadcasts are suppressed
    replaying: AtomicBool,
}

impl StateStore {
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(1000);
        let (watermark_tx, _) = watch::channel(0);

        Self {
            entities: DashMap::new(),
            state_tx,
            watermark_tx,
            replaying: AtomicBool::new(true),
        }
    }

    /// Stored value, or None if the attribute was never observed
    pub fn get(&self, entity_id: &EntityId, attribute: Attribute) -> Option<AttributeValue> {
        self.entities
            .get(entity_id)
            .and_then(|e| e.attributes.get(&attribute).cloned())
    }

    /// Unconditionally overwrite one attribute (core state mutation)
    pub fn set(&self, entity_id: &EntityId, value: AttributeValue) -> StateUpdate {
        self.write(entity_id, value, None)
    }

    /// Apply one indexer update; the sync watermark is left alone
    pub fn apply(&self, update: SyncUpdate) -> StateUpdate {
        self.write(&update.entity_id, update.value, update.block)
    }

    /// Apply a whole block's updates, then advance the watermark to it
    pub fn apply_batch(&self, batch: SyncBatch) -> Vec<StateUpdate> {
        let applied = batch
            .updates
            .into_iter()
            .map(|update| self.apply(update))
            .collect();
        self.advance_watermark(batch.block);
        applied
    }

    fn write(
        &self,
        entity_id: &EntityId,
        value: AttributeValue,
        block: Option<u64>,
    ) -> StateUpdate {
        let now = Utc::now();
        let attribute = value.attribute();

        let old_value = {
            let mut entity = self
                .entities
                .entry(entity_id.clone())
                .or_insert_with(|| Entity {
                    id: entity_id.clone(),
                    attributes: HashMap::new(),
                    last_updated: now,
                });

            entity.last_updated = now;
            entity.attributes.insert(attribute, value.clone())
        };

        let update = StateUpdate {
            entity_id: entity_id.clone(),
            attribute,
            old_value,
            new_value: value,
            block,
            timestamp: now,
        };

        // Broadcast to subscribers (suppressed during initial sync)
        if !self.replaying.load(Ordering::Relaxed) {
            let _ = self.state_tx.send(update.clone());
        }

        update
    }

    /// Raise the watermark; never moves it backwards
    pub fn advance_watermark(&self, block: u64) {
        let advanced = self.watermark_tx.send_if_modified(|current| {
            if block > *current {
                *current = block;
                true
            } else {
                false
            }
        });
        if advanced {
            debug!(block = block, "Sync watermark advanced");
        }
    }

    /// Highest block the sync feed has ingested
    pub fn synced_block(&self) -> u64 {
        *self.watermark_tx.borrow()
    }

    /// Wait until the sync feed has ingested `block`
    pub async fn wait_for_block(&self, block: u64) {
        let mut rx = self.watermark_tx.subscribe();
        // The sender lives as long as self, so the wait only ends on success
        let _ = rx.wait_for(|synced| *synced >= block).await;
    }

    pub fn get_entity(&self, entity_id: &EntityId) -> Option<Entity> {
        self.entities.get(entity_id).map(|e| e.clone())
    }

    pub fn get_all_entities(&self) -> Vec<Entity> {
        self.entities.iter().map(|e| e.value().clone()).collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Subscribe to state updates
    pub fn subscribe(&self) -> broadcast::Receiver<StateUpdate> {
        self.state_tx.subscribe()
    }

    pub fn is_live(&self) -> bool {
        !self.replaying.load(Ordering::Relaxed)
    }

    /// Signal that the initial sync is complete; enable state broadcasting
    pub fn set_live(&self) {
        if !self.replaying.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(
            entities = self.entities.len(),
            synced_block = self.synced_block(),
            "State store live, broadcasting enabled"
        );
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
