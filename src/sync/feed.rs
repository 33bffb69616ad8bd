use crate::model::{Attribute, EntityId};
use crate::state::StateStore;
use crate::sync::{SyncBatch, SyncUpdate};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One (model, key) pair the client asks the indexer to track
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncModel {
    pub attribute: Attribute,
    pub entity_id: EntityId,
}

/// Indexer query interface used for the initial sync
#[async_trait]
pub trait SyncSource: Send + Sync {
    /// Current values for the requested models; missing ones are omitted
    async fn fetch(&self, models: &[SyncModel]) -> Result<Vec<SyncUpdate>>;
}

/// Models tracked by the client
///
/// Every token attribute for keys `1..=token_count`, plus the player's own
/// `PlayerId` record keyed by account address.
pub fn initial_sync_models(player_address: &str, token_count: u64) -> Vec<SyncModel> {
    let mut models = Vec::with_capacity(token_count as usize * 4 + 1);

    for key in 1..=token_count {
        let entity_id = EntityId::from_key(key);
        for attribute in Attribute::TOKEN_ATTRIBUTES {
            models.push(SyncModel {
                attribute,
                entity_id: entity_id.clone(),
            });
        }
    }

    models.push(SyncModel {
        attribute: Attribute::PlayerId,
        entity_id: EntityId::from_key(player_address),
    });

    models
}

/// Load the tracked models into the store with broadcasts suppressed
///
/// Returns the number of values loaded. The store stays in replay mode;
/// [`run_sync_feed`] switches it live once the backlog is drained.
pub async fn initial_sync(
    store: &StateStore,
    source: &dyn SyncSource,
    models: &[SyncModel],
) -> Result<usize> {
    info!(models = models.len(), "Starting initial sync");

    let updates = source
        .fetch(models)
        .await
        .context("Failed to fetch initial sync models")?;

    // The fetch is a complete snapshot, so its newest block is fully synced
    let count = updates.len();
    let snapshot_block = updates.iter().filter_map(|u| u.block).max();
    for update in updates {
        store.apply(update);
    }
    if let Some(block) = snapshot_block {
        store.advance_watermark(block);
    }

    info!(
        values = count,
        synced_block = store.synced_block(),
        "Initial sync loaded"
    );
    Ok(count)
}

/// Apply indexer batches to the store until the feed closes
///
/// While the store is replaying, a quiet period of `replay_idle` marks the
/// backlog as drained and switches the store live.
pub async fn run_sync_feed(
    store: Arc<StateStore>,
    mut updates: mpsc::UnboundedReceiver<SyncBatch>,
    replay_idle: Duration,
) {
    info!("Sync feed running");

    loop {
        let next = if store.is_live() {
            updates.recv().await
        } else {
            match tokio::time::timeout(replay_idle, updates.recv()).await {
                Ok(opt) => opt,
                Err(_) => {
                    // Quiet period elapsed, replay complete
                    store.set_live();
                    updates.recv().await
                }
            }
        };

        let Some(batch) = next else {
            break;
        };

        debug!(block = batch.block, updates = batch.updates.len(), "Applying sync batch");
        store.apply_batch(batch);
    }

    warn!("Sync feed closed");
}
