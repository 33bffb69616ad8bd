use anyhow::Result;
use emojiman::authority::{LocalAuthority, Signer};
use emojiman::config::{self, apply_env_overrides, ClientConfig};
use emojiman::model::{Attribute, Direction, RpsKind};
use emojiman::overrides::OverrideLayer;
use emojiman::reconciler::Reconciler;
use emojiman::state::StateStore;
use emojiman::sync::{initial_sync, initial_sync_models, run_sync_feed};
use std::sync::Arc;
use tracing::{info, warn};

const PLAYER_ADDRESS: &str = "0x517ececd29116499f4a1b64b094da79ba08dfd54a3edaa316134c41f8160973";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "emojiman=info".into()),
        )
        .init();

    info!("Emojiman client starting...");

    let mut config = match std::env::var("EMOJIMAN_CONFIG") {
        Ok(path) => config::load_config(&path)?,
        Err(_) => ClientConfig::default(),
    };
    apply_env_overrides(&mut config);
    info!(
        grace_delay_ms = config.reconciler.grace_delay_ms,
        settle_policy = ?config.reconciler.settle_policy,
        "Configuration loaded"
    );

    // Simulated chain doubles as the indexer
    let (authority, indexer_rx) =
        LocalAuthority::new(config.authority.clone(), config.game.clone());
    let authority = Arc::new(authority);

    let store = Arc::new(StateStore::new());
    let models = initial_sync_models(PLAYER_ADDRESS, config.sync.initial_entity_count);
    initial_sync(&store, authority.as_ref(), &models).await?;
    tokio::spawn(run_sync_feed(
        store.clone(),
        indexer_rx,
        config.sync.replay_idle(),
    ));

    let overrides = Arc::new(OverrideLayer::new(store.clone()));
    let reconciler = Arc::new(Reconciler::new(
        overrides.clone(),
        authority.clone(),
        config.reconciler.clone(),
        config.game.clone(),
    ));

    let mut events = reconciler.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(
                action_id = %event.action_id,
                action = %event.kind,
                state = ?event.state,
                error = event.error.as_deref().unwrap_or(""),
                "Action event"
            );
        }
    });

    let signer = Signer::new(PLAYER_ADDRESS);
    reconciler.spawn(&signer, RpsKind::Paper).await?;

    let Some(token) = reconciler.player_entity(&signer) else {
        warn!("Spawn settled but the token is not indexed yet");
        return Ok(());
    };

    // Queue moves back to back; each builds on the previous speculative position
    let moves = [Direction::Right, Direction::Down, Direction::Left];
    let pending: Vec<_> = moves
        .iter()
        .map(|direction| {
            let reconciler = reconciler.clone();
            let signer = signer.clone();
            let direction = *direction;
            tokio::spawn(async move { reconciler.move_player(&signer, direction).await })
        })
        .collect();

    tokio::task::yield_now().await;
    info!(
        token = %token,
        position = ?overrides.read(&token, Attribute::Position),
        energy = ?overrides.read(&token, Attribute::Energy),
        "Displayed state while moves are in flight"
    );

    for (direction, result) in moves.iter().zip(futures::future::join_all(pending).await) {
        match result? {
            Ok(tx) => info!(direction = ?direction, tx = %tx, "Move confirmed"),
            Err(e) => warn!(direction = ?direction, error = %e, "Move rolled back"),
        }
    }

    info!(
        token = %token,
        position = ?store.get(&token, Attribute::Position),
        energy = ?store.get(&token, Attribute::Energy),
        synced_block = store.synced_block(),
        metrics = ?reconciler.metrics.get_snapshot(),
        "Session complete"
    );

    Ok(())
}
