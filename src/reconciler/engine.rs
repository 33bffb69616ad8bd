use crate::authority::{
    ActionAuthority, ActionError, ActionSubmitter, Finality, Outcome, Signer, TransactionRef,
};
use crate::config::{GameConfig, ReconcilerConfig, SettlePolicy};
use crate::model::{Attribute, AttributeValue, Direction, EntityId, RpsKind};
use crate::overrides::{OverrideLayer, OverrideSet};
use crate::reconciler::action::{ActionEvent, ActionKind, PendingAction, ReconcilerState};
use crate::reconciler::metrics::{ActionMetrics, InFlight};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Drives player actions through speculation, submission and settlement
///
/// Every action ends in `Done` with its overrides removed, whether it
/// succeeded or not. Concurrent actions are allowed; they interleave only at
/// await points and share the override layer's last-writer-wins reads.
pub struct Reconciler {
    overrides: Arc<OverrideLayer>,
    submitter: ActionSubmitter,
    config: ReconcilerConfig,
    game: GameConfig,

    /// Broadcast channel for action state changes
    events_tx: broadcast::Sender<ActionEvent>,

    pub metrics: ActionMetrics,
}

impl Reconciler {
    pub fn new(
        overrides: Arc<OverrideLayer>,
        authority: Arc<dyn ActionAuthority>,
        config: ReconcilerConfig,
        game: GameConfig,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let submitter =
            ActionSubmitter::new(authority, config.submit_timeout(), config.finality_timeout());

        Self {
            overrides,
            submitter,
            config,
            game,
            events_tx,
            metrics: ActionMetrics::new(),
        }
    }

    pub fn overrides(&self) -> &Arc<OverrideLayer> {
        &self.overrides
    }

    /// Subscribe to action state changes
    pub fn subscribe(&self) -> broadcast::Receiver<ActionEvent> {
        self.events_tx.subscribe()
    }

    /// Token owned by `signer`, as currently displayed
    pub fn player_entity(&self, signer: &Signer) -> Option<EntityId> {
        self.overrides
            .get(&EntityId::from_key(signer.address.as_str()), Attribute::PlayerId)
            .and_then(|v| v.as_player_id())
            .filter(|id| *id != 0)
            .map(|id| EntityId::from_key(id))
    }

    /// Spawn (or respawn) the player's token as `kind`
    pub async fn spawn(&self, signer: &Signer, kind: RpsKind) -> Result<TransactionRef, ActionError> {
        self.run(signer, ActionKind::Spawn(kind)).await
    }

    /// Move the player's token one tile
    pub async fn move_player(
        &self,
        signer: &Signer,
        direction: Direction,
    ) -> Result<TransactionRef, ActionError> {
        self.run(signer, ActionKind::Move(direction)).await
    }

    async fn run(&self, signer: &Signer, kind: ActionKind) -> Result<TransactionRef, ActionError> {
        let _in_flight = InFlight::start(&self.metrics);
        let mut action = PendingAction::new(kind);
        let mut overrides = OverrideSet::new(Arc::clone(&self.overrides));

        info!(action_id = %action.id, action = %kind, signer = %signer.address, "Action started");

        let result = self.drive(signer, &mut action, &mut overrides).await;

        if let Err(e) = &result {
            self.transition(&mut action, ReconcilerState::RollingBack, None);
            warn!(action_id = %action.id, action = %kind, error = %e, "Rolling back action");
        }

        // Unconditional cleanup for both Settling and RollingBack
        let released = overrides.release();
        debug!(action_id = %action.id, released = released, "Overrides released");

        match &result {
            Ok(tx) => {
                self.metrics.record_confirmed();
                self.transition(&mut action, ReconcilerState::Done, None);
                info!(
                    action_id = %action.id,
                    action = %kind,
                    tx = %tx,
                    elapsed_ms = (chrono::Utc::now() - action.started_at).num_milliseconds(),
                    "Action settled"
                );
            }
            Err(e) => {
                self.metrics.record_failed(e);
                self.transition(&mut action, ReconcilerState::Done, Some(e));
            }
        }

        result
    }

    async fn drive(
        &self,
        signer: &Signer,
        action: &mut PendingAction,
        overrides: &mut OverrideSet,
    ) -> Result<TransactionRef, ActionError> {
        self.transition(action, ReconcilerState::Speculating, None);

        // Read, compute and apply with no await in between so chained
        // actions build on each other's speculative values
        let (target, values) = self.speculate(signer, action.kind)?;
        action.target = target.clone();
        if let Some(entity_id) = &target {
            for value in values {
                let token = overrides.apply(entity_id, value);
                action.tokens.push(token);
            }
        }

        let tx = match self.submitter.submit(signer, &action.call).await {
            Outcome::Accepted(tx) => tx,
            Outcome::Rejected(e) => return Err(e),
        };
        action.tx = Some(tx.clone());
        self.transition(action, ReconcilerState::AwaitingFinality, None);

        match self
            .submitter
            .await_finality(&tx, self.config.poll_interval())
            .await
        {
            Finality::Finalized { block } => {
                self.transition(action, ReconcilerState::Settling, None);
                self.settle(block).await;
                Ok(tx)
            }
            Finality::Reverted(reason) => Err(ActionError::SubmissionRejected(reason)),
            Finality::TimedOut => Err(ActionError::FinalityTimeout(tx)),
        }
    }

    /// Speculative values for an action, computed on top of what is
    /// currently displayed
    fn speculate(
        &self,
        signer: &Signer,
        kind: ActionKind,
    ) -> Result<(Option<EntityId>, Vec<AttributeValue>), ActionError> {
        let target = self.player_entity(signer);

        match kind {
            ActionKind::Move(direction) => {
                let entity_id = target.ok_or_else(|| {
                    ActionError::InvalidAction("player has no token, spawn first".to_string())
                })?;
                if direction.delta().is_none() {
                    return Err(ActionError::InvalidAction(format!(
                        "cannot move in direction {:?}",
                        direction
                    )));
                }

                let energy = self
                    .overrides
                    .get(&entity_id, Attribute::Energy)
                    .and_then(|v| v.as_energy());
                if energy == Some(0) {
                    return Err(ActionError::InvalidAction("token is dead".to_string()));
                }

                let position = self
                    .overrides
                    .read(&entity_id, Attribute::Position)
                    .as_position()
                    .unwrap_or_default();
                let next = position.step(direction).ok_or_else(|| {
                    ActionError::InvalidAction(format!(
                        "move {:?} from ({}, {}) leaves the grid",
                        direction, position.x, position.y
                    ))
                })?;
                // Tokens already on the map cannot walk off it; positions
                // outside the map frame are not bounds-checked
                let map_size = self.game.map_size;
                if position.is_on_map(map_size) && !next.is_on_map(map_size) {
                    return Err(ActionError::InvalidAction(format!(
                        "move {:?} from ({}, {}) leaves the map",
                        direction, position.x, position.y
                    )));
                }

                let mut values = vec![AttributeValue::Position(next)];
                if let Some(energy) = energy {
                    values.push(AttributeValue::Energy(
                        energy.saturating_sub(self.game.move_energy_cost),
                    ));
                }
                Ok((Some(entity_id), values))
            }
            ActionKind::Spawn(rps) => {
                // A first spawn has no entity to speculate on until the
                // authority assigns one
                let values = match &target {
                    Some(_) => vec![
                        AttributeValue::RpsType(rps),
                        AttributeValue::Energy(self.game.spawn_energy),
                    ],
                    None => Vec::new(),
                };
                Ok((target, values))
            }
        }
    }

    /// Grace period between finality and dropping overrides
    async fn settle(&self, block: u64) {
        let grace = self.config.grace_delay();

        match self.config.settle_policy {
            SettlePolicy::FixedDelay => tokio::time::sleep(grace).await,
            SettlePolicy::SyncWatermark => {
                let store = self.overrides.store();
                if tokio::time::timeout(grace, store.wait_for_block(block))
                    .await
                    .is_err()
                {
                    warn!(
                        block = block,
                        synced_block = store.synced_block(),
                        "Sync feed did not reach finalized block within grace period"
                    );
                }
            }
        }
    }

    fn transition(
        &self,
        action: &mut PendingAction,
        next: ReconcilerState,
        error: Option<&ActionError>,
    ) {
        debug_assert!(
            action.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            action.state,
            next
        );
        debug!(action_id = %action.id, from = ?action.state, to = ?next, "Action transition");
        action.state = next;

        // No subscribers is fine
        let _ = self.events_tx.send(ActionEvent::from_action(action, error));
    }
}
