//! In-process stand-in for the chain and its indexer.
//!
//! Accepted calls are applied to the simulated world immediately, become
//! final after `finality_delay`, and reach the indexer channel `index_lag`
//! after that. Tests queue [`Fault`]s to exercise failure paths.

use crate::authority::{
    ActionAuthority, ActionCall, AuthorityError, Signer, TransactionRef, TransactionStatus,
    ACTIONS_SYSTEM,
};
use crate::config::{AuthorityConfig, GameConfig};
use crate::model::{
    Attribute, AttributeValue, Direction, EntityId, Position, RpsKind, POSITION_OFFSET,
};
use crate::sync::{SyncBatch, SyncModel, SyncSource, SyncUpdate};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Failure injected into the next `execute` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Refuse the call
    Reject(String),
    /// Fail to reach the authority
    Transport,
    /// Accept, then revert at finality
    Revert(String),
    /// Accept and never finalize
    Stall,
}

#[derive(Clone, Debug)]
struct Token {
    owner: String,
    kind: RpsKind,
    energy: u32,
    position: Position,
}

struct ChainState {
    block: u64,
    next_id: u64,
    /// account address -> token id
    players: HashMap<String, u64>,
    tokens: HashMap<u64, Token>,
    transactions: HashMap<TransactionRef, TransactionStatus>,
    faults: VecDeque<Fault>,
    rng: StdRng,
}

/// Simulated chain implementing [`ActionAuthority`] and [`SyncSource`]
pub struct LocalAuthority {
    config: AuthorityConfig,
    game: GameConfig,
    chain: Arc<Mutex<ChainState>>,
    indexer_tx: mpsc::UnboundedSender<SyncBatch>,
}

impl LocalAuthority {
    /// Create the chain and the receiving end of its indexer feed
    pub fn new(
        config: AuthorityConfig,
        game: GameConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SyncBatch>) {
        let (indexer_tx, indexer_rx) = mpsc::unbounded_channel();
        let chain = ChainState {
            block: 0,
            next_id: 1,
            players: HashMap::new(),
            tokens: HashMap::new(),
            transactions: HashMap::new(),
            faults: VecDeque::new(),
            rng: StdRng::seed_from_u64(config.seed),
        };

        let authority = Self {
            config,
            game,
            chain: Arc::new(Mutex::new(chain)),
            indexer_tx,
        };
        (authority, indexer_rx)
    }

    /// Queue a failure for a future `execute` call (FIFO)
    pub fn inject_fault(&self, fault: Fault) {
        self.lock().faults.push_back(fault);
    }

    /// Current head block
    pub fn block(&self) -> u64 {
        self.lock().block
    }

    /// Token id owned by an account, if it has spawned
    pub fn player_token(&self, address: &str) -> Option<u64> {
        self.lock().players.get(&normalize(address)).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_spawn(
        &self,
        chain: &mut ChainState,
        owner: &str,
        kind: RpsKind,
    ) -> Vec<(EntityId, AttributeValue)> {
        let map_size = self.game.map_size.max(1);
        let existing = chain.players.get(owner).copied();

        let id = match existing {
            Some(id) => id,
            None => {
                let id = chain.next_id;
                chain.next_id += 1;
                chain.players.insert(owner.to_string(), id);
                id
            }
        };

        let position = match chain.tokens.get(&id) {
            Some(token) => token.position,
            None => Position::new(
                POSITION_OFFSET + chain.rng.gen_range(0..map_size),
                POSITION_OFFSET + chain.rng.gen_range(0..map_size),
            ),
        };

        let token = Token {
            owner: owner.to_string(),
            kind,
            energy: self.game.spawn_energy,
            position,
        };
        chain.tokens.insert(id, token.clone());

        let entity = EntityId::from_key(id);
        vec![
            (EntityId::from_key(owner), AttributeValue::PlayerId(id)),
            (entity.clone(), AttributeValue::RpsType(token.kind)),
            (entity.clone(), AttributeValue::Energy(token.energy)),
            (entity.clone(), AttributeValue::Position(token.position)),
            (entity, AttributeValue::PlayerAddress(token.owner)),
        ]
    }

    fn apply_move(
        &self,
        chain: &mut ChainState,
        owner: &str,
        direction: Direction,
    ) -> std::result::Result<Vec<(EntityId, AttributeValue)>, AuthorityError> {
        let id = *chain
            .players
            .get(owner)
            .ok_or_else(|| AuthorityError::Rejected("player has not spawned".to_string()))?;
        let token = chain
            .tokens
            .get_mut(&id)
            .ok_or_else(|| AuthorityError::Rejected("player token missing".to_string()))?;

        if token.energy == 0 {
            return Err(AuthorityError::Rejected("token is dead".to_string()));
        }

        let next = token
            .position
            .step(direction)
            .ok_or_else(|| AuthorityError::Rejected(format!("invalid move {:?}", direction)))?;

        if !next.is_on_map(self.game.map_size) {
            return Err(AuthorityError::Rejected("move leaves the map".to_string()));
        }

        token.position = next;
        token.energy = token.energy.saturating_sub(self.game.move_energy_cost);

        let entity = EntityId::from_key(id);
        Ok(vec![
            (entity.clone(), AttributeValue::Position(token.position)),
            (entity, AttributeValue::Energy(token.energy)),
        ])
    }

    /// Finalize (or revert, or stall) a transaction and publish its effects
    fn schedule(
        &self,
        tx: TransactionRef,
        effects: Vec<(EntityId, AttributeValue)>,
        fault: Option<Fault>,
    ) {
        if fault == Some(Fault::Stall) {
            debug!(tx = %tx, "Transaction stalled");
            return;
        }

        let chain = Arc::clone(&self.chain);
        let indexer_tx = self.indexer_tx.clone();
        let finality_delay = self.config.finality_delay();
        let index_lag = self.config.index_lag();

        tokio::spawn(async move {
            tokio::time::sleep(finality_delay).await;

            let block = {
                let mut chain = chain.lock().unwrap_or_else(PoisonError::into_inner);
                chain.block += 1;
                let block = chain.block;
                let status = match &fault {
                    Some(Fault::Revert(reason)) => TransactionStatus::Reverted(reason.clone()),
                    _ => TransactionStatus::Finalized { block },
                };
                chain.transactions.insert(tx.clone(), status);
                block
            };

            if let Some(Fault::Revert(_)) = fault {
                debug!(tx = %tx, "Transaction reverted");
                return;
            }
            debug!(tx = %tx, block = block, "Transaction finalized");

            tokio::time::sleep(index_lag).await;
            let updates = effects
                .into_iter()
                .map(|(entity_id, value)| SyncUpdate::new(entity_id, value, block))
                .collect();
            // Receiver gone means the client shut down
            let _ = indexer_tx.send(SyncBatch::new(block, updates));
        });
    }
}

fn normalize(address: &str) -> String {
    EntityId::from_key(address).as_str().to_string()
}

#[async_trait]
impl ActionAuthority for LocalAuthority {
    async fn execute(
        &self,
        signer: &Signer,
        call: &ActionCall,
    ) -> std::result::Result<TransactionRef, AuthorityError> {
        let owner = normalize(&signer.address);

        let (tx, effects, fault) = {
            let mut chain = self.lock();
            let fault = chain.faults.pop_front();

            match &fault {
                Some(Fault::Reject(reason)) => {
                    return Err(AuthorityError::Rejected(reason.clone()));
                }
                Some(Fault::Transport) => {
                    return Err(AuthorityError::Transport(anyhow!("connection reset by peer")));
                }
                _ => {}
            }

            if call.system != ACTIONS_SYSTEM {
                return Err(AuthorityError::Rejected(format!(
                    "unknown system '{}'",
                    call.system
                )));
            }
            let arg = call.calldata.first().copied().ok_or_else(|| {
                AuthorityError::Rejected(format!("{} expects one argument", call.entrypoint))
            })?;

            // A reverting transaction is accepted but leaves the world untouched
            let reverts = matches!(fault, Some(Fault::Revert(_)));

            let effects = match call.entrypoint.as_str() {
                "spawn" => {
                    let kind = RpsKind::from_ordinal(arg).ok_or_else(|| {
                        AuthorityError::Rejected(format!("invalid kind {}", arg))
                    })?;
                    if reverts {
                        Vec::new()
                    } else {
                        self.apply_spawn(&mut chain, &owner, kind)
                    }
                }
                "move" => {
                    let direction = Direction::from_ordinal(arg).ok_or_else(|| {
                        AuthorityError::Rejected(format!("invalid direction {}", arg))
                    })?;
                    if reverts {
                        Vec::new()
                    } else {
                        self.apply_move(&mut chain, &owner, direction)?
                    }
                }
                other => {
                    return Err(AuthorityError::Rejected(format!(
                        "unknown entrypoint '{}'",
                        other
                    )));
                }
            };

            let tx = TransactionRef(format!("0x{}", Uuid::now_v7().simple()));
            chain.transactions.insert(tx.clone(), TransactionStatus::Pending);
            (tx, effects, fault)
        };

        info!(tx = %tx, entrypoint = %call.entrypoint, signer = %owner, "Transaction accepted");
        self.schedule(tx.clone(), effects, fault);
        Ok(tx)
    }

    async fn transaction_status(
        &self,
        tx: &TransactionRef,
    ) -> std::result::Result<TransactionStatus, AuthorityError> {
        self.lock()
            .transactions
            .get(tx)
            .cloned()
            .ok_or_else(|| AuthorityError::Rejected(format!("unknown transaction {}", tx)))
    }
}

#[async_trait]
impl SyncSource for LocalAuthority {
    async fn fetch(&self, models: &[SyncModel]) -> Result<Vec<SyncUpdate>> {
        let chain = self.lock();
        let block = chain.block;

        let mut updates = Vec::new();
        for model in models {
            let value = if let Some(token) = chain
                .tokens
                .iter()
                .find(|(id, _)| EntityId::from_key(**id) == model.entity_id)
                .map(|(_, token)| token)
            {
                match model.attribute {
                    Attribute::Position => Some(AttributeValue::Position(token.position)),
                    Attribute::RpsType => Some(AttributeValue::RpsType(token.kind)),
                    Attribute::Energy => Some(AttributeValue::Energy(token.energy)),
                    Attribute::PlayerAddress => {
                        Some(AttributeValue::PlayerAddress(token.owner.clone()))
                    }
                    Attribute::PlayerId => None,
                }
            } else if model.attribute == Attribute::PlayerId {
                chain
                    .players
                    .get(model.entity_id.as_str())
                    .map(|id| AttributeValue::PlayerId(*id))
            } else {
                None
            };

            if let Some(value) = value {
                updates.push(SyncUpdate::new(model.entity_id.clone(), value, block));
            }
        }

        Ok(updates)
    }
}
