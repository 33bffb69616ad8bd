pub mod env;
pub use env::apply_env_overrides;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Complete client configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub authority: AuthorityConfig,
}

/// How the reconciler decides the sync feed has caught up after finality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlePolicy {
    /// Always wait the full grace delay
    #[default]
    FixedDelay,
    /// Wait for the store's sync watermark to reach the finalized block,
    /// giving up after the grace delay
    SyncWatermark,
}

impl std::str::FromStr for SettlePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed_delay" => Ok(SettlePolicy::FixedDelay),
            "sync_watermark" => Ok(SettlePolicy::SyncWatermark),
            other => Err(format!("unknown settle policy '{}'", other)),
        }
    }
}

/// Reconciler timing
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    /// Wait after finality before dropping overrides (milliseconds)
    #[serde(default = "default_grace_delay")]
    pub grace_delay_ms: u64,
    #[serde(default)]
    pub settle_policy: SettlePolicy,
    /// Finality polling interval (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_ms: u64,
    #[serde(default = "default_finality_timeout")]
    pub finality_timeout_ms: u64,
    /// Capacity of the action event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_grace_delay() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    100
}

fn default_submit_timeout() -> u64 {
    30_000
}

fn default_finality_timeout() -> u64 {
    60_000
}

fn default_event_capacity() -> usize {
    256
}

impl ReconcilerConfig {
    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn finality_timeout(&self) -> Duration {
        Duration::from_millis(self.finality_timeout_ms)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            grace_delay_ms: default_grace_delay(),
            settle_policy: SettlePolicy::default(),
            poll_interval_ms: default_poll_interval(),
            submit_timeout_ms: default_submit_timeout(),
            finality_timeout_ms: default_finality_timeout(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Game rules the client predicts locally
///
/// Moves are predicted with `move_energy_cost` and refused locally when they
/// would take an on-map token past the `map_size` edge.
#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    /// Energy a freshly spawned token starts with
    #[serde(default = "default_spawn_energy")]
    pub spawn_energy: u32,
    /// Energy spent per move
    #[serde(default = "default_move_energy_cost")]
    pub move_energy_cost: u32,
    /// Side length of the world map, in tiles
    #[serde(default = "default_map_size")]
    pub map_size: u32,
}

fn default_spawn_energy() -> u32 {
    10
}

fn default_move_energy_cost() -> u32 {
    1
}

fn default_map_size() -> u32 {
    crate::model::MAP_SIZE
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            spawn_energy: default_spawn_energy(),
            move_energy_cost: default_move_energy_cost(),
            map_size: default_map_size(),
        }
    }
}

/// Sync feed configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Token keys 1..=N fetched during initial sync
    #[serde(default = "default_initial_entity_count")]
    pub initial_entity_count: u64,
    /// Quiet period after which the initial replay is considered drained
    #[serde(default = "default_replay_idle")]
    pub replay_idle_ms: u64,
}

fn default_initial_entity_count() -> u64 {
    30
}

fn default_replay_idle() -> u64 {
    500
}

impl SyncConfig {
    pub fn replay_idle(&self) -> Duration {
        Duration::from_millis(self.replay_idle_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_entity_count: default_initial_entity_count(),
            replay_idle_ms: default_replay_idle(),
        }
    }
}

/// In-process simulated chain used by the binary and tests
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityConfig {
    /// Delay between acceptance and finality (milliseconds)
    #[serde(default = "default_finality_delay")]
    pub finality_delay_ms: u64,
    /// Delay between finality and the indexer publishing the new state
    #[serde(default = "default_index_lag")]
    pub index_lag_ms: u64,
    /// Seed for spawn positions
    #[serde(default)]
    pub seed: u64,
}

fn default_finality_delay() -> u64 {
    300
}

fn default_index_lag() -> u64 {
    400
}

impl AuthorityConfig {
    pub fn finality_delay(&self) -> Duration {
        Duration::from_millis(self.finality_delay_ms)
    }

    pub fn index_lag(&self) -> Duration {
        Duration::from_millis(self.index_lag_ms)
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            finality_delay_ms: default_finality_delay(),
            index_lag_ms: default_index_lag(),
            seed: 0,
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<ClientConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
    let config: ClientConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config {}", path))?;
    Ok(config)
}
