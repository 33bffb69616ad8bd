// Action submission to the external authority (the chain)

mod error;
pub mod local;
mod submitter;

pub use error::{ActionError, AuthorityError};
pub use local::{Fault, LocalAuthority};
pub use submitter::{ActionSubmitter, Finality, Outcome};

use crate::model::{Direction, RpsKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;


/// System contract every player action is routed through
pub const ACTIONS_SYSTEM: &str = "actions";

/// Account that signs and pays for a call
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signer {
    pub address: String,
}

impl Signer {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

/// Contract call as handed to the authority
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCall {
    pub system: String,
    pub entrypoint: String,
    pub calldata: Vec<u64>,
}

impl ActionCall {
    pub fn spawn(kind: RpsKind) -> Self {
        Self {
            system: ACTIONS_SYSTEM.to_string(),
            entrypoint: "spawn".to_string(),
            calldata: vec![kind.ordinal()],
        }
    }

    pub fn movement(direction: Direction) -> Self {
        Self {
            system: ACTIONS_SYSTEM.to_string(),
            entrypoint: "move".to_string(),
            calldata: vec![direction.ordinal()],
        }
    }
}

/// Transaction hash returned on acceptance
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionRef(pub String);

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authority's view of a submitted transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    /// Irreversible; effects land in the indexer at or after `block`
    Finalized { block: u64 },
    /// Included but failed
    Reverted(String),
}

/// External system of record that validates and finalizes actions
///
/// Implementations wrap a chain RPC; [`LocalAuthority`] simulates one
/// in-process.
#[async_trait]
pub trait ActionAuthority: Send + Sync {
    /// Submit a call; returns once the authority accepted it for processing
    async fn execute(
        &self,
        signer: &Signer,
        call: &ActionCall,
    ) -> Result<TransactionRef, AuthorityError>;

    /// Current status of a previously accepted transaction
    async fn transaction_status(
        &self,
        tx: &TransactionRef,
    ) -> Result<TransactionStatus, AuthorityError>;
}
