use crate::authority::{ActionCall, ActionError, TransactionRef};
use crate::model::{Direction, EntityId, RpsKind};
use crate::overrides::OverrideToken;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Player intent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ActionKind {
    Spawn(RpsKind),
    Move(Direction),
}

impl ActionKind {
    /// Contract call carrying this intent
    pub fn call(self) -> ActionCall {
        match self {
            ActionKind::Spawn(kind) => ActionCall::spawn(kind),
            ActionKind::Move(direction) => ActionCall::movement(direction),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Spawn(kind) => write!(f, "spawn({:?})", kind),
            ActionKind::Move(direction) => write!(f, "move({:?})", direction),
        }
    }
}

/// Reconciler states for one action
///
/// `Idle -> Speculating -> AwaitingFinality -> Settling -> Done`, with
/// `RollingBack -> Done` reachable from every non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ReconcilerState {
    Idle,
    Speculating,
    AwaitingFinality,
    Settling,
    RollingBack,
    Done,
}

impl ReconcilerState {
    pub fn is_terminal(self) -> bool {
        self == ReconcilerState::Done
    }

    /// Whether `self -> next` is a legal edge
    pub fn can_transition_to(self, next: ReconcilerState) -> bool {
        use ReconcilerState::*;
        match (self, next) {
            (Done, _) => false,
            (_, RollingBack) => self != RollingBack,
            (Idle, Speculating)
            | (Speculating, AwaitingFinality)
            | (AwaitingFinality, Settling)
            | (Settling, Done)
            | (RollingBack, Done) => true,
            _ => false,
        }
    }
}

/// One in-flight request to the authority
#[derive(Clone, Debug)]
pub struct PendingAction {
    pub id: Uuid,
    pub kind: ActionKind,
    /// Token the action speculates on, when the player already owns one
    pub target: Option<EntityId>,
    pub call: ActionCall,
    pub tokens: Vec<OverrideToken>,
    pub tx: Option<TransactionRef>,
    pub state: ReconcilerState,
    pub started_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target: None,
            call: kind.call(),
            tokens: Vec::new(),
            tx: None,
            state: ReconcilerState::Idle,
            started_at: Utc::now(),
        }
    }
}

/// Broadcast on every reconciler state change
#[derive(Clone, Debug, Serialize)]
pub struct ActionEvent {
    pub action_id: Uuid,
    pub kind: ActionKind,
    pub state: ReconcilerState,
    pub target: Option<EntityId>,
    pub tx: Option<TransactionRef>,
    /// Set on the final `Done` event of a failed action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActionEvent {
    pub(crate) fn from_action(action: &PendingAction, error: Option<&ActionError>) -> Self {
        Self {
            action_id: action.id,
            kind: action.kind,
            state: action.state,
            target: action.target.clone(),
            tx: action.tx.clone(),
            error: error.map(|e| e.to_string()),
            timestamp: Utc::now(),
        }
    }
}
