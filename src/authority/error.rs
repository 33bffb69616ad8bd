use crate::authority::TransactionRef;
use std::fmt;

/// Failure reported by an [`crate::authority::ActionAuthority`]
#[derive(Debug)]
pub enum AuthorityError {
    /// The authority refused the call (bad parameters, failed precondition)
    Rejected(String),
    /// The authority could not be reached or answered garbage
    Transport(anyhow::Error),
}

impl fmt::Display for AuthorityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorityError::Rejected(reason) => write!(f, "rejected: {}", reason),
            AuthorityError::Transport(e) => write!(f, "transport error: {:#}", e),
        }
    }
}

impl std::error::Error for AuthorityError {}

/// Why a player action did not settle
///
/// None of these are fatal: overrides are rolled back and the client stays
/// usable for the next action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Refused by the authority before acceptance, or reverted on chain
    SubmissionRejected(String),
    /// Accepted but not final within the configured bound
    FinalityTimeout(TransactionRef),
    /// Communication with the authority failed
    TransportError(String),
    /// Refused locally before anything was speculated or submitted
    InvalidAction(String),
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionError::SubmissionRejected(reason) => {
                write!(f, "submission rejected: {}", reason)
            }
            ActionError::FinalityTimeout(tx) => {
                write!(f, "transaction {} did not reach finality in time", tx)
            }
            ActionError::TransportError(reason) => write!(f, "transport error: {}", reason),
            ActionError::InvalidAction(reason) => write!(f, "invalid action: {}", reason),
        }
    }
}

impl std::error::Error for ActionError {}
