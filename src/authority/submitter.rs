use crate::authority::{
    ActionAuthority, ActionCall, ActionError, AuthorityError, Signer, TransactionRef,
    TransactionStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Result of handing a call to the authority
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Accepted(TransactionRef),
    Rejected(ActionError),
}

/// Result of waiting for an accepted transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Finality {
    Finalized { block: u64 },
    Reverted(String),
    TimedOut,
}

/// Converts player intents into authority calls with bounded waits
pub struct ActionSubmitter {
    authority: Arc<dyn ActionAuthority>,
    submit_timeout: Duration,
    finality_timeout: Duration,
}

impl ActionSubmitter {
    pub fn new(
        authority: Arc<dyn ActionAuthority>,
        submit_timeout: Duration,
        finality_timeout: Duration,
    ) -> Self {
        Self {
            authority,
            submit_timeout,
            finality_timeout,
        }
    }

    /// Submit a call and classify the authority's answer
    pub async fn submit(&self, signer: &Signer, call: &ActionCall) -> Outcome {
        debug!(
            signer = %signer.address,
            system = %call.system,
            entrypoint = %call.entrypoint,
            calldata = ?call.calldata,
            "Submitting action"
        );

        match timeout(self.submit_timeout, self.authority.execute(signer, call)).await {
            Ok(Ok(tx)) => {
                info!(tx = %tx, entrypoint = %call.entrypoint, "Action accepted");
                Outcome::Accepted(tx)
            }
            Ok(Err(AuthorityError::Rejected(reason))) => {
                warn!(entrypoint = %call.entrypoint, reason = %reason, "Action rejected");
                Outcome::Rejected(ActionError::SubmissionRejected(reason))
            }
            Ok(Err(AuthorityError::Transport(e))) => {
                warn!(entrypoint = %call.entrypoint, error = %e, "Action submission failed");
                Outcome::Rejected(ActionError::TransportError(format!("{:#}", e)))
            }
            Err(_) => {
                warn!(
                    entrypoint = %call.entrypoint,
                    timeout_ms = self.submit_timeout.as_millis() as u64,
                    "Action submission timed out"
                );
                Outcome::Rejected(ActionError::TransportError(format!(
                    "submission timed out after {} ms",
                    self.submit_timeout.as_millis()
                )))
            }
        }
    }

    /// Poll until the transaction is final, reverted, or the finality
    /// timeout elapses
    ///
    /// Transport errors while polling are logged and polling continues.
    pub async fn await_finality(&self, tx: &TransactionRef, poll_interval: Duration) -> Finality {
        let poll = async {
            // interval() panics on a zero period
            let mut ticker = interval(poll_interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                match self.authority.transaction_status(tx).await {
                    Ok(TransactionStatus::Pending) => continue,
                    Ok(TransactionStatus::Finalized { block }) => {
                        return Finality::Finalized { block };
                    }
                    Ok(TransactionStatus::Reverted(reason)) => {
                        return Finality::Reverted(reason);
                    }
                    Err(AuthorityError::Rejected(reason)) => {
                        return Finality::Reverted(reason);
                    }
                    Err(AuthorityError::Transport(e)) => {
                        warn!(tx = %tx, error = %e, "Finality poll failed, retrying");
                    }
                }
            }
        };

        match timeout(self.finality_timeout, poll).await {
            Ok(finality) => finality,
            Err(_) => {
                warn!(
                    tx = %tx,
                    timeout_ms = self.finality_timeout.as_millis() as u64,
                    "Gave up waiting for finality"
                );
                Finality::TimedOut
            }
        }
    }
}
