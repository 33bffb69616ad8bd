// Optimistic action reconciliation

mod action;
mod engine;
mod metrics;

pub use action::{ActionEvent, ActionKind, PendingAction, ReconcilerState};
pub use engine::Reconciler;
pub use metrics::{ActionMetrics, MetricsSnapshot};

#[cfg(test)]
mod tests;
