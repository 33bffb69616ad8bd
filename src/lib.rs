// Entity ids, attributes and typed values
pub mod model;

// Authoritative state store fed by the indexer
pub mod state;

// Indexer synchronization feed
pub mod sync;

// Speculative override layer
pub mod overrides;

// Action submission and the simulated chain
pub mod authority;

// Optimistic action reconciliation
pub mod reconciler;

// Configuration and environment overrides
pub mod config;
