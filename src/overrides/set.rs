use crate::model::{AttributeValue, EntityId};
use crate::overrides::{OverrideLayer, OverrideToken};
use std::sync::Arc;
use tracing::debug;

/// Overrides owned by one pending action
///
/// `release` removes each token exactly once. A set dropped without being
/// released (e.g. the action future was cancelled) releases itself.
pub struct OverrideSet {
    layer: Arc<OverrideLayer>,
    tokens: Vec<OverrideToken>,
}

impl OverrideSet {
    pub fn new(layer: Arc<OverrideLayer>) -> Self {
        Self {
            layer,
            tokens: Vec::new(),
        }
    }

    /// Add an override through the layer and take ownership of its token
    pub fn apply(&mut self, entity_id: &EntityId, value: AttributeValue) -> OverrideToken {
        let token = self.layer.add_override(entity_id, value);
        self.tokens.push(token);
        token
    }

    pub fn tokens(&self) -> &[OverrideToken] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Remove every held override; returns how many were still present
    pub fn release(&mut self) -> usize {
        let removed = self
            .tokens
            .drain(..)
            .filter(|token| self.layer.remove_override(*token))
            .count();
        if removed > 0 {
            debug!(removed = removed, "Released overrides");
        }
        removed
    }
}

impl Drop for OverrideSet {
    fn drop(&mut self) {
        self.release();
    }
}
