use crate::model::{Attribute, AttributeValue, EntityId};
use crate::state::StateStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Handle returned by [`OverrideLayer::add_override`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverrideToken(Uuid);

impl OverrideToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OverrideToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A speculative value shadowing one attribute of one entity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Override {
    pub token: OverrideToken,
    pub entity_id: EntityId,
    pub value: AttributeValue,
}

type OverrideKey = (EntityId, Attribute);

#[derive(Default)]
struct OverrideIndex {
    /// Overrides per key, oldest first
    by_key: HashMap<OverrideKey, Vec<Override>>,
    by_token: HashMap<OverrideToken, OverrideKey>,
}

/// Override layer consulted by every display read
///
/// Multiple overrides may stack on the same (entity, attribute); the most
/// recently added one still present wins. Removal is idempotent.
pub struct OverrideLayer {
    store: Arc<StateStore>,
    index: RwLock<OverrideIndex>,
}

impl OverrideLayer {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            index: RwLock::new(OverrideIndex::default()),
        }
    }

    /// Authoritative store this layer reads through to
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Shadow `value.attribute()` of `entity_id` with a speculative value
    pub fn add_override(&self, entity_id: &EntityId, value: AttributeValue) -> OverrideToken {
        let token = OverrideToken::new();
        let key = (entity_id.clone(), value.attribute());

        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        index.by_token.insert(token, key.clone());
        index.by_key.entry(key).or_default().push(Override {
            token,
            entity_id: entity_id.clone(),
            value,
        });

        debug!(token = %token, entity_id = %entity_id, "Override added");
        token
    }

    /// Remove an override; unknown or already removed tokens are a no-op
    ///
    /// Returns true if this call removed it.
    pub fn remove_override(&self, token: OverrideToken) -> bool {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);

        let Some(key) = index.by_token.remove(&token) else {
            return false;
        };

        if let Some(stack) = index.by_key.get_mut(&key) {
            stack.retain(|o| o.token != token);
            if stack.is_empty() {
                index.by_key.remove(&key);
            }
        }

        debug!(token = %token, entity_id = %key.0, attribute = %key.1, "Override removed");
        true
    }

    /// Newest override, else store value, else None
    pub fn get(&self, entity_id: &EntityId, attribute: Attribute) -> Option<AttributeValue> {
        self.active_override(entity_id, attribute)
            .or_else(|| self.store.get(entity_id, attribute))
    }

    /// Value to display: newest override, else store value, else the default
    pub fn read(&self, entity_id: &EntityId, attribute: Attribute) -> AttributeValue {
        self.get(entity_id, attribute)
            .unwrap_or_else(|| attribute.default_value())
    }

    /// Value of the newest override for the key, if any
    pub fn active_override(
        &self,
        entity_id: &EntityId,
        attribute: Attribute,
    ) -> Option<AttributeValue> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index
            .by_key
            .get(&(entity_id.clone(), attribute))
            .and_then(|stack| stack.last())
            .map(|o| o.value.clone())
    }

    pub fn is_overridden(&self, entity_id: &EntityId, attribute: Attribute) -> bool {
        self.active_override(entity_id, attribute).is_some()
    }

    /// Number of overrides currently held across all entities
    pub fn active_count(&self) -> usize {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_token
            .len()
    }

    /// All overrides on one entity, oldest first per attribute
    pub fn overrides_for(&self, entity_id: &EntityId) -> Vec<Override> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<Override> = index
            .by_key
            .iter()
            .filter(|((id, _), _)| id == entity_id)
            .flat_map(|(_, stack)| stack.iter().cloned())
            .collect();
        found.sort_by_key(|o| o.value.attribute());
        found
    }
}
