use crate::model::{Attribute, AttributeValue, EntityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Last authoritative attribute values of one on-chain entity
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,

    /// Attribute values as last observed from the sync feed
    pub attributes: HashMap<Attribute, AttributeValue>,

    /// Last update timestamp
    pub last_updated: DateTime<Utc>,
}

impl Entity {
    pub fn get(&self, attribute: Attribute) -> Option<&AttributeValue> {
        self.attributes.get(&attribute)
    }
}

/// State update message broadcast to subscribers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateUpdate {
    pub entity_id: EntityId,
    pub attribute: Attribute,
    pub old_value: Option<AttributeValue>,
    pub new_value: AttributeValue,
    /// Block the value was indexed at, if the feed reported one
    pub block: Option<u64>,
    pub timestamp: DateTime<Utc>,
}
