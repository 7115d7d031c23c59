use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A third-party credential stored for an entity, keyed on
/// `(entity_eid, platform, account_identifier_hash)`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntityToken {
    pub id: Uuid,
    pub entity_eid: Uuid,
    pub platform: String,
    pub account_identifier_hash: String,
    pub account_identifier: String,
    pub account_tokens: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
