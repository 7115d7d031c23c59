use sqlx::PgPool;
use uuid::Uuid;

use crate::error::VaultError;
use crate::models::EntityToken;

pub struct NewEntityToken {
    pub entity_eid: Uuid,
    pub platform: String,
    pub account_identifier_hash: String,
    pub account_identifier: String,
    pub account_tokens: String,
}

pub async fn create(pool: &PgPool, new: NewEntityToken) -> Result<EntityToken, VaultError> {
    let token = sqlx::query_as::<_, EntityToken>(
        r#"
        INSERT INTO entity_tokens (
            id, entity_eid, platform, account_identifier_hash, account_identifier, account_tokens
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.entity_eid)
    .bind(&new.platform)
    .bind(&new.account_identifier_hash)
    .bind(&new.account_identifier)
    .bind(&new.account_tokens)
    .fetch_one(pool)
    .await?;
    Ok(token)
}

pub async fn find_by_platform_and_hash(
    pool: &PgPool,
    entity_eid: Uuid,
    platform: &str,
    account_identifier_hash: &str,
) -> Result<Option<EntityToken>, VaultError> {
    let token = sqlx::query_as::<_, EntityToken>(
        r#"
        SELECT * FROM entity_tokens
        WHERE entity_eid = $1 AND platform = $2 AND account_identifier_hash = $3
        "#,
    )
    .bind(entity_eid)
    .bind(platform)
    .bind(account_identifier_hash)
    .fetch_optional(pool)
    .await?;
    Ok(token)
}

/// All tokens stored for an entity, used both by `ListEntityStoredTokens`
/// and by `DeleteEntity`'s precondition check.
pub async fn list_for_entity(pool: &PgPool, entity_eid: Uuid) -> Result<Vec<EntityToken>, VaultError> {
    let tokens = sqlx::query_as::<_, EntityToken>(
        "SELECT * FROM entity_tokens WHERE entity_eid = $1 ORDER BY created_at",
    )
    .bind(entity_eid)
    .fetch_all(pool)
    .await?;
    Ok(tokens)
}

/// Overwrite the encrypted token material for an existing row. Returns
/// `None` if no row matches, letting the caller surface `NOT_FOUND`.
pub async fn update_tokens(
    pool: &PgPool,
    entity_eid: Uuid,
    platform: &str,
    account_identifier_hash: &str,
    account_tokens: &str,
) -> Result<Option<EntityToken>, VaultError> {
    let token = sqlx::query_as::<_, EntityToken>(
        r#"
        UPDATE entity_tokens
        SET account_tokens = $4, updated_at = now()
        WHERE entity_eid = $1 AND platform = $2 AND account_identifier_hash = $3
        RETURNING *
        "#,
    )
    .bind(entity_eid)
    .bind(platform)
    .bind(account_identifier_hash)
    .bind(account_tokens)
    .fetch_optional(pool)
    .await?;
    Ok(token)
}

/// Deletes the matching row, returning whether one was found.
pub async fn delete_by_platform_and_hash(
    pool: &PgPool,
    entity_eid: Uuid,
    platform: &str,
    account_identifier_hash: &str,
) -> Result<bool, VaultError> {
    let result = sqlx::query(
        "DELETE FROM entity_tokens WHERE entity_eid = $1 AND platform = $2 AND account_identifier_hash = $3",
    )
    .bind(entity_eid)
    .bind(platform)
    .bind(account_identifier_hash)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
