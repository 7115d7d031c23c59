use sqlx::PgPool;
use uuid::Uuid;

use crate::error::VaultError;
use crate::models::Entity;

/// Fields required to insert a brand-new entity. `device_id` is already
/// computed by the caller — creation derives it from the freshly generated
/// device-id keypair before the row is written, same as authentication.
pub struct NewEntity {
    pub eid: Uuid,
    pub phone_number_hash: String,
    pub password_hash: String,
    pub country_code_ciphertext: String,
    pub device_id: String,
    pub client_publish_pub_key: String,
    pub client_device_id_pub_key: String,
    pub publish_keypair: Vec<u8>,
    pub device_id_keypair: Vec<u8>,
}

/// Fields rewritten on authentication's device rotation. The ratchet state
/// is reset (`server_state` back to `NULL`) because the publish keypair it
/// was derived from no longer exists.
pub struct SessionRotation {
    pub device_id: String,
    pub client_publish_pub_key: String,
    pub client_device_id_pub_key: String,
    pub publish_keypair: Vec<u8>,
    pub device_id_keypair: Vec<u8>,
}

pub async fn create(pool: &PgPool, new: NewEntity) -> Result<Entity, VaultError> {
    let entity = sqlx::query_as::<_, Entity>(
        r#"
        INSERT INTO entities (
            eid, phone_number_hash, password_hash, country_code_ciphertext,
            device_id, client_publish_pub_key, client_device_id_pub_key,
            publish_keypair, device_id_keypair
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(new.eid)
    .bind(&new.phone_number_hash)
    .bind(&new.password_hash)
    .bind(&new.country_code_ciphertext)
    .bind(&new.device_id)
    .bind(&new.client_publish_pub_key)
    .bind(&new.client_device_id_pub_key)
    .bind(&new.publish_keypair)
    .bind(&new.device_id_keypair)
    .fetch_one(pool)
    .await?;
    Ok(entity)
}

pub async fn find_by_eid(pool: &PgPool, eid: Uuid) -> Result<Option<Entity>, VaultError> {
    let entity = sqlx::query_as::<_, Entity>("SELECT * FROM entities WHERE eid = $1")
        .bind(eid)
        .fetch_optional(pool)
        .await?;
    Ok(entity)
}

pub async fn find_by_phone_hash(
    pool: &PgPool,
    phone_number_hash: &str,
) -> Result<Option<Entity>, VaultError> {
    let entity = sqlx::query_as::<_, Entity>("SELECT * FROM entities WHERE phone_number_hash = $1")
        .bind(phone_number_hash)
        .fetch_optional(pool)
        .await?;
    Ok(entity)
}

pub async fn find_by_device_id(pool: &PgPool, device_id: &str) -> Result<Option<Entity>, VaultError> {
    let entity = sqlx::query_as::<_, Entity>("SELECT * FROM entities WHERE device_id = $1")
        .bind(device_id)
        .fetch_optional(pool)
        .await?;
    Ok(entity)
}

/// Authentication phase 1: clear `device_id` and `server_state` so a stale
/// session cannot be used while a new one is being negotiated.
pub async fn clear_session(pool: &PgPool, eid: Uuid) -> Result<(), VaultError> {
    sqlx::query(
        "UPDATE entities SET device_id = NULL, server_state = NULL, updated_at = now() WHERE eid = $1",
    )
    .bind(eid)
    .execute(pool)
    .await?;
    Ok(())
}

/// Authentication phase 2: install the rotated keypairs and device ID,
/// resetting `server_state`.
pub async fn rotate_session(
    pool: &PgPool,
    eid: Uuid,
    rotation: SessionRotation,
) -> Result<Entity, VaultError> {
    let entity = sqlx::query_as::<_, Entity>(
        r#"
        UPDATE entities
        SET device_id = $2,
            client_publish_pub_key = $3,
            client_device_id_pub_key = $4,
            publish_keypair = $5,
            device_id_keypair = $6,
            server_state = NULL,
            updated_at = now()
        WHERE eid = $1
        RETURNING *
        "#,
    )
    .bind(eid)
    .bind(&rotation.device_id)
    .bind(&rotation.client_publish_pub_key)
    .bind(&rotation.client_device_id_pub_key)
    .bind(&rotation.publish_keypair)
    .bind(&rotation.device_id_keypair)
    .fetch_one(pool)
    .await?;
    Ok(entity)
}

pub async fn update_server_state(
    pool: &PgPool,
    eid: Uuid,
    server_state: &[u8],
) -> Result<(), VaultError> {
    sqlx::query("UPDATE entities SET server_state = $2, updated_at = now() WHERE eid = $1")
        .bind(eid)
        .bind(server_state)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete(pool: &PgPool, eid: Uuid) -> Result<(), VaultError> {
    sqlx::query("DELETE FROM entities WHERE eid = $1")
        .bind(eid)
        .execute(pool)
        .await?;
    Ok(())
}
