use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One registered user. `eid` is derived deterministically from
/// `phone_number_hash` and never changes after creation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Entity {
    pub eid: Uuid,
    pub phone_number_hash: String,
    pub password_hash: String,
    pub country_code_ciphertext: String,
    pub device_id: Option<String>,
    pub client_publish_pub_key: String,
    pub client_device_id_pub_key: String,
    pub publish_keypair: Vec<u8>,
    pub device_id_keypair: Vec<u8>,
    pub server_state: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn eid_hex(&self) -> String {
        hex::encode(self.eid.as_bytes())
    }
}
