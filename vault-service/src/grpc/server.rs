//! gRPC server implementation for vault-service.
//!
//! Implements all 12 RPCs from vault.proto:
//! - Identity lifecycle: CreateEntity, AuthenticateEntity, DeleteEntity
//! - Token storage: ListEntityStoredTokens, StoreEntityToken,
//!   GetEntityAccessToken, UpdateEntityToken, DeleteEntityToken
//! - Payload channel: EncryptPayload, DecryptPayload

use std::sync::Arc;

use chrono::Duration;
use sqlx::PgPool;
use tonic::{Request, Response, Status};
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::db::entities::{NewEntity, SessionRotation};
use crate::db::entity_tokens::NewEntityToken;
use crate::error::{Result as VaultResult, VaultError};
use crate::locks::EntityLocks;
use crate::models::Entity;
use crate::otp::OtpGateway;
use crate::ratchet::{self, RatchetState};
use crate::security::{self, device_id, llt, Keystore};
use crate::validators::{validate_required, validate_x25519_fields, Requirement};

// Import generated protobuf types
pub mod proto {
    tonic::include_proto!("vault.v1");
}

use proto::entity_server::Entity as EntityService;
use proto::{
    AuthenticateEntityRequest, AuthenticateEntityResponse, CreateEntityRequest, CreateEntityResponse,
    DecryptPayloadRequest, DecryptPayloadResponse, DeleteEntityRequest, DeleteEntityResponse,
    DeleteEntityTokenRequest, DeleteEntityTokenResponse, EncryptPayloadRequest, EncryptPayloadResponse,
    GetEntityAccessTokenRequest, GetEntityAccessTokenResponse, ListEntityStoredTokenRequest,
    ListEntityStoredTokenResponse, StoreEntityTokenRequest, StoreEntityTokenResponse, StoredToken,
    UpdateEntityTokenRequest, UpdateEntityTokenResponse,
};

/// Third-party platforms this deployment knows how to store credentials
/// for. Anything else is rejected `UNIMPLEMENTED`, not `INVALID_ARGUMENT` —
/// the request is well-formed, the vault just doesn't support it yet.
const SUPPORTED_PLATFORMS: &[&str] = &["gmail"];

/// Entity service gRPC server.
#[derive(Clone)]
pub struct EntityServiceServer {
    db: PgPool,
    keystore: Arc<Keystore>,
    locks: Arc<EntityLocks>,
    otp: OtpGateway,
    llt_lifetime: Duration,
}

impl EntityServiceServer {
    pub fn new(
        db: PgPool,
        keystore: Arc<Keystore>,
        locks: Arc<EntityLocks>,
        otp: OtpGateway,
        llt_lifetime_days: i64,
    ) -> Self {
        Self {
            db,
            keystore,
            locks,
            otp,
            llt_lifetime: Duration::days(llt_lifetime_days),
        }
    }

    fn hashing_key(&self) -> VaultResult<&'static [u8; 32]> {
        Ok(crypto_core::hashing_key()?)
    }

    /// The X25519 agreement between the server's `device_id` keypair (on
    /// file) and the client's `device_id` public key (on the entity row).
    /// This is the key every LLT is signed with.
    fn device_id_shared_key(&self, entity: &Entity) -> VaultResult<[u8; 32]> {
        let device_id_keypair = security::decode_keypair(&entity.device_id_keypair)?;
        let client_pub = crypto_core::decode_public_key(&entity.client_device_id_pub_key)?;
        Ok(crypto_core::x25519_agree(&device_id_keypair.private, &client_pub))
    }

    /// The X25519 agreement underlying the publish (ratchet) channel.
    fn publish_shared_key(&self, entity: &Entity) -> VaultResult<([u8; 32], crypto_core::X25519Keypair)> {
        let publish_keypair = security::decode_keypair(&entity.publish_keypair)?;
        let client_pub = crypto_core::decode_public_key(&entity.client_publish_pub_key)?;
        let shared = crypto_core::x25519_agree(&publish_keypair.private, &client_pub);
        Ok((shared, publish_keypair))
    }

    /// Resolve and verify an entity from an LLT's wire form. Mirrors the
    /// source's `verify_long_lived_token`: split the unauthenticated `eid`
    /// prefix, look the entity up, recompute its device-id shared key, and
    /// only then verify the signature and expiry.
    async fn resolve_by_llt(&self, token: &str) -> VaultResult<Entity> {
        let eid_hex = llt::peek_eid_hex(token)?;
        let eid = Uuid::parse_str(eid_hex).map_err(|_| VaultError::InvalidSession)?;
        let entity = db::entities::find_by_eid(&self.db, eid)
            .await?
            .ok_or(VaultError::InvalidSession)?;
        let shared_key = self.device_id_shared_key(&entity)?;
        llt::verify(token, &shared_key)?;
        Ok(entity)
    }

    async fn resolve_by_device_id(&self, device_id: &str) -> VaultResult<Entity> {
        db::entities::find_by_device_id(&self.db, device_id)
            .await?
            .ok_or(VaultError::InvalidDeviceId)
    }

    /// Used by `GetEntityAccessToken`, the one RPC that accepts either
    /// authenticator.
    async fn resolve_entity(&self, device_id: &str, long_lived_token: &str) -> VaultResult<Entity> {
        if !long_lived_token.is_empty() {
            self.resolve_by_llt(long_lived_token).await
        } else {
            self.resolve_by_device_id(device_id).await
        }
    }

    // ---- CreateEntity -----------------------------------------------

    async fn handle_create_entity(
        &self,
        req: CreateEntityRequest,
    ) -> VaultResult<Response<CreateEntityResponse>> {
        validate_required(&[Requirement::Field("phone_number", &req.phone_number)])?;

        let hashing_key = self.hashing_key()?;
        let phone_number_hash = crypto_core::hmac_hex(hashing_key, req.phone_number.as_bytes());

        if db::entities::find_by_phone_hash(&self.db, &phone_number_hash)
            .await?
            .is_some()
        {
            return Err(VaultError::EntityAlreadyExists);
        }

        if !req.ownership_proof_response.is_empty() {
            validate_required(&[
                Requirement::Field("country_code", &req.country_code),
                Requirement::Field("password", &req.password),
                Requirement::Field("client_publish_pub_key", &req.client_publish_pub_key),
                Requirement::Field("client_device_id_pub_key", &req.client_device_id_pub_key),
            ])?;
            validate_x25519_fields(&[
                ("client_publish_pub_key", &req.client_publish_pub_key),
                ("client_device_id_pub_key", &req.client_device_id_pub_key),
            ])?;
            return self.complete_creation(req, phone_number_hash).await;
        }

        self.initiate_creation(&req).await
    }

    async fn initiate_creation(
        &self,
        req: &CreateEntityRequest,
    ) -> VaultResult<Response<CreateEntityResponse>> {
        let next_attempt_timestamp = self.otp.send_otp(&req.phone_number).await?;
        Ok(Response::new(CreateEntityResponse {
            requires_ownership_proof: true,
            message: "A verification code has been sent. Submit it to complete registration."
                .to_string(),
            next_attempt_timestamp,
            long_lived_token: String::new(),
            server_publish_pub_key: String::new(),
            server_device_id_pub_key: String::new(),
        }))
    }

    async fn complete_creation(
        &self,
        req: CreateEntityRequest,
        phone_number_hash: String,
    ) -> VaultResult<Response<CreateEntityResponse>> {
        self.otp
            .verify_otp(&req.phone_number, &req.ownership_proof_response)
            .await?;

        let hashing_key = self.hashing_key()?;
        let password_hash = crypto_core::hmac_hex(hashing_key, req.password.as_bytes());
        let country_code_ciphertext = crypto_core::aes_gcm_encrypt(req.country_code.as_bytes())?;

        let eid = generate_eid(&phone_number_hash);
        let eid_hex = hex::encode(eid.as_bytes());

        let publish_keypair = self
            .keystore
            .generate_keypair_and_public_key(&self.keystore.publish_path(&eid_hex))?;
        let device_id_keypair = self
            .keystore
            .generate_keypair_and_public_key(&self.keystore.device_id_path(&eid_hex))?;

        let client_device_id_pub = crypto_core::decode_public_key(&req.client_device_id_pub_key)?;
        let device_id_shared_key =
            crypto_core::x25519_agree(&device_id_keypair.private, &client_device_id_pub);

        let long_lived_token = llt::generate(&eid_hex, &device_id_shared_key, self.llt_lifetime)?;
        let device_id_value = device_id::compute_device_id(
            &device_id_shared_key,
            &req.phone_number,
            &req.client_device_id_pub_key,
        );

        let publish_keypair_raw = self
            .keystore
            .read_raw(&self.keystore.publish_path(&eid_hex))?;
        let device_id_keypair_raw = self
            .keystore
            .read_raw(&self.keystore.device_id_path(&eid_hex))?;

        db::entities::create(
            &self.db,
            NewEntity {
                eid,
                phone_number_hash,
                password_hash,
                country_code_ciphertext,
                device_id: device_id_value,
                client_publish_pub_key: req.client_publish_pub_key,
                client_device_id_pub_key: req.client_device_id_pub_key,
                publish_keypair: publish_keypair_raw,
                device_id_keypair: device_id_keypair_raw,
            },
        )
        .await?;

        info!(eid = %eid_hex, "entity created successfully");

        Ok(Response::new(CreateEntityResponse {
            requires_ownership_proof: false,
            message: "Entity created successfully".to_string(),
            next_attempt_timestamp: 0,
            long_lived_token,
            server_publish_pub_key: crypto_core::encode_public_key(&publish_keypair.public),
            server_device_id_pub_key: crypto_core::encode_public_key(&device_id_keypair.public),
        }))
    }

    // ---- AuthenticateEntity ------------------------------------------

    async fn handle_authenticate_entity(
        &self,
        req: AuthenticateEntityRequest,
    ) -> VaultResult<Response<AuthenticateEntityResponse>> {
        validate_required(&[Requirement::Field("phone_number", &req.phone_number)])?;

        let hashing_key = self.hashing_key()?;
        let phone_number_hash = crypto_core::hmac_hex(hashing_key, req.phone_number.as_bytes());

        let entity = db::entities::find_by_phone_hash(&self.db, &phone_number_hash)
            .await?
            .ok_or(VaultError::EntityNotFound)?;

        if !req.ownership_proof_response.is_empty() {
            self.complete_authentication(req, entity).await
        } else {
            self.initiate_authentication(req, entity).await
        }
    }

    async fn initiate_authentication(
        &self,
        req: AuthenticateEntityRequest,
        entity: Entity,
    ) -> VaultResult<Response<AuthenticateEntityResponse>> {
        validate_required(&[Requirement::Field("password", &req.password)])?;

        let hashing_key = self.hashing_key()?;
        if !crypto_core::verify_hmac(hashing_key, req.password.as_bytes(), &entity.password_hash) {
            return Err(VaultError::InvalidCredentials);
        }

        let next_attempt_timestamp = self.otp.send_otp(&req.phone_number).await?;
        db::entities::clear_session(&self.db, entity.eid).await?;

        Ok(Response::new(AuthenticateEntityResponse {
            requires_ownership_proof: true,
            message: "A verification code has been sent. Submit it to complete authentication."
                .to_string(),
            next_attempt_timestamp,
            long_lived_token: String::new(),
            server_publish_pub_key: String::new(),
            server_device_id_pub_key: String::new(),
        }))
    }

    async fn complete_authentication(
        &self,
        req: AuthenticateEntityRequest,
        entity: Entity,
    ) -> VaultResult<Response<AuthenticateEntityResponse>> {
        validate_required(&[
            Requirement::Field("client_publish_pub_key", &req.client_publish_pub_key),
            Requirement::Field("client_device_id_pub_key", &req.client_device_id_pub_key),
        ])?;
        validate_x25519_fields(&[
            ("client_publish_pub_key", &req.client_publish_pub_key),
            ("client_device_id_pub_key", &req.client_device_id_pub_key),
        ])?;

        self.otp
            .verify_otp(&req.phone_number, &req.ownership_proof_response)
            .await?;

        let eid_hex = entity.eid_hex();

        // Device rotation: unconditionally replace both keypairs, never
        // reuse what a previous session negotiated.
        let publish_keypair = self
            .keystore
            .regenerate_keypair_and_public_key(&self.keystore.publish_path(&eid_hex))?;
        let device_id_keypair = self
            .keystore
            .regenerate_keypair_and_public_key(&self.keystore.device_id_path(&eid_hex))?;

        let client_device_id_pub = crypto_core::decode_public_key(&req.client_device_id_pub_key)?;
        let device_id_shared_key =
            crypto_core::x25519_agree(&device_id_keypair.private, &client_device_id_pub);

        let long_lived_token = llt::generate(&eid_hex, &device_id_shared_key, self.llt_lifetime)?;
        let device_id_value = device_id::compute_device_id(
            &device_id_shared_key,
            &req.phone_number,
            &req.client_device_id_pub_key,
        );

        let publish_keypair_raw = self
            .keystore
            .read_raw(&self.keystore.publish_path(&eid_hex))?;
        let device_id_keypair_raw = self
            .keystore
            .read_raw(&self.keystore.device_id_path(&eid_hex))?;

        db::entities::rotate_session(
            &self.db,
            entity.eid,
            SessionRotation {
                device_id: device_id_value,
                client_publish_pub_key: req.client_publish_pub_key,
                client_device_id_pub_key: req.client_device_id_pub_key,
                publish_keypair: publish_keypair_raw,
                device_id_keypair: device_id_keypair_raw,
            },
        )
        .await?;

        info!(eid = %eid_hex, "entity authenticated successfully");

        Ok(Response::new(AuthenticateEntityResponse {
            requires_ownership_proof: false,
            message: "Entity authenticated successfully!".to_string(),
            next_attempt_timestamp: 0,
            long_lived_token,
            server_publish_pub_key: crypto_core::encode_public_key(&publish_keypair.public),
            server_device_id_pub_key: crypto_core::encode_public_key(&device_id_keypair.public),
        }))
    }

    // ---- Token storage -------------------------------------------------

    async fn handle_list_entity_stored_tokens(
        &self,
        req: ListEntityStoredTokenRequest,
    ) -> VaultResult<Response<ListEntityStoredTokenResponse>> {
        validate_required(&[Requirement::Field("long_lived_token", &req.long_lived_token)])?;
        let entity = self.resolve_by_llt(&req.long_lived_token).await?;

        let tokens = db::entity_tokens::list_for_entity(&self.db, entity.eid).await?;
        let mut stored_tokens = Vec::with_capacity(tokens.len());
        for token in tokens {
            let account_identifier = crypto_core::aes_gcm_decrypt(&token.account_identifier)?;
            stored_tokens.push(StoredToken {
                platform: token.platform,
                account_identifier: String::from_utf8(account_identifier)
                    .map_err(|_| VaultError::Internal("stored identifier is not UTF-8".to_string()))?,
            });
        }

        info!(eid = %entity.eid_hex(), "retrieved stored tokens");
        Ok(Response::new(ListEntityStoredTokenResponse {
            stored_tokens,
            message: "Tokens retrieved successfully.".to_string(),
        }))
    }

    async fn handle_store_entity_token(
        &self,
        req: StoreEntityTokenRequest,
    ) -> VaultResult<Response<StoreEntityTokenResponse>> {
        validate_required(&[
            Requirement::Field("long_lived_token", &req.long_lived_token),
            Requirement::Field("token", &req.token),
            Requirement::Field("platform", &req.platform),
            Requirement::Field("account_identifier", &req.account_identifier),
        ])?;
        let entity = self.resolve_by_llt(&req.long_lived_token).await?;
        check_platform(&req.platform)?;

        let hashing_key = self.hashing_key()?;
        let account_identifier_hash =
            crypto_core::hmac_hex(hashing_key, req.account_identifier.as_bytes());

        let existing = db::entity_tokens::find_by_platform_and_hash(
            &self.db,
            entity.eid,
            &req.platform,
            &account_identifier_hash,
        )
        .await?;
        if existing.is_some() {
            return Err(VaultError::TokenAlreadyExists);
        }

        db::entity_tokens::create(
            &self.db,
            NewEntityToken {
                entity_eid: entity.eid,
                platform: req.platform,
                account_identifier_hash,
                account_identifier: crypto_core::aes_gcm_encrypt(req.account_identifier.as_bytes())?,
                account_tokens: crypto_core::aes_gcm_encrypt(req.token.as_bytes())?,
            },
        )
        .await?;

        info!(eid = %entity.eid_hex(), "stored token");
        Ok(Response::new(StoreEntityTokenResponse {
            success: true,
            message: "Token stored successfully.".to_string(),
        }))
    }

    async fn handle_get_entity_access_token(
        &self,
        req: GetEntityAccessTokenRequest,
    ) -> VaultResult<Response<GetEntityAccessTokenResponse>> {
        validate_required(&[
            Requirement::OneOf(&[
                ("device_id", &req.device_id),
                ("long_lived_token", &req.long_lived_token),
            ]),
            Requirement::Field("platform", &req.platform),
            Requirement::Field("account_identifier", &req.account_identifier),
        ])?;

        let entity = self
            .resolve_entity(&req.device_id, &req.long_lived_token)
            .await?;
        check_platform(&req.platform)?;

        let hashing_key = self.hashing_key()?;
        let account_identifier_hash =
            crypto_core::hmac_hex(hashing_key, req.account_identifier.as_bytes());

        let token = db::entity_tokens::find_by_platform_and_hash(
            &self.db,
            entity.eid,
            &req.platform,
            &account_identifier_hash,
        )
        .await?
        .ok_or(VaultError::TokenNotFound)?;

        let account_tokens = crypto_core::aes_gcm_decrypt(&token.account_tokens)?;
        info!(eid = %entity.eid_hex(), "fetched access token");

        Ok(Response::new(GetEntityAccessTokenResponse {
            success: true,
            message: "Successfully fetched tokens.".to_string(),
            token: String::from_utf8(account_tokens)
                .map_err(|_| VaultError::Internal("stored token is not UTF-8".to_string()))?,
        }))
    }

    async fn handle_update_entity_token(
        &self,
        req: UpdateEntityTokenRequest,
    ) -> VaultResult<Response<UpdateEntityTokenResponse>> {
        validate_required(&[
            Requirement::Field("device_id", &req.device_id),
            Requirement::Field("token", &req.token),
            Requirement::Field("platform", &req.platform),
            Requirement::Field("account_identifier", &req.account_identifier),
        ])?;
        let entity = self.resolve_by_device_id(&req.device_id).await?;

        let hashing_key = self.hashing_key()?;
        let account_identifier_hash =
            crypto_core::hmac_hex(hashing_key, req.account_identifier.as_bytes());
        let account_tokens = crypto_core::aes_gcm_encrypt(req.token.as_bytes())?;

        let updated = db::entity_tokens::update_tokens(
            &self.db,
            entity.eid,
            &req.platform,
            &account_identifier_hash,
            &account_tokens,
        )
        .await?;
        if updated.is_none() {
            return Err(VaultError::TokenNotFound);
        }

        info!(eid = %entity.eid_hex(), "updated token");
        Ok(Response::new(UpdateEntityTokenResponse {
            success: true,
            message: "Token updated successfully.".to_string(),
        }))
    }

    async fn handle_delete_entity_token(
        &self,
        req: DeleteEntityTokenRequest,
    ) -> VaultResult<Response<DeleteEntityTokenResponse>> {
        validate_required(&[
            Requirement::Field("long_lived_token", &req.long_lived_token),
            Requirement::Field("platform", &req.platform),
            Requirement::Field("account_identifier", &req.account_identifier),
        ])?;
        let entity = self.resolve_by_llt(&req.long_lived_token).await?;
        check_platform(&req.platform)?;

        let hashing_key = self.hashing_key()?;
        let account_identifier_hash =
            crypto_core::hmac_hex(hashing_key, req.account_identifier.as_bytes());

        let deleted = db::entity_tokens::delete_by_platform_and_hash(
            &self.db,
            entity.eid,
            &req.platform,
            &account_identifier_hash,
        )
        .await?;
        if !deleted {
            return Err(VaultError::TokenNotFound);
        }

        info!(eid = %entity.eid_hex(), "deleted token");
        Ok(Response::new(DeleteEntityTokenResponse {
            success: true,
            message: "Token deleted successfully.".to_string(),
        }))
    }

    // ---- Payload channel -----------------------------------------------

    async fn handle_decrypt_payload(
        &self,
        req: DecryptPayloadRequest,
    ) -> VaultResult<Response<DecryptPayloadResponse>> {
        validate_required(&[
            Requirement::Field("device_id", &req.device_id),
            Requirement::Field("payload_ciphertext", &req.payload_ciphertext),
        ])?;
        let entity = self.resolve_by_device_id(&req.device_id).await?;
        let (header, ciphertext) = ratchet::decode_frame(&req.payload_ciphertext)?;

        let _guard = self.locks.acquire(entity.eid).await;
        let (shared_key, publish_keypair) = self.publish_shared_key(&entity)?;

        let mut state = match &entity.server_state {
            Some(bytes) => RatchetState::deserialize(bytes)?,
            None => RatchetState::init(shared_key, publish_keypair.private, publish_keypair.public),
        };

        let plaintext = state.decrypt(header, &ciphertext)?;
        db::entities::update_server_state(&self.db, entity.eid, &state.serialize()).await?;

        info!(eid = %entity.eid_hex(), "decrypted payload");
        Ok(Response::new(DecryptPayloadResponse {
            success: true,
            message: "Successfully decrypted payload".to_string(),
            payload_plaintext: String::from_utf8(plaintext)
                .map_err(|_| VaultError::InvalidPayloadFraming("decrypted payload is not UTF-8".to_string()))?,
        }))
    }

    async fn handle_encrypt_payload(
        &self,
        req: EncryptPayloadRequest,
    ) -> VaultResult<Response<EncryptPayloadResponse>> {
        validate_required(&[
            Requirement::Field("device_id", &req.device_id),
            Requirement::Field("payload_plaintext", &req.payload_plaintext),
        ])?;
        let entity = self.resolve_by_device_id(&req.device_id).await?;

        let _guard = self.locks.acquire(entity.eid).await;
        let (shared_key, publish_keypair) = self.publish_shared_key(&entity)?;
        let client_publish_pub = crypto_core::decode_public_key(&entity.client_publish_pub_key)?;

        let mut state = match &entity.server_state {
            Some(bytes) => RatchetState::deserialize(bytes)?,
            None => RatchetState::init(shared_key, publish_keypair.private, publish_keypair.public),
        };

        let (header, ciphertext) = state.encrypt(req.payload_plaintext.as_bytes(), client_publish_pub)?;
        db::entities::update_server_state(&self.db, entity.eid, &state.serialize()).await?;

        info!(eid = %entity.eid_hex(), "encrypted payload");
        Ok(Response::new(EncryptPayloadResponse {
            success: true,
            message: "Successfully encrypted payload.".to_string(),
            payload_ciphertext: ratchet::encode_frame(header, &ciphertext),
        }))
    }

    // ---- DeleteEntity ---------------------------------------------------

    async fn handle_delete_entity(
        &self,
        req: DeleteEntityRequest,
    ) -> VaultResult<Response<DeleteEntityResponse>> {
        validate_required(&[Requirement::Field("long_lived_token", &req.long_lived_token)])?;
        let entity = self.resolve_by_llt(&req.long_lived_token).await?;

        let stored_tokens = db::entity_tokens::list_for_entity(&self.db, entity.eid).await?;
        if !stored_tokens.is_empty() {
            let mut entries = Vec::with_capacity(stored_tokens.len());
            for token in &stored_tokens {
                let account_identifier = crypto_core::aes_gcm_decrypt(&token.account_identifier)?;
                let account_identifier = String::from_utf8(account_identifier)
                    .map_err(|_| VaultError::Internal("stored identifier is not UTF-8".to_string()))?;
                entries.push(format!("({}, {})", token.platform, account_identifier));
            }
            return Err(VaultError::EntityHasTokens(entries.join(", ")));
        }

        let eid_hex = entity.eid_hex();
        db::entities::delete(&self.db, entity.eid).await?;
        self.keystore.delete(&self.keystore.publish_path(&eid_hex))?;
        self.keystore.delete(&self.keystore.device_id_path(&eid_hex))?;
        self.locks.remove(&entity.eid);

        info!(eid = %eid_hex, "entity deleted successfully");
        Ok(Response::new(DeleteEntityResponse {
            success: true,
            message: "Entity deleted successfully.".to_string(),
        }))
    }
}

fn generate_eid(phone_number_hash: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, phone_number_hash.as_bytes())
}

fn check_platform(platform: &str) -> VaultResult<()> {
    if SUPPORTED_PLATFORMS.contains(&platform.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(VaultError::UnsupportedPlatform(platform.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_eid_is_deterministic() {
        let a = generate_eid("abc123hash");
        let b = generate_eid("abc123hash");
        assert_eq!(a, b);
    }

    #[test]
    fn generate_eid_differs_across_hashes() {
        let a = generate_eid("abc123hash");
        let b = generate_eid("different-hash");
        assert_ne!(a, b);
    }

    #[test]
    fn check_platform_accepts_gmail_case_insensitively() {
        assert!(check_platform("gmail").is_ok());
        assert!(check_platform("Gmail").is_ok());
        assert!(check_platform("GMAIL").is_ok());
    }

    #[test]
    fn check_platform_rejects_unknown_platform() {
        let err = check_platform("outlook").unwrap_err();
        assert!(matches!(err, VaultError::UnsupportedPlatform(p) if p == "outlook"));
    }
}

#[tonic::async_trait]
impl EntityService for EntityServiceServer {
    async fn create_entity(
        &self,
        request: Request<CreateEntityRequest>,
    ) -> Result<Response<CreateEntityResponse>, Status> {
        self.handle_create_entity(request.into_inner())
            .await
            .map_err(Status::from)
    }

    async fn authenticate_entity(
        &self,
        request: Request<AuthenticateEntityRequest>,
    ) -> Result<Response<AuthenticateEntityResponse>, Status> {
        self.handle_authenticate_entity(request.into_inner())
            .await
            .map_err(Status::from)
    }

    async fn list_entity_stored_tokens(
        &self,
        request: Request<ListEntityStoredTokenRequest>,
    ) -> Result<Response<ListEntityStoredTokenResponse>, Status> {
        self.handle_list_entity_stored_tokens(request.into_inner())
            .await
            .map_err(Status::from)
    }

    async fn store_entity_token(
        &self,
        request: Request<StoreEntityTokenRequest>,
    ) -> Result<Response<StoreEntityTokenResponse>, Status> {
        self.handle_store_entity_token(request.into_inner())
            .await
            .map_err(Status::from)
    }

    async fn get_entity_access_token(
        &self,
        request: Request<GetEntityAccessTokenRequest>,
    ) -> Result<Response<GetEntityAccessTokenResponse>, Status> {
        self.handle_get_entity_access_token(request.into_inner())
            .await
            .map_err(Status::from)
    }

    async fn update_entity_token(
        &self,
        request: Request<UpdateEntityTokenRequest>,
    ) -> Result<Response<UpdateEntityTokenResponse>, Status> {
        self.handle_update_entity_token(request.into_inner())
            .await
            .map_err(Status::from)
    }

    async fn delete_entity_token(
        &self,
        request: Request<DeleteEntityTokenRequest>,
    ) -> Result<Response<DeleteEntityTokenResponse>, Status> {
        self.handle_delete_entity_token(request.into_inner())
            .await
            .map_err(Status::from)
    }

    async fn decrypt_payload(
        &self,
        request: Request<DecryptPayloadRequest>,
    ) -> Result<Response<DecryptPayloadResponse>, Status> {
        self.handle_decrypt_payload(request.into_inner())
            .await
            .map_err(Status::from)
    }

    async fn encrypt_payload(
        &self,
        request: Request<EncryptPayloadRequest>,
    ) -> Result<Response<EncryptPayloadResponse>, Status> {
        self.handle_encrypt_payload(request.into_inner())
            .await
            .map_err(Status::from)
    }

    async fn delete_entity(
        &self,
        request: Request<DeleteEntityRequest>,
    ) -> Result<Response<DeleteEntityResponse>, Status> {
        self.handle_delete_entity(request.into_inner())
            .await
            .map_err(Status::from)
    }
}
