use thiserror::Error;
use tonic::{Code, Status};

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("missing required fields: {0}")]
    MissingFields(String),

    #[error("invalid fields: {0}")]
    InvalidFields(String),

    #[error("entity with this phone number already exists")]
    EntityAlreadyExists,

    #[error("entity not found")]
    EntityNotFound,

    #[error("session has expired or the token is invalid")]
    InvalidSession,

    #[error("incorrect credentials")]
    InvalidCredentials,

    #[error("invalid device ID")]
    InvalidDeviceId,

    #[error("platform '{0}' is not supported")]
    UnsupportedPlatform(String),

    #[error("entity already has a token for this platform/identifier")]
    TokenAlreadyExists,

    #[error("no token found for this platform/identifier")]
    TokenNotFound,

    #[error("entity still has stored tokens: {0}")]
    EntityHasTokens(String),

    #[error("invalid payload framing: {0}")]
    InvalidPayloadFraming(String),

    #[error("payload decryption failed")]
    PayloadDecryptFailed,

    #[error("ownership proof verification failed: {0}")]
    OwnershipProofFailed(String),

    #[error("ownership proof initialization failed: {0}")]
    OwnershipProofInitFailed(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("keystore error: {0}")]
    Keystore(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    pub fn to_status(&self) -> Status {
        match self {
            VaultError::MissingFields(msg) | VaultError::InvalidFields(msg) => {
                Status::new(Code::InvalidArgument, msg.clone())
            }
            VaultError::EntityAlreadyExists | VaultError::TokenAlreadyExists => {
                Status::new(Code::AlreadyExists, self.to_string())
            }
            VaultError::EntityNotFound | VaultError::TokenNotFound => {
                Status::new(Code::NotFound, self.to_string())
            }
            VaultError::InvalidSession => Status::new(
                Code::Unauthenticated,
                "Your session has expired or the token is invalid. Please log in again to generate a new token.",
            ),
            VaultError::InvalidCredentials => Status::new(
                Code::Unauthenticated,
                "Incorrect credentials. Please double-check your details and try again.",
            ),
            VaultError::InvalidDeviceId => Status::new(
                Code::Unauthenticated,
                "Invalid device ID. Please log in again to obtain a valid device ID.",
            ),
            VaultError::UnsupportedPlatform(platform) => Status::new(
                Code::Unimplemented,
                format!(
                    "The platform '{platform}' is currently not supported. Please contact the \
                     developers for more information on when this platform will be implemented."
                ),
            ),
            VaultError::EntityHasTokens(detail) => Status::new(
                Code::FailedPrecondition,
                format!(
                    "You cannot delete entity because it still has stored tokens. Revoke stored \
                     tokens with the following platforms and try again: {detail}."
                ),
            ),
            VaultError::OwnershipProofFailed(reason) => Status::new(
                Code::Unauthenticated,
                format!("Ownership proof verification failed. Reason: {reason}"),
            ),
            VaultError::OwnershipProofInitFailed(reason) => Status::new(
                Code::InvalidArgument,
                format!("Ownership proof initialization failed. Reason: {reason}"),
            ),
            VaultError::InvalidPayloadFraming(_) | VaultError::PayloadDecryptFailed => {
                Status::new(Code::InvalidArgument, "Invalid content format.")
            }
            VaultError::Database(_) | VaultError::Keystore(_) | VaultError::Internal(_) => {
                Status::new(Code::Internal, "Oops! Something went wrong. Please try again later.")
            }
        }
    }
}

impl From<sqlx::Error> for VaultError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "database error");
        VaultError::Database(err.to_string())
    }
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        tracing::error!(error = %err, "keystore I/O error");
        VaultError::Keystore(err.to_string())
    }
}

impl From<crypto_core::CryptoError> for VaultError {
    fn from(err: crypto_core::CryptoError) -> Self {
        tracing::error!(error = %err, "crypto error");
        VaultError::Internal(err.to_string())
    }
}

impl From<VaultError> for Status {
    fn from(err: VaultError) -> Self {
        err.to_status()
    }
}
