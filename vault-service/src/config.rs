//! Configuration management for the vault service.
//!
//! Loads settings from environment variables, with a `.env` fallback in
//! development. Every variable is read exactly once, at startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub server: ServerSettings,
    pub vault: VaultSettings,
    pub otp: OtpSettings,
    pub tls: TlsSettings,
}

impl Settings {
    pub fn load() -> Result<Self> {
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
            info!("Loaded .env file for development");
        }

        Ok(Settings {
            database: DatabaseSettings::from_env()?,
            server: ServerSettings::from_env()?,
            vault: VaultSettings::from_env()?,
            otp: OtpSettings::from_env()?,
            tls: TlsSettings::from_env()?,
        })
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl DatabaseSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid DATABASE_MAX_CONNECTIONS")?,
            acquire_timeout_secs: env::var("DATABASE_ACQUIRE_TIMEOUT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid DATABASE_ACQUIRE_TIMEOUT")?,
        })
    }
}

/// gRPC listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub ssl_port: u16,
    pub max_concurrent_rpcs: usize,
}

impl ServerSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("GRPC_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("GRPC_PORT")
                .unwrap_or_else(|_| "6000".to_string())
                .parse()
                .context("Invalid GRPC_PORT")?,
            ssl_port: env::var("GRPC_SSL_PORT")
                .unwrap_or_else(|_| "6001".to_string())
                .parse()
                .context("Invalid GRPC_SSL_PORT")?,
            max_concurrent_rpcs: env::var("MAX_CONCURRENT_RPCS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid MAX_CONCURRENT_RPCS")?,
        })
    }
}

/// Crypto/keystore settings specific to the vault's identity subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSettings {
    pub hashing_salt: String,
    pub server_secret: String,
    pub keystore_path: String,
    pub llt_lifetime_days: i64,
}

impl VaultSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            hashing_salt: env::var("HASHING_SALT").context("HASHING_SALT must be set")?,
            server_secret: env::var("VAULT_SERVER_SECRET")
                .context("VAULT_SERVER_SECRET must be set")?,
            keystore_path: env::var("KEYSTORE_PATH").context("KEYSTORE_PATH must be set")?,
            llt_lifetime_days: env::var("LLT_LIFETIME_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid LLT_LIFETIME_DAYS")?,
        })
    }
}

/// OTP gateway settings (Redis storage + optional SNS delivery).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpSettings {
    pub redis_url: String,
    pub otp_length: usize,
    pub otp_expiry_secs: i64,
    pub send_cooldown_secs: i64,
    pub gateway_timeout_secs: u64,
    pub sns_enabled: bool,
}

impl OtpSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            redis_url: env::var("REDIS_URL").context("REDIS_URL must be set")?,
            otp_length: env::var("OTP_LENGTH")
                .unwrap_or_else(|_| "6".to_string())
                .parse()
                .context("Invalid OTP_LENGTH")?,
            otp_expiry_secs: env::var("OTP_EXPIRY_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("Invalid OTP_EXPIRY_SECS")?,
            send_cooldown_secs: env::var("OTP_SEND_COOLDOWN_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid OTP_SEND_COOLDOWN_SECS")?,
            gateway_timeout_secs: env::var("OTP_GATEWAY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid OTP_GATEWAY_TIMEOUT_SECS")?,
            sns_enabled: env::var("OTP_SNS_ENABLED")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
        })
    }
}

/// TLS settings; only consulted when `MODE=production`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSettings {
    pub mode: String,
    pub ssl_certificate: Option<String>,
    pub ssl_key: Option<String>,
}

impl TlsSettings {
    fn from_env() -> Result<Self> {
        let mode = env::var("MODE").unwrap_or_else(|_| "development".to_string());
        if mode == "production" {
            return Ok(Self {
                ssl_certificate: Some(
                    env::var("SSL_CERTIFICATE")
                        .context("SSL_CERTIFICATE must be set when MODE=production")?,
                ),
                ssl_key: Some(
                    env::var("SSL_KEY").context("SSL_KEY must be set when MODE=production")?,
                ),
                mode,
            });
        }
        Ok(Self {
            mode,
            ssl_certificate: env::var("SSL_CERTIFICATE").ok(),
            ssl_key: env::var("SSL_KEY").ok(),
        })
    }

    pub fn is_production(&self) -> bool {
        self.mode == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_settings_from_env() {
        env::set_var("DATABASE_URL", "postgres://localhost/vault_test");
        env::set_var("DATABASE_MAX_CONNECTIONS", "100");

        let settings = DatabaseSettings::from_env().unwrap();

        assert_eq!(settings.url, "postgres://localhost/vault_test");
        assert_eq!(settings.max_connections, 100);

        env::remove_var("DATABASE_URL");
        env::remove_var("DATABASE_MAX_CONNECTIONS");
    }

    #[test]
    fn test_vault_settings_defaults_llt_lifetime() {
        env::set_var("HASHING_SALT", "test-salt");
        env::set_var("VAULT_SERVER_SECRET", "test-secret");
        env::set_var("KEYSTORE_PATH", "/tmp/vault-keystore");

        let settings = VaultSettings::from_env().unwrap();

        assert_eq!(settings.llt_lifetime_days, 30);

        env::remove_var("HASHING_SALT");
        env::remove_var("VAULT_SERVER_SECRET");
        env::remove_var("KEYSTORE_PATH");
    }

    #[test]
    fn test_tls_settings_requires_cert_in_production() {
        env::set_var("MODE", "production");
        env::remove_var("SSL_CERTIFICATE");
        env::remove_var("SSL_KEY");

        let result = TlsSettings::from_env();
        assert!(result.is_err());

        env::remove_var("MODE");
    }
}
