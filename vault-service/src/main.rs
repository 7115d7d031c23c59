//! Vault service entry point.
//!
//! Starts the gRPC server with:
//! - PostgreSQL connection pool (via `db-pool`)
//! - Redis connection manager (OTP storage)
//! - Optional AWS SNS client (OTP delivery)
//! - File-backed keystore for per-entity X25519 keypairs
//! - Optional TLS, required in production

use anyhow::{Context, Result};
use db_pool::{create_pool, DbConfig};
use redis_utils::RedisPool;
use std::sync::Arc;
use tokio::signal;
use tonic::transport::Server;
use tracing::{info, warn};

use vault_service::config::Settings;
use vault_service::grpc::proto::entity_server::EntityServer;
use vault_service::grpc::{logging_interceptor, EntityServiceServer};
use vault_service::locks::EntityLocks;
use vault_service::otp::OtpGateway;
use vault_service::security::Keystore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "vault_service=info,info".into()))
        .with_target(false)
        .json()
        .init();

    info!("Starting vault service");

    let settings = Settings::load().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    crypto_core::init_server_keys(
        settings.vault.hashing_salt.as_bytes(),
        settings.vault.server_secret.as_bytes(),
    )
    .context("Failed to initialize server keys")?;
    info!("Server keys initialized");

    let mut db_cfg = DbConfig::for_service("vault-service");
    if db_cfg.database_url.is_empty() {
        db_cfg.database_url = settings.database.url.clone();
    }
    db_cfg.max_connections = std::cmp::max(db_cfg.max_connections, settings.database.max_connections);
    let pool = create_pool(db_cfg)
        .await
        .context("Failed to create database pool")?;
    info!("Database pool initialized");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let redis_pool = RedisPool::connect(&settings.otp.redis_url, None)
        .await
        .context("Failed to connect to Redis")?;
    let redis = redis_pool.manager();
    info!("Redis connection manager initialized");

    let sns_client = if settings.otp.sns_enabled {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        info!("AWS SNS client initialized for OTP delivery");
        Some(aws_sdk_sns::Client::new(&aws_config))
    } else {
        info!("SNS delivery disabled; OTP codes are logged but not sent");
        None
    };

    let keystore = Arc::new(
        Keystore::new(settings.vault.keystore_path.clone()).context("Failed to open keystore")?,
    );
    let locks = Arc::new(EntityLocks::new());
    let otp = OtpGateway::new(redis, sns_client, settings.otp.clone());

    let entity_service = EntityServiceServer::new(
        pool,
        keystore,
        locks,
        otp,
        settings.vault.llt_lifetime_days,
    );

    let mut server_builder = Server::builder();

    if settings.tls.is_production() {
        let cert_pem = std::fs::read_to_string(
            settings.tls.ssl_certificate.as_ref().expect("checked by TlsSettings::from_env"),
        )
        .context("Failed to read SSL_CERTIFICATE")?;
        let key_pem = std::fs::read_to_string(
            settings.tls.ssl_key.as_ref().expect("checked by TlsSettings::from_env"),
        )
        .context("Failed to read SSL_KEY")?;
        let tls_cfg = grpc_tls::GrpcServerTlsConfig {
            cert_pem,
            key_pem,
            client_ca_cert: None,
            require_client_cert: false,
        };
        server_builder = Server::builder()
            .tls_config(tls_cfg.build_server_tls().context("Failed to build server TLS config")?)
            .context("Failed to configure TLS on gRPC server")?;
        info!("gRPC server TLS configured");
    } else {
        warn!("Starting gRPC server without TLS (non-production only)");
    }

    let port = if settings.tls.is_production() {
        settings.server.ssl_port
    } else {
        settings.server.port
    };
    let addr = format!("{}:{}", settings.server.host, port)
        .parse()
        .context("Invalid server address")?;

    info!("Starting gRPC server on {}", addr);

    server_builder
        .add_service(EntityServer::with_interceptor(
            entity_service,
            logging_interceptor,
        ))
        .serve_with_shutdown(addr, shutdown_signal())
        .await
        .context("gRPC server error")?;

    info!("Vault service shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutting down gracefully...");
}
