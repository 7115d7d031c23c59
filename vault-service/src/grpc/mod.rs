/// gRPC server module for vault-service
///
/// Exports:
/// - EntityServiceServer: the `vault.v1.Entity` implementation
/// - proto: generated protobuf types from vault.proto
pub mod server;

pub use server::proto;
pub use server::EntityServiceServer;

/// Server-side correlation-id extractor, wired onto the service with
/// `with_interceptor` in `main`. Every handler log line picks this up from
/// request extensions instead of re-deriving it per RPC.
pub fn logging_interceptor(
    mut req: tonic::Request<()>,
) -> Result<tonic::Request<()>, tonic::Status> {
    let correlation_id = req
        .metadata()
        .get("correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::info!(correlation_id = %correlation_id, "rpc received");
    req.extensions_mut().insert(correlation_id);
    Ok(req)
}
