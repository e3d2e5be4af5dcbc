use axum::Router;
use configs::{AppConfig, ServerConfig};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::errors::StartupError;
use crate::routes::{self, ServerState};
use service::CacheService;

fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

/// Resolve the configured host (name or literal) and bind the first address that accepts.
async fn listen(server: &ServerConfig) -> Result<TcpListener, StartupError> {
    TcpListener::bind((server.listen_host(), server.port))
        .await
        .map_err(|source| StartupError::Bind { addr: server.bind_addr(), source })
}

/// Public entry: load the persisted cache, build the app and run the HTTP server.
///
/// A snapshot file that exists but cannot be read or decoded aborts here,
/// before anything is bound.
pub async fn run(cfg: AppConfig) -> Result<(), StartupError> {
    let (cache, worker) = CacheService::open(&cfg.cache).await?;
    tokio::spawn(async move {
        if let Err(e) = worker.await {
            error!(error = %e, "persistence worker terminated abnormally");
        }
    });

    let state = ServerState { cache };
    let app: Router = routes::build_router(state, build_cors());

    let listener = listen(&cfg.server).await?;
    let addr = listener.local_addr().map_err(|e| StartupError::Any(e.into()))?;
    info!(%addr, file = %cfg.cache.file_path, queue_capacity = cfg.cache.queue_capacity, "starting cache server");
    axum::serve(listener, app)
        .await
        .map_err(|e| StartupError::Any(e.into()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(host: &str) -> ServerConfig {
        // port 0 lets the OS pick; normal config loading rejects it
        ServerConfig { host: host.into(), port: 0, worker_threads: None }
    }

    #[tokio::test]
    async fn binds_hostnames_not_just_ip_literals() {
        let listener = listen(&server("localhost")).await.expect("localhost resolves");
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }

    #[tokio::test]
    async fn unresolvable_host_reports_bind_error() {
        let err = listen(&server("no-such-host.invalid")).await.err().expect("must fail");
        assert!(matches!(err, StartupError::Bind { .. }));
        assert!(err.to_string().contains("no-such-host.invalid:0"));
    }
}
