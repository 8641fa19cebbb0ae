//! Streamable HTTP transport
//!
//! One axum router per service: MCP at `/mcp` (and `/sse` for clients
//! configured with the older endpoint), health, discovery and OAuth.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{middleware, Json, Router};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::{ClaudeCodeServer, Service, ThinkingServer};
use crate::auth::{self, require_bearer, AuthState, AuthStore};
use crate::claude::ClaudeExecutor;
use crate::config::ServerSettings;

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

fn session_config(ct: &CancellationToken) -> StreamableHttpServerConfig {
    StreamableHttpServerConfig {
        stateful_mode: true,
        sse_keep_alive: Some(Duration::from_secs(30)),
        sse_retry: Some(Duration::from_secs(3)),
        cancellation_token: ct.child_token(),
    }
}

/// Build the full router for `service`.
pub fn router(
    service: Service,
    executor: ClaudeExecutor,
    auth: AuthState,
    ct: &CancellationToken,
) -> Router {
    let mcp = match service {
        Service::ClaudeCode => {
            let handler = ClaudeCodeServer::new(executor);
            let svc = StreamableHttpService::new(
                move || {
                    debug!("Creating claude-code handler for MCP session");
                    Ok(handler.clone())
                },
                Arc::new(LocalSessionManager::default()),
                session_config(ct),
            );
            Router::new()
                .nest_service("/mcp", svc.clone())
                .nest_service("/sse", svc)
        }
        Service::SequentialThinking => {
            // Thought history is scoped to the session
            let svc = StreamableHttpService::new(
                || {
                    debug!("Creating sequential-thinking handler for MCP session");
                    Ok(ThinkingServer::new())
                },
                Arc::new(LocalSessionManager::default()),
                session_config(ct),
            );
            Router::new()
                .nest_service("/mcp", svc.clone())
                .nest_service("/sse", svc)
        }
    }
    .layer(middleware::from_fn_with_state(auth.clone(), require_bearer));

    let require_auth = auth.require_auth;
    Router::new()
        .route(
            "/health",
            get(move || async move {
                Json(json!({
                    "status": "ok",
                    "service": service.name(),
                    "version": env!("CARGO_PKG_VERSION"),
                }))
            }),
        )
        .route(
            "/.well-known/mcp",
            get(move |headers: HeaderMap| async move {
                Json(discovery_document(service, require_auth, &headers))
            }),
        )
        .merge(auth::routes(auth))
        .merge(mcp)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Path prefix the request arrived under when it came through the reverse
/// proxy, detected from `X-Forwarded-Prefix`, `X-Original-URL` or `Referer`.
/// Empty otherwise.
#[must_use]
pub fn proxy_prefix(service: Service, headers: &HeaderMap) -> String {
    let prefix = service.prefix();
    let under_prefix = |path: &str| path == prefix || path.starts_with(&format!("{prefix}/"));

    let forwarded = headers
        .get("x-forwarded-prefix")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|p| p.trim_end_matches('/') == prefix);

    let original = headers
        .get("x-original-url")
        .and_then(|v| v.to_str().ok())
        .is_some_and(under_prefix);
    let referer = headers
        .get(axum::http::header::REFERER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| url::Url::parse(v).ok())
        .is_some_and(|u| under_prefix(u.path()));

    if forwarded || original || referer {
        prefix
    } else {
        String::new()
    }
}

/// `/.well-known/mcp` document with endpoint paths relative to how the
/// client reached us.
#[must_use]
pub fn discovery_document(service: Service, require_auth: bool, headers: &HeaderMap) -> Value {
    let p = proxy_prefix(service, headers);
    json!({
        "name": service.name(),
        "version": env!("CARGO_PKG_VERSION"),
        "transport": "streamable-http",
        "endpoints": {
            "mcp": format!("{p}/mcp"),
            "sse": format!("{p}/sse"),
            "health": format!("{p}/health"),
        },
        "authentication": {
            "type": "oauth2",
            "required": require_auth,
            "metadata": format!("{p}/.well-known/oauth-authorization-server"),
        },
    })
}

/// Bind and serve `service` until Ctrl-C or SIGTERM.
pub async fn serve_http(
    service: Service,
    executor: ClaudeExecutor,
    settings: &ServerSettings,
    port: u16,
) -> Result<()> {
    let store = AuthStore::new();
    let auth = AuthState {
        store: store.clone(),
        public_url: settings.public_url.clone(),
        require_auth: settings.require_auth,
        registration_token: settings.registration_token.clone(),
    };
    if !settings.require_auth {
        warn!("Bearer authentication disabled; /mcp is open to anyone who can reach it");
    } else if settings.registration_token.is_none() && !settings.is_loopback() {
        warn!(
            host = %settings.host,
            "Open client registration on a non-loopback address; set server.registration_token"
        );
    }

    let ct = CancellationToken::new();
    let app = router(service, executor, auth, &ct);

    let addr = format!("{}:{port}", settings.host);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let local = listener.local_addr().context("Failed to read bound address")?;
    info!(%service, address = %local, "MCP HTTP server listening");
    info!("MCP endpoint: http://{local}/mcp");
    info!("OAuth discovery: http://{local}/.well-known/oauth-authorization-server");

    let purge_store = store.clone();
    let purge_ct = ct.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = purge_ct.cancelled() => break,
                _ = ticker.tick() => purge_store.purge_expired(),
            }
        }
    });

    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_ct.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .context("HTTP server error")?;

    store.clear();
    info!("Server closed");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Ctrl-C received, shutting down gracefully"),
        () = terminate => info!("SIGTERM received, shutting down gracefully"),
    }
}
