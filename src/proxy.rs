//! Reverse proxy multiplexing both MCP services behind one origin
//!
//! `/claude-code/*` and `/sequential-thinking/*` are forwarded to their
//! upstreams with the prefix stripped. Bodies stream in both directions so
//! SSE responses pass through unbuffered.
//!
//! Each upstream keeps its own OAuth state, so a client authenticates with
//! the service it uses: `/<service>/register`, `/<service>/oauth/*`. The
//! upstream learns the public origin and prefix from `X-Forwarded-Host`,
//! `X-Forwarded-Proto` and `X-Forwarded-Prefix`, so its discovery documents
//! and challenges point back through the proxy. The root OAuth endpoints
//! belong to claude-code.

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth::{request_base_url, AuthorizationServerMetadata};
use crate::config::ProxySettings;
use crate::server::http::shutdown_signal;
use crate::server::Service;

/// Root OAuth endpoints, served by the claude-code upstream.
const ROOT_OAUTH_PATHS: &[&str] = &["/register", "/oauth/authorize", "/oauth/token"];

/// Well-known documents that clients may request with the issuer path
/// appended (RFC 8414 §3.1, RFC 9728 §3.1).
const PATH_INSERTED_DOCUMENTS: &[&str] = &[
    "/.well-known/oauth-authorization-server",
    "/.well-known/oauth-protected-resource",
];

/// Where a request goes and with which path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Backend service
    pub service: Service,
    /// Path on the upstream, always starting with `/`
    pub path: String,
    /// The client addressed the service through its prefix
    pub prefixed: bool,
}

/// `rest` is exactly `prefix` or continues it with a new path segment.
fn strip_segment_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}

/// Map an incoming path to its upstream, if any.
#[must_use]
pub fn route_for(path: &str) -> Option<Route> {
    for service in [Service::ClaudeCode, Service::SequentialThinking] {
        let prefix = service.prefix();
        if let Some(rest) = strip_segment_prefix(path, &prefix) {
            let path = if rest.is_empty() { "/" } else { rest };
            return Some(Route {
                service,
                path: path.to_string(),
                prefixed: true,
            });
        }
        for document in PATH_INSERTED_DOCUMENTS {
            let inserted = path
                .strip_prefix(document)
                .and_then(|rest| strip_segment_prefix(rest, &prefix));
            if inserted.is_some() {
                return Some(Route {
                    service,
                    path: (*document).to_string(),
                    prefixed: true,
                });
            }
        }
    }
    ROOT_OAUTH_PATHS.contains(&path).then(|| Route {
        service: Service::ClaudeCode,
        path: path.to_string(),
        prefixed: false,
    })
}

#[derive(Debug, Clone)]
struct ProxyState {
    client: reqwest::Client,
    claude_code: String,
    sequential_thinking: String,
}

impl ProxyState {
    fn upstream(&self, service: Service) -> &str {
        match service {
            Service::ClaudeCode => &self.claude_code,
            Service::SequentialThinking => &self.sequential_thinking,
        }
    }
}

/// Build the proxy router.
pub fn router(settings: &ProxySettings) -> Result<Router> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .context("Failed to build HTTP client")?;
    let state = ProxyState {
        client,
        claude_code: settings.claude_code_upstream.trim_end_matches('/').to_string(),
        sequential_thinking: settings
            .sequential_thinking_upstream
            .trim_end_matches('/')
            .to_string(),
    };

    Ok(Router::new()
        .route(
            "/.well-known/oauth-authorization-server",
            get(|headers: HeaderMap| async move { Json(unified_oauth_metadata(&headers)) }),
        )
        .route(
            "/.well-known/mcp",
            get(|| async { Json(unified_mcp_discovery()) }),
        )
        .fallback(forward)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http()))
}

/// Authorization server metadata for the proxy origin (the root endpoints,
/// which issue claude-code tokens), plus each service's own endpoints.
#[must_use]
pub fn unified_oauth_metadata(headers: &HeaderMap) -> Value {
    let base = request_base_url(headers);
    let mut doc = serde_json::to_value(AuthorizationServerMetadata::for_base(&base))
        .unwrap_or_else(|_| json!({}));
    let services: serde_json::Map<String, Value> = [Service::ClaudeCode, Service::SequentialThinking]
        .into_iter()
        .map(|service| {
            let service_base = format!("{base}{}", service.prefix());
            let meta = AuthorizationServerMetadata::for_base(&service_base);
            let entry = json!({
                "issuer": meta.issuer,
                "authorization_endpoint": meta.authorization_endpoint,
                "token_endpoint": meta.token_endpoint,
                "registration_endpoint": meta.registration_endpoint,
                "mcp": format!("{service_base}/mcp"),
                "resource_metadata": format!("{service_base}/.well-known/oauth-protected-resource"),
            });
            (service.name().to_string(), entry)
        })
        .collect();
    doc["services"] = Value::Object(services);
    doc
}

/// `/.well-known/mcp` listing both services.
#[must_use]
pub fn unified_mcp_discovery() -> Value {
    let services: Vec<Value> = [Service::ClaudeCode, Service::SequentialThinking]
        .into_iter()
        .map(|service| {
            let p = service.prefix();
            json!({
                "name": service.name(),
                "version": env!("CARGO_PKG_VERSION"),
                "transport": "streamable-http",
                "endpoints": {
                    "mcp": format!("{p}/mcp"),
                    "sse": format!("{p}/sse"),
                    "health": format!("{p}/health"),
                },
                "oauth": {
                    "discovery": format!("{p}/.well-known/oauth-authorization-server"),
                },
            })
        })
        .collect();
    json!({ "services": services })
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "transfer-encoding"
            | "upgrade"
            | "te"
            | "trailer"
            | "host"
    )
}

/// Tell the upstream how the client reached us. Values set by a proxy in
/// front of this one are kept; the service prefix is appended to theirs.
fn forwarding_headers(headers: &mut HeaderMap, parts: &axum::http::request::Parts, route: &Route) {
    if !headers.contains_key("x-forwarded-host") {
        let host = parts.headers.get(header::HOST).cloned().or_else(|| {
            parts
                .uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });
        if let Some(host) = host {
            headers.insert("x-forwarded-host", host);
        }
    }
    if !headers.contains_key("x-forwarded-proto") {
        let scheme = parts.uri.scheme_str().unwrap_or("http");
        if let Ok(value) = HeaderValue::from_str(scheme) {
            headers.insert("x-forwarded-proto", value);
        }
    }
    if route.prefixed {
        let outer = headers
            .get("x-forwarded-prefix")
            .and_then(|v| v.to_str().ok())
            .map(|p| p.trim_end_matches('/').to_string())
            .unwrap_or_default();
        if let Ok(value) = HeaderValue::from_str(&format!("{outer}{}", route.service.prefix())) {
            headers.insert("x-forwarded-prefix", value);
        }
    }
}

async fn forward(State(state): State<ProxyState>, request: Request) -> Response {
    let Some(route) = route_for(request.uri().path()) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Not found", "path": request.uri().path() })),
        )
            .into_response();
    };

    let original = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), ToString::to_string);
    let query = request
        .uri()
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();
    let upstream = state.upstream(route.service);
    let target = format!("{upstream}{}{query}", route.path);
    debug!(method = %request.method(), from = %original, to = %target, "Proxying request");

    let (parts, body) = request.into_parts();
    let mut headers: HeaderMap = parts
        .headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    if let Ok(value) = HeaderValue::from_str(&original) {
        headers.insert("x-original-url", value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    forwarding_headers(&mut headers, &parts, &route);

    let result = state
        .client
        .request(parts.method, &target)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    match result {
        Ok(upstream_response) => {
            let status = upstream_response.status();
            let headers: HeaderMap = upstream_response
                .headers()
                .iter()
                .filter(|(name, _)| !is_hop_by_hop(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            let mut response = Response::new(Body::from_stream(upstream_response.bytes_stream()));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            response
        }
        Err(e) => {
            warn!(service = %route.service, upstream = %upstream, "Upstream request failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "Bad gateway",
                    "service": route.service.name(),
                    "message": format!("Upstream {upstream} is unavailable"),
                })),
            )
                .into_response()
        }
    }
}

/// Bind and serve the proxy until Ctrl-C or SIGTERM.
pub async fn serve_proxy(settings: &ProxySettings) -> Result<()> {
    let app = router(settings)?;
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let local = listener.local_addr().context("Failed to read bound address")?;
    info!(address = %local, "Proxy server listening");
    info!("http://{local}/claude-code/* -> {}/*", settings.claude_code_upstream);
    info!(
        "http://{local}/sequential-thinking/* -> {}/*",
        settings.sequential_thinking_upstream
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Proxy server error")?;
    info!("Proxy closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_routes_are_stripped() {
        assert_eq!(
            route_for("/claude-code/mcp"),
            Some(Route {
                service: Service::ClaudeCode,
                path: "/mcp".into(),
                prefixed: true,
            })
        );
        assert_eq!(
            route_for("/sequential-thinking"),
            Some(Route {
                service: Service::SequentialThinking,
                path: "/".into(),
                prefixed: true,
            })
        );
    }

    #[test]
    fn test_root_oauth_goes_to_claude_code() {
        let route = route_for("/oauth/token").unwrap();
        assert_eq!(route.service, Service::ClaudeCode);
        assert_eq!(route.path, "/oauth/token");
        assert!(!route.prefixed);
    }

    #[test]
    fn test_path_inserted_well_known_routes() {
        let route = route_for("/.well-known/oauth-authorization-server/sequential-thinking").unwrap();
        assert_eq!(route.service, Service::SequentialThinking);
        assert_eq!(route.path, "/.well-known/oauth-authorization-server");
        assert!(route.prefixed);

        let route = route_for("/.well-known/oauth-protected-resource/claude-code/mcp").unwrap();
        assert_eq!(route.service, Service::ClaudeCode);
        assert_eq!(route.path, "/.well-known/oauth-protected-resource");

        assert_eq!(route_for("/.well-known/oauth-authorization-server/other"), None);
    }

    #[test]
    fn test_unknown_paths_unrouted() {
        assert_eq!(route_for("/claude-codex/mcp"), None);
        assert_eq!(route_for("/mcp"), None);
        assert_eq!(route_for("/"), None);
    }

    #[test]
    fn test_unified_documents() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local:8080"));
        let meta = unified_oauth_metadata(&headers);
        assert_eq!(meta["issuer"], "http://proxy.local:8080");
        let thinking = &meta["services"]["sequential-thinking"];
        assert_eq!(thinking["issuer"], "http://proxy.local:8080/sequential-thinking");
        assert_eq!(
            thinking["token_endpoint"],
            "http://proxy.local:8080/sequential-thinking/oauth/token"
        );
        assert_eq!(
            thinking["registration_endpoint"],
            "http://proxy.local:8080/sequential-thinking/register"
        );
        assert_eq!(meta["services"]["claude-code"]["mcp"], "http://proxy.local:8080/claude-code/mcp");

        let mcp = unified_mcp_discovery();
        assert_eq!(mcp["services"][0]["endpoints"]["mcp"], "/claude-code/mcp");
        assert_eq!(mcp["services"][1]["name"], "sequential-thinking");
        assert_eq!(
            mcp["services"][1]["oauth"]["discovery"],
            "/sequential-thinking/.well-known/oauth-authorization-server"
        );
    }
}
