#![allow(missing_docs)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use claude_mcp::auth::{AuthState, AuthStore};
use claude_mcp::config::ClaudeSettings;
use claude_mcp::server::http::router;
use claude_mcp::{ClaudeExecutor, Service};

const REDIRECT: &str = "https://claude.ai/api/mcp/auth_callback";

fn app(service: Service, require_auth: bool) -> Router {
    app_with(service, require_auth, None)
}

fn app_with(service: Service, require_auth: bool, registration_token: Option<&str>) -> Router {
    let auth = AuthState {
        store: AuthStore::new(),
        public_url: None,
        require_auth,
        registration_token: registration_token.map(str::to_string),
    };
    router(
        service,
        ClaudeExecutor::new(ClaudeSettings::default()),
        auth,
        &CancellationToken::new(),
    )
}

async fn send(app: &Router, request: Request<Body>) -> axum::response::Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "localhost:3000")
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::HOST, "localhost:3000")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_form(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::HOST, "localhost:3000")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn initialize_request(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/mcp")
        .header(header::HOST, "localhost:3000")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "application/json, text/event-stream");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": { "name": "test", "version": "0" }
        }
    });
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Register, authorize and exchange the code. Returns the token response.
async fn obtain_tokens(app: &Router) -> (String, Value) {
    let response = send(app, post_json("/register", &json!({
        "redirect_uris": [REDIRECT],
        "client_name": "Claude"
    })))
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let client = json_body(response).await;
    let client_id = client["client_id"].as_str().unwrap().to_string();
    assert!(client_id.starts_with("claude_"));

    let authorize = format!(
        "/oauth/authorize?response_type=code&client_id={client_id}&redirect_uri={}&state=xyz",
        url::form_urlencoded::byte_serialize(REDIRECT.as_bytes()).collect::<String>()
    );
    let response = send(app, get(&authorize)).await;
    assert!(response.status().is_redirection());
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    let location = url::Url::parse(location).unwrap();
    assert!(location.as_str().starts_with(REDIRECT));
    let params: std::collections::HashMap<_, _> = location.query_pairs().into_owned().collect();
    assert_eq!(params["state"], "xyz");
    let code = &params["code"];

    let response = send(
        app,
        post_form(
            "/oauth/token",
            &format!(
                "grant_type=authorization_code&code={code}&client_id={client_id}&client_secret={}",
                client["client_secret"].as_str().unwrap()
            ),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    (client_id, json_body(response).await)
}

#[tokio::test]
async fn test_health() {
    let app = app(Service::ClaudeCode, true);
    let response = send(&app, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "claude-code");
}

#[tokio::test]
async fn test_mcp_discovery_uses_proxy_prefix() {
    let app = app(Service::SequentialThinking, true);
    let request = Request::builder()
        .uri("/.well-known/mcp")
        .header("x-original-url", "/sequential-thinking/.well-known/mcp")
        .body(Body::empty())
        .unwrap();
    let body = json_body(send(&app, request).await).await;
    assert_eq!(body["endpoints"]["mcp"], "/sequential-thinking/mcp");
    assert_eq!(body["transport"], "streamable-http");
}

#[tokio::test]
async fn test_oauth_metadata_documents() {
    let app = app(Service::ClaudeCode, true);
    let meta = json_body(send(&app, get("/.well-known/oauth-authorization-server")).await).await;
    assert_eq!(meta["issuer"], "http://localhost:3000");
    assert_eq!(meta["token_endpoint"], "http://localhost:3000/oauth/token");

    let resource = json_body(send(&app, get("/.well-known/oauth-protected-resource")).await).await;
    assert_eq!(resource["resource"], "http://localhost:3000/mcp");
    assert_eq!(resource["authorization_servers"][0], "http://localhost:3000");
}

#[tokio::test]
async fn test_mcp_requires_bearer_token() {
    let app = app(Service::ClaudeCode, true);
    let response = send(&app, initialize_request(None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
    assert!(challenge.contains(
        r#"resource_metadata="http://localhost:3000/.well-known/oauth-protected-resource""#
    ));

    let response = send(&app, initialize_request(Some("made-up"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_full_oauth_flow_unlocks_mcp() {
    let app = app(Service::ClaudeCode, true);
    let (_, tokens) = obtain_tokens(&app).await;
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["expires_in"], 3600);

    let token = tokens["access_token"].as_str().unwrap();
    let response = send(&app, initialize_request(Some(token))).await;
    assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_rotates_and_revokes() {
    let app = app(Service::ClaudeCode, true);
    let (client_id, tokens) = obtain_tokens(&app).await;
    let refresh = tokens["refresh_token"].as_str().unwrap();

    let body = json!({"grant_type": "refresh_token", "refresh_token": refresh, "client_id": client_id});
    let response = send(&app, post_json("/oauth/token", &body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let rotated = json_body(response).await;
    assert_ne!(rotated["access_token"], tokens["access_token"]);

    let response = send(&app, post_json("/oauth/token", &body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_token_endpoint_errors() {
    let app = app(Service::ClaudeCode, true);

    let response = send(&app, post_form("/oauth/token", "grant_type=password")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "unsupported_grant_type");

    let response = send(&app, post_form("/oauth/token", "grant_type=authorization_code&code=nope")).await;
    assert_eq!(json_body(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_authorize_rejects_unknown_client() {
    let app = app(Service::ClaudeCode, true);
    let response = send(&app, get("/oauth/authorize?response_type=code&client_id=claude_missing")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "invalid_client");
}

#[tokio::test]
async fn test_auth_can_be_disabled() {
    let app = app(Service::SequentialThinking, false);
    let response = send(&app, initialize_request(None)).await;
    assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_preflight_skips_auth() {
    let app = app(Service::ClaudeCode, true);
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/mcp")
        .header(header::ORIGIN, "https://claude.ai")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
}

fn register_request(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/register")
        .header(header::HOST, "localhost:3000")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder
        .body(Body::from(json!({ "redirect_uris": [REDIRECT] }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_registration_token_required_when_configured() {
    let app = app_with(Service::ClaudeCode, true, Some("op-secret"));

    let response = send(&app, register_request(None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "invalid_token");

    let response = send(&app, register_request(Some("guess"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&app, register_request(Some("op-secret"))).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(json_body(response).await["client_id"]
        .as_str()
        .unwrap()
        .starts_with("claude_"));
}

#[tokio::test]
async fn test_challenge_uses_forwarded_origin_and_prefix() {
    let app = app(Service::SequentialThinking, true);
    let request = Request::builder()
        .method(Method::POST)
        .uri("/mcp")
        .header(header::HOST, "127.0.0.1:3001")
        .header("x-forwarded-host", "proxy.example:8080")
        .header("x-forwarded-proto", "https")
        .header("x-forwarded-prefix", "/sequential-thinking")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
    assert!(
        challenge.contains(
            r#"resource_metadata="https://proxy.example:8080/sequential-thinking/.well-known/oauth-protected-resource""#
        ),
        "{challenge}"
    );
}
