//! OAuth HTTP endpoints and the bearer-token gate for `/mcp`

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::store::{AuthStore, AuthorizationRequest};
use super::OAuthError;

/// Shared state of the OAuth routes and bearer gate.
#[derive(Debug, Clone)]
pub struct AuthState {
    /// Clients, codes and tokens
    pub store: AuthStore,
    /// Externally visible base URL; derived from request headers when unset
    pub public_url: Option<String>,
    /// When false the bearer gate lets everything through
    pub require_auth: bool,
    /// Initial access token `/register` demands, when set
    pub registration_token: Option<String>,
}

impl AuthState {
    /// Base URL for links in discovery documents and challenges.
    #[must_use]
    pub fn base_url(&self, headers: &HeaderMap) -> String {
        if let Some(url) = &self.public_url {
            return url.trim_end_matches('/').to_string();
        }
        request_base_url(headers)
    }

    /// Check the `/register` caller against the configured initial access token.
    fn check_registration(&self, headers: &HeaderMap) -> Result<(), OAuthError> {
        let Some(expected) = &self.registration_token else {
            return Ok(());
        };
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| OAuthError::InvalidToken("Registration requires an initial access token".into()))?;
        if Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes()) {
            Ok(())
        } else {
            warn!("Rejected client registration with a wrong initial access token");
            Err(OAuthError::InvalidToken("Initial access token is invalid".into()))
        }
    }
}

/// `<scheme>://<host><prefix>` as seen by the client, honouring
/// reverse-proxy headers (`X-Forwarded-Proto`, `X-Forwarded-Host`,
/// `X-Forwarded-Prefix`).
#[must_use]
pub fn request_base_url(headers: &HeaderMap) -> String {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let scheme = header_str("x-forwarded-proto")
        .and_then(|v| v.split(',').next())
        .map_or("http", str::trim);
    let host = header_str("x-forwarded-host")
        .or_else(|| header_str(header::HOST.as_str()))
        .unwrap_or("localhost");
    let prefix = header_str("x-forwarded-prefix")
        .map(|p| p.trim().trim_end_matches('/'))
        .filter(|p| p.starts_with('/'))
        .unwrap_or("");
    format!("{scheme}://{host}{prefix}")
}

/// Discovery and grant endpoints.
pub fn routes(state: AuthState) -> Router {
    Router::new()
        .route(
            "/.well-known/oauth-authorization-server",
            get(authorization_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(protected_resource_metadata),
        )
        .route("/register", post(register))
        .route("/oauth/authorize", get(authorize))
        .route("/oauth/token", post(token))
        .with_state(state)
}

/// RFC 8414 authorization server metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// Issuer identifier
    pub issuer: String,
    /// Authorization endpoint URL
    pub authorization_endpoint: String,
    /// Token endpoint URL
    pub token_endpoint: String,
    /// Dynamic registration endpoint URL
    pub registration_endpoint: String,
    /// Supported `response_type` values
    pub response_types_supported: Vec<String>,
    /// Supported `grant_type` values
    pub grant_types_supported: Vec<String>,
    /// Supported PKCE methods
    pub code_challenge_methods_supported: Vec<String>,
    /// Supported client authentication methods
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

impl AuthorizationServerMetadata {
    /// Metadata for an authorization server rooted at `base`.
    #[must_use]
    pub fn for_base(base: &str) -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect();
        Self {
            issuer: base.to_string(),
            authorization_endpoint: format!("{base}/oauth/authorize"),
            token_endpoint: format!("{base}/oauth/token"),
            registration_endpoint: format!("{base}/register"),
            response_types_supported: strings(&["code"]),
            grant_types_supported: strings(&["authorization_code", "refresh_token"]),
            code_challenge_methods_supported: strings(&["S256", "plain"]),
            token_endpoint_auth_methods_supported: strings(&[
                "client_secret_post",
                "client_secret_basic",
                "none",
            ]),
        }
    }
}

async fn authorization_server_metadata(
    State(state): State<AuthState>,
    headers: HeaderMap,
) -> Json<AuthorizationServerMetadata> {
    Json(AuthorizationServerMetadata::for_base(&state.base_url(&headers)))
}

async fn protected_resource_metadata(
    State(state): State<AuthState>,
    headers: HeaderMap,
) -> Json<Value> {
    let base = state.base_url(&headers);
    Json(json!({
        "resource": format!("{base}/mcp"),
        "authorization_servers": [base],
        "bearer_methods_supported": ["header"],
    }))
}

#[derive(Debug, Default, Deserialize)]
struct RegisterBody {
    #[serde(default)]
    redirect_uris: Vec<String>,
    client_name: Option<String>,
}

async fn register(
    State(state): State<AuthState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, OAuthError> {
    state.check_registration(&headers)?;
    let body: RegisterBody = if body.iter().all(u8::is_ascii_whitespace) {
        RegisterBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| OAuthError::InvalidRequest(format!("Invalid registration body: {e}")))?
    };
    for uri in &body.redirect_uris {
        url::Url::parse(uri)
            .map_err(|e| OAuthError::InvalidRequest(format!("Invalid redirect_uri '{uri}': {e}")))?;
    }

    let client = state.store.register(body.redirect_uris, body.client_name)?;
    let mut doc = serde_json::to_value(&client).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut doc {
        map.insert("grant_types".into(), json!(["authorization_code", "refresh_token"]));
        map.insert("response_types".into(), json!(["code"]));
        map.insert("token_endpoint_auth_method".into(), json!("client_secret_post"));
    }
    Ok((StatusCode::CREATED, Json(doc)).into_response())
}

#[derive(Debug, Deserialize)]
struct AuthorizeParams {
    response_type: Option<String>,
    client_id: Option<String>,
    redirect_uri: Option<String>,
    state: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
}

async fn authorize(
    State(state): State<AuthState>,
    Query(params): Query<AuthorizeParams>,
) -> Result<Redirect, OAuthError> {
    match params.response_type.as_deref() {
        Some("code") => {}
        Some(other) => {
            return Err(OAuthError::UnsupportedResponseType(format!(
                "response_type '{other}' is not supported"
            )))
        }
        None => return Err(OAuthError::InvalidRequest("Missing response_type".into())),
    }
    let client_id = params
        .client_id
        .ok_or_else(|| OAuthError::InvalidRequest("Missing client_id".into()))?;

    let granted = state.store.authorize(AuthorizationRequest {
        client_id,
        redirect_uri: params.redirect_uri,
        code_challenge: params.code_challenge,
        code_challenge_method: params.code_challenge_method,
    })?;

    let mut target = url::Url::parse(&granted.redirect_uri)
        .map_err(|e| OAuthError::InvalidRequest(format!("Invalid redirect_uri: {e}")))?;
    {
        let mut query = target.query_pairs_mut();
        query.append_pair("code", &granted.code);
        if let Some(s) = &params.state {
            query.append_pair("state", s);
        }
    }
    debug!(redirect = %granted.redirect_uri, "Redirecting with authorization code");
    Ok(Redirect::to(target.as_str()))
}

#[derive(Debug, Default, Deserialize)]
struct TokenParams {
    grant_type: Option<String>,
    code: Option<String>,
    redirect_uri: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    code_verifier: Option<String>,
    refresh_token: Option<String>,
}

impl TokenParams {
    fn parse(headers: &HeaderMap, body: &[u8]) -> Result<Self, OAuthError> {
        let is_json = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        if is_json {
            return serde_json::from_slice(body)
                .map_err(|e| OAuthError::InvalidRequest(format!("Invalid JSON body: {e}")));
        }
        let fields: Map<String, Value> = url::form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        serde_json::from_value(Value::Object(fields))
            .map_err(|e| OAuthError::InvalidRequest(format!("Invalid form body: {e}")))
    }

    /// Fill client credentials from `Authorization: Basic` when the body
    /// did not carry them.
    fn with_basic_auth(mut self, headers: &HeaderMap) -> Self {
        let Some((id, secret)) = basic_credentials(headers) else {
            return self;
        };
        self.client_id.get_or_insert(id);
        self.client_secret.get_or_insert(secret);
        self
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

async fn token(
    State(state): State<AuthState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, OAuthError> {
    let params = TokenParams::parse(&headers, &body)?.with_basic_auth(&headers);

    let grant = match params.grant_type.as_deref() {
        Some("authorization_code") => {
            let code = params
                .code
                .as_deref()
                .ok_or_else(|| OAuthError::InvalidRequest("Missing code".into()))?;
            state.store.exchange_code(
                code,
                params.client_id.as_deref(),
                params.client_secret.as_deref(),
                params.redirect_uri.as_deref(),
                params.code_verifier.as_deref(),
            )?
        }
        Some("refresh_token") => {
            let refresh = params
                .refresh_token
                .as_deref()
                .ok_or_else(|| OAuthError::InvalidRequest("Missing refresh_token".into()))?;
            state.store.refresh(
                refresh,
                params.client_id.as_deref(),
                params.client_secret.as_deref(),
            )?
        }
        Some(other) => {
            return Err(OAuthError::UnsupportedGrantType(format!(
                "grant_type '{other}' is not supported"
            )))
        }
        None => return Err(OAuthError::InvalidRequest("Missing grant_type".into())),
    };

    Ok((
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
            (header::PRAGMA, HeaderValue::from_static("no-cache")),
        ],
        Json(grant),
    )
        .into_response())
}

/// Middleware guarding the MCP endpoint.
pub async fn require_bearer(
    State(state): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.require_auth || request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let auth = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let base = state.base_url(request.headers());

    match auth.and_then(|v| v.strip_prefix("Bearer ")) {
        Some(token) => match state.store.validate(token.trim()) {
            Some(client_id) => {
                debug!(%client_id, "Bearer token accepted");
                next.run(request).await
            }
            None => {
                warn!("Rejected invalid or expired bearer token");
                unauthorized(&base, "invalid_token", "Token is invalid or expired")
            }
        },
        None => {
            info!("Missing bearer token, answering with OAuth discovery challenge");
            unauthorized(&base, "invalid_token", "Missing access token")
        }
    }
}

/// 401 carrying the protected-resource metadata URL (RFC 9728).
fn unauthorized(base: &str, error: &str, description: &str) -> Response {
    let resource_metadata = format!("{base}/.well-known/oauth-protected-resource");
    let challenge = format!(
        r#"Bearer resource_metadata="{resource_metadata}", error="{error}", error_description="{description}""#
    );
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        Json(json!({
            "error": error,
            "error_description": description,
            "resource_metadata": resource_metadata,
        })),
    )
        .into_response()
}
