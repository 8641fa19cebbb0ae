//! In-memory OAuth state
//!
//! Clients, authorization codes, access tokens and refresh tokens for one
//! server process. Created at startup, cleared at shutdown.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::OAuthError;

/// Authorization codes are single-use and short-lived.
pub const CODE_LIFETIME: Duration = Duration::from_secs(5 * 60);
/// Access tokens expire after an hour.
pub const ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);
/// Refresh tokens expire after thirty days.
pub const REFRESH_TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 24 * 60 * 60);
/// Upper bound on registered clients.
pub const MAX_CLIENTS: usize = 1000;
/// Clients holding no live code or token are forgotten after a day.
pub const CLIENT_IDLE_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// A dynamically registered client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredClient {
    /// `claude_<16 hex>`
    pub client_id: String,
    /// Random 64-hex secret
    pub client_secret: String,
    /// Unix seconds
    pub client_id_issued_at: i64,
    /// Redirect URIs the client may use
    pub redirect_uris: Vec<String>,
    /// Optional display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

/// Parameters of an authorization request
#[derive(Debug, Clone, Default)]
pub struct AuthorizationRequest {
    /// Requesting client
    pub client_id: String,
    /// Where to send the code
    pub redirect_uri: Option<String>,
    /// PKCE challenge
    pub code_challenge: Option<String>,
    /// `S256` (default) or `plain`
    pub code_challenge_method: Option<String>,
}

/// A granted authorization: the code and where to deliver it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Single-use code
    pub code: String,
    /// Validated redirect URI
    pub redirect_uri: String,
}

/// Successful token endpoint response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenGrant {
    /// Bearer token for `/mcp`
    pub access_token: String,
    /// Always `Bearer`
    pub token_type: &'static str,
    /// Seconds until `access_token` expires
    pub expires_in: u64,
    /// Single-use refresh token
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
struct PendingCode {
    client_id: String,
    redirect_uri: String,
    challenge: Option<(String, String)>,
    expires: Instant,
}

#[derive(Debug, Clone)]
struct IssuedToken {
    client_id: String,
    expires: Instant,
}

#[derive(Debug, Clone)]
struct StoredClient {
    client: RegisteredClient,
    registered: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    clients: HashMap<String, StoredClient>,
    codes: HashMap<String, PendingCode>,
    access_tokens: HashMap<String, IssuedToken>,
    refresh_tokens: HashMap<String, IssuedToken>,
}

impl Inner {
    fn drop_expired(&mut self, now: Instant) {
        self.codes.retain(|_, c| c.expires > now);
        self.access_tokens.retain(|_, t| t.expires > now);
        self.refresh_tokens.retain(|_, t| t.expires > now);
    }

    /// Forget clients older than `idle` that hold no code or token.
    fn drop_idle_clients(&mut self, idle: Duration, now: Instant) -> usize {
        let active: HashSet<String> = self
            .codes
            .values()
            .map(|c| c.client_id.clone())
            .chain(self.access_tokens.values().map(|t| t.client_id.clone()))
            .chain(self.refresh_tokens.values().map(|t| t.client_id.clone()))
            .collect();
        let before = self.clients.len();
        self.clients
            .retain(|id, c| active.contains(id) || now.duration_since(c.registered) < idle);
        before - self.clients.len()
    }
}

/// Shared OAuth state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuthStore {
    inner: Arc<Mutex<Inner>>,
    code_lifetime: Duration,
    token_lifetime: Duration,
    refresh_lifetime: Duration,
    max_clients: usize,
    client_idle_lifetime: Duration,
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthStore {
    /// Store with the standard lifetimes
    #[must_use]
    pub fn new() -> Self {
        Self::with_lifetimes(CODE_LIFETIME, ACCESS_TOKEN_LIFETIME)
    }

    /// Store with custom code and access-token lifetimes
    #[must_use]
    pub fn with_lifetimes(code_lifetime: Duration, token_lifetime: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            code_lifetime,
            token_lifetime,
            refresh_lifetime: REFRESH_TOKEN_LIFETIME,
            max_clients: MAX_CLIENTS,
            client_idle_lifetime: CLIENT_IDLE_LIFETIME,
        }
    }

    /// Override the refresh-token lifetime
    #[must_use]
    pub fn with_refresh_lifetime(mut self, lifetime: Duration) -> Self {
        self.refresh_lifetime = lifetime;
        self
    }

    /// Override the client cap and the idle period after which unused
    /// clients are forgotten
    #[must_use]
    pub fn with_client_limits(mut self, max_clients: usize, idle: Duration) -> Self {
        self.max_clients = max_clients;
        self.client_idle_lifetime = idle;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State stays consistent even if a holder panicked mid-request
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a client (RFC 7591).
    ///
    /// When the client table is full, expired and idle entries are purged
    /// first; if it is still full the registration is refused.
    pub fn register(
        &self,
        redirect_uris: Vec<String>,
        client_name: Option<String>,
    ) -> Result<RegisteredClient, OAuthError> {
        let mut inner = self.lock();
        if inner.clients.len() >= self.max_clients {
            let now = Instant::now();
            inner.drop_expired(now);
            inner.drop_idle_clients(self.client_idle_lifetime, now);
            if inner.clients.len() >= self.max_clients {
                warn!(max = self.max_clients, "Client table full, refusing registration");
                return Err(OAuthError::TemporarilyUnavailable(
                    "Too many registered clients".into(),
                ));
            }
        }

        let client = RegisteredClient {
            client_id: format!("claude_{}", random_hex(8)),
            client_secret: random_hex(32),
            client_id_issued_at: chrono::Utc::now().timestamp(),
            redirect_uris,
            client_name,
        };
        info!(client_id = %client.client_id, "Registered OAuth client");
        inner.clients.insert(
            client.client_id.clone(),
            StoredClient {
                client: client.clone(),
                registered: Instant::now(),
            },
        );
        Ok(client)
    }

    /// Look up a registered client.
    #[must_use]
    pub fn client(&self, client_id: &str) -> Option<RegisteredClient> {
        self.lock().clients.get(client_id).map(|c| c.client.clone())
    }

    /// Issue an authorization code.
    ///
    /// The client must be registered. When it registered redirect URIs, the
    /// requested one must be among them (or omitted, if there is exactly one).
    pub fn authorize(&self, request: AuthorizationRequest) -> Result<Authorization, OAuthError> {
        let mut inner = self.lock();
        let client = inner
            .clients
            .get(&request.client_id)
            .map(|c| &c.client)
            .ok_or_else(|| OAuthError::InvalidClient(format!("Unknown client '{}'", request.client_id)))?;

        let redirect_uri = match (request.redirect_uri, client.redirect_uris.as_slice()) {
            (Some(uri), []) => uri,
            (Some(uri), allowed) if allowed.contains(&uri) => uri,
            (Some(uri), _) => {
                return Err(OAuthError::InvalidRequest(format!(
                    "redirect_uri '{uri}' is not registered for this client"
                )))
            }
            (None, [only]) => only.clone(),
            (None, _) => {
                return Err(OAuthError::InvalidRequest("redirect_uri is required".into()))
            }
        };
        url::Url::parse(&redirect_uri)
            .map_err(|e| OAuthError::InvalidRequest(format!("Invalid redirect_uri: {e}")))?;

        let challenge = match request.code_challenge {
            Some(challenge) => {
                let method = request
                    .code_challenge_method
                    .unwrap_or_else(|| "S256".to_string());
                if method != "S256" && method != "plain" {
                    return Err(OAuthError::InvalidRequest(format!(
                        "Unsupported code_challenge_method '{method}'"
                    )));
                }
                Some((challenge, method))
            }
            None => None,
        };

        let code = random_hex(16);
        inner.codes.insert(
            code.clone(),
            PendingCode {
                client_id: request.client_id,
                redirect_uri: redirect_uri.clone(),
                challenge,
                expires: Instant::now() + self.code_lifetime,
            },
        );
        debug!("Issued authorization code");
        Ok(Authorization { code, redirect_uri })
    }

    /// Exchange an authorization code for tokens.
    ///
    /// Codes are consumed by the first attempt, successful or not.
    pub fn exchange_code(
        &self,
        code: &str,
        client_id: Option<&str>,
        client_secret: Option<&str>,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> Result<TokenGrant, OAuthError> {
        let mut inner = self.lock();
        let pending = inner
            .codes
            .remove(code)
            .ok_or_else(|| OAuthError::InvalidGrant("Unknown or already used authorization code".into()))?;

        if pending.expires <= Instant::now() {
            return Err(OAuthError::InvalidGrant("Authorization code expired".into()));
        }
        if client_id.is_some_and(|id| id != pending.client_id) {
            return Err(OAuthError::InvalidGrant(
                "Authorization code was issued to another client".into(),
            ));
        }
        if redirect_uri.is_some_and(|uri| uri != pending.redirect_uri) {
            return Err(OAuthError::InvalidGrant("redirect_uri does not match".into()));
        }
        check_secret(&inner, &pending.client_id, client_secret)?;

        if let Some((challenge, method)) = &pending.challenge {
            let verifier = code_verifier
                .ok_or_else(|| OAuthError::InvalidRequest("Missing code_verifier".into()))?;
            if !verify_pkce(verifier, challenge, method) {
                return Err(OAuthError::InvalidGrant("PKCE verification failed".into()));
            }
        }

        info!(client_id = %pending.client_id, "Issued access token");
        Ok(self.issue(&mut inner, pending.client_id))
    }

    /// Exchange a refresh token for a new token pair. The old refresh token
    /// is revoked.
    pub fn refresh(
        &self,
        refresh_token: &str,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> Result<TokenGrant, OAuthError> {
        let mut inner = self.lock();
        let token = inner
            .refresh_tokens
            .get(refresh_token)
            .cloned()
            .ok_or_else(|| OAuthError::InvalidGrant("Unknown refresh token".into()))?;
        if token.expires <= Instant::now() {
            inner.refresh_tokens.remove(refresh_token);
            return Err(OAuthError::InvalidGrant("Refresh token expired".into()));
        }
        let owner = token.client_id;

        if client_id.is_some_and(|id| id != owner) {
            return Err(OAuthError::InvalidGrant(
                "Refresh token was issued to another client".into(),
            ));
        }
        check_secret(&inner, &owner, client_secret)?;

        inner.refresh_tokens.remove(refresh_token);
        info!(client_id = %owner, "Refreshed access token");
        Ok(self.issue(&mut inner, owner))
    }

    fn issue(&self, inner: &mut Inner, client_id: String) -> TokenGrant {
        let access_token = random_hex(32);
        let refresh_token = random_hex(32);
        inner.access_tokens.insert(
            access_token.clone(),
            IssuedToken {
                client_id: client_id.clone(),
                expires: Instant::now() + self.token_lifetime,
            },
        );
        inner.refresh_tokens.insert(
            refresh_token.clone(),
            IssuedToken {
                client_id,
                expires: Instant::now() + self.refresh_lifetime,
            },
        );
        TokenGrant {
            access_token,
            token_type: "Bearer",
            expires_in: self.token_lifetime.as_secs(),
            refresh_token,
        }
    }

    /// Client id owning a live access token. Expired tokens are dropped.
    #[must_use]
    pub fn validate(&self, access_token: &str) -> Option<String> {
        let mut inner = self.lock();
        let token = inner.access_tokens.get(access_token)?;
        if token.expires <= Instant::now() {
            inner.access_tokens.remove(access_token);
            return None;
        }
        Some(token.client_id.clone())
    }

    /// Drop expired codes and tokens, then clients left idle.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.drop_expired(now);
        let dropped = inner.drop_idle_clients(self.client_idle_lifetime, now);
        if dropped > 0 {
            debug!(dropped, "Forgot idle OAuth clients");
        }
    }

    /// Number of registered clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    /// Forget everything.
    pub fn clear(&self) {
        let mut inner = self.lock();
        *inner = Inner::default();
        debug!("Cleared OAuth state");
    }
}

fn check_secret(inner: &Inner, client_id: &str, secret: Option<&str>) -> Result<(), OAuthError> {
    let Some(secret) = secret else {
        return Ok(());
    };
    match inner.clients.get(client_id) {
        Some(stored) if stored.client.client_secret == secret => Ok(()),
        Some(_) => Err(OAuthError::InvalidClient("Client authentication failed".into())),
        None => Err(OAuthError::InvalidClient(format!("Unknown client '{client_id}'"))),
    }
}

/// Check a PKCE verifier against its challenge (RFC 7636).
#[must_use]
pub fn verify_pkce(verifier: &str, challenge: &str, method: &str) -> bool {
    match method {
        "plain" => verifier == challenge,
        _ => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())) == challenge,
    }
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
