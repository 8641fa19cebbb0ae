//! OAuth 2.1 authorization for the HTTP transport
//!
//! Discovery (RFC 8414 / RFC 9728), dynamic client registration (RFC 7591),
//! authorization code grant with optional PKCE, refresh rotation, and a
//! bearer gate for the MCP endpoint. All state is in memory.

pub mod error;
pub mod handlers;
pub mod store;

pub use error::OAuthError;
pub use handlers::{require_bearer, request_base_url, routes, AuthState, AuthorizationServerMetadata};
pub use store::{AuthStore, RegisteredClient, TokenGrant};
