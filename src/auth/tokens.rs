//! Connection token verification.
//!
//! Tokens are HS256 JWTs minted by the account service and presented at the
//! WebSocket handshake, either as a `?token=` query parameter or inside the
//! `Cookie` header (`token=<value>` entry).

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried in a connection token.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User id.
    pub sub: String,
    pub username: String,
    /// Grants the monitoring group and forcible call termination.
    #[serde(default)]
    pub operator: bool,
    pub exp: i64,
}

/// Authenticated identity attached to a connection.
///
/// Derived once at handshake time from a verified token; never re-derived
/// mid-connection.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub is_operator: bool,
}

/// Verify a connection token's signature and expiry.
pub fn verify(token: &str, secret: &str) -> Result<Identity, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let key = DecodingKey::from_secret(secret.as_bytes());
    let data = jsonwebtoken::decode::<TokenClaims>(token, &key, &validation)?;

    Ok(Identity {
        user_id: data.claims.sub,
        username: data.claims.username,
        is_operator: data.claims.operator,
    })
}

/// Extract a token from a `Cookie` header value.
pub fn token_from_cookie(header: &str) -> Option<&str> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|v| !v.is_empty())
}
