//! Administrative authentication.
//!
//! The shared admin secret is exchanged once for a short-lived HS256 token.
//! Tokens carry a `jti` so that they can be revoked before they expire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

const ISSUER: &str = "legion";
const ADMIN_ROLE: &str = "admin";
const KEY_DERIVATION_CONTEXT: &[u8] = b"legion-admin-token-v1";

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject.
    pub sub: String,
    /// Expiration time (Unix timestamp).
    pub exp: u64,
    /// Issued at (Unix timestamp).
    pub iat: u64,
    /// Issuer.
    pub iss: String,
    /// Token id, used for revocation.
    pub jti: String,
    /// Granted role.
    pub role: String,
}

impl Claims {
    /// Admin claims valid for `ttl` from now.
    pub fn admin(ttl: Duration) -> Self {
        let now = now_secs();
        Self {
            sub: ADMIN_ROLE.to_string(),
            exp: now + ttl.as_secs(),
            iat: now,
            iss: ISSUER.to_string(),
            jti: Uuid::new_v4().to_string(),
            role: ADMIN_ROLE.to_string(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.exp < now_secs()
    }
}

/// Issued token plus its expiry.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// Authentication service.
pub struct AuthService {
    admin_secret: Vec<u8>,
    token_ttl: Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    /// Revoked token ids with their expiry.
    revoked: RwLock<HashMap<String, u64>>,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    /// Create the service. Requires an admin secret.
    pub fn new(config: &AuthConfig) -> AppResult<Self> {
        let admin_secret = config
            .admin_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Internal("admin secret not configured".to_string()))?;

        // Every worker derives the same key, so tokens work across workers.
        let signing_secret = match config.jwt_secret.as_deref() {
            Some(secret) if !secret.is_empty() => secret.as_bytes().to_vec(),
            _ => derive_signing_key(admin_secret.as_bytes())?,
        };

        Ok(Self {
            admin_secret: admin_secret.as_bytes().to_vec(),
            token_ttl: Duration::from_secs(config.token_ttl_secs),
            encoding_key: EncodingKey::from_secret(&signing_secret),
            decoding_key: DecodingKey::from_secret(&signing_secret),
            revoked: RwLock::new(HashMap::new()),
        })
    }

    /// Exchange the shared secret for a token.
    pub fn login(&self, submitted: &str) -> AppResult<IssuedToken> {
        if !constant_time_compare(submitted.as_bytes(), &self.admin_secret) {
            warn!("Rejected admin login attempt");
            return Err(AppError::Authentication("invalid credentials".to_string()));
        }

        let claims = Claims::admin(self.token_ttl);
        let token = self.sign(&claims)?;
        Ok(IssuedToken { token, claims })
    }

    /// Sign arbitrary claims with the service key.
    pub fn sign(&self, claims: &Claims) -> AppResult<String> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to generate token: {e}")))
    }

    /// Validate a token, rejecting bad signatures, expiry and revocation.
    pub async fn validate_token(&self, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[ISSUER]);
        validation.validate_exp = true;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| AppError::Authorization(format!("Invalid token: {e}")))?
            .claims;

        if claims.is_expired() {
            return Err(AppError::Authorization("Token expired".to_string()));
        }
        if claims.role != ADMIN_ROLE {
            return Err(AppError::Authorization("Insufficient role".to_string()));
        }
        if self.revoked.read().await.contains_key(&claims.jti) {
            return Err(AppError::Authorization("Token revoked".to_string()));
        }

        Ok(claims)
    }

    /// Revoke a token until its natural expiry.
    pub async fn revoke(&self, claims: &Claims) {
        let now = now_secs();
        let mut revoked = self.revoked.write().await;
        revoked.retain(|_, exp| *exp >= now);
        revoked.insert(claims.jti.clone(), claims.exp);
    }

    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }
}

fn derive_signing_key(admin_secret: &[u8]) -> AppResult<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(admin_secret)
        .map_err(|e| AppError::Internal(format!("Failed to derive signing key: {e}")))?;
    mac.update(KEY_DERIVATION_CONTEXT);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Parse Bearer token from Authorization header.
pub fn parse_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Require a valid admin token. Missing credentials are 401, rejected ones 403.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> AppResult<Response> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_bearer_token)
        .map(str::to_string);

    let Some(token) = token else {
        debug!("No bearer token provided");
        return Err(AppError::Authentication("bearer token required".to_string()));
    };

    let claims = state.auth.validate_token(&token).await.inspect_err(|e| {
        warn!(error = %e, "Rejected bearer token");
    })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
