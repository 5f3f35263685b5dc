//! Tenant authentication.
//!
//! The tenant of a call is taken from a signed bearer token, never from the
//! request body.
//!
//! ## Token Format
//!
//! Tokens are composed of:
//! - 16 bytes: tenant id
//! - 16 bytes: user id
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature over the first 40 bytes
//!
//! Total: 72 bytes, URL-safe base64 (no padding) for transport.

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use farmsync_core::TenantId;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const CLAIMS_LEN: usize = 40;
const TOKEN_LEN: usize = CLAIMS_LEN + 32;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    #[must_use]
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Identity carried by a verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenClaims {
    /// Tenant the caller acts for.
    pub tenant: TenantId,
    /// User that was issued the token.
    pub user: Uuid,
    /// Issue time in Unix milliseconds.
    pub issued_at: u64,
}

/// Issues and verifies tenant tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("token_expiry", &self.config.token_expiry)
            .finish_non_exhaustive()
    }
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a token for `user` acting on `tenant`, valid from now.
    pub fn create_token(&self, tenant: TenantId, user: Uuid) -> ServerResult<String> {
        self.create_token_at(tenant, user, now_millis())
    }

    /// Issues a token with an explicit issue time.
    pub fn create_token_at(
        &self,
        tenant: TenantId,
        user: Uuid,
        issued_at: u64,
    ) -> ServerResult<String> {
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(tenant.as_uuid().as_bytes());
        token.extend_from_slice(user.as_bytes());
        token.extend_from_slice(&issued_at.to_be_bytes());

        let signature = self.mac(&token)?.finalize().into_bytes();
        token.extend_from_slice(&signature);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Verifies a token and returns its claims.
    pub fn validate_token(&self, token: &str) -> ServerResult<TokenClaims> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| rejected("malformed token"))?;
        if bytes.len() != TOKEN_LEN {
            return Err(rejected("invalid token length"));
        }

        let (claims, signature) = bytes.split_at(CLAIMS_LEN);
        self.mac(claims)?
            .verify_slice(signature)
            .map_err(|_| rejected("invalid signature"))?;

        let tenant = Uuid::from_slice(&claims[0..16]).map_err(|_| rejected("invalid tenant"))?;
        let user = Uuid::from_slice(&claims[16..32]).map_err(|_| rejected("invalid user"))?;
        let issued_at = claims[32..CLAIMS_LEN]
            .try_into()
            .map(u64::from_be_bytes)
            .map_err(|_| rejected("invalid issue time"))?;

        let expiry_millis = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        if now_millis() > issued_at.saturating_add(expiry_millis) {
            return Err(rejected("token expired"));
        }

        Ok(TokenClaims {
            tenant: TenantId::new(tenant),
            user,
            issued_at,
        })
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

fn rejected(reason: &str) -> ServerError {
    ServerError::AuthenticationFailed(reason.into())
}

fn now_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}
