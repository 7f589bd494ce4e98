//! Signed access credentials
//!
//! Tokens are HS256 JWTs carrying the client identity, issue time, expiry and
//! a per-issuance token id. The deployed workload verifies them with the same
//! secret it receives as `JWT_SECRET`.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Default credential lifetime
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Longest credential lifetime accepted (one year)
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub client_id: String,
    /// Issued-at, seconds since epoch
    pub iat: i64,
    /// Expiry, seconds since epoch
    pub exp: i64,
    /// Unique token id
    pub jti: String,
}

/// A freshly minted token together with its claims
#[derive(Debug, Clone)]
pub struct AccessCredential {
    pub token: String,
    pub claims: AccessClaims,
}

impl AccessCredential {
    pub fn issued_at(&self) -> DateTime<Utc> {
        timestamp(self.claims.iat)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp(self.claims.exp)
    }
}

/// Why a token was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenRejection {
    #[error("token issued for a different client")]
    ClientMismatch,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("token is malformed: {0}")]
    Malformed(String),
}

/// Mints and checks access tokens for one signing secret
#[derive(Clone)]
pub struct CredentialIssuer {
    secret: String,
    ttl: Duration,
}

impl fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl CredentialIssuer {
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(Error::invalid_argument("signing secret must not be empty"));
        }
        if ttl.as_secs() == 0 {
            return Err(Error::invalid_argument(
                "token ttl must be at least one second",
            ));
        }
        if ttl > MAX_TOKEN_TTL {
            return Err(Error::invalid_argument(format!(
                "token ttl must not exceed {} seconds",
                MAX_TOKEN_TTL.as_secs()
            )));
        }

        Ok(Self { secret, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `client_id`, valid from now for the configured ttl
    pub fn issue(&self, client_id: &str) -> Result<AccessCredential> {
        self.issue_at(client_id, Utc::now())
    }

    /// Issue a token with an explicit issue time
    pub fn issue_at(&self, client_id: &str, issued_at: DateTime<Utc>) -> Result<AccessCredential> {
        if client_id.trim().is_empty() {
            return Err(Error::invalid_argument("client_id must not be empty"));
        }

        let iat = issued_at.timestamp();
        let exp = i64::try_from(self.ttl.as_secs())
            .ok()
            .and_then(|ttl| iat.checked_add(ttl))
            .ok_or_else(|| Error::invalid_argument("token expiry out of range"))?;
        let claims = AccessClaims {
            client_id: client_id.to_string(),
            iat,
            exp,
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| Error::invalid_argument(format!("failed to sign token: {}", e)))?;

        Ok(AccessCredential { token, claims })
    }

    /// Check signature, expiry and client binding of `token`
    pub fn verify(
        &self,
        token: &str,
        expected_client_id: &str,
    ) -> std::result::Result<AccessClaims, TokenRejection> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => TokenRejection::InvalidSignature,
            ErrorKind::ExpiredSignature => TokenRejection::Expired,
            _ => TokenRejection::Malformed(e.to_string()),
        })?;

        if data.claims.client_id != expected_client_id {
            return Err(TokenRejection::ClientMismatch);
        }

        Ok(data.claims)
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}
