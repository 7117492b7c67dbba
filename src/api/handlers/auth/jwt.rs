//! Access token signing and verification.
//!
//! Access tokens are short-lived HS256 JWTs carrying identity and role claims.
//! They are pure functions of the user row at issuance time and are not
//! re-checked against live state until the next refresh; a user disabled
//! mid-session keeps a working access token until its expiry, but cannot
//! refresh.

use anyhow::{Context, Result};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub roles: Vec<String>,
    pub default_role: String,
    pub is_anonymous: bool,
}

/// HMAC keys derived once from the configured signing secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    #[must_use]
    pub fn from_secret(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
        }
    }

    /// Sign an access token for the given user and roles.
    ///
    /// # Errors
    /// Returns an error if JWT encoding fails.
    pub fn sign(
        &self,
        user_id: Uuid,
        roles: Vec<String>,
        default_role: String,
        is_anonymous: bool,
        ttl_seconds: i64,
    ) -> Result<(String, i64)> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + ttl_seconds,
            roles,
            default_role,
            is_anonymous,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("failed to sign access token")?;
        Ok((token, ttl_seconds))
    }

    /// Verify an access token and return its claims.
    ///
    /// # Errors
    /// Returns an error if the signature is invalid or the token is expired.
    pub fn verify(&self, token: &str) -> Result<AccessTokenClaims> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<AccessTokenClaims>(token, &self.decoding, &validation)
            .context("failed to verify access token")?;
        Ok(data.claims)
    }
}
