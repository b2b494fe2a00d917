use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::users::Role;

pub const ISSUER: &str = "travel-cms";
pub const AUDIENCE: &str = "travel-cms-dashboard";

/// What an access token asserts about its bearer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPayload {
    pub user_id: i32,
    pub email: String,
    pub role: Role,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPayload {
    pub user_id: i32,
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    email: String,
    role: Role,
    sid: String,
    iss: String,
    aud: String,
    iat: i64,
    exp: i64,
    jti: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RefreshClaims {
    sub: String,
    sid: String,
    iss: String,
    aud: String,
    iat: i64,
    exp: i64,
    jti: String,
}

/// Signs and verifies access and refresh tokens.
///
/// The two token kinds use different secrets, so a refresh token can never be
/// presented as an access token (and the reverse).
#[derive(Clone)]
pub struct TokenCodec {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        // An expired token is expired, no grace period
        validation.leeway = 0;

        TokenCodec {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
            validation,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn generate_access_token(
        &self,
        payload: &AccessPayload,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: payload.user_id.to_string(),
            email: payload.email.clone(),
            role: payload.role,
            sid: payload.session_id.clone(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding)
    }

    pub fn generate_refresh_token(
        &self,
        payload: &RefreshPayload,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = RefreshClaims {
            sub: payload.user_id.to_string(),
            sid: payload.session_id.clone(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            iat: now.timestamp(),
            exp: (now + self.refresh_ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_encoding)
    }

    /// Returns the payload only if signature, issuer, audience and expiry all
    /// check out. Every failure collapses to `None`.
    pub fn verify_access_token(&self, token: &str) -> Option<AccessPayload> {
        let data = decode::<AccessClaims>(token, &self.access_decoding, &self.validation).ok()?;
        let claims = data.claims;

        Some(AccessPayload {
            user_id: claims.sub.parse().ok()?,
            email: claims.email,
            role: claims.role,
            session_id: claims.sid,
        })
    }

    pub fn verify_refresh_token(&self, token: &str) -> Option<RefreshPayload> {
        let data = decode::<RefreshClaims>(token, &self.refresh_decoding, &self.validation).ok()?;

        Some(RefreshPayload {
            user_id: data.claims.sub.parse().ok()?,
            session_id: data.claims.sid,
        })
    }
}
