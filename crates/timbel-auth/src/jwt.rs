//! HS256 bearer tokens.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Audience stamped into every token.
pub const AUDIENCE: &str = "timbel-api";

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Token expired")]
    Expired,
}

/// Identity carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Claims {
    pub fn builder(issuer: impl Into<String>, subject: impl Into<String>) -> ClaimsBuilder {
        ClaimsBuilder::new(issuer, subject)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

pub struct ClaimsBuilder {
    issuer: String,
    subject: String,
    ttl: Duration,
    name: Option<String>,
}

impl ClaimsBuilder {
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            subject: subject.into(),
            ttl: Duration::hours(12),
            name: None,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn build(self) -> Claims {
        let now = Utc::now();
        Claims {
            iss: self.issuer,
            sub: self.subject,
            aud: AUDIENCE.to_string(),
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            name: self.name,
        }
    }
}

fn require_secret(secret: &[u8]) -> Result<(), JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidKey("secret must not be empty".to_string()));
    }
    Ok(())
}

/// Signs development and service tokens.
pub struct TokenSigner {
    encoding_key: EncodingKey,
}

impl TokenSigner {
    pub fn hs256(secret: &[u8]) -> Result<Self, JwtError> {
        require_secret(secret)?;
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
        })
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, JwtError> {
        let token = encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)?;
        Ok(token)
    }
}

/// Validates bearer tokens presented to the API.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn hs256(secret: &[u8], issuer: &str) -> Result<Self, JwtError> {
        require_secret(secret)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[AUDIENCE]);

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        })
    }

    /// Verify signature, issuer, audience and expiry.
    pub fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => Err(JwtError::Expired),
            Err(e) => {
                debug!(error = %e, "Rejected bearer token");
                Err(JwtError::Jwt(e))
            }
        }
    }
}

/// Token handed out by `timbel token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenResponse {
    pub fn new(token: String, claims: &Claims) -> Self {
        Self {
            token,
            token_type: "Bearer".to_string(),
            expires_at: claims.expires_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SECRET: &[u8] = b"test-secret-with-enough-entropy";
    const ISSUER: &str = "https://timbel.test";

    #[test]
    fn test_sign_and_verify() {
        let claims = Claims::builder(ISSUER, "alice").name("Alice").build();
        let token = TokenSigner::hs256(SECRET).unwrap().sign(&claims).unwrap();

        let verified = TokenVerifier::hs256(SECRET, ISSUER)
            .unwrap()
            .verify(&token)
            .unwrap();
        assert_eq!(verified, claims);
        assert!(verified.exp > verified.iat);
    }

    #[test]
    fn test_expired_token() {
        let claims = Claims::builder(ISSUER, "alice")
            .ttl(Duration::minutes(-10))
            .build();
        let token = TokenSigner::hs256(SECRET).unwrap().sign(&claims).unwrap();

        let err = TokenVerifier::hs256(SECRET, ISSUER)
            .unwrap()
            .verify(&token)
            .unwrap_err();
        assert!(matches!(err, JwtError::Expired));
    }

    #[test]
    fn test_wrong_secret_or_issuer() {
        let claims = Claims::builder(ISSUER, "alice").build();
        let token = TokenSigner::hs256(SECRET).unwrap().sign(&claims).unwrap();

        assert!(
            TokenVerifier::hs256(b"another-secret", ISSUER)
                .unwrap()
                .verify(&token)
                .is_err()
        );
        assert!(
            TokenVerifier::hs256(SECRET, "https://elsewhere")
                .unwrap()
                .verify(&token)
                .is_err()
        );
        assert!(TokenVerifier::hs256(SECRET, ISSUER).unwrap().verify("garbage").is_err());
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            TokenSigner::hs256(b""),
            Err(JwtError::InvalidKey(_))
        ));
    }
}
