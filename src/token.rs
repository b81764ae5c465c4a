//! Stateless bearer token issuance.
//!
//! Tokens are HS256 JWTs signed with the configured secret and valid for
//! one hour from issuance. There is no revocation list: a token stays
//! valid until its natural expiry.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::ConfigurationError;

/// Lifetime of every issued token.
pub const TOKEN_LIFETIME_SECS: i64 = 3600;

/// Role assigned when the caller does not name one.
pub const DEFAULT_ROLE: &str = "User";

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("Token expired")]
    Expired,
    #[error("Token invalid: {0}")]
    Invalid(String),
    #[error("Token encoding failed: {0}")]
    Encoding(String),
}

/// Claims carried by an issued token. Immutable once signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub subject: String,
    pub username: String,
    pub role: String,
    pub issued_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

/// JWT payload as it appears on the wire.
#[derive(Debug, Serialize, Deserialize)]
struct WireClaims {
    sub: String,
    name: String,
    role: String,
    iat: i64,
    exp: i64,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer").finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Build an issuer. An empty secret is a fatal configuration error.
    pub fn new(secret: &str) -> Result<Self, ConfigurationError> {
        if secret.is_empty() {
            return Err(ConfigurationError::MissingSigningSecret);
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }

    /// Issue a token for `subject`/`username`. `role` defaults to `"User"`.
    pub fn issue(
        &self,
        subject: &str,
        username: &str,
        role: Option<&str>,
    ) -> Result<String, TokenError> {
        self.issue_at(subject, username, role, Utc::now())
    }

    pub fn issue_at(
        &self,
        subject: &str,
        username: &str,
        role: Option<&str>,
        issued_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = WireClaims {
            sub: subject.to_string(),
            name: username.to_string(),
            role: role.unwrap_or(DEFAULT_ROLE).to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + token_lifetime()).timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Verify signature and expiry against the current time.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify signature and expiry against `now`. A token is rejected at
    /// or after its `exp` second.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against the supplied clock, with no leeway.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = jsonwebtoken::decode::<WireClaims>(token, &self.decoding, &validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        let claims = data.claims;

        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        let issued_at = DateTime::from_timestamp(claims.iat, 0)
            .ok_or_else(|| TokenError::Invalid("iat out of range".into()))?;
        let expiry = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| TokenError::Invalid("exp out of range".into()))?;

        Ok(TokenClaims {
            subject: claims.sub,
            username: claims.name,
            role: claims.role,
            issued_at,
            expiry,
        })
    }
}

/// One-shot issuance with an explicit secret.
pub fn generate(
    secret: &str,
    subject: &str,
    username: &str,
    role: Option<&str>,
) -> Result<String, TokenError> {
    TokenIssuer::new(secret)?.issue(subject, username, role)
}

fn token_lifetime() -> Duration {
    Duration::seconds(TOKEN_LIFETIME_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new("unit-test-signing-secret").unwrap()
    }

    #[test]
    fn empty_secret_is_configuration_error() {
        assert_eq!(
            TokenIssuer::new("").unwrap_err(),
            ConfigurationError::MissingSigningSecret
        );
        assert!(matches!(
            generate("", "1", "alice", None),
            Err(TokenError::Configuration(ConfigurationError::MissingSigningSecret))
        ));
    }

    #[test]
    fn token_has_three_parts() {
        let token = generate("secret", "1", "alice", None).unwrap();
        assert_eq!(token.split('.').count(), 3);
    }

    #[test]
    fn round_trip_carries_claims_and_default_role() {
        let issuer = issuer();
        let now = Utc::now();
        let token = issuer.issue_at("42", "alice", None, now).unwrap();
        let claims = issuer.verify_at(&token, now).unwrap();

        assert_eq!(claims.subject, "42");
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.role, DEFAULT_ROLE);
        assert_eq!(claims.issued_at.timestamp(), now.timestamp());
        assert_eq!(claims.expiry - claims.issued_at, token_lifetime());
    }

    #[test]
    fn explicit_role_is_kept() {
        let issuer = issuer();
        let token = issuer.issue("7", "root", Some("Admin")).unwrap();
        assert_eq!(issuer.verify(&token).unwrap().role, "Admin");
    }

    #[test]
    fn valid_until_expiry_then_rejected() {
        let issuer = issuer();
        let issued = Utc::now();
        let token = issuer.issue_at("1", "alice", None, issued).unwrap();

        let just_before = issued + Duration::seconds(TOKEN_LIFETIME_SECS - 1);
        assert!(issuer.verify_at(&token, just_before).is_ok());

        let at_expiry = issued + token_lifetime();
        assert!(matches!(
            issuer.verify_at(&token, at_expiry),
            Err(TokenError::Expired)
        ));
        assert!(matches!(
            issuer.verify_at(&token, at_expiry + Duration::minutes(5)),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issuer().issue("1", "alice", None).unwrap();
        let other = TokenIssuer::new("a-different-secret").unwrap();
        assert!(matches!(other.verify(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let issuer = issuer();
        let token = issuer.issue("1", "alice", None).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = issuer.issue("1", "mallory", Some("Admin")).unwrap();
        let forged_payload = forged.split('.').nth(1).unwrap().to_string();
        parts[1] = &forged_payload;
        let spliced = parts.join(".");
        // Same signer, but the signature belongs to a different payload
        assert!(issuer.verify(&spliced).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            issuer().verify("not-a-token"),
            Err(TokenError::Invalid(_))
        ));
    }
}
