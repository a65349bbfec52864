use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TokenSettings;

pub const ADMIN_ROLE: &str = "Admin";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub role: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies HS256 admin tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    lifetime: Duration,
}

impl TokenIssuer {
    pub fn new(settings: &TokenSettings) -> Self {
        Self {
            encoding: EncodingKey::from_secret(settings.secret.as_bytes()),
            decoding: DecodingKey::from_secret(settings.secret.as_bytes()),
            issuer: settings.issuer.clone(),
            audience: settings.audience.clone(),
            lifetime: Duration::minutes(settings.expiry_minutes),
        }
    }

    pub fn issue(&self, admin_id: Uuid, username: &str, now: DateTime<Utc>) -> Result<IssuedToken> {
        let expires_at = now + self.lifetime;
        let claims = Claims {
            sub: admin_id,
            name: username.to_string(),
            role: ADMIN_ROLE.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("failed to sign admin token")?;

        Ok(IssuedToken { token, expires_at })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        decode::<Claims>(token, &self.decoding, &validation).map(|data| data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(secret: &str) -> TokenSettings {
        TokenSettings {
            secret: secret.to_string(),
            issuer: "society-cms".to_string(),
            audience: "society-cms".to_string(),
            expiry_minutes: 60,
        }
    }

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn issued_token_embeds_admin_and_expiry() {
        let issuer = TokenIssuer::new(&settings(SECRET));
        let admin_id = Uuid::new_v4();
        let now = Utc::now();

        let issued = issuer.issue(admin_id, "admin", now).expect("issue");
        assert_eq!(issued.expires_at, now + Duration::minutes(60));

        let claims = issuer.verify(&issued.token).expect("verify");
        assert_eq!(claims.sub, admin_id);
        assert_eq!(claims.name, "admin");
        assert_eq!(claims.role, ADMIN_ROLE);
        assert_eq!(claims.exp, (now + Duration::minutes(60)).timestamp());
        assert_eq!(claims.iat, now.timestamp());
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let issuer = TokenIssuer::new(&settings(SECRET));
        let other = TokenIssuer::new(&settings("fedcba9876543210fedcba9876543210"));
        let issued = other
            .issue(Uuid::new_v4(), "admin", Utc::now())
            .expect("issue");
        assert!(issuer.verify(&issued.token).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let issuer = TokenIssuer::new(&settings(SECRET));
        let issued = issuer
            .issue(Uuid::new_v4(), "admin", Utc::now() - Duration::hours(3))
            .expect("issue");
        assert!(issuer.verify(&issued.token).is_err());
    }

    #[test]
    fn audience_mismatch_is_rejected() {
        let issuer = TokenIssuer::new(&settings(SECRET));
        let mut foreign = settings(SECRET);
        foreign.audience = "someone-else".to_string();
        let issued = TokenIssuer::new(&foreign)
            .issue(Uuid::new_v4(), "admin", Utc::now())
            .expect("issue");
        assert!(issuer.verify(&issued.token).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        let issuer = TokenIssuer::new(&settings(SECRET));
        assert!(issuer.verify("not-a-jwt").is_err());
    }
}
