//! Access and refresh token issuing

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};

use crate::{
    config::AuthConfig,
    error::AuthError,
    models::user::{AccessClaims, User},
};

/// Random bytes behind every refresh token
const REFRESH_TOKEN_BYTES: usize = 32;

/// Mints and verifies HS256 access tokens and opaque refresh tokens.
///
/// The secret is read once from [`AuthConfig`]; every clone shares it.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        if config.jwt_secret.is_empty() {
            return Err(AuthError::Configuration("auth.jwt_secret is not set".to_string()));
        }
        if config.access_token_ttl_secs <= 0 {
            return Err(AuthError::Configuration(format!(
                "auth.access_token_ttl_secs must be positive, got {}",
                config.access_token_ttl_secs
            )));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            ttl_secs: config.access_token_ttl_secs,
        })
    }

    pub fn issue_access_token(&self, user: &User) -> Result<String, AuthError> {
        self.issue_access_token_at(user, Utc::now())
    }

    /// Issue a token as if it had been minted at `issued_at`
    pub fn issue_access_token_at(
        &self,
        user: &User,
        issued_at: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let iat = issued_at.timestamp();
        let claims = AccessClaims {
            sub: user.id.to_string(),
            role: user.role,
            mailing: user.mailing,
            iat,
            exp: iat + self.ttl_secs,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Configuration(format!("Failed to sign access token: {}", e)))
    }

    /// Verify signature and expiry. The claims are not checked against the store.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        decode::<AccessClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    /// A fresh opaque refresh token, 256 bits from the OS RNG
    pub fn issue_refresh_token(&self) -> String {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;
    use chrono::Duration;

    fn config(secret: &str) -> AuthConfig {
        AuthConfig {
            jwt_secret: secret.to_string(),
            access_token_ttl_secs: 60,
            ..AuthConfig::default()
        }
    }

    fn user() -> User {
        User {
            id: 12,
            name: "Anna".into(),
            email: "anna@example.com".into(),
            password: String::new(),
            role: Role::Admin,
            mailing: true,
            refresh_token: None,
            refresh_token_expires_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn validated_claims_match_what_was_issued() {
        let issuer = TokenIssuer::new(&config("secret")).unwrap();
        let now = Utc::now();
        let token = issuer.issue_access_token_at(&user(), now).unwrap();

        let claims = issuer.validate_access_token(&token).unwrap();
        assert_eq!(
            claims,
            AccessClaims {
                sub: "12".into(),
                role: Role::Admin,
                mailing: true,
                iat: now.timestamp(),
                exp: now.timestamp() + 60,
            }
        );
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let issuer = TokenIssuer::new(&config("secret")).unwrap();
        let token = issuer
            .issue_access_token_at(&user(), Utc::now() - Duration::seconds(120))
            .unwrap();
        assert!(matches!(
            issuer.validate_access_token(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn tokens_from_another_secret_or_tampered_are_rejected() {
        let ours = TokenIssuer::new(&config("secret")).unwrap();
        let theirs = TokenIssuer::new(&config("other")).unwrap();
        let token = theirs.issue_access_token(&user()).unwrap();
        assert!(ours.validate_access_token(&token).is_err());

        let mut tampered = ours.issue_access_token(&user()).unwrap();
        tampered.push('x');
        assert!(ours.validate_access_token(&tampered).is_err());
        assert!(ours.validate_access_token("not.a.jwt").is_err());
    }

    #[test]
    fn missing_secret_or_ttl_is_a_configuration_error() {
        assert!(matches!(
            TokenIssuer::new(&config("")),
            Err(AuthError::Configuration(_))
        ));

        let mut zero_ttl = config("secret");
        zero_ttl.access_token_ttl_secs = 0;
        assert!(matches!(
            TokenIssuer::new(&zero_ttl),
            Err(AuthError::Configuration(_))
        ));
    }

    #[test]
    fn refresh_tokens_are_unique_and_url_safe() {
        let issuer = TokenIssuer::new(&config("secret")).unwrap();
        let a = issuer.issue_refresh_token();
        let b = issuer.issue_refresh_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
