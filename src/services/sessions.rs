//! Session lifecycle: login sessions, transparent refresh and role checks.
//!
//! A protected request goes through [`SessionService::authenticate`]:
//!
//! 1. the access token is classified by [`classify_access`]; a valid token is
//!    used as is,
//! 2. a missing, malformed or expired token falls through to
//!    [`SessionService::refresh`], which rotates the refresh token with a
//!    compare-and-swap and mints a new access token from the stored user.
//!
//! Refresh failures are checked in order: no cookie, unknown token, expired
//! token. Losing a concurrent rotation is reported as an unknown token.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    error::{AppError, AuthError},
    models::user::{AccessClaims, Role, User},
    repository::UserStore,
};

use super::tokens::TokenIssuer;

/// Absolute lifetime of a stored refresh token
pub const REFRESH_TOKEN_TTL_HOURS: i64 = 720;

/// Max-Age of the `refreshToken` cookie
pub const REFRESH_COOKIE_MAX_AGE_SECS: i64 = 30 * 24 * 3600;

/// Token pair handed to the client after login or refresh
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub access_token: String,
    pub refresh_token: String,
    pub claims: AccessClaims,
}

/// Result of checking the presented access token
#[derive(Debug)]
pub enum AccessCheck {
    Valid(AccessClaims),
    /// Absent, malformed or expired; carries the reason for logging
    NeedsRefresh(Option<AuthError>),
}

/// An authenticated caller, with the rotated tokens if a refresh happened
#[derive(Debug)]
pub struct Authenticated {
    pub claims: AccessClaims,
    pub rotated: Option<IssuedSession>,
}

pub fn classify_access(tokens: &TokenIssuer, access: Option<&str>) -> AccessCheck {
    match access.filter(|t| !t.is_empty()) {
        None => AccessCheck::NeedsRefresh(None),
        Some(token) => match tokens.validate_access_token(token) {
            Ok(claims) => AccessCheck::Valid(claims),
            Err(e) => AccessCheck::NeedsRefresh(Some(e)),
        },
    }
}

/// Role membership check, no hierarchy
pub fn authorize(claims: &AccessClaims, allowed: &[Role]) -> Result<(), AuthError> {
    if claims.has_any_role(allowed) {
        Ok(())
    } else {
        Err(AuthError::ForbiddenRole(claims.role.to_string()))
    }
}

fn storage(e: AppError) -> AuthError {
    AuthError::Storage(e.to_string())
}

#[derive(Clone)]
pub struct SessionService {
    users: Arc<dyn UserStore>,
    tokens: TokenIssuer,
}

impl SessionService {
    pub fn new(users: Arc<dyn UserStore>, tokens: TokenIssuer) -> Self {
        Self { users, tokens }
    }

    fn refresh_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::hours(REFRESH_TOKEN_TTL_HOURS)
    }

    fn mint(&self, user: &User, refresh_token: String) -> Result<IssuedSession, AuthError> {
        let access_token = self.tokens.issue_access_token(user)?;
        let claims = self.tokens.validate_access_token(&access_token)?;
        Ok(IssuedSession {
            access_token,
            refresh_token,
            claims,
        })
    }

    /// Open a new session for a user whose credentials were just verified.
    /// Overwrites any refresh token the user already had.
    pub async fn start(&self, user: &User) -> Result<IssuedSession, AuthError> {
        let refresh_token = self.tokens.issue_refresh_token();
        self.users
            .start_session(user.id, &refresh_token, Self::refresh_expiry(Utc::now()))
            .await
            .map_err(storage)?;

        tracing::debug!(user_id = user.id, "Session started");
        self.mint(user, refresh_token)
    }

    /// Exchange a refresh token for a new token pair
    pub async fn refresh(&self, presented: Option<&str>) -> Result<IssuedSession, AuthError> {
        let presented = presented
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::NoSession)?;

        let user = self
            .users
            .get_by_refresh_token(presented)
            .await
            .map_err(storage)?
            .ok_or(AuthError::UnknownSession)?;

        let now = Utc::now();
        match user.refresh_token_expires_at {
            Some(expires_at) if expires_at > now => {}
            _ => {
                tracing::info!(user_id = user.id, "Refresh token expired");
                return Err(AuthError::ExpiredSession);
            }
        }

        let next = self.tokens.issue_refresh_token();
        let swapped = self
            .users
            .rotate_refresh_token(user.id, presented, &next, Self::refresh_expiry(now))
            .await
            .map_err(storage)?;
        if !swapped {
            tracing::warn!(user_id = user.id, "Concurrent refresh lost the rotation");
            return Err(AuthError::UnknownSession);
        }

        tracing::debug!(user_id = user.id, "Refresh token rotated");
        self.mint(&user, next)
    }

    /// Resolve the caller from its cookies, refreshing when the access token is unusable
    pub async fn authenticate(
        &self,
        access: Option<&str>,
        refresh: Option<&str>,
    ) -> Result<Authenticated, AuthError> {
        match classify_access(&self.tokens, access) {
            AccessCheck::Valid(claims) => Ok(Authenticated {
                claims,
                rotated: None,
            }),
            AccessCheck::NeedsRefresh(reason) => {
                if let Some(reason) = reason {
                    tracing::debug!(%reason, "Access token rejected, attempting refresh");
                }
                let session = self.refresh(refresh).await?;
                Ok(Authenticated {
                    claims: session.claims.clone(),
                    rotated: Some(session),
                })
            }
        }
    }

    /// Reissue only the access token, e.g. after the user's claims changed
    pub fn reissue_access_token(&self, user: &User) -> Result<String, AuthError> {
        self.tokens.issue_access_token(user)
    }

    /// Drop the session holding this refresh token, if any
    pub async fn end(&self, refresh: Option<&str>) -> Result<bool, AuthError> {
        match refresh.filter(|t| !t.is_empty()) {
            Some(token) => self.users.clear_refresh_token(token).await.map_err(storage),
            None => Ok(false),
        }
    }
}
