//! Registration, login and mailing preferences

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::user::{AccessClaims, LoginRequest, NewUser, RegisterUser, Role, User},
    repository::UserStore,
};

use super::sessions::{IssuedSession, SessionService};

/// Outcome of a mailing subscription change
#[derive(Debug)]
pub enum MailingChange {
    /// The stored flag already had the requested value
    Unchanged,
    /// Stored and reflected in a freshly issued access token
    Updated { user: User, access_token: String },
    /// The user behind the token no longer exists
    UserGone,
}

#[derive(Clone)]
pub struct UsersService {
    users: Arc<dyn UserStore>,
    sessions: SessionService,
}

impl UsersService {
    pub fn new(users: Arc<dyn UserStore>, sessions: SessionService) -> Self {
        Self { users, sessions }
    }

    /// Create a reader account
    pub async fn register(&self, mut request: RegisterUser) -> AppResult<User> {
        request.name = request.name.trim().to_string();
        request.validate()?;

        let user = self
            .users
            .create(&NewUser {
                name: request.name,
                email: request.email,
                password_hash: hash_password(&request.password)?,
                role: Role::Reader,
                mailing: request.mailing,
            })
            .await?;

        tracing::info!(user_id = user.id, "User registered");
        Ok(user)
    }

    /// Verify credentials and open a session.
    /// A failed attempt leaves the user record untouched.
    pub async fn login(&self, request: &LoginRequest) -> AppResult<(User, IssuedSession)> {
        let invalid = || AppError::Authentication("Invalid email or password".to_string());

        let user = self
            .users
            .get_by_email(&request.email)
            .await?
            .ok_or_else(invalid)?;

        if !verify_password(&user, &request.password)? {
            tracing::info!(user_id = user.id, "Login rejected: wrong password");
            return Err(invalid());
        }

        let session = self.sessions.start(&user).await?;
        tracing::info!(user_id = user.id, "User logged in");
        Ok((user, session))
    }

    /// Clear the stored refresh token matching the cookie, if any
    pub async fn logout(&self, refresh_token: Option<&str>) -> AppResult<()> {
        if self.sessions.end(refresh_token).await? {
            tracing::info!("Session closed");
        }
        Ok(())
    }

    /// Set the mailing flag. The decision to write is taken from the stored row,
    /// the caller's claim may be stale.
    pub async fn set_mailing(&self, claims: &AccessClaims, mailing: bool) -> AppResult<MailingChange> {
        let user_id = claims
            .user_id()
            .ok_or_else(|| AppError::Authentication("missing or invalid token".to_string()))?;

        let Some(user) = self.users.set_mailing(user_id, mailing).await? else {
            if self.users.get_by_id(user_id).await?.is_some() {
                return Ok(MailingChange::Unchanged);
            }
            tracing::warn!(user_id, "Mailing change for a user that no longer exists");
            return Ok(MailingChange::UserGone);
        };

        let access_token = self.sessions.reissue_access_token(&user)?;
        tracing::info!(user_id, mailing, "Mailing preference updated");
        Ok(MailingChange::Updated { user, access_token })
    }
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

fn verify_password(user: &User, password: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
