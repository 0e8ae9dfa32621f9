//! Business logic services

pub mod catalog;
pub mod email;
pub mod events;
pub mod notifications;
pub mod redis;
pub mod sessions;
pub mod tokens;
pub mod users;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    error::AppResult,
    repository::Repository,
};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub repository: Repository,
    pub sessions: sessions::SessionService,
    pub users: users::UsersService,
    pub catalog: catalog::CatalogService,
}

impl Services {
    /// Create all services with the given repository and event bus.
    /// Fails when the token issuer cannot be configured.
    pub fn new(
        repository: Repository,
        config: &AppConfig,
        events: Arc<dyn events::EventBus>,
    ) -> AppResult<Self> {
        let tokens = tokens::TokenIssuer::new(&config.auth)?;
        let sessions = sessions::SessionService::new(repository.users.clone(), tokens);

        Ok(Self {
            users: users::UsersService::new(repository.users.clone(), sessions.clone()),
            catalog: catalog::CatalogService::new(repository.books.clone(), events),
            sessions,
            repository,
        })
    }
}
