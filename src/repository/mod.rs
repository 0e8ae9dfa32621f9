//! Repository layer for database operations
//!
//! Services talk to the stores through the [`UserStore`] and [`BookStore`]
//! traits; [`Repository::new`] wires the PostgreSQL implementations.

pub mod books;
pub mod users;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{
        book::{Book, BookChanges, BookSort, Genre, NewBook, Page},
        user::{NewUser, User},
    },
};

/// Credential store: user records and their session fields
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. Fails with `AppError::Conflict` when the email is taken.
    async fn create(&self, user: &NewUser) -> AppResult<User>;

    async fn get_by_id(&self, id: i32) -> AppResult<Option<User>>;

    /// Exact, case-sensitive email match
    async fn get_by_email(&self, email: &str) -> AppResult<Option<User>>;

    async fn get_by_refresh_token(&self, token: &str) -> AppResult<Option<User>>;

    /// Unconditionally install a new refresh token (login)
    async fn start_session(
        &self,
        user_id: i32,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Replace the refresh token only if the stored value still equals
    /// `current`. Returns `false` when another rotation won.
    async fn rotate_refresh_token(
        &self,
        user_id: i32,
        current: &str,
        next: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Clear the session holding `token`. Returns `false` if none matched.
    async fn clear_refresh_token(&self, token: &str) -> AppResult<bool>;

    /// Write the mailing flag when it differs from the stored one.
    /// Returns the updated user, or `None` if nothing changed or the user no longer exists.
    async fn set_mailing(&self, user_id: i32, mailing: bool) -> AppResult<Option<User>>;

    /// Emails of all users with mailing enabled
    async fn mailing_subscribers(&self) -> AppResult<Vec<String>>;

    async fn ping(&self) -> AppResult<()>;
}

/// Book and genre storage
#[async_trait]
pub trait BookStore: Send + Sync {
    async fn list(&self, page: Page, sort: BookSort) -> AppResult<(Vec<Book>, i64)>;

    /// Trigram similarity search over title and description
    async fn search(&self, term: &str, threshold: f32, page: Page) -> AppResult<(Vec<Book>, i64)>;

    async fn get(&self, id: i32) -> AppResult<Option<Book>>;

    /// Look up a genre by its normalized name, creating it when missing
    async fn find_or_create_genre(&self, name: &str) -> AppResult<Genre>;

    async fn create(&self, book: &NewBook) -> AppResult<Book>;

    async fn update(&self, id: i32, changes: &BookChanges) -> AppResult<Option<Book>>;

    /// Returns the deleted book, or `None` if it did not exist
    async fn delete(&self, id: i32) -> AppResult<Option<Book>>;

    async fn list_genres(&self) -> AppResult<Vec<Genre>>;
}

/// Main repository struct holding the stores
#[derive(Clone)]
pub struct Repository {
    pub users: Arc<dyn UserStore>,
    pub books: Arc<dyn BookStore>,
}

impl Repository {
    /// Create a new repository backed by the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            users: Arc::new(users::PgUserStore::new(pool.clone())),
            books: Arc::new(books::PgBookStore::new(pool)),
        }
    }

    /// Assemble a repository from arbitrary store implementations
    pub fn from_stores(users: Arc<dyn UserStore>, books: Arc<dyn BookStore>) -> Self {
        Self { users, books }
    }
}
