#![allow(dead_code)]

//! In-process test harness: the real router over in-memory stores, a
//! broadcast-backed event bus and a mailer that records what it sends.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, Response},
    Router,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, Barrier};
use tower::ServiceExt;

use library_api::{
    config::{AppConfig, AuthConfig, NotificationsConfig},
    create_router,
    error::{AppError, AppResult},
    models::{
        book::{Book, BookChanges, BookSort, Genre, NewBook, Page},
        event::CatalogEvent,
        user::{NewUser, Role, User},
    },
    repository::{BookStore, Repository, UserStore},
    services::{
        email::Mailer,
        events::{Delivery, EventBus, EventSubscription},
        notifications::NotificationConsumer,
        sessions::SessionService,
        tokens::TokenIssuer,
        users::hash_password,
        Services,
    },
    AppState,
};

pub const TEST_SECRET: &str = "test-jwt-secret";
pub const PUBLIC_URL: &str = "http://library.test";

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryUsers {
    rows: Mutex<Vec<User>>,
    next_id: AtomicI32,
    fail_rotations: AtomicBool,
    rotation_barrier: Mutex<Option<Arc<Barrier>>>,
}

impl MemoryUsers {
    pub fn snapshot(&self, id: i32) -> Option<User> {
        self.rows.lock().unwrap().iter().find(|u| u.id == id).cloned()
    }

    /// Overwrite a user's stored session, e.g. to expire it
    pub fn set_session(&self, id: i32, token: Option<&str>, expires_at: Option<DateTime<Utc>>) {
        let mut rows = self.rows.lock().unwrap();
        let user = rows.iter_mut().find(|u| u.id == id).unwrap();
        user.refresh_token = token.map(str::to_string);
        user.refresh_token_expires_at = expires_at;
    }

    pub fn remove(&self, id: i32) {
        self.rows.lock().unwrap().retain(|u| u.id != id);
    }

    /// Make every refresh token rotation fail with a storage error
    pub fn fail_rotations(&self, fail: bool) {
        self.fail_rotations.store(fail, Ordering::SeqCst);
    }

    /// Hold rotations until `parties` of them are in flight, so that they race
    pub fn hold_rotations(&self, parties: usize) {
        *self.rotation_barrier.lock().unwrap() = Some(Arc::new(Barrier::new(parties)));
    }
}

#[async_trait]
impl UserStore for MemoryUsers {
    async fn create(&self, user: &NewUser) -> AppResult<User> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|u| u.email == user.email) {
            return Err(AppError::Conflict("Email is already registered".to_string()));
        }
        let created = User {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            name: user.name.clone(),
            email: user.email.clone(),
            password: user.password_hash.clone(),
            role: user.role,
            mailing: user.mailing,
            refresh_token: None,
            refresh_token_expires_at: None,
            created_at: Utc::now(),
        };
        rows.push(created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i32) -> AppResult<Option<User>> {
        Ok(self.snapshot(id))
    }

    async fn get_by_email(&self, email: &str) -> AppResult<Option<User>> {
        Ok(self.rows.lock().unwrap().iter().find(|u| u.email == email).cloned())
    }

    async fn get_by_refresh_token(&self, token: &str) -> AppResult<Option<User>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.refresh_token.as_deref() == Some(token))
            .cloned())
    }

    async fn start_session(
        &self,
        user_id: i32,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.set_session(user_id, Some(token), Some(expires_at));
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        user_id: i32,
        current: &str,
        next: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let barrier = self.rotation_barrier.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        if self.fail_rotations.load(Ordering::SeqCst) {
            return Err(AppError::Internal("connection reset by peer".to_string()));
        }

        let mut rows = self.rows.lock().unwrap();
        match rows
            .iter_mut()
            .find(|u| u.id == user_id && u.refresh_token.as_deref() == Some(current))
        {
            Some(user) => {
                user.refresh_token = Some(next.to_string());
                user.refresh_token_expires_at = Some(expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear_refresh_token(&self, token: &str) -> AppResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        let mut cleared = false;
        for user in rows.iter_mut().filter(|u| u.refresh_token.as_deref() == Some(token)) {
            user.refresh_token = None;
            user.refresh_token_expires_at = None;
            cleared = true;
        }
        Ok(cleared)
    }

    async fn set_mailing(&self, user_id: i32, mailing: bool) -> AppResult<Option<User>> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows
            .iter_mut()
            .find(|u| u.id == user_id && u.mailing != mailing)
            .map(|u| {
                u.mailing = mailing;
                u.clone()
            }))
    }

    async fn mailing_subscribers(&self) -> AppResult<Vec<String>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.mailing)
            .map(|u| u.email.clone())
            .collect())
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Books
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryBooks {
    books: Mutex<Vec<Book>>,
    genres: Mutex<Vec<Genre>>,
    next_id: AtomicI32,
}

impl MemoryBooks {
    fn window(mut books: Vec<Book>, page: Page) -> (Vec<Book>, i64) {
        let total = books.len() as i64;
        let start = (page.offset() as usize).min(books.len());
        let end = (start + page.limit as usize).min(books.len());
        (books.drain(start..end).collect(), total)
    }

    pub fn genre_count(&self) -> usize {
        self.genres.lock().unwrap().len()
    }
}

#[async_trait]
impl BookStore for MemoryBooks {
    async fn list(&self, page: Page, sort: BookSort) -> AppResult<(Vec<Book>, i64)> {
        let mut books = self.books.lock().unwrap().clone();
        match sort {
            BookSort::Id => books.sort_by_key(|b| b.id),
            BookSort::Title => books.sort_by(|a, b| a.title.cmp(&b.title)),
            BookSort::Author => books.sort_by(|a, b| a.author.cmp(&b.author)),
            BookSort::Year => books.sort_by(|a, b| a.published_year.cmp(&b.published_year)),
        }
        Ok(Self::window(books, page))
    }

    async fn search(&self, term: &str, _threshold: f32, page: Page) -> AppResult<(Vec<Book>, i64)> {
        let needle = term.to_lowercase();
        let books = self
            .books
            .lock()
            .unwrap()
            .iter()
            .filter(|b| {
                b.title.to_lowercase().contains(&needle)
                    || b.description.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        Ok(Self::window(books, page))
    }

    async fn get(&self, id: i32) -> AppResult<Option<Book>> {
        Ok(self.books.lock().unwrap().iter().find(|b| b.id == id).cloned())
    }

    async fn find_or_create_genre(&self, name: &str) -> AppResult<Genre> {
        let mut genres = self.genres.lock().unwrap();
        if let Some(genre) = genres.iter().find(|g| g.name == name) {
            return Ok(genre.clone());
        }
        let genre = Genre {
            id: genres.len() as i32 + 1,
            name: name.to_string(),
        };
        genres.push(genre.clone());
        Ok(genre)
    }

    async fn create(&self, book: &NewBook) -> AppResult<Book> {
        let created = Book {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            title: book.title.clone(),
            author: book.author.clone(),
            published_year: book.published_year.clone(),
            description: book.description.clone(),
            genres: book.genres.clone(),
        };
        self.books.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update(&self, id: i32, changes: &BookChanges) -> AppResult<Option<Book>> {
        let mut books = self.books.lock().unwrap();
        Ok(books.iter_mut().find(|b| b.id == id).map(|b| {
            if let Some(title) = &changes.title {
                b.title = title.clone();
            }
            if let Some(author) = &changes.author {
                b.author = author.clone();
            }
            if let Some(year) = &changes.published_year {
                b.published_year = year.clone();
            }
            if let Some(description) = &changes.description {
                b.description = description.clone();
            }
            if let Some(genres) = &changes.genres {
                b.genres = genres.clone();
            }
            b.clone()
        }))
    }

    async fn delete(&self, id: i32) -> AppResult<Option<Book>> {
        let mut books = self.books.lock().unwrap();
        let index = books.iter().position(|b| b.id == id);
        Ok(index.map(|i| books.remove(i)))
    }

    async fn list_genres(&self) -> AppResult<Vec<Genre>> {
        let mut genres = self.genres.lock().unwrap().clone();
        genres.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(genres)
    }
}

// ---------------------------------------------------------------------------
// Event bus
// ---------------------------------------------------------------------------

/// Subscribers only see messages sent after they subscribed, like a
/// consumer group created at the newest offset
pub struct BroadcastBus {
    tx: broadcast::Sender<Vec<u8>>,
    fail_publish: AtomicBool,
    pub acked: Arc<Mutex<Vec<String>>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            tx,
            fail_publish: AtomicBool::new(false),
            acked: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Put raw bytes on the topic, bypassing event encoding
    pub fn inject(&self, payload: &[u8]) {
        let _ = self.tx.send(payload.to_vec());
    }
}

#[async_trait]
impl EventBus for BroadcastBus {
    async fn publish(&self, event: &CatalogEvent) -> AppResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(AppError::Queue("broker unavailable".to_string()));
        }
        let payload = event
            .to_json()
            .map_err(|e| AppError::Internal(e.to_string()))?;
        // No subscribers is not an error for a topic
        let _ = self.tx.send(payload.into_bytes());
        Ok(())
    }

    async fn subscribe(&self) -> AppResult<Box<dyn EventSubscription>> {
        Ok(Box::new(BroadcastSubscription {
            rx: self.tx.subscribe(),
            next_id: AtomicU64::new(0),
            acked: self.acked.clone(),
        }))
    }
}

pub struct BroadcastSubscription {
    rx: broadcast::Receiver<Vec<u8>>,
    next_id: AtomicU64,
    acked: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl EventSubscription for BroadcastSubscription {
    async fn next_batch(&mut self) -> AppResult<Vec<Delivery>> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    return Ok(vec![Delivery {
                        id: format!("{}-0", id),
                        payload,
                    }]);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(AppError::Queue("topic closed".to_string()))
                }
            }
        }
    }

    async fn ack(&mut self, ids: &[String]) -> AppResult<()> {
        self.acked.lock().unwrap().extend(ids.iter().cloned());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mailer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<SentMail>>,
    failing: Mutex<Vec<String>>,
}

impl RecordingMailer {
    pub fn fail_for(&self, address: &str) {
        self.failing.lock().unwrap().push(address.to_string());
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> AppResult<()> {
        if self.failing.lock().unwrap().iter().any(|a| a == to) {
            return Err(AppError::Email(format!("relay refused {}", to)));
        }
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.auth = AuthConfig {
        jwt_secret: TEST_SECRET.to_string(),
        access_token_ttl_secs: 900,
        cookie_domain: None,
        secure_cookies: false,
    };
    config.server.public_url = PUBLIC_URL.to_string();
    config.notifications = NotificationsConfig {
        max_concurrent_sends: 4,
        dedup_ttl_secs: 600,
    };
    config
}

pub struct TestApp {
    pub router: Router,
    pub config: Arc<AppConfig>,
    pub users: Arc<MemoryUsers>,
    pub books: Arc<MemoryBooks>,
    pub bus: Arc<BroadcastBus>,
    pub mailer: Arc<RecordingMailer>,
    pub tokens: TokenIssuer,
}

impl TestApp {
    pub fn new() -> Self {
        let config = Arc::new(test_config());
        let users = Arc::new(MemoryUsers::default());
        let books = Arc::new(MemoryBooks::default());
        let bus = Arc::new(BroadcastBus::new());
        let mailer = Arc::new(RecordingMailer::default());

        let repository = Repository::from_stores(users.clone(), books.clone());
        let services = Services::new(repository, &config, bus.clone()).unwrap();
        let router = create_router(AppState {
            config: config.clone(),
            services: Arc::new(services),
        });

        Self {
            router,
            tokens: TokenIssuer::new(&config.auth).unwrap(),
            config,
            users,
            books,
            bus,
            mailer,
        }
    }

    /// Session service over the same store and secret as the router
    pub fn sessions(&self) -> SessionService {
        SessionService::new(self.users.clone(), self.tokens.clone())
    }

    pub fn consumer(&self) -> NotificationConsumer {
        NotificationConsumer::new(
            self.users.clone(),
            self.mailer.clone(),
            PUBLIC_URL,
            &self.config.notifications,
        )
    }

    /// Insert a user directly into the store
    pub async fn seed_user(&self, email: &str, password: &str, role: Role, mailing: bool) -> User {
        self.users
            .create(&NewUser {
                name: email.split('@').next().unwrap_or("user").to_string(),
                email: email.to_string(),
                password_hash: hash_password(password).unwrap(),
                role,
                mailing,
            })
            .await
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        cookies: &[(&str, &str)],
        body: Option<Value>,
    ) -> Response<Body> {
        self.send(request(method, uri, cookies, body)).await
    }

    /// Log in through the API and return the `jwt` and `refreshToken` cookie values
    pub async fn login(&self, email: &str, password: &str) -> (String, String) {
        let response = self
            .call(
                Method::POST,
                "/api/v1/login",
                &[],
                Some(serde_json::json!({ "email": email, "password": password })),
            )
            .await;
        assert_eq!(response.status(), 200, "login failed for {}", email);
        let cookies = set_cookies(&response);
        (cookies["jwt"].clone(), cookies["refreshToken"].clone())
    }
}

pub fn request(
    method: Method,
    uri: &str,
    cookies: &[(&str, &str)],
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if !cookies.is_empty() {
        let header_value = cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
        builder = builder.header(header::COOKIE, header_value);
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// `Set-Cookie` values by cookie name
pub fn set_cookies<B>(response: &Response<B>) -> HashMap<String, String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| {
            let pair = v.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Raw `Set-Cookie` header for `name`
pub fn set_cookie_header<B>(response: &Response<B>, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&prefix))
        .map(str::to_string)
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
