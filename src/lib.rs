//! Library catalog server
//!
//! REST JSON API for a book catalog with cookie-based sessions (short-lived
//! access tokens, rotating refresh tokens) and email notifications for new
//! books, delivered through a Redis Streams consumer.

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}

/// Create the application router with all routes
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/", get(api::welcome))
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/ready", get(api::health::readiness_check))
        // Sessions
        .route("/register", post(api::auth::register))
        .route("/login", post(api::auth::login))
        .route("/logout", post(api::auth::logout))
        // Catalog
        .route("/books", get(api::books::list_books))
        .route("/books/search", get(api::books::search_books))
        .route("/genres", get(api::books::list_genres));

    let members = Router::new()
        .route("/me", get(api::auth::me))
        .route("/mailing/subscribe", post(api::mailing::subscribe))
        .route("/mailing/unsubscribe", post(api::mailing::unsubscribe))
        .route("/books/:id", get(api::books::get_book))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::access::any_member,
        ));

    let admins = Router::new()
        .route("/books", post(api::books::create_book))
        .route(
            "/books/:id",
            put(api::books::update_book).delete(api::books::delete_book),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::access::admin_only,
        ));

    let api_v1 = public.merge(members).merge(admins).with_state(state);

    // OpenAPI documentation
    let openapi = api::openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
