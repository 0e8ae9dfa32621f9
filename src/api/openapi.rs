//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{auth, books, health, mailing};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Library API",
        version = "1.0.0",
        description = "Library catalog REST API with cookie sessions and new-book notifications"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        crate::api::welcome,
        health::health_check,
        health::readiness_check,
        // Auth
        auth::register,
        auth::login,
        auth::logout,
        auth::me,
        // Mailing
        mailing::subscribe,
        mailing::unsubscribe,
        // Books
        books::list_books,
        books::search_books,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        books::list_genres,
    ),
    components(
        schemas(
            // Auth
            auth::RegisterResponse,
            auth::LoginResponse,
            crate::models::user::RegisterUser,
            crate::models::user::LoginRequest,
            crate::models::user::AccessClaims,
            crate::models::user::Role,
            // Books
            books::BookCreatedResponse,
            crate::models::book::Book,
            crate::models::book::Genre,
            crate::models::book::BookPage,
            crate::models::book::BookSort,
            crate::models::book::CreateBook,
            crate::models::book::UpdateBook,
            // Health
            health::HealthResponse,
            // Common
            crate::api::MessageResponse,
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Registration and sessions"),
        (name = "mailing", description = "New-book mailing subscription"),
        (name = "books", description = "Catalog of books and genres")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in ["/register", "/login", "/logout", "/me", "/books", "/books/{id}", "/genres"] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
