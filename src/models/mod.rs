//! Data models for the library API

pub mod book;
pub mod event;
pub mod user;

// Re-export commonly used types
pub use book::{Book, Genre};
pub use event::CatalogEvent;
pub use user::{AccessClaims, Role, User};
