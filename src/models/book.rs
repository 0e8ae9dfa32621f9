//! Book and genre models

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Genre record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Genre {
    pub id: i32,
    pub name: String,
}

/// Book row without its genres
#[derive(Debug, Clone, FromRow)]
pub struct BookRow {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub published_year: String,
    pub description: String,
}

impl BookRow {
    pub fn with_genres(self, genres: Vec<Genre>) -> Book {
        Book {
            id: self.id,
            title: self.title,
            author: self.author,
            published_year: self.published_year,
            description: self.description,
            genres,
        }
    }
}

/// Full book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub published_year: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub genres: Vec<Genre>,
}

impl Book {
    /// Genre names joined with ", "
    pub fn genre_names(&self) -> String {
        self.genres
            .iter()
            .map(|g| g.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Create book request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,
    #[validate(length(min = 1, message = "Author is required"))]
    pub author: String,
    /// Genre names; unknown genres are created
    #[validate(length(min = 1, message = "At least one genre is required"))]
    pub genre: Vec<String>,
    #[validate(length(min = 1, message = "Published year is required"))]
    pub published_year: String,
    #[serde(default)]
    pub description: String,
}

/// Partial book update; empty or missing fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateBook {
    pub title: Option<String>,
    pub author: Option<String>,
    /// Replaces the genre list when non-empty
    pub genre: Option<Vec<String>>,
    pub published_year: Option<String>,
    pub description: Option<String>,
}

/// Book insert with genres already resolved
#[derive(Debug, Clone)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub published_year: String,
    pub description: String,
    pub genres: Vec<Genre>,
}

/// Resolved partial update; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct BookChanges {
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_year: Option<String>,
    pub description: Option<String>,
    pub genres: Option<Vec<Genre>>,
}

/// Sort order for book listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BookSort {
    #[default]
    Id,
    Title,
    Author,
    Year,
}

impl BookSort {
    pub fn column(&self) -> &'static str {
        match self {
            BookSort::Id => "id",
            BookSort::Title => "title",
            BookSort::Author => "author",
            BookSort::Year => "published_year",
        }
    }
}

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;
/// Highest page number whose offset still fits in an `i64`.
pub const MAX_PAGE_NUMBER: i64 = i64::MAX / MAX_PAGE_SIZE;

/// Book listing query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BookQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort: Option<BookSort>,
}

/// Search query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Resolved pagination window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).clamp(1, MAX_PAGE_NUMBER),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn total_pages(&self, total: i64) -> i64 {
        (total + self.limit - 1) / self.limit
    }
}

/// Paginated book listing
#[derive(Debug, Serialize, ToSchema)]
pub struct BookPage {
    pub page: i64,
    pub limit: i64,
    pub total_books: i64,
    pub total_pages: i64,
    pub books: Vec<Book>,
}

impl BookPage {
    pub fn new(page: Page, books: Vec<Book>, total_books: i64) -> Self {
        Self {
            page: page.page,
            limit: page.limit,
            total_books,
            total_pages: page.total_pages(total_books),
            books,
        }
    }
}

/// Normalize a genre name: lower-case it, then upper-case the first character.
/// Returns `None` for blank names.
pub fn normalize_genre_name(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let mut chars = lowered.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}
