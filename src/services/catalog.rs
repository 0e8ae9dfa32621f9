//! Catalog management service

use std::sync::Arc;

use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{
            normalize_genre_name, Book, BookChanges, BookPage, BookQuery, CreateBook, Genre,
            NewBook, Page, SearchQuery, UpdateBook,
        },
        event::CatalogEvent,
    },
    repository::BookStore,
};

use super::events::EventBus;

/// Minimum trigram similarity for a search hit
pub const SEARCH_SIMILARITY_THRESHOLD: f32 = 0.1;

#[derive(Clone)]
pub struct CatalogService {
    books: Arc<dyn BookStore>,
    events: Arc<dyn EventBus>,
}

impl CatalogService {
    pub fn new(books: Arc<dyn BookStore>, events: Arc<dyn EventBus>) -> Self {
        Self { books, events }
    }

    pub async fn list(&self, query: &BookQuery) -> AppResult<BookPage> {
        let page = Page::new(query.page, query.limit);
        let (books, total) = self
            .books
            .list(page, query.sort.unwrap_or_default())
            .await?;
        Ok(BookPage::new(page, books, total))
    }

    pub async fn search(&self, query: &SearchQuery) -> AppResult<BookPage> {
        let term = query.search.as_deref().map(str::trim).unwrap_or_default();
        if term.is_empty() {
            return Err(AppError::BadRequest("Search term is required".to_string()));
        }

        let page = Page::new(query.page, query.limit);
        let (books, total) = self
            .books
            .search(term, SEARCH_SIMILARITY_THRESHOLD, page)
            .await?;
        Ok(BookPage::new(page, books, total))
    }

    pub async fn get(&self, id: i32) -> AppResult<Book> {
        self.books
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    pub async fn genres(&self) -> AppResult<Vec<Genre>> {
        self.books.list_genres().await
    }

    /// Normalize the names, drop blanks and duplicates, then find or create
    /// each genre in the order given
    async fn resolve_genres(&self, names: &[String]) -> AppResult<Vec<Genre>> {
        let mut normalized: Vec<String> = Vec::with_capacity(names.len());
        for name in names.iter().filter_map(|n| normalize_genre_name(n)) {
            if !normalized.contains(&name) {
                normalized.push(name);
            }
        }

        let mut genres = Vec::with_capacity(normalized.len());
        for name in &normalized {
            genres.push(self.books.find_or_create_genre(name).await?);
        }
        Ok(genres)
    }

    /// Store a new book and announce it.
    ///
    /// The book is committed before the event is published; a publish failure
    /// is logged and does not fail the call.
    pub async fn create(&self, request: CreateBook) -> AppResult<Book> {
        request.validate()?;

        let genres = self.resolve_genres(&request.genre).await?;
        if genres.is_empty() {
            return Err(AppError::Validation("At least one genre is required".to_string()));
        }

        let book = self
            .books
            .create(&NewBook {
                title: request.title.trim().to_string(),
                author: request.author.trim().to_string(),
                published_year: request.published_year.trim().to_string(),
                description: request.description,
                genres,
            })
            .await?;

        tracing::info!(book_id = book.id, title = %book.title, "Book created");

        let event = CatalogEvent::BookAdded(book.clone());
        if let Err(e) = self.events.publish(&event).await {
            tracing::error!(book_id = book.id, error = %e, "Failed to publish BookAdded event");
        }

        Ok(book)
    }

    /// Apply a partial update. Empty strings keep the stored value; a
    /// non-empty genre list replaces the book's genres.
    pub async fn update(&self, id: i32, request: UpdateBook) -> AppResult<Book> {
        let non_empty = |v: Option<String>| {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };

        let genres = match request.genre.as_deref() {
            Some(names) if !names.is_empty() => {
                let resolved = self.resolve_genres(names).await?;
                (!resolved.is_empty()).then_some(resolved)
            }
            _ => None,
        };

        let changes = BookChanges {
            title: non_empty(request.title),
            author: non_empty(request.author),
            published_year: non_empty(request.published_year),
            description: non_empty(request.description),
            genres,
        };

        let book = self
            .books
            .update(id, &changes)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))?;

        tracing::info!(book_id = id, "Book updated");
        Ok(book)
    }

    pub async fn delete(&self, id: i32) -> AppResult<Book> {
        let book = self
            .books
            .delete(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))?;

        tracing::info!(book_id = id, "Book deleted");
        Ok(book)
    }
}
