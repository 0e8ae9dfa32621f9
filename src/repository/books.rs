//! Books repository for database operations.
//!
//! Genres are stored once in `genres` and linked through `book_genres`, whose
//! `position` column keeps the order in which they were given on creation.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row, Transaction};

use crate::{
    error::AppResult,
    models::book::{Book, BookChanges, BookRow, BookSort, Genre, NewBook, Page},
};

use super::BookStore;

const BOOK_COLUMNS: &str = "b.id, b.title, b.author, b.published_year, b.description";

#[derive(Clone)]
pub struct PgBookStore {
    pool: Pool<Postgres>,
}

impl PgBookStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Load genres for a set of books, keyed by book id, in link order
    async fn genres_for(&self, book_ids: &[i32]) -> AppResult<HashMap<i32, Vec<Genre>>> {
        let mut map: HashMap<i32, Vec<Genre>> = HashMap::new();
        if book_ids.is_empty() {
            return Ok(map);
        }

        let rows = sqlx::query(
            r#"
            SELECT bg.book_id, g.id, g.name
            FROM book_genres bg
            JOIN genres g ON g.id = bg.genre_id
            WHERE bg.book_id = ANY($1)
            ORDER BY bg.book_id, bg.position
            "#,
        )
        .bind(book_ids)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let book_id: i32 = row.try_get("book_id")?;
            map.entry(book_id).or_default().push(Genre {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
            });
        }

        Ok(map)
    }

    async fn attach_genres(&self, rows: Vec<BookRow>) -> AppResult<Vec<Book>> {
        let ids: Vec<i32> = rows.iter().map(|r| r.id).collect();
        let mut genres = self.genres_for(&ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let g = genres.remove(&row.id).unwrap_or_default();
                row.with_genres(g)
            })
            .collect())
    }

    async fn link_genres(
        tx: &mut Transaction<'_, Postgres>,
        book_id: i32,
        genres: &[Genre],
    ) -> AppResult<()> {
        let ids: Vec<i32> = genres.iter().map(|g| g.id).collect();
        sqlx::query(
            r#"
            INSERT INTO book_genres (book_id, genre_id, position)
            SELECT $1, genre_id, ord::INT
            FROM UNNEST($2::INT[]) WITH ORDINALITY AS t(genre_id, ord)
            ON CONFLICT (book_id, genre_id) DO NOTHING
            "#,
        )
        .bind(book_id)
        .bind(&ids)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BookStore for PgBookStore {
    // =========================================================================
    // READ
    // =========================================================================

    async fn list(&self, page: Page, sort: BookSort) -> AppResult<(Vec<Book>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
            .fetch_one(&self.pool)
            .await?;

        // Column comes from a closed enum, never from user text
        let query = format!(
            "SELECT {} FROM books b ORDER BY b.{}, b.id LIMIT $1 OFFSET $2",
            BOOK_COLUMNS,
            sort.column()
        );
        let rows = sqlx::query_as::<_, BookRow>(&query)
            .bind(page.limit)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok((self.attach_genres(rows).await?, total))
    }

    async fn search(&self, term: &str, threshold: f32, page: Page) -> AppResult<(Vec<Book>, i64)> {
        let needle = term.to_lowercase();
        let pattern = contains_pattern(&needle);

        let filter = r#"
            similarity(lower(b.title), $1) > $2
            OR similarity(lower(b.description), $1) > $2
            OR lower(b.title) LIKE $3
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM books b WHERE {}", filter))
            .bind(&needle)
            .bind(threshold)
            .bind(&pattern)
            .fetch_one(&self.pool)
            .await?;

        let query = format!(
            r#"
            SELECT {}
            FROM books b
            WHERE {}
            ORDER BY GREATEST(similarity(lower(b.title), $1), similarity(lower(b.description), $1)) DESC, b.id
            LIMIT $4 OFFSET $5
            "#,
            BOOK_COLUMNS, filter
        );
        let rows = sqlx::query_as::<_, BookRow>(&query)
            .bind(&needle)
            .bind(threshold)
            .bind(&pattern)
            .bind(page.limit)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok((self.attach_genres(rows).await?, total))
    }

    async fn get(&self, id: i32) -> AppResult<Option<Book>> {
        let query = format!("SELECT {} FROM books b WHERE b.id = $1", BOOK_COLUMNS);
        let row = sqlx::query_as::<_, BookRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.attach_genres(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_genres(&self) -> AppResult<Vec<Genre>> {
        let genres = sqlx::query_as::<_, Genre>("SELECT id, name FROM genres ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(genres)
    }

    // =========================================================================
    // WRITE
    // =========================================================================

    async fn find_or_create_genre(&self, name: &str) -> AppResult<Genre> {
        // The no-op update makes RETURNING yield the existing row too
        let genre = sqlx::query_as::<_, Genre>(
            r#"
            INSERT INTO genres (name) VALUES ($1)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id, name
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(genre)
    }

    async fn create(&self, book: &NewBook) -> AppResult<Book> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, BookRow>(
            r#"
            INSERT INTO books (title, author, published_year, description)
            VALUES ($1, $2, $3, $4)
            RETURNING id, title, author, published_year, description
            "#,
        )
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.published_year)
        .bind(&book.description)
        .fetch_one(&mut *tx)
        .await?;

        Self::link_genres(&mut tx, row.id, &book.genres).await?;
        tx.commit().await?;

        Ok(row.with_genres(book.genres.clone()))
    }

    async fn update(&self, id: i32, changes: &BookChanges) -> AppResult<Option<Book>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, BookRow>(
            r#"
            UPDATE books SET
                title = COALESCE($2, title),
                author = COALESCE($3, author),
                published_year = COALESCE($4, published_year),
                description = COALESCE($5, description),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, title, author, published_year, description
            "#,
        )
        .bind(id)
        .bind(&changes.title)
        .bind(&changes.author)
        .bind(&changes.published_year)
        .bind(&changes.description)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        if let Some(genres) = &changes.genres {
            sqlx::query("DELETE FROM book_genres WHERE book_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            Self::link_genres(&mut tx, id, genres).await?;
        }

        tx.commit().await?;

        Ok(self.attach_genres(vec![row]).await?.pop())
    }

    async fn delete(&self, id: i32) -> AppResult<Option<Book>> {
        let Some(book) = self.get(id).await? else {
            return Ok(None);
        };

        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok((result.rows_affected() > 0).then_some(book))
    }
}

/// `LIKE` pattern matching `term` anywhere, with its own wildcards taken literally
fn contains_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}
