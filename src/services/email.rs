//! Outgoing email: the [`Mailer`] seam, its SMTP implementation and the
//! new-book notification template

use std::str::FromStr;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, Message, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};

use crate::{
    config::EmailConfig,
    error::{AppError, AppResult},
    models::book::Book,
};

pub const BOOK_ADDED_SUBJECT: &str = "A new book is available!";

/// Delivers a single HTML email
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> AppResult<()>;
}

/// SMTP mailer. Without credentials it logs and skips every send.
pub struct SmtpMailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> AppResult<Self> {
        let from_name = config.smtp_from_name.as_deref().unwrap_or("Library");
        let from = Mailbox::from_str(&format!("{} <{}>", from_name, config.smtp_from))
            .map_err(|e| AppError::Email(format!("Invalid from address: {}", e)))?;

        let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) else {
            tracing::warn!("SMTP credentials not configured, notification emails are disabled");
            return Ok(Self {
                transport: None,
                from,
            });
        };

        let builder = if config.smtp_use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| AppError::Email(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        let transport = builder
            .port(config.smtp_port)
            .credentials(Credentials::new(username.clone(), password.clone()))
            .build();

        Ok(Self {
            transport: Some(transport),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> AppResult<()> {
        let Some(transport) = &self.transport else {
            tracing::info!(to, subject, "SMTP disabled, email skipped");
            return Ok(());
        };

        let to_mailbox = Mailbox::from_str(to)
            .map_err(|e| AppError::Email(format!("Invalid to address: {}", e)))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(subject)
            .multipart(
                MultiPart::alternative().singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(html.to_string()),
                ),
            )
            .map_err(|e| AppError::Email(format!("Failed to build email: {}", e)))?;

        transport
            .send(email)
            .await
            .map_err(|e| AppError::Email(format!("Failed to send email: {}", e)))?;

        tracing::info!(to, "Notification email sent");
        Ok(())
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Link to the book in the public API
pub fn book_link(public_url: &str, book_id: i32) -> String {
    format!("{}/api/v1/books/{}", public_url.trim_end_matches('/'), book_id)
}

/// Render the new-book announcement
pub fn render_book_added(book: &Book, public_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: sans-serif;">
  <h2>A new book has arrived</h2>
  <p><strong>{title}</strong> by {author}</p>
  <p>Genres: {genres}</p>
  <p>{description}</p>
  <p><a href="{link}">View the book</a></p>
</body>
</html>
"#,
        title = escape_html(&book.title),
        author = escape_html(&book.author),
        genres = escape_html(&book.genre_names()),
        description = escape_html(&book.description),
        link = escape_html(&book_link(public_url, book.id)),
    )
}
