//! Catalog domain events carried over the event queue

use serde::{Deserialize, Serialize};

use super::book::Book;

pub const BOOK_ADDED: &str = "BookAdded";

/// Wire envelope: `{"event": "<kind>", "data": <payload>}`
#[derive(Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Events understood by the notification consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEvent {
    BookAdded(Book),
}

/// Outcome of decoding a queue payload
#[derive(Debug)]
pub enum DecodedEvent {
    Known(CatalogEvent),
    Unknown(String),
}

impl CatalogEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CatalogEvent::BookAdded(_) => BOOK_ADDED,
        }
    }

    /// Key identifying this event across redeliveries
    pub fn dedup_key(&self) -> String {
        match self {
            CatalogEvent::BookAdded(book) => format!("{}:{}", BOOK_ADDED, book.id),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let data = match self {
            CatalogEvent::BookAdded(book) => serde_json::to_value(book)?,
        };
        serde_json::to_string(&EventEnvelope {
            event: self.kind().to_string(),
            data,
        })
    }

    /// Decode a raw payload. Malformed JSON (or a known kind with a malformed
    /// body) is an error; a well-formed envelope of another kind is `Unknown`.
    pub fn decode(payload: &[u8]) -> Result<DecodedEvent, serde_json::Error> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)?;
        match envelope.event.as_str() {
            BOOK_ADDED => Ok(DecodedEvent::Known(CatalogEvent::BookAdded(
                serde_json::from_value(envelope.data)?,
            ))),
            _ => Ok(DecodedEvent::Unknown(envelope.event)),
        }
    }
}
