//! New-book notification consumer.
//!
//! Runs as one background task: reads batches from the event queue, skips
//! malformed or already-seen events, mails every subscriber with bounded
//! concurrency and acknowledges the batch once it has been handled.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{
    sync::{watch, Semaphore},
    task::JoinSet,
};

use crate::{
    config::NotificationsConfig,
    models::{
        book::Book,
        event::{CatalogEvent, DecodedEvent},
    },
    repository::UserStore,
};

use super::{
    email::{render_book_added, Mailer, BOOK_ADDED_SUBJECT},
    events::EventSubscription,
};

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Recently processed event keys, forgotten after a TTL
#[derive(Debug)]
pub struct DedupCache {
    ttl: Duration,
    seen: HashMap<String, Instant>,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: HashMap::new(),
        }
    }

    /// Record `key`; returns `false` if it was already seen within the TTL
    pub fn first_seen(&mut self, key: &str, now: Instant) -> bool {
        let ttl = self.ttl;
        self.seen.retain(|_, at| now.duration_since(*at) < ttl);

        if self.seen.contains_key(key) {
            return false;
        }
        self.seen.insert(key.to_string(), now);
        true
    }
}

/// What happened to one queue message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Malformed,
    Ignored(String),
    Duplicate,
    Delivered { sent: usize, failed: usize },
    /// Subscriber lookup failed; the message is still consumed
    Failed,
}

pub struct NotificationConsumer {
    users: Arc<dyn UserStore>,
    mailer: Arc<dyn Mailer>,
    public_url: String,
    limit: Arc<Semaphore>,
    dedup: DedupCache,
}

impl NotificationConsumer {
    pub fn new(
        users: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        public_url: impl Into<String>,
        config: &NotificationsConfig,
    ) -> Self {
        Self {
            users,
            mailer,
            public_url: public_url.into(),
            limit: Arc::new(Semaphore::new(config.max_concurrent_sends.max(1))),
            dedup: DedupCache::new(Duration::from_secs(config.dedup_ttl_secs)),
        }
    }

    /// Consume until `shutdown` flips to true or its sender is dropped
    pub async fn run(
        mut self,
        mut subscription: Box<dyn EventSubscription>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("Notification consumer started");

        loop {
            let batch = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                batch = subscription.next_batch() => batch,
            };

            let deliveries = match batch {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read from event queue");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            if deliveries.is_empty() {
                continue;
            }

            let mut ids = Vec::with_capacity(deliveries.len());
            for delivery in deliveries {
                let outcome = self.handle(&delivery.payload).await;
                tracing::debug!(message_id = %delivery.id, ?outcome, "Message handled");
                ids.push(delivery.id);
            }

            if let Err(e) = subscription.ack(&ids).await {
                tracing::error!(error = %e, count = ids.len(), "Failed to acknowledge messages");
            }
        }

        tracing::info!("Notification consumer stopped");
    }

    /// Process one raw message
    pub async fn handle(&mut self, payload: &[u8]) -> Handled {
        let event = match CatalogEvent::decode(payload) {
            Ok(DecodedEvent::Known(event)) => event,
            Ok(DecodedEvent::Unknown(kind)) => {
                tracing::debug!(kind = %kind, "Ignoring event");
                return Handled::Ignored(kind);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed event");
                return Handled::Malformed;
            }
        };

        if !self.dedup.first_seen(&event.dedup_key(), Instant::now()) {
            tracing::info!(key = %event.dedup_key(), "Skipping duplicate event");
            return Handled::Duplicate;
        }

        match event {
            CatalogEvent::BookAdded(book) => self.announce(&book).await,
        }
    }

    async fn announce(&self, book: &Book) -> Handled {
        let recipients = match self.users.mailing_subscribers().await {
            Ok(recipients) => recipients,
            Err(e) => {
                tracing::error!(book_id = book.id, error = %e, "Failed to load mailing subscribers");
                return Handled::Failed;
            }
        };

        let html: Arc<str> = render_book_added(book, &self.public_url).into();
        let mut tasks = JoinSet::new();

        for to in recipients {
            let Ok(permit) = self.limit.clone().acquire_owned().await else {
                break;
            };
            let mailer = self.mailer.clone();
            let html = html.clone();
            tasks.spawn(async move {
                let result = mailer.send_html(&to, BOOK_ADDED_SUBJECT, &html).await;
                drop(permit);
                (to, result)
            });
        }

        let (mut sent, mut failed) = (0, 0);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => sent += 1,
                Ok((to, Err(e))) => {
                    failed += 1;
                    tracing::warn!(to = %to, error = %e, "Failed to send notification");
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!(error = %e, "Notification task panicked");
                }
            }
        }

        tracing::info!(book_id = book.id, sent, failed, "BookAdded notifications dispatched");
        Handled::Delivered { sent, failed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_forgets_keys_after_ttl() {
        let mut cache = DedupCache::new(Duration::from_secs(10));
        let start = Instant::now();

        assert!(cache.first_seen("BookAdded:1", start));
        assert!(!cache.first_seen("BookAdded:1", start + Duration::from_secs(5)));
        assert!(cache.first_seen("BookAdded:2", start + Duration::from_secs(5)));
        assert!(cache.first_seen("BookAdded:1", start + Duration::from_secs(11)));
    }
}
