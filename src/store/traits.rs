use super::error::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A schemaless document body: top-level fields mapped to JSON values.
pub type Document = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One change to a member of a collection.
#[derive(Debug, Clone)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub id: String,
    pub data: Document,
}

/// Full state of a document after a mutation. `data` is `None` once deleted.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    pub path: String,
    pub data: Option<Document>,
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Handle that unregisters a store-side listener.
///
/// Cancelling is synchronous and idempotent; clones share the same listener.
#[derive(Clone)]
pub struct SubscriptionGuard {
    cancel: Arc<Mutex<Option<CancelFn>>>,
}

impl SubscriptionGuard {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Arc::new(Mutex::new(Some(Box::new(cancel)))),
        }
    }

    pub fn cancel(&self) {
        let cancel = match self.cancel.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self.cancel.lock() {
            Ok(slot) => slot.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A live change feed. Only changes made after subscribing are delivered.
///
/// Dropping the subscription cancels the store-side listener.
pub struct Subscription<T> {
    events: mpsc::UnboundedReceiver<T>,
    guard: SubscriptionGuard,
}

impl<T> Subscription<T> {
    pub fn new(events: mpsc::UnboundedReceiver<T>, guard: SubscriptionGuard) -> Self {
        Self { events, guard }
    }

    /// Next change, or `None` once the listener has been cancelled and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.events.recv().await
    }

    pub fn guard(&self) -> SubscriptionGuard {
        self.guard.clone()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.guard.cancel();
    }
}

/// Document-oriented key-value store with change notifications.
///
/// Documents are addressed by slash-separated paths; collections are
/// append-only sets of documents under a path.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document, failing with `AlreadyExists` if one is present.
    async fn create(&self, path: &str, data: Document) -> Result<()>;

    /// Merge top-level fields into an existing document.
    async fn merge(&self, path: &str, fields: Document) -> Result<()>;

    async fn get(&self, path: &str) -> Result<Option<Document>>;

    /// Snapshots of the document after every subsequent mutation.
    async fn subscribe(&self, path: &str) -> Result<Subscription<DocumentSnapshot>>;

    /// Append a document to a collection, returning its generated id.
    async fn append(&self, collection: &str, data: Document) -> Result<String>;

    /// Current members of a collection in write order.
    async fn list(&self, collection: &str) -> Result<Vec<Document>>;

    async fn subscribe_collection(&self, collection: &str) -> Result<Subscription<DocumentChange>>;
}
