use crate::store::error::{Result, StoreError};
use crate::store::traits::*;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::trace;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

type Senders<T> = HashMap<u64, mpsc::UnboundedSender<T>>;
type ListenerMap<T> = DashMap<String, Senders<T>>;

#[derive(Default)]
struct Listeners {
    documents: ListenerMap<DocumentSnapshot>,
    collections: ListenerMap<DocumentChange>,
    next_id: AtomicU64,
}

fn document_listeners(listeners: &Listeners) -> &ListenerMap<DocumentSnapshot> {
    &listeners.documents
}

fn collection_listeners(listeners: &Listeners) -> &ListenerMap<DocumentChange> {
    &listeners.collections
}

fn listen<T: Send + 'static>(
    listeners: &Arc<Listeners>,
    select: fn(&Listeners) -> &ListenerMap<T>,
    path: &str,
) -> Subscription<T> {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = listeners.next_id.fetch_add(1, Ordering::Relaxed);
    select(listeners)
        .entry(path.to_string())
        .or_default()
        .insert(id, tx);

    let weak = Arc::downgrade(listeners);
    let path = path.to_string();
    let guard = SubscriptionGuard::new(move || {
        let Some(listeners) = weak.upgrade() else {
            return;
        };
        let map = select(&listeners);
        if let Some(mut senders) = map.get_mut(&path) {
            senders.remove(&id);
        }
        map.remove_if(&path, |_, senders| senders.is_empty());
        trace!("listener {id} on {path} cancelled");
    });
    Subscription::new(rx, guard)
}

fn notify<T: Clone>(map: &ListenerMap<T>, path: &str, event: T) {
    if let Some(mut senders) = map.get_mut(path) {
        senders.retain(|_, tx| tx.send(event.clone()).is_ok());
    }
}

/// Process-local [`DocumentStore`].
///
/// Notifications for one document or collection are sent while its entry is
/// locked, so subscribers observe writes in store order.
pub struct InMemoryDocumentStore {
    documents: DashMap<String, Document>,
    collections: DashMap<String, Vec<(String, Document)>>,
    listeners: Arc<Listeners>,
    next_doc_id: AtomicU64,
    available: AtomicBool,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
            collections: DashMap::new(),
            listeners: Arc::new(Listeners::default()),
            next_doc_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live listeners on a document or collection path.
    pub fn listener_count(&self, path: &str) -> usize {
        let documents = self.listeners.documents.get(path).map_or(0, |s| s.len());
        let collections = self.listeners.collections.get(path).map_or(0, |s| s.len());
        documents + collections
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store offline".into()))
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(&self, path: &str, data: Document) -> Result<()> {
        self.check_available()?;
        match self.documents.entry(path.to_string()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(path.to_string())),
            Entry::Vacant(vacant) => {
                let doc = vacant.insert(data);
                notify(
                    &self.listeners.documents,
                    path,
                    DocumentSnapshot {
                        path: path.to_string(),
                        data: Some(doc.value().clone()),
                    },
                );
                Ok(())
            }
        }
    }

    async fn merge(&self, path: &str, fields: Document) -> Result<()> {
        self.check_available()?;
        let mut doc = self
            .documents
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        for (key, value) in fields {
            doc.insert(key, value);
        }
        notify(
            &self.listeners.documents,
            path,
            DocumentSnapshot {
                path: path.to_string(),
                data: Some(doc.value().clone()),
            },
        );
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Document>> {
        self.check_available()?;
        Ok(self.documents.get(path).map(|doc| doc.value().clone()))
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription<DocumentSnapshot>> {
        self.check_available()?;
        Ok(listen(&self.listeners, document_listeners, path))
    }

    async fn append(&self, collection: &str, data: Document) -> Result<String> {
        self.check_available()?;
        let id = format!("doc{:08}", self.next_doc_id.fetch_add(1, Ordering::Relaxed));
        let mut members = self.collections.entry(collection.to_string()).or_default();
        members.push((id.clone(), data.clone()));
        notify(
            &self.listeners.collections,
            collection,
            DocumentChange {
                kind: ChangeKind::Added,
                id: id.clone(),
                data,
            },
        );
        drop(members);
        Ok(id)
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        self.check_available()?;
        Ok(self
            .collections
            .get(collection)
            .map(|members| members.iter().map(|(_, data)| data.clone()).collect())
            .unwrap_or_default())
    }

    async fn subscribe_collection(&self, collection: &str) -> Result<Subscription<DocumentChange>> {
        self.check_available()?;
        Ok(listen(&self.listeners, collection_listeners, collection))
    }
}
