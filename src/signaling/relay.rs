use super::to_document;
use crate::error::CallError;
use crate::store::{ChangeKind, DocumentChange, DocumentStore, Subscription, SubscriptionGuard};
use crate::types::{CallId, CandidateDirection, IceCandidate};
use log::{trace, warn};
use std::sync::Arc;

/// Append-only candidate exchange over the store's candidate sub-collections.
#[derive(Clone)]
pub struct CandidateRelay {
    store: Arc<dyn DocumentStore>,
    root: String,
}

impl CandidateRelay {
    pub fn new(store: Arc<dyn DocumentStore>, root: impl Into<String>) -> Self {
        Self {
            store,
            root: root.into(),
        }
    }

    pub fn collection(&self, call_id: &CallId, direction: CandidateDirection) -> String {
        format!("{}/{}/{}", self.root, call_id, direction.collection())
    }

    /// Append one candidate. No retry: a lost candidate only costs path diversity.
    pub async fn publish(
        &self,
        call_id: &CallId,
        direction: CandidateDirection,
        candidate: &IceCandidate,
    ) -> Result<(), CallError> {
        let collection = self.collection(call_id, direction);
        let id = self
            .store
            .append(&collection, to_document(candidate)?)
            .await?;
        trace!("published candidate {id} to {collection}");
        Ok(())
    }

    /// Candidates added after this call. Existing ones are not replayed.
    pub async fn subscribe(
        &self,
        call_id: &CallId,
        direction: CandidateDirection,
    ) -> Result<CandidateFeed, CallError> {
        let collection = self.collection(call_id, direction);
        let inner = self.store.subscribe_collection(&collection).await?;
        Ok(CandidateFeed { collection, inner })
    }

    /// One-shot read of every candidate published so far.
    pub async fn list(
        &self,
        call_id: &CallId,
        direction: CandidateDirection,
    ) -> Result<Vec<IceCandidate>, CallError> {
        let collection = self.collection(call_id, direction);
        let docs = self.store.list(&collection).await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| {
                serde_json::from_value(serde_json::Value::Object(doc))
                    .inspect_err(|e| warn!("skipping malformed candidate in {collection}: {e}"))
                    .ok()
            })
            .collect())
    }
}

/// Live feed of newly added candidates for one direction of a call.
pub struct CandidateFeed {
    collection: String,
    inner: Subscription<DocumentChange>,
}

impl CandidateFeed {
    /// Next added candidate; `None` once the feed is cancelled.
    pub async fn next(&mut self) -> Option<IceCandidate> {
        while let Some(change) = self.inner.recv().await {
            if change.kind != ChangeKind::Added {
                continue;
            }
            match serde_json::from_value(serde_json::Value::Object(change.data)) {
                Ok(candidate) => return Some(candidate),
                Err(e) => warn!(
                    "skipping malformed candidate {} in {}: {e}",
                    change.id, self.collection
                ),
            }
        }
        None
    }

    pub fn guard(&self) -> SubscriptionGuard {
        self.inner.guard()
    }
}
