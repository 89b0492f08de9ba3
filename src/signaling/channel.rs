use super::to_document;
use crate::error::CallError;
use crate::store::{Document, DocumentSnapshot, DocumentStore, Subscription, SubscriptionGuard};
use crate::types::{CallId, SdpType, SessionDescription};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Contents of a call document. Either half may still be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
}

impl ChannelSnapshot {
    pub fn description(&self, sdp_type: SdpType) -> Option<&SessionDescription> {
        match sdp_type {
            SdpType::Offer => self.offer.as_ref(),
            SdpType::Answer => self.answer.as_ref(),
        }
    }

    fn from_document(doc: Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(doc))
    }
}

/// One call's document holding the offer and answer.
#[derive(Clone)]
pub struct SessionChannel {
    store: Arc<dyn DocumentStore>,
    root: String,
}

impl SessionChannel {
    pub fn new(store: Arc<dyn DocumentStore>, root: impl Into<String>) -> Self {
        Self {
            store,
            root: root.into(),
        }
    }

    pub fn path(&self, call_id: &CallId) -> String {
        format!("{}/{}", self.root, call_id)
    }

    /// Create the empty placeholder document.
    pub async fn create(&self, call_id: &CallId) -> Result<(), CallError> {
        self.store
            .create(&self.path(call_id), Document::new())
            .await
            .map_err(CallError::from)
    }

    pub async fn write_offer(
        &self,
        call_id: &CallId,
        offer: &SessionDescription,
    ) -> Result<(), CallError> {
        self.write_description(call_id, "offer", SdpType::Offer, offer)
            .await
    }

    pub async fn write_answer(
        &self,
        call_id: &CallId,
        answer: &SessionDescription,
    ) -> Result<(), CallError> {
        self.write_description(call_id, "answer", SdpType::Answer, answer)
            .await
    }

    /// Null out the answer field so a reused channel starts without one.
    pub async fn clear_answer(&self, call_id: &CallId) -> Result<(), CallError> {
        let mut fields = Document::new();
        fields.insert("answer".to_string(), serde_json::Value::Null);
        self.store.merge(&self.path(call_id), fields).await?;
        Ok(())
    }

    async fn write_description(
        &self,
        call_id: &CallId,
        field: &str,
        expected: SdpType,
        desc: &SessionDescription,
    ) -> Result<(), CallError> {
        if desc.sdp_type != expected {
            return Err(CallError::ProtocolViolation(format!(
                "cannot store a {} description in the {field} field",
                desc.sdp_type
            )));
        }
        let mut fields = Document::new();
        fields.insert(field.to_string(), to_document(desc)?.into());
        self.store.merge(&self.path(call_id), fields).await?;
        debug!("wrote {field} to {}", self.path(call_id));
        Ok(())
    }

    /// One-shot fetch; `None` if the document does not exist yet.
    pub async fn read(&self, call_id: &CallId) -> Result<Option<ChannelSnapshot>, CallError> {
        let Some(doc) = self.store.get(&self.path(call_id)).await? else {
            return Ok(None);
        };
        let snapshot = ChannelSnapshot::from_document(doc).map_err(|e| {
            CallError::ProtocolViolation(format!("malformed call document: {e}"))
        })?;
        Ok(Some(snapshot))
    }

    /// Snapshots after every mutation, the caller's own writes included.
    pub async fn subscribe(&self, call_id: &CallId) -> Result<ChannelFeed, CallError> {
        let inner = self.store.subscribe(&self.path(call_id)).await?;
        Ok(ChannelFeed { inner })
    }
}

pub struct ChannelFeed {
    inner: Subscription<DocumentSnapshot>,
}

impl ChannelFeed {
    pub async fn next(&mut self) -> Option<ChannelSnapshot> {
        while let Some(snapshot) = self.inner.recv().await {
            let Some(doc) = snapshot.data else {
                return Some(ChannelSnapshot::default());
            };
            match ChannelSnapshot::from_document(doc) {
                Ok(parsed) => return Some(parsed),
                Err(e) => warn!("skipping malformed snapshot of {}: {e}", snapshot.path),
            }
        }
        None
    }

    pub fn guard(&self) -> SubscriptionGuard {
        self.inner.guard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;

    fn channel() -> (Arc<InMemoryDocumentStore>, SessionChannel) {
        let store = Arc::new(InMemoryDocumentStore::new());
        (store.clone(), SessionChannel::new(store, "calls"))
    }

    #[tokio::test]
    async fn test_create_is_exclusive() {
        let (_store, channel) = channel();
        let id = CallId::new("1234");
        channel.create(&id).await.unwrap();
        assert!(matches!(
            channel.create(&id).await,
            Err(CallError::AlreadyExists(_))
        ));
        assert_eq!(channel.read(&id).await.unwrap(), Some(ChannelSnapshot::default()));
    }

    #[tokio::test]
    async fn test_offer_then_answer() {
        let (_store, channel) = channel();
        let id = CallId::new("1234");
        channel.create(&id).await.unwrap();
        channel
            .write_offer(&id, &SessionDescription::offer("A"))
            .await
            .unwrap();
        channel
            .write_answer(&id, &SessionDescription::answer("B"))
            .await
            .unwrap();

        let snapshot = channel.read(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.offer, Some(SessionDescription::offer("A")));
        assert_eq!(snapshot.answer, Some(SessionDescription::answer("B")));
    }

    #[tokio::test]
    async fn test_rejects_mismatched_description() {
        let (_store, channel) = channel();
        let id = CallId::new("1234");
        channel.create(&id).await.unwrap();
        let err = channel
            .write_offer(&id, &SessionDescription::answer("B"))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_answer_requires_document() {
        let (_store, channel) = channel();
        let err = channel
            .write_answer(&CallId::new("nope"), &SessionDescription::answer("B"))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_subscription_includes_own_writes() {
        let (_store, channel) = channel();
        let id = CallId::new("1234");
        channel.create(&id).await.unwrap();
        let mut feed = channel.subscribe(&id).await.unwrap();

        channel
            .write_offer(&id, &SessionDescription::offer("A"))
            .await
            .unwrap();

        let snapshot = feed.next().await.unwrap();
        assert_eq!(snapshot.offer, Some(SessionDescription::offer("A")));
        assert!(snapshot.answer.is_none());
    }

    #[tokio::test]
    async fn test_cleared_answer_reads_as_missing() {
        let (_store, channel) = channel();
        let id = CallId::new("1234");
        channel.create(&id).await.unwrap();
        channel
            .write_answer(&id, &SessionDescription::answer("B"))
            .await
            .unwrap();
        channel.clear_answer(&id).await.unwrap();

        assert_eq!(channel.read(&id).await.unwrap().unwrap().answer, None);
    }

    #[tokio::test]
    async fn test_read_missing_document() {
        let (_store, channel) = channel();
        assert_eq!(channel.read(&CallId::new("none")).await.unwrap(), None);
    }
}
