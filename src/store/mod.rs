//! Shared-document store used as the signaling relay.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::StoreError;
pub use memory::InMemoryDocumentStore;
pub use traits::{
    ChangeKind, Document, DocumentChange, DocumentSnapshot, DocumentStore, Subscription,
    SubscriptionGuard,
};
