pub mod calls;
pub mod config;
pub mod error;
pub mod media;
pub mod signaling;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use calls::{CallSessionController, CallView, NegotiationEngine, NegotiationState};
pub use config::{CallConfig, EngineConfig};
pub use error::CallError;
