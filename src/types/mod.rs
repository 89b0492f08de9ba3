pub mod call;
pub mod candidate;
pub mod events;

pub use call::{CallId, CandidateDirection, Role, SdpType, SessionDescription};
pub use candidate::IceCandidate;
pub use events::{EventBus, StateChange};
