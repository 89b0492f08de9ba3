use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one call's signaling channel.
///
/// Chosen by the initiator (or generated), handed to the responder out of band.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a short numeric id, easy to read out to the other participant.
    pub fn generate() -> Self {
        let n: u32 = rand::rng().random_range(100_000..1_000_000);
        Self(n.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Which side of the offer/answer handshake this participant plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    /// Description type this role produces locally.
    pub fn local_description_type(self) -> SdpType {
        match self {
            Self::Initiator => SdpType::Offer,
            Self::Responder => SdpType::Answer,
        }
    }

    /// Description type this role expects from the peer.
    pub fn remote_description_type(self) -> SdpType {
        match self {
            Self::Initiator => SdpType::Answer,
            Self::Responder => SdpType::Offer,
        }
    }

    /// Candidate sub-channel this role writes to.
    pub fn local_candidates(self) -> CandidateDirection {
        match self {
            Self::Initiator => CandidateDirection::Offer,
            Self::Responder => CandidateDirection::Answer,
        }
    }

    /// Candidate sub-channel this role reads from.
    pub fn remote_candidates(self) -> CandidateDirection {
        match self {
            Self::Initiator => CandidateDirection::Answer,
            Self::Responder => CandidateDirection::Offer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer => f.write_str("offer"),
            Self::Answer => f.write_str("answer"),
        }
    }
}

/// One half of the offer/answer handshake, stored as `{type, sdp}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Candidate sub-channel, named after the description its writer produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateDirection {
    Offer,
    Answer,
}

impl CandidateDirection {
    pub fn collection(self) -> &'static str {
        match self {
            Self::Offer => "offerCandidates",
            Self::Answer => "answerCandidates",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_are_mirrored() {
        for role in [Role::Initiator, Role::Responder] {
            assert_ne!(role.local_description_type(), role.remote_description_type());
            assert_ne!(role.local_candidates(), role.remote_candidates());
        }
        assert_eq!(
            Role::Initiator.local_candidates(),
            Role::Responder.remote_candidates()
        );
    }

    #[test]
    fn test_description_wire_shape() {
        let value = serde_json::to_value(SessionDescription::offer("v=0")).unwrap();
        assert_eq!(value, serde_json::json!({ "type": "offer", "sdp": "v=0" }));

        let parsed: SessionDescription =
            serde_json::from_value(serde_json::json!({ "type": "answer", "sdp": "B" })).unwrap();
        assert_eq!(parsed, SessionDescription::answer("B"));
    }

    #[test]
    fn test_generated_call_id_is_numeric() {
        let id = CallId::generate();
        assert_eq!(id.as_str().len(), 6);
        assert!(id.as_str().chars().all(|c| c.is_ascii_digit()));
    }
}
