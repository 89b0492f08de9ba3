//! Network candidates exchanged while trickling.

use serde::{Deserialize, Serialize};

/// A discovered network path, stored in the shape the browser's
/// `RTCIceCandidate.toJSON()` produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// The candidate line (e.g., "candidate:1 1 UDP 2130706431 192.168.1.1 8888 typ host")
    pub candidate: String,
    /// SDP media stream identification (e.g., "0" for audio)
    #[serde(default)]
    pub sdp_mid: Option<String>,
    /// SDP media line index
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }

    pub fn with_sdp_mid(mut self, sdp_mid: impl Into<String>) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self
    }

    pub fn with_sdp_m_line_index(mut self, index: u16) -> Self {
        self.sdp_m_line_index = Some(index);
        self
    }

    pub fn with_username_fragment(mut self, ufrag: impl Into<String>) -> Self {
        self.username_fragment = Some(ufrag.into());
        self
    }
}
