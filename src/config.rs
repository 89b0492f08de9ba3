use crate::media::MediaConstraints;
use std::time::Duration;

/// Configuration for a negotiation engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Close the attempt if it has not connected within this window.
    /// `None` waits indefinitely.
    pub negotiation_timeout: Option<Duration>,
    /// Store path under which call documents live.
    pub channel_root: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Some(Duration::from_secs(30)),
            channel_root: "calls".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CallConfig {
    pub constraints: MediaConstraints,
    pub engine: EngineConfig,
}
