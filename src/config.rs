use std::time::Duration;

/// Port the original BitTorrent clients listened on; trackers still expect something in this range.
pub const DEFAULT_PORT: u16 = 6881;
pub const DEFAULT_TRACKER_TIMEOUT: Duration = Duration::from_secs(15);

/// Settings for a single tracker announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceConfig {
    /// Port reported to the tracker as the one this client accepts peers on.
    pub port: u16,
    /// Upper bound on the whole HTTP exchange with the tracker.
    pub timeout: Duration,
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        AnnounceConfig {
            port: DEFAULT_PORT,
            timeout: DEFAULT_TRACKER_TIMEOUT,
        }
    }
}

impl AnnounceConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
