use std::path::PathBuf;
use std::time::Duration;

/// Per-request timeout for web probes and favicon downloads.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Run log capacity; reaching it evicts the oldest half.
pub const LOG_CAPACITY: usize = 100;

/// Prober activity never pushes progress past this; the probe phase owns 90..=100.
pub const PROBE_PROGRESS_CAP: u8 = 90;

/// Cadence of status frames on the SSE stream.
pub const STREAM_INTERVAL: Duration = Duration::from_secs(1);

/// Full TCP port space handed to the scanner.
pub const SCAN_PORT_RANGE: &str = "1-65535";

/// Tunables of the discovery engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub fetch_timeout: Duration,
    /// Directory favicons are written to.
    pub icons_dir: PathBuf,
    /// URL prefix the icons directory is served under.
    pub icons_url_prefix: String,
    /// Explicit scanner binary; when unset the binary is searched for.
    pub nmap_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Engine config rooted at a static directory: icons go to `<static_dir>/icons`.
    pub fn with_static_dir(static_dir: impl Into<PathBuf>) -> Self {
        Self {
            icons_dir: static_dir.into().join("icons"),
            ..Self::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            icons_dir: PathBuf::from("static").join("icons"),
            icons_url_prefix: "/static/icons".to_string(),
            nmap_path: None,
        }
    }
}
