//! Application-wide constants
//!
//! This module contains the magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// DDC/CI command channel tuning
pub mod ddc {
    use std::time::Duration;

    /// Default number of attempts per logical get/set operation
    pub const DEFAULT_RETRY_COUNT: u32 = 3;

    /// Default sleep multiplier forwarded to the transport and used to scale
    /// the inter-command interval
    pub const DEFAULT_SLEEP_MULTIPLIER: f64 = 1.0;

    /// Per-attempt timeout for a single hardware round trip
    pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

    /// Timeout for the (much slower) capabilities query
    pub const CAPABILITIES_TIMEOUT: Duration = Duration::from_secs(30);

    /// Base delay between retry attempts; multiplied by the attempt number
    pub const RETRY_BACKOFF: Duration = Duration::from_millis(300);

    /// Base minimum interval between two commands on one channel,
    /// scaled by the sleep multiplier
    pub const MIN_COMMAND_INTERVAL: Duration = Duration::from_millis(100);
}

/// Screen content analysis tuning
pub mod analyzer {
    use std::time::Duration;

    /// Longest edge an image may have before analysis; larger captures are
    /// downsampled with a nearest-neighbor filter
    pub const MAX_ANALYSIS_EDGE: u32 = 200;

    /// Consecutive cycles a cached analysis may be reused when the
    /// fixed-point hash matches, before a full re-analysis is forced
    pub const MAX_UNCHANGED_REUSE: u32 = 4;

    /// Consecutive failures before the cached capture backend is dropped
    /// and the fallback chain is searched again
    pub const MAX_BACKEND_FAILURES: u32 = 3;

    /// Sleep slice for the capture loop; bounds how quickly stop is observed
    pub const SLEEP_SLICE: Duration = Duration::from_millis(100);

    /// Default interval between capture cycles
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

    /// Age under which a shared full-screen capture is reused across
    /// analyzer instances
    pub const SHARED_CAPTURE_MAX_AGE: Duration = Duration::from_millis(300);

    /// Bounded wait for the shared capture lock; callers fall back to their
    /// own capture when it expires
    pub const SHARED_CAPTURE_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

    /// Timeout for external screenshot tools
    pub const CAPTURE_TOOL_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Window focus watching
pub mod focus {
    use std::time::Duration;

    /// Poll slice between X11 event batches
    pub const POLL_SLICE: Duration = Duration::from_millis(100);
}

/// Configuration file locations
pub mod config {
    /// Directory under the user config dir
    pub const APP_DIR: &str = "monctl";

    /// Global configuration file name
    pub const FILENAME: &str = "config.toml";

    /// Subdirectory holding one file per detected monitor
    pub const MONITORS_DIR: &str = "monitors";

    /// Name of the reserved catch-all profile
    pub const DEFAULT_PROFILE: &str = "default";
}

/// Strings identifying our own control window; focus events for these never
/// trigger a profile switch
pub mod own_window {
    pub const WINDOW_CLASS: &str = "monctl";
    pub const TITLE_MARKER: &str = "Monitor Control";
}
