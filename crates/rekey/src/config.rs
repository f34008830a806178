//! Session configuration.

use std::time::Duration;

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RekeyConfig {
    /// Groups fetched per page during the re-wrap pass.
    pub rewrap_page_size: usize,
    /// Maximum identity-group hops when resolving "assume".
    pub max_assume_depth: usize,
    /// Retries of a version reservation that hit `VersionConflict`.
    pub conflict_retries: u32,
    /// Wait before each retry, giving an abandoned reservation time to
    /// expire.
    pub conflict_backoff: Duration,
}

impl Default for RekeyConfig {
    fn default() -> Self {
        Self {
            rewrap_page_size: 50,
            max_assume_depth: 4,
            conflict_retries: 1,
            conflict_backoff: Duration::from_millis(50),
        }
    }
}

impl RekeyConfig {
    pub fn with_rewrap_page_size(mut self, size: usize) -> Self {
        self.rewrap_page_size = size.max(1);
        self
    }

    pub fn with_max_assume_depth(mut self, depth: usize) -> Self {
        self.max_assume_depth = depth;
        self
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn with_conflict_backoff(mut self, backoff: Duration) -> Self {
        self.conflict_backoff = backoff;
        self
    }
}
