use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use uuid::Uuid;

/// Prefix of every generated journey ID.
pub const JOURNEY_ID_PREFIX: &str = "JOURNEY";

/// Allocates `JOURNEY_<date>_<time>_<seq>_<rand>` correlation IDs.
///
/// The sequence disambiguates starts within one clock tick; the random
/// suffix keeps IDs distinct across recorders and process restarts.
#[derive(Debug, Default)]
pub struct IdAllocator {
    sequence: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next ID.
    pub fn next_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        let random = Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{:06}_{}",
            JOURNEY_ID_PREFIX,
            Utc::now().format("%Y%m%d_%H%M%S"),
            seq,
            &random[..8]
        )
    }
}
