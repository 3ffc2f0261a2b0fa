//! Frame envelope: the metadata stamped onto every published frame.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata attached to a converted frame at publish time.
///
/// The sequence number wraps at `u64::MAX`; wraparound is acceptable, not an
/// error. The timestamp is wall clock at publish time, not hardware capture
/// time. The source id is fixed for the process lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameEnvelope {
    pub seq: u64,
    pub stamp_micros: u64,
    pub source_id: String,
}

impl FrameEnvelope {
    /// Build an envelope stamped with the current wall-clock time.
    pub fn stamp_now(seq: u64, source_id: &str) -> Self {
        Self {
            seq,
            stamp_micros: unix_micros(),
            source_id: source_id.to_string(),
        }
    }
}

/// Microseconds since the Unix epoch. A clock before the epoch stamps 0.
fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
