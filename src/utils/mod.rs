pub mod hash;

pub use hash::{hash_json, sha256, Hash, HashParseError};

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
