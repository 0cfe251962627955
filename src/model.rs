//! Block and transaction records written by the pipeline, plus the
//! normalized block height type every component compares against.

pub mod block;
pub mod height;
pub mod transaction;

pub use block::{BlockId, BlockRecord};
pub use height::BlockHeight;
pub use transaction::{TransactionRecord, TxStatus};

/// Returns `true` when `value` is a `0x`-prefixed, 32-byte hex hash.
pub fn is_valid_hash(value: &str) -> bool {
    match value.strip_prefix("0x") {
        Some(body) => body.len() == 64 && hex::decode(body).is_ok(),
        None => false,
    }
}

/// Lowercases a hash so lookups are not sensitive to checksum casing.
pub fn normalize_hash(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

/// Milliseconds since the Unix epoch, used for `processed_at` and publish times.
pub fn unix_millis_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}
