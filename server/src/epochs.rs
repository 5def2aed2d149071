//! Filecoin chain-epoch arithmetic.

use chrono::{DateTime, TimeZone, Utc};

/// Seconds per chain epoch.
pub const EPOCH_DURATION_SECONDS: i64 = 30;

/// Epochs per day at 30-second epochs.
pub const EPOCH_PER_DAY: i64 = 86_400 / EPOCH_DURATION_SECONDS;

/// Mainnet genesis: 2020-08-24T22:00:00Z.
pub const GENESIS_UNIX: i64 = 1_598_306_400;

/// Default deal duration when the caller supplies no epoch window:
/// the 540-day protocol maximum minus a two-day buffer.
pub const DEFAULT_DURATION: i64 = EPOCH_PER_DAY * 538;

/// Convert a wall-clock instant to a chain height. Instants before genesis
/// clamp to zero.
pub fn date_to_height(at: DateTime<Utc>) -> i64 {
    let seconds_since_genesis = at.timestamp() - GENESIS_UNIX;
    if seconds_since_genesis <= 0 {
        return 0;
    }
    seconds_since_genesis / EPOCH_DURATION_SECONDS
}

/// Chain height `days` days from now.
pub fn height_in_days(days: i64) -> i64 {
    date_to_height(Utc::now() + chrono::Duration::days(days))
}

/// The epoch window for a deal request expressed in days: a start height
/// `start_days` out and an end height covering the remaining duration.
pub fn epoch_window(start_days: i64, duration_days: i64) -> (i64, i64) {
    let start_epoch = height_in_days(start_days);
    let end_epoch = start_epoch + EPOCH_PER_DAY * (duration_days - start_days);
    (start_epoch, end_epoch)
}

#[allow(dead_code)]
pub fn genesis() -> DateTime<Utc> {
    Utc.timestamp_opt(GENESIS_UNIX, 0).unwrap()
}
