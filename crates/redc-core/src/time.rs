//! Time utilities.
//!
//! # Tiger Style
//!
//! - No `.expect()` or `.unwrap()` - safe fallback to 0
//! - Inline for hot path performance

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use chrono::Local;
use chrono::TimeZone;
use chrono::Utc;

/// Layout used for human-facing timestamps in project records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Get current Unix timestamp in milliseconds.
///
/// Returns 0 if system time is before UNIX epoch.
#[inline]
pub fn current_time_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Render a Unix millisecond timestamp in local time as `YYYY-MM-DD HH:MM:SS`.
///
/// Out-of-range inputs render as the epoch.
pub fn format_timestamp(unix_ms: u64) -> String {
    let millis = i64::try_from(unix_ms).unwrap_or(i64::MAX);
    let utc = Utc.timestamp_millis_opt(millis).single().unwrap_or_default();
    utc.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string()
}

/// Current local time formatted with [`TIMESTAMP_FORMAT`].
pub fn now_timestamp() -> String {
    format_timestamp(current_time_ms())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_is_after_2020() {
        assert!(current_time_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_format_timestamp_shape() {
        let rendered = format_timestamp(1_700_000_000_000);
        assert_eq!(rendered.len(), 19);
        assert_eq!(&rendered[4..5], "-");
        assert_eq!(&rendered[13..14], ":");
    }
}
