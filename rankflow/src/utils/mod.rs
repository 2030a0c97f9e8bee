//! Utility functions for timestamp and duration handling.

pub mod timestamps;

pub use timestamps::{format_iso8601, iso_timestamp, millis, now_utc, Timestamp};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        // RFC3339: YYYY-MM-DDTHH:MM:SS.ssssss+00:00
        assert!(ts.contains('T'));
        assert!(ts.ends_with("+00:00"));
    }
}
