//! Time utilities for turnstiled
//!
//! All grant expiries are absolute UTC instants persisted in the store,
//! so the whole engine runs on `DateTime<Utc>`.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `TURNSTILE_MOCK_TIME` environment variable can be
//! set to override the system time for all time-sensitive operations.
//! This is useful for exercising grant windows without waiting them out.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (UTC), e.g. `2026-03-01 09:00:00`
//!
//! ```bash
//! TURNSTILE_MOCK_TIME="2026-03-01 09:00:00" cargo run -p turnstiled
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "TURNSTILE_MOCK_TIME";

/// Cached offset between mock time and real time at process start.
/// Mock time advances naturally from that anchor.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                match NaiveDateTime::parse_from_str(&mock_time_str, "%Y-%m-%d %H:%M:%S") {
                    Ok(naive_dt) => {
                        let mock_dt = naive_dt.and_utc();
                        let offset = mock_dt.signed_duration_since(Utc::now());
                        tracing::info!(
                            mock_time = %mock_time_str,
                            offset_secs = offset.num_seconds(),
                            "Mock time enabled"
                        );
                        return Some(offset);
                    }
                    Err(_) => {
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            expected_format = "%Y-%m-%d %H:%M:%S",
                            "Invalid mock time format"
                        );
                    }
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current UTC time, respecting mock time settings in debug builds.
///
/// In release builds, this always returns the real system time.
pub fn now() -> DateTime<Utc> {
    let real_now = Utc::now();

    if let Some(offset) = get_mock_time_offset() {
        real_now + offset
    } else {
        real_now
    }
}

/// Time left until `until`, or zero if it has already passed.
///
/// This is the single helper both the engine and any "time remaining"
/// rendering go through, so the two can never disagree.
pub fn remaining_until(until: DateTime<Utc>, from: DateTime<Utc>) -> Duration {
    (until - from).to_std().unwrap_or(Duration::ZERO)
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_returns_time() {
        let t = now();
        assert!(t.timestamp() > 0);
    }

    #[test]
    fn test_remaining_until() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::minutes(30);

        assert_eq!(remaining_until(t1, t0), Duration::from_secs(1800));
        // Already passed: saturates to zero
        assert_eq!(remaining_until(t0, t1), Duration::ZERO);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_mock_time_env_var_name() {
        assert_eq!(MOCK_TIME_ENV_VAR, "TURNSTILE_MOCK_TIME");
    }

    #[test]
    fn test_parse_mock_time_format() {
        let valid = [
            "2026-03-01 09:00:00",
            "2026-01-01 00:00:00",
            "2026-12-31 23:59:59",
        ];
        for s in &valid {
            assert!(
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok(),
                "expected '{}' to parse",
                s
            );
        }
    }

    #[test]
    fn test_parse_mock_time_invalid_formats() {
        let invalid = [
            "2026-03-01",
            "09:00:00",
            "2026/03/01 09:00:00",
            "2026-03-01T09:00:00",
            "",
            "not a date",
        ];
        for s in &invalid {
            assert!(
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_err(),
                "expected '{}' to fail parsing",
                s
            );
        }
    }

    #[test]
    fn test_now_consistency() {
        let t1 = now();
        std::thread::sleep(Duration::from_millis(50));
        let t2 = now();

        assert!(t2 > t1, "Time should advance forward");
    }
}
