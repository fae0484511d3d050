//! Human-readable formatting for sizes, transfer speeds and durations.

use std::time::Duration;

const UNIT: f64 = 1024.0;
const SCALED_UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

/// Format a byte count using base-1024 units.
///
/// Values below 1 KiB are printed as whole bytes; everything else gets one
/// decimal place. Counts past the TiB range stay in TiB.
///
/// ```
/// use predator_core::format::format_bytes;
///
/// assert_eq!(format_bytes(512.0), "512 B");
/// assert_eq!(format_bytes(1536.0), "1.5 KiB");
/// ```
#[must_use]
pub fn format_bytes(bytes: f64) -> String {
    let bytes = if bytes.is_finite() && bytes > 0.0 {
        bytes
    } else {
        0.0
    };

    if bytes < UNIT {
        return format!("{bytes:.0} B");
    }

    let mut value = bytes / UNIT;
    let mut index = 0;
    while value >= UNIT && index < SCALED_UNITS.len() - 1 {
        value /= UNIT;
        index += 1;
    }

    format!("{value:.1} {}", SCALED_UNITS[index])
}

/// Format a byte count given as an integer.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    format_bytes(bytes as f64)
}

/// Format a transfer speed in bytes per second.
#[must_use]
pub fn format_speed(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format a remaining-time estimate as `MM:SS`, or `HH:MM:SS` from one hour up.
#[must_use]
pub fn format_eta(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// Like [`format_eta`], for a possibly negative number of seconds.
#[must_use]
pub fn format_eta_secs(secs: f64) -> String {
    if secs.is_finite() && secs > 0.0 {
        format_eta(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
    } else {
        format_eta(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_below_one_kib() {
        assert_eq!(format_bytes(0.0), "0 B");
        assert_eq!(format_bytes(512.0), "512 B");
        assert_eq!(format_bytes(1023.0), "1023 B");
    }

    #[test]
    fn test_format_bytes_scaled_units() {
        assert_eq!(format_bytes(1024.0), "1.0 KiB");
        assert_eq!(format_bytes(1536.0), "1.5 KiB");
        assert_eq!(format_bytes(1_048_576.0), "1.0 MiB");
        assert_eq!(format_bytes(1_073_741_824.0), "1.0 GiB");
        assert_eq!(format_bytes(1_099_511_627_776.0), "1.0 TiB");
    }

    #[test]
    fn test_format_bytes_stays_in_tib_past_the_unit_table() {
        let two_pib = 2.0 * 1024.0 * 1_099_511_627_776.0;
        assert_eq!(format_bytes(two_pib), "2048.0 TiB");
    }

    #[test]
    fn test_format_bytes_always_has_a_known_suffix() {
        let suffixes = [" B", " KiB", " MiB", " GiB", " TiB"];
        let mut value = 1.0_f64;
        while value < 1e18 {
            let text = format_bytes(value);
            assert!(
                suffixes.iter().any(|s| text.ends_with(s)),
                "unexpected suffix in {text}"
            );
            value *= 7.3;
        }
    }

    #[test]
    fn test_format_bytes_treats_garbage_as_zero() {
        assert_eq!(format_bytes(-5.0), "0 B");
        assert_eq!(format_bytes(f64::NAN), "0 B");
    }

    #[test]
    fn test_format_size_matches_catalog_sizes() {
        assert_eq!(format_size(10_000_000), "9.5 MiB");
        assert_eq!(format_size(30_000_000), "28.6 MiB");
        assert_eq!(format_size(60_000_000), "57.2 MiB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(0.0), "0 B/s");
        assert_eq!(format_speed(1536.0), "1.5 KiB/s");
        assert_eq!(format_speed(10_485_760.0), "10.0 MiB/s");
    }

    #[test]
    fn test_format_eta_minutes() {
        assert_eq!(format_eta(Duration::ZERO), "00:00");
        assert_eq!(format_eta(Duration::from_secs(65)), "01:05");
        assert_eq!(format_eta(Duration::from_secs(3599)), "59:59");
        assert_eq!(format_eta(Duration::from_millis(1999)), "00:01");
    }

    #[test]
    fn test_format_eta_hours() {
        assert_eq!(format_eta(Duration::from_secs(3600)), "01:00:00");
        assert_eq!(format_eta(Duration::from_secs(3665)), "01:01:05");
        assert_eq!(format_eta(Duration::from_secs(36_000)), "10:00:00");
    }

    #[test]
    fn test_format_eta_secs_clamps_negative() {
        assert_eq!(format_eta_secs(-12.0), "00:00");
        assert_eq!(format_eta_secs(0.0), "00:00");
        assert_eq!(format_eta_secs(65.4), "01:05");
    }

    #[test]
    fn test_format_eta_secs_saturates_huge_values() {
        let text = format_eta_secs(1e20);
        assert_eq!(text, format_eta(Duration::MAX));
        assert!(text.ends_with(":15"));
    }
}
