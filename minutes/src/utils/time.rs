//! `HH:MM:SS` clock helpers used for transcript and capture timestamps.

/// Format seconds as `HH:MM:SS`, truncating fractions and clamping negatives to zero.
pub fn sec_to_hms(sec: f64) -> String {
    let total = if sec.is_finite() && sec > 0.0 {
        sec as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Parse `HH:MM:SS` or `MM:SS` into whole seconds.
///
/// Non-numeric parts are ignored; anything that does not leave two or three
/// numeric parts parses as zero.
pub fn hms_to_sec(hms: &str) -> u64 {
    let parts: Vec<u64> = hms
        .split(':')
        .filter_map(|p| {
            let p = p.trim();
            if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) {
                p.parse().ok()
            } else {
                None
            }
        })
        .collect();
    match parts.as_slice() {
        [h, m, s] => h * 3600 + m * 60 + s,
        [m, s] => m * 60 + s,
        _ => 0,
    }
}

/// Whether `hms` looks like a clock timestamp at all.
pub fn is_hms(hms: &str) -> bool {
    let parts: Vec<&str> = hms.trim().split(':').collect();
    (2..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, "00:00:00")]
    #[case(59.9, "00:00:59")]
    #[case(3725.0, "01:02:05")]
    #[case(-4.0, "00:00:00")]
    #[case(f64::NAN, "00:00:00")]
    fn test_sec_to_hms(#[case] sec: f64, #[case] expected: &str) {
        assert_eq!(sec_to_hms(sec), expected);
    }

    #[rstest]
    #[case("01:02:05", 3725)]
    #[case("02:05", 125)]
    #[case("garbage", 0)]
    #[case("", 0)]
    fn test_hms_to_sec(#[case] hms: &str, #[case] expected: u64) {
        assert_eq!(hms_to_sec(hms), expected);
    }

    #[test]
    fn test_is_hms() {
        assert!(is_hms("00:10:00"));
        assert!(is_hms("10:00"));
        assert!(!is_hms("10"));
        assert!(!is_hms("aa:bb"));
    }
}
