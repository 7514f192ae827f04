//! Target time parsing.
//!
//! The operator types the moment enrollment opens as 14 digits of local
//! time, `YYYYMMDDhhmmss`.

use chrono::{DateTime, Local, LocalResult, NaiveDateTime, TimeZone, Utc};

use crate::error::{CoreError, CoreResult};

/// Accepted target time layout.
pub const TARGET_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Parses a local `YYYYMMDDhhmmss` string into UTC.
pub fn parse_target_time(input: &str) -> CoreResult<DateTime<Utc>> {
    let naive = parse_naive(input)?;
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
        // repeated hour: take the earlier instant
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(invalid(input, "local time does not exist")),
    }
}

/// Parses the digits without applying a time zone.
pub fn parse_naive(input: &str) -> CoreResult<NaiveDateTime> {
    let input = input.trim();
    if input.len() != 14 || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(input, "need exactly 14 digits"));
    }
    NaiveDateTime::parse_from_str(input, TARGET_TIME_FORMAT)
        .map_err(|e| invalid(input, &e.to_string()))
}

fn invalid(input: &str, reason: &str) -> CoreError {
    CoreError::InvalidTargetTime {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_valid() {
        let naive = parse_naive("20250902130000").unwrap();
        assert_eq!((naive.year(), naive.month(), naive.day()), (2025, 9, 2));
        assert_eq!((naive.hour(), naive.minute(), naive.second()), (13, 0, 0));
        assert!(parse_target_time("20250902130000").is_ok());
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert!(parse_naive(" 20250902130000\n").is_ok());
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for input in ["", "2025-09-02 13:00", "2025090213000", "202509021300000", "2025090213000a"] {
            assert!(
                matches!(parse_naive(input), Err(CoreError::InvalidTargetTime { .. })),
                "accepted {input:?}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_out_of_range_fields() {
        assert!(parse_naive("20251302130000").is_err());
        assert!(parse_naive("20250902250000").is_err());
        assert!(parse_naive("20250230120000").is_err());
    }
}
