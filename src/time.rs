use chrono::{DateTime, Utc};

/// Current time as milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a JWT NumericDate (seconds) to epoch milliseconds
pub fn seconds_to_millis(seconds: i64) -> Option<i64> {
    seconds.checked_mul(1000)
}

/// Format a timestamp as the SigV4 `X-Amz-Date` value (`20150830T123600Z`)
pub fn amz_date(t: &DateTime<Utc>) -> String {
    t.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Format the date part used in the SigV4 credential scope (`20150830`)
pub fn amz_day(t: &DateTime<Utc>) -> String {
    t.format("%Y%m%d").to_string()
}
