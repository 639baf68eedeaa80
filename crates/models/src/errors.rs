/// Validation failures raised when building or updating an integration
/// configuration. These are surfaced immediately on create/update and are
/// never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid host {host:?}")]
    InvalidHost { host: String },

    #[error("invalid base URL {url:?}: {detail}")]
    InvalidBaseUrl { url: String, detail: String },

    #[error("invalid file pattern {pattern:?}: {detail}")]
    InvalidPattern { pattern: String, detail: String },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),

    #[error("invalid time of day {0:?}, expected HH:MM")]
    InvalidTimeOfDay(String),

    #[error("`everyNHours` must be one of 2, 3, 4, 6, 8 or 12, got {0}")]
    InvalidHourInterval(u8),

    #[error("day of month must be between 1 and 31, got {0}")]
    InvalidDayOfMonth(u8),

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
        value: i64,
    },
}
