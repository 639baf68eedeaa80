use crate::errors::ConfigError;
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hour intervals that `everyNHours` accepts. Anything else would drift
/// relative to midnight and is rejected.
pub const VALID_HOUR_INTERVALS: &[u8] = &[2, 3, 4, 6, 8, 12];

/// When an integration syncs. The frequency is translated into a cron
/// expression evaluated in the integration's timezone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub enabled: bool,
    pub frequency: Frequency,
    /// IANA timezone name the frequency is evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Schedule {
    /// Validates the frequency and timezone, returning the rendered cron
    /// expression on success.
    pub fn validate(&self) -> Result<String, ConfigError> {
        let _ = self.tz()?;
        let expr = self.frequency.to_cron()?;
        // The frequency table only renders expressions the cron crate can
        // parse, but keep the parse here so a bug surfaces as ConfigError
        // instead of a scheduler panic.
        cron::Schedule::from_str(&expr)
            .map_err(|err| ConfigError::InvalidSchedule(err.to_string()))?;
        Ok(expr)
    }

    pub fn tz(&self) -> Result<chrono_tz::Tz, ConfigError> {
        chrono_tz::Tz::from_str(&self.timezone)
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }

    /// The next fire instant strictly after `now`, or None for an invalid
    /// schedule.
    pub fn next_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let tz = self.tz().ok()?;
        let expr = self.frequency.to_cron().ok()?;
        let schedule = cron::Schedule::from_str(&expr).ok()?;
        schedule
            .after(&now.with_timezone(&tz))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// The next `n` fire instants after `now`, for inspection and tests.
    pub fn upcoming(&self, now: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        let Ok(tz) = self.tz() else { return Vec::new() };
        let Ok(expr) = self.frequency.to_cron() else {
            return Vec::new();
        };
        let Ok(schedule) = cron::Schedule::from_str(&expr) else {
            return Vec::new();
        };
        schedule
            .after(&now.with_timezone(&tz))
            .take(n)
            .map(|t| t.with_timezone(&Utc))
            .collect()
    }
}

/// Supported sync frequencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frequency {
    Hourly,
    #[serde(rename_all = "camelCase")]
    EveryHours { hours: u8 },
    Daily {
        at: TimeOfDay,
    },
    #[serde(rename_all = "camelCase")]
    Weekly {
        at: TimeOfDay,
        #[serde(default)]
        days: Vec<Weekday>,
    },
    #[serde(rename_all = "camelCase")]
    Monthly {
        at: TimeOfDay,
        #[serde(default = "default_day_of_month")]
        day: u8,
    },
}

fn default_day_of_month() -> u8 {
    1
}

impl Frequency {
    /// Renders this frequency as a six-field cron expression
    /// (`sec min hour dom month dow`).
    pub fn to_cron(&self) -> Result<String, ConfigError> {
        match self {
            Frequency::Hourly => Ok("0 0 * * * *".to_string()),
            Frequency::EveryHours { hours } => {
                if !VALID_HOUR_INTERVALS.contains(hours) {
                    return Err(ConfigError::InvalidHourInterval(*hours));
                }
                Ok(format!("0 0 */{hours} * * *"))
            }
            Frequency::Daily { at } => Ok(format!("0 {} {} * * *", at.minute, at.hour)),
            Frequency::Weekly { at, days } => {
                let days = if days.is_empty() {
                    // Weekly without explicit days means Monday.
                    Weekday::Mon.cron_token().to_string()
                } else {
                    let mut sorted = days.clone();
                    sorted.sort();
                    sorted.dedup();
                    sorted
                        .iter()
                        .map(|d| d.cron_token())
                        .collect::<Vec<_>>()
                        .join(",")
                };
                Ok(format!("0 {} {} * * {days}", at.minute, at.hour))
            }
            Frequency::Monthly { at, day } => {
                if !(1..=31).contains(day) {
                    return Err(ConfigError::InvalidDayOfMonth(*day));
                }
                Ok(format!("0 {} {} {day} * *", at.minute, at.hour))
            }
        }
    }
}

/// A wall-clock time of day, serialized as `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self, ConfigError> {
        if hour > 23 {
            return Err(ConfigError::OutOfRange {
                field: "hour",
                min: 0,
                max: 23,
                value: hour as i64,
            });
        }
        if minute > 59 {
            return Err(ConfigError::OutOfRange {
                field: "minute",
                min: 0,
                max: 59,
                value: minute as i64,
            });
        }
        Ok(Self { hour, minute })
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidTimeOfDay(s.to_string());
        let (hour, minute) = s.split_once(':').ok_or_else(invalid)?;
        let hour: u8 = hour.parse().map_err(|_| invalid())?;
        let minute: u8 = minute.parse().map_err(|_| invalid())?;
        TimeOfDay::new(hour, minute).map_err(|_| invalid())
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Days of the week for weekly schedules.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    pub fn cron_token(&self) -> &'static str {
        match self {
            Weekday::Mon => "MON",
            Weekday::Tue => "TUE",
            Weekday::Wed => "WED",
            Weekday::Thu => "THU",
            Weekday::Fri => "FRI",
            Weekday::Sat => "SAT",
            Weekday::Sun => "SUN",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};
    use pretty_assertions::assert_eq;

    fn schedule(frequency: Frequency, timezone: &str) -> Schedule {
        Schedule {
            enabled: true,
            frequency,
            timezone: timezone.to_string(),
        }
    }

    #[test]
    fn hourly_fires_on_the_hour() {
        let s = schedule(Frequency::Hourly, "UTC");
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 9, 30, 0).unwrap();
        let fires = s.upcoming(now, 3);
        assert_eq!(
            fires,
            vec![
                Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 1, 15, 11, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn every_n_hours_fires_at_multiples_of_n() {
        for &hours in VALID_HOUR_INTERVALS {
            let s = schedule(Frequency::EveryHours { hours }, "UTC");
            let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 30, 0).unwrap();
            for fire in s.upcoming(now, 5) {
                assert_eq!(fire.minute(), 0, "interval {hours}");
                assert_eq!(
                    fire.hour() % hours as u32,
                    0,
                    "interval {hours} fired at hour {}",
                    fire.hour()
                );
            }
        }
    }

    #[test]
    fn every_n_hours_rejects_unsupported_intervals() {
        for hours in [0u8, 1, 5, 7, 24] {
            let freq = Frequency::EveryHours { hours };
            assert!(freq.to_cron().is_err(), "interval {hours} should fail");
        }
    }

    #[test]
    fn daily_fires_at_the_given_local_time() {
        let s = schedule(
            Frequency::Daily {
                at: "02:30".parse().unwrap(),
            },
            "Europe/Stockholm",
        );
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        let fires = s.upcoming(now, 2);
        // 02:30 CET == 01:30 UTC in January.
        assert_eq!(
            fires,
            vec![
                Utc.with_ymd_and_hms(2025, 1, 10, 1, 30, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 1, 11, 1, 30, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn weekly_defaults_to_monday() {
        let s = schedule(
            Frequency::Weekly {
                at: "06:00".parse().unwrap(),
                days: vec![],
            },
            "UTC",
        );
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        for fire in s.upcoming(now, 4) {
            assert_eq!(fire.weekday(), chrono::Weekday::Mon);
            assert_eq!((fire.hour(), fire.minute()), (6, 0));
        }
    }

    #[test]
    fn weekly_respects_multiple_days() {
        let s = schedule(
            Frequency::Weekly {
                at: "12:15".parse().unwrap(),
                days: vec![Weekday::Thu, Weekday::Mon],
            },
            "UTC",
        );
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let days: Vec<_> = s.upcoming(now, 4).iter().map(|f| f.weekday()).collect();
        assert_eq!(
            days,
            vec![
                chrono::Weekday::Mon,
                chrono::Weekday::Thu,
                chrono::Weekday::Mon,
                chrono::Weekday::Thu,
            ]
        );
    }

    #[test]
    fn monthly_defaults_to_the_first() {
        let raw = serde_json::json!({"type": "monthly", "at": "03:00"});
        let freq: Frequency = serde_json::from_value(raw).unwrap();
        assert_eq!(
            freq,
            Frequency::Monthly {
                at: "03:00".parse().unwrap(),
                day: 1,
            }
        );

        let s = schedule(freq, "UTC");
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();
        let fires = s.upcoming(now, 2);
        assert_eq!(
            fires,
            vec![
                Utc.with_ymd_and_hms(2025, 2, 1, 3, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 3, 1, 3, 0, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let s = schedule(Frequency::Hourly, "Mars/Olympus_Mons");
        assert!(matches!(
            s.validate(),
            Err(ConfigError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn time_of_day_round_trips() {
        for raw in ["00:00", "09:05", "23:59"] {
            let parsed: TimeOfDay = raw.parse().unwrap();
            assert_eq!(parsed.to_string(), raw);
        }
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
    }
}
