//! Sync scheduling by time of day and day of week.
//!
//! The content source is polled at one fixed local time on selected days,
//! by default every day at midnight UTC.
//!
//! # Example Schedule (YAML)
//!
//! ```yaml
//! timezone: "Europe/Berlin"
//! time: "03:30"
//! days: weekdays
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use ditto::schedule::SyncSchedule;
//!
//! let schedule = SyncSchedule::from_yaml("time: \"03:30\"")?;
//! tokio::time::sleep(schedule.until_next_run()?).await;
//! ```

use chrono::{DateTime, Datelike, Days, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::Error;

/// When the sync job runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSchedule {
    /// Timezone for interpreting `time` (e.g., "America/New_York")
    pub timezone: String,
    /// Local time of day (HH:MM, 24-hour format)
    pub time: String,
    /// Days the job runs on
    pub days: DaySelector,
}

/// Day selector for schedules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DaySelector {
    /// A specific list of days (e.g., ["mon", "tue", "wed"])
    List(Vec<String>),
    /// A named group: "all", "weekdays", "weekends", or a single day name
    Named(String),
}

impl Default for SyncSchedule {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            time: "00:00".to_string(),
            days: DaySelector::Named("all".to_string()),
        }
    }
}

impl SyncSchedule {
    /// Parse a schedule from a YAML string. Omitted fields take their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let schedule: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Invalid schedule YAML: {}", e)))?;
        schedule.validate()?;
        Ok(schedule)
    }

    /// Check timezone, time and day names.
    pub fn validate(&self) -> Result<(), Error> {
        self.tz()?;
        self.local_time()?;
        let names: Vec<&str> = match &self.days {
            DaySelector::Named(name) => match name.to_lowercase().as_str() {
                "all" | "weekdays" | "weekends" => Vec::new(),
                _ => vec![name.as_str()],
            },
            DaySelector::List(days) if days.is_empty() => {
                return Err(Error::Config("schedule day list is empty".to_string()));
            }
            DaySelector::List(days) => days.iter().map(String::as_str).collect(),
        };
        for name in names {
            if weekday_from_str(name).is_none() {
                return Err(Error::Config(format!("Unknown day '{}' in schedule", name)));
            }
        }
        Ok(())
    }

    fn tz(&self) -> Result<Tz, Error> {
        self.timezone
            .parse()
            .map_err(|_| Error::Config(format!("Unknown timezone '{}'", self.timezone)))
    }

    fn local_time(&self) -> Result<NaiveTime, Error> {
        parse_time(&self.time)
            .ok_or_else(|| Error::Config(format!("Invalid schedule time '{}'", self.time)))
    }

    /// The first scheduled instant strictly after `after`.
    ///
    /// Local times skipped by a DST transition are skipped for that day.
    pub fn next_run_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, Error> {
        let tz = self.tz()?;
        let time = self.local_time()?;
        let today = after.with_timezone(&tz).date_naive();

        for offset in 0..=7 {
            let Some(date) = today.checked_add_days(Days::new(offset)) else {
                break;
            };
            if !self.day_matches(date.weekday()) {
                continue;
            }
            let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() else {
                continue;
            };
            let candidate = candidate.with_timezone(&Utc);
            if candidate > after {
                return Ok(candidate);
            }
        }
        Err(Error::Config("schedule never matches any day".to_string()))
    }

    /// Time left until the next scheduled run.
    pub fn until_next_run(&self) -> Result<std::time::Duration, Error> {
        let now = Utc::now();
        let next = self.next_run_after(now)?;
        tracing::debug!(next = %next, "Next sync scheduled");
        Ok((next - now).to_std().unwrap_or_default())
    }

    /// Check if the schedule runs on the given weekday.
    fn day_matches(&self, weekday: Weekday) -> bool {
        match &self.days {
            DaySelector::Named(name) => match name.to_lowercase().as_str() {
                "all" => true,
                "weekdays" => matches!(
                    weekday,
                    Weekday::Mon | Weekday::Tue | Weekday::Wed | Weekday::Thu | Weekday::Fri
                ),
                "weekends" => matches!(weekday, Weekday::Sat | Weekday::Sun),
                _ => weekday_from_str(name) == Some(weekday),
            },
            DaySelector::List(days) => days.iter().any(|d| weekday_from_str(d) == Some(weekday)),
        }
    }
}

/// Parse a time string (HH:MM) into NaiveTime.
fn parse_time(s: &str) -> Option<NaiveTime> {
    let (hour, minute) = s.trim().split_once(':')?;
    NaiveTime::from_hms_opt(hour.parse().ok()?, minute.parse().ok()?, 0)
}

/// Convert a day name to Weekday.
fn weekday_from_str(s: &str) -> Option<Weekday> {
    match s.to_lowercase().as_str() {
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tuesday" => Some(Weekday::Tue),
        "wed" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("09:00"), NaiveTime::from_hms_opt(9, 0, 0));
        assert_eq!(parse_time("23:30"), NaiveTime::from_hms_opt(23, 30, 0));
        assert_eq!(parse_time("24:00"), None);
        assert_eq!(parse_time("invalid"), None);
        assert_eq!(parse_time("12"), None);
    }

    #[test]
    fn test_weekday_from_str() {
        assert_eq!(weekday_from_str("mon"), Some(Weekday::Mon));
        assert_eq!(weekday_from_str("Monday"), Some(Weekday::Mon));
        assert_eq!(weekday_from_str("SAT"), Some(Weekday::Sat));
        assert_eq!(weekday_from_str("invalid"), None);
    }

    #[test]
    fn test_default_is_daily_midnight_utc() {
        let schedule = SyncSchedule::default();
        // 2024-03-05 is a Tuesday
        assert_eq!(
            schedule.next_run_after(utc(2024, 3, 5, 14, 0)).unwrap(),
            utc(2024, 3, 6, 0, 0)
        );
        // Exactly at the scheduled instant moves on to the next day
        assert_eq!(
            schedule.next_run_after(utc(2024, 3, 6, 0, 0)).unwrap(),
            utc(2024, 3, 7, 0, 0)
        );
    }

    #[test]
    fn test_later_today() {
        let schedule = SyncSchedule {
            time: "18:15".to_string(),
            ..SyncSchedule::default()
        };
        assert_eq!(
            schedule.next_run_after(utc(2024, 3, 5, 9, 0)).unwrap(),
            utc(2024, 3, 5, 18, 15)
        );
    }

    #[test]
    fn test_weekdays_skip_weekend() {
        let schedule = SyncSchedule {
            time: "06:00".to_string(),
            days: DaySelector::Named("weekdays".to_string()),
            ..SyncSchedule::default()
        };
        // Friday 2024-03-08 after 06:00 -> Monday 2024-03-11
        assert_eq!(
            schedule.next_run_after(utc(2024, 3, 8, 7, 0)).unwrap(),
            utc(2024, 3, 11, 6, 0)
        );
    }

    #[test]
    fn test_day_list() {
        let schedule = SyncSchedule {
            days: DaySelector::List(vec!["wed".to_string(), "sun".to_string()]),
            ..SyncSchedule::default()
        };
        assert!(schedule.day_matches(Weekday::Wed));
        assert!(schedule.day_matches(Weekday::Sun));
        assert!(!schedule.day_matches(Weekday::Mon));
    }

    #[test]
    fn test_timezone_offset() {
        let schedule = SyncSchedule {
            timezone: "America/New_York".to_string(),
            ..SyncSchedule::default()
        };
        // Midnight EST is 05:00 UTC in winter
        assert_eq!(
            schedule.next_run_after(utc(2024, 1, 10, 12, 0)).unwrap(),
            utc(2024, 1, 11, 5, 0)
        );
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
timezone: "Europe/Berlin"
time: "03:30"
days: [mon, thu]
"#;
        let schedule = SyncSchedule::from_yaml(yaml).unwrap();
        assert_eq!(schedule.timezone, "Europe/Berlin");
        assert_eq!(
            schedule.days,
            DaySelector::List(vec!["mon".to_string(), "thu".to_string()])
        );
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(SyncSchedule::from_yaml("timezone: Mars/Olympus").is_err());
        assert!(SyncSchedule::from_yaml("time: \"25:00\"").is_err());
        assert!(SyncSchedule::from_yaml("days: someday").is_err());
        assert!(SyncSchedule::from_yaml("days: []").is_err());
    }

    #[test]
    fn test_until_next_run_within_a_day() {
        let wait = SyncSchedule::default().until_next_run().unwrap();
        assert!(wait <= std::time::Duration::from_secs(24 * 60 * 60));
    }
}
