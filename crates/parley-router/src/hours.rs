// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Business-hours checks.

use chrono::{DateTime, Datelike, NaiveTime, Utc};
use chrono_tz::Tz;
use parley_core::bot::{DaySchedule, WorkingHours};
use parley_core::ParleyError;

/// Returns true if the bot is staffed at `now`.
///
/// Disabled hours mean always open. A weekday without a schedule is closed.
/// A window whose end is before its start runs past midnight.
pub fn is_open(hours: &WorkingHours, now: DateTime<Utc>) -> Result<bool, ParleyError> {
    if !hours.enabled {
        return Ok(true);
    }
    let tz: Tz = match hours.timezone.as_deref() {
        Some(name) => name
            .parse()
            .map_err(|_| ParleyError::Config(format!("unknown working hours timezone '{name}'")))?,
        None => Tz::UTC,
    };
    let local = now.with_timezone(&tz);
    let time = local.time();

    // Today's window, or the tail of yesterday's overnight window.
    if let Some(today) = hours.for_weekday(local.weekday()) {
        let (start, end) = parse_window(today)?;
        if start <= end {
            if time >= start && time < end {
                return Ok(true);
            }
        } else if time >= start {
            return Ok(true);
        }
    }
    if let Some(yesterday) = hours.for_weekday(local.weekday().pred()) {
        let (start, end) = parse_window(yesterday)?;
        if start > end && time < end {
            return Ok(true);
        }
    }
    Ok(false)
}

fn parse_window(day: &DaySchedule) -> Result<(NaiveTime, NaiveTime), ParleyError> {
    Ok((parse_time(&day.start)?, parse_time(&day.end)?))
}

fn parse_time(raw: &str) -> Result<NaiveTime, ParleyError> {
    let raw = raw.trim();
    if raw == "24:00" {
        return NaiveTime::from_hms_opt(23, 59, 59)
            .ok_or_else(|| ParleyError::Config("invalid working hours time '24:00'".into()));
    }
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|e| ParleyError::Config(format!("invalid working hours time '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window(start: &str, end: &str) -> Option<DaySchedule> {
        Some(DaySchedule {
            start: start.into(),
            end: end.into(),
        })
    }

    fn weekdays_9_to_18(tz: &str) -> WorkingHours {
        WorkingHours {
            enabled: true,
            timezone: Some(tz.into()),
            monday: window("09:00", "18:00"),
            tuesday: window("09:00", "18:00"),
            wednesday: window("09:00", "18:00"),
            thursday: window("09:00", "18:00"),
            friday: window("09:00", "18:00"),
            saturday: None,
            sunday: None,
        }
    }

    #[test]
    fn disabled_hours_are_always_open() {
        let hours = WorkingHours::default();
        assert!(is_open(&hours, Utc::now()).unwrap());
    }

    #[test]
    fn respects_timezone() {
        let hours = weekdays_9_to_18("America/Sao_Paulo");
        // Monday 2026-03-02 11:00 UTC is 08:00 in Sao Paulo.
        let early = Utc.with_ymd_and_hms(2026, 3, 2, 11, 0, 0).unwrap();
        assert!(!is_open(&hours, early).unwrap());
        let open = Utc.with_ymd_and_hms(2026, 3, 2, 13, 0, 0).unwrap();
        assert!(is_open(&hours, open).unwrap());
        let closing = Utc.with_ymd_and_hms(2026, 3, 2, 21, 0, 0).unwrap();
        assert!(!is_open(&hours, closing).unwrap());
    }

    #[test]
    fn day_without_schedule_is_closed() {
        let hours = weekdays_9_to_18("UTC");
        // Sunday.
        let sunday = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert!(!is_open(&hours, sunday).unwrap());
    }

    #[test]
    fn overnight_window_spans_midnight() {
        let hours = WorkingHours {
            enabled: true,
            timezone: None,
            friday: window("22:00", "02:00"),
            ..Default::default()
        };
        let late_friday = Utc.with_ymd_and_hms(2026, 3, 6, 23, 30, 0).unwrap();
        let early_saturday = Utc.with_ymd_and_hms(2026, 3, 7, 1, 0, 0).unwrap();
        let saturday_morning = Utc.with_ymd_and_hms(2026, 3, 7, 3, 0, 0).unwrap();
        assert!(is_open(&hours, late_friday).unwrap());
        assert!(is_open(&hours, early_saturday).unwrap());
        assert!(!is_open(&hours, saturday_morning).unwrap());
    }

    #[test]
    fn bad_timezone_is_a_config_error() {
        let hours = weekdays_9_to_18("Mars/Olympus");
        let err = is_open(&hours, Utc::now()).unwrap_err();
        assert!(matches!(err, ParleyError::Config(_)));
    }
}
