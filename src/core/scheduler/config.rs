// src/core/scheduler/config.rs

//! Per-host schedule shape: a map of period spec to a seven-character
//! weekly mask (`Y`/`N`/`P`, indexed Mon..Sun), a warn ladder, and a list
//! of mission-time/local-time restart rules.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::RestartMethod;

/// What a weekly mask says about a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayState {
    /// `Y` -- the host should be running during this period.
    Run,
    /// `N` -- the host should be shut down during this period.
    Shutdown,
    /// `P` -- the host may run, but must come down if it's unpopulated.
    PopulatedOnly,
}

impl DayState {
    fn from_char(c: char) -> DayState {
        match c.to_ascii_uppercase() {
            'Y' => DayState::Run,
            'N' => DayState::Shutdown,
            _ => DayState::PopulatedOnly,
        }
    }
}

/// A seven-character weekly mask, one `DayState` per weekday, Mon..Sun.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WeeklyMask {
    days: [DayState; 7],
}

impl WeeklyMask {
    pub fn state_for(&self, weekday: Weekday) -> DayState {
        self.days[weekday.num_days_from_monday() as usize]
    }
}

impl TryFrom<String> for WeeklyMask {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let chars: Vec<char> = value.chars().collect();
        if chars.len() != 7 {
            return Err(format!("weekly mask must have exactly 7 characters, got {}", chars.len()));
        }
        let mut days = [DayState::PopulatedOnly; 7];
        for (slot, c) in days.iter_mut().zip(chars) {
            *slot = DayState::from_char(c);
        }
        Ok(Self { days })
    }
}

impl From<WeeklyMask> for String {
    fn from(mask: WeeklyMask) -> String {
        mask.days
            .iter()
            .map(|d| match d {
                DayState::Run => 'Y',
                DayState::Shutdown => 'N',
                DayState::PopulatedOnly => 'P',
            })
            .collect()
    }
}

/// The warn ladder: a list of seconds-before-action at which a popup fires,
/// plus the template it's rendered from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarnConfig {
    #[serde(default = "default_warn_times")]
    pub times: Vec<u64>,
    #[serde(default = "default_warn_text")]
    pub text: String,
}

fn default_warn_times() -> Vec<u64> {
    vec![0]
}

fn default_warn_text() -> String {
    "!!! {item} will {what} in {when} !!!".to_string()
}

impl Default for WarnConfig {
    fn default() -> Self {
        Self {
            times: default_warn_times(),
            text: default_warn_text(),
        }
    }
}

impl WarnConfig {
    /// The effective ladder for this tick, sorted descending. An unpopulated
    /// host has no one to warn, so it collapses to a single zero-second rung
    /// -- act now instead of counting down for nobody.
    pub fn times_for(&self, populated: bool) -> Vec<u64> {
        if !populated {
            return vec![0];
        }
        let mut times = self.times.clone();
        times.sort_unstable_by(|a, b| b.cmp(a));
        times
    }
}

fn default_true() -> bool {
    true
}

/// A single restart rule: one of `mission_time` (minutes of mission-elapsed
/// time) or `local_times` (wall-clock points) fires the method below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartRule {
    #[serde(with = "restart_method_serde")]
    pub method: RestartMethod,
    pub mission_time: Option<u64>,
    pub local_times: Option<Vec<String>>,
    /// If `false`, a populated host waits for `max_mission_time` (or
    /// indefinitely, if unset) before the restart is allowed to fire.
    #[serde(default = "default_true")]
    pub populated: bool,
    /// Defer until the mission actually ends rather than firing on a timer.
    #[serde(default)]
    pub mission_end: bool,
    pub max_mission_time: Option<u64>,
}

/// The full per-host scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub schedule: HashMap<String, WeeklyMask>,
    #[serde(default)]
    pub warn: WarnConfig,
    #[serde(default)]
    pub restart: Vec<RestartRule>,
    /// Governs only the plain schedule-slot teardown below, not the
    /// per-rule `populated` flag: if `false`, a populated host is left
    /// running past an `N` slot until the next tick finds it empty.
    #[serde(default = "default_true")]
    pub populated: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            schedule: HashMap::new(),
            warn: WarnConfig::default(),
            restart: Vec::new(),
            populated: true,
        }
    }
}

impl ScheduleConfig {
    /// Computes the status the host ought to be in right now, per the
    /// schedule's slots. Returns `status` unchanged if nothing applies.
    pub fn check_server_state(
        &self,
        now: DateTime<Utc>,
        status: crate::core::model::HostStatus,
        populated: bool,
    ) -> crate::core::model::HostStatus {
        use crate::core::model::HostStatus::*;

        let warn_times = self.warn.times_for(populated);
        let restart_in = warn_times.into_iter().max().unwrap_or(0) as i64;
        let weekday = (now + chrono::Duration::seconds(restart_in)).weekday();

        for (period, mask) in &self.schedule {
            let state = mask.state_for(weekday);
            if is_in_timeframe(now, period) && state == DayState::Run && status == Shutdown {
                return Running;
            } else if is_in_timeframe(now, period)
                && state == DayState::PopulatedOnly
                && matches!(status, Running | Paused | Stopped)
                && !populated
            {
                return Shutdown;
            } else if is_in_timeframe(now + chrono::Duration::seconds(restart_in), period)
                && state == DayState::Shutdown
                && status == Running
            {
                return Shutdown;
            } else if is_in_timeframe(now, period) && state == DayState::Shutdown && matches!(status, Paused | Stopped) {
                return Shutdown;
            }
        }
        status
    }
}

mod restart_method_serde {
    use super::RestartMethod;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(method: &RestartMethod, s: S) -> Result<S::Ok, S::Error> {
        let name = match method {
            RestartMethod::Restart => "restart",
            RestartMethod::RestartWithShutdown => "restart_with_shutdown",
            RestartMethod::Rotate => "rotate",
        };
        s.serialize_str(name)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<RestartMethod, D::Error> {
        let s = String::deserialize(d)?;
        match s.as_str() {
            "restart" => Ok(RestartMethod::Restart),
            "restart_with_shutdown" => Ok(RestartMethod::RestartWithShutdown),
            "rotate" => Ok(RestartMethod::Rotate),
            other => Err(serde::de::Error::custom(format!("unknown restart method: {other}"))),
        }
    }
}

/// Parses a period spec -- either a `"HH:MM-HH:MM"` range (wrapping past
/// midnight if the end is before the start) or a bare `"HH:MM"` point,
/// matched to the minute -- and checks whether `now` falls inside it.
pub fn is_in_timeframe(now: DateTime<Utc>, period: &str) -> bool {
    let t = now.time();
    match period.split_once('-') {
        Some((start_s, end_s)) => {
            let (Ok(start), Ok(end)) = (
                NaiveTime::parse_from_str(start_s.trim(), "%H:%M"),
                NaiveTime::parse_from_str(end_s.trim(), "%H:%M"),
            ) else {
                return false;
            };
            if start <= end {
                t >= start && t < end
            } else {
                t >= start || t < end
            }
        }
        None => match NaiveTime::parse_from_str(period.trim(), "%H:%M") {
            Ok(point) => t.hour() == point.hour() && t.minute() == point.minute(),
            Err(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::HostStatus;

    fn weekly(mask: &str) -> WeeklyMask {
        WeeklyMask::try_from(mask.to_string()).unwrap()
    }

    #[test]
    fn weekly_mask_round_trips_through_string() {
        let mask = weekly("YNPYNPY");
        let back: String = mask.into();
        assert_eq!(back, "YNPYNPY");
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(WeeklyMask::try_from("short".to_string()).is_err());
    }

    #[test]
    fn is_in_timeframe_handles_plain_range() {
        let now: DateTime<Utc> = "2026-01-05T10:15:00Z".parse().unwrap();
        assert!(is_in_timeframe(now, "08:00-22:00"));
        assert!(!is_in_timeframe(now, "23:00-06:00"));
    }

    #[test]
    fn is_in_timeframe_handles_midnight_wrap() {
        let now: DateTime<Utc> = "2026-01-05T23:30:00Z".parse().unwrap();
        assert!(is_in_timeframe(now, "22:00-06:00"));
        let now: DateTime<Utc> = "2026-01-05T03:00:00Z".parse().unwrap();
        assert!(is_in_timeframe(now, "22:00-06:00"));
        let now: DateTime<Utc> = "2026-01-05T12:00:00Z".parse().unwrap();
        assert!(!is_in_timeframe(now, "22:00-06:00"));
    }

    #[test]
    fn is_in_timeframe_handles_bare_point() {
        let now: DateTime<Utc> = "2026-01-05T06:00:00Z".parse().unwrap();
        assert!(is_in_timeframe(now, "06:00"));
        assert!(!is_in_timeframe(now, "06:01"));
    }

    #[test]
    fn check_server_state_starts_host_in_run_window() {
        let mut schedule = ScheduleConfig::default();
        schedule.schedule.insert("08:00-22:00".to_string(), weekly("YYYYYYY"));
        let now: DateTime<Utc> = "2026-01-05T09:00:00Z".parse().unwrap(); // a Monday
        let target = schedule.check_server_state(now, HostStatus::Shutdown, false);
        assert_eq!(target, HostStatus::Running);
    }

    #[test]
    fn check_server_state_stops_host_outside_run_window() {
        let mut schedule = ScheduleConfig::default();
        schedule.warn.times = vec![60];
        schedule.schedule.insert("22:00-06:00".to_string(), weekly("YYYYYYY"));
        let now: DateTime<Utc> = "2026-01-05T21:59:00Z".parse().unwrap();
        let target = schedule.check_server_state(now, HostStatus::Running, false);
        assert_eq!(target, HostStatus::Shutdown);
    }

    #[test]
    fn populated_only_slot_spares_a_populated_host() {
        let mut schedule = ScheduleConfig::default();
        schedule.schedule.insert("00:00-23:59".to_string(), weekly("PPPPPPP"));
        let now: DateTime<Utc> = "2026-01-05T12:00:00Z".parse().unwrap();
        assert_eq!(schedule.check_server_state(now, HostStatus::Running, true), HostStatus::Running);
        assert_eq!(schedule.check_server_state(now, HostStatus::Running, false), HostStatus::Shutdown);
    }
}
