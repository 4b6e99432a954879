use chrono::{DateTime, Utc};
use hostctl::core::model::HostStatus;
use hostctl::core::scheduler::{RestartMethod, ScheduleConfig, WeeklyMask};

const SAMPLE_YAML: &str = r#"
schedule:
  "08:00-22:00": "YYYYYYN"
warn:
  times: [300, 120, 60]
  text: "!!! {item} will {what} in {when} !!!"
restart:
  - method: rotate
    mission_time: 120
    populated: false
    max_mission_time: 180
"#;

#[test]
fn parses_schedule_config_from_yaml() {
    let config: ScheduleConfig = serde_yaml::from_str(SAMPLE_YAML).unwrap();
    assert_eq!(config.warn.times, vec![300, 120, 60]);
    assert_eq!(config.restart.len(), 1);
    assert!(matches!(config.restart[0].method, RestartMethod::Rotate));
    assert_eq!(config.restart[0].mission_time, Some(120));
    assert!(!config.restart[0].populated);
}

#[test]
fn rejects_malformed_restart_method() {
    let bad = SAMPLE_YAML.replace("rotate", "teleport");
    let result: Result<ScheduleConfig, _> = serde_yaml::from_str(&bad);
    assert!(result.is_err());
}

#[test]
fn weekly_mask_rejects_wrong_length() {
    assert!(WeeklyMask::try_from("short".to_string()).is_err());
}

#[test]
fn check_server_state_starts_a_shutdown_host_inside_the_run_window() {
    let config: ScheduleConfig = serde_yaml::from_str(SAMPLE_YAML).unwrap();
    let now: DateTime<Utc> = "2026-01-05T09:00:00Z".parse().unwrap(); // Monday
    assert_eq!(config.check_server_state(now, HostStatus::Shutdown, false), HostStatus::Running);
}

#[test]
fn check_server_state_leaves_a_running_host_alone_outside_any_slot() {
    let config = ScheduleConfig::default();
    let now = Utc::now();
    assert_eq!(config.check_server_state(now, HostStatus::Running, true), HostStatus::Running);
}
