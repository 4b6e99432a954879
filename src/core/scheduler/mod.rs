// src/core/scheduler/mod.rs

//! The per-host schedule (component I). Each host carries a config of
//! run/shutdown windows keyed by period, a warn ladder, and a list of
//! mission-time/local-time restart rules. A per-minute tick reconciles
//! observed state against the schedule and, when a boundary is crossed,
//! starts the warn ladder instead of killing the process outright.

pub mod config;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::{interval, sleep};
use tracing::{info, warn};

use crate::core::bus::{Bus, Envelope, CHANNEL_BROADCASTS};
use crate::core::errors::HostctlError;
use crate::core::lifecycle::{format_countdown, LifecycleManager, Platform};
use crate::core::metrics;
use crate::core::model::{HostStatus, PendingAction};
use crate::core::registry::HostRegistry;

pub use config::{DayState, RestartRule, ScheduleConfig, WarnConfig, WeeklyMask};

/// One schedule tick per minute; the config's resolution is per-minute,
/// so most ticks are no-ops for a given host.
const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// The three ways a scheduled restart can be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMethod {
    /// Stop and relaunch the same mission.
    Restart,
    /// `Restart`, but preceded by a full DCS process shutdown and relaunch
    /// rather than an in-process mission reload.
    RestartWithShutdown,
    /// Advance to the next mission in the host's rotation list.
    Rotate,
}

pub struct Scheduler<P: Platform> {
    registry: Arc<HostRegistry>,
    lifecycle: Arc<LifecycleManager<P>>,
    bus: Arc<Bus>,
    guild_id: i64,
    schedules: Arc<parking_lot::RwLock<HashMap<String, ScheduleConfig>>>,
}

impl<P: Platform> Scheduler<P> {
    pub fn new(registry: Arc<HostRegistry>, lifecycle: Arc<LifecycleManager<P>>, bus: Arc<Bus>, guild_id: i64) -> Self {
        Self {
            registry,
            lifecycle,
            bus,
            guild_id,
            schedules: Arc::new(parking_lot::RwLock::new(HashMap::new())),
        }
    }

    pub fn set_schedule(&self, host_name: &str, schedule: ScheduleConfig) {
        self.schedules.write().insert(host_name.to_string(), schedule);
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), HostctlError> {
        let mut ticker = interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.clone().tick().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn tick(self: Arc<Self>) {
        let now = Utc::now();
        for host in self.registry.list() {
            if matches!(host.status, HostStatus::Unregistered | HostStatus::Loading) || host.maintenance {
                continue;
            }
            let Some(schedule) = self.schedules.read().get(&host.name).cloned() else {
                continue;
            };
            if let Err(e) = self.clone().reconcile_host(host.name.clone(), schedule, now).await {
                warn!(host = %host.name, error = %e, "scheduler reconcile failed");
            }
        }
    }

    /// Per-host reconciliation, mirroring the tick algorithm:
    /// compute the desired status from the schedule, start or tear down to
    /// match it, and otherwise check whether a mission-time/local-time
    /// restart rule now applies.
    async fn reconcile_host(self: Arc<Self>, host_name: String, schedule: ScheduleConfig, now: DateTime<Utc>) -> Result<(), HostctlError> {
        let (status, populated) = {
            let host = self
                .registry
                .get(&host_name)
                .ok_or_else(|| HostctlError::HostNotFound(host_name.clone()))?;
            (host.status, host.is_populated())
        };
        let target = schedule.check_server_state(now, status, populated);

        if target == HostStatus::Running && status == HostStatus::Shutdown {
            info!(host_name, "scheduler: slot requires running, starting host");
            metrics::SCHEDULER_ACTIONS_TOTAL.with_label_values(&["start"]).inc();
            let this = self.clone();
            let host_name = host_name.clone();
            tokio::spawn(async move {
                if let Err(e) = this.lifecycle.startup(&host_name, false).await {
                    warn!(host_name, error = %e, "scheduled startup failed");
                }
            });
        } else if target == HostStatus::Shutdown && matches!(status, HostStatus::Stopped | HostStatus::Running | HostStatus::Paused) {
            info!(host_name, "scheduler: slot requires stopped, tearing down");
            metrics::SCHEDULER_ACTIONS_TOTAL.with_label_values(&["stop"]).inc();
            let this = self.clone();
            let schedule = schedule.clone();
            let host_name = host_name.clone();
            tokio::spawn(async move {
                if let Err(e) = this.teardown(&host_name, &schedule).await {
                    warn!(host_name, error = %e, "scheduled teardown failed");
                }
            });
        } else if matches!(status, HostStatus::Running | HostStatus::Paused) {
            self.clone().check_mission_state(&host_name, &schedule, now).await?;
        }

        Ok(())
    }

    /// Tears a host down for a schedule slot, not an operator command. If
    /// the host is populated and the schedule says not to restart populated
    /// hosts, this tick simply leaves it running -- the next tick re-checks.
    async fn teardown(&self, host_name: &str, schedule: &ScheduleConfig) -> Result<(), HostctlError> {
        let populated = {
            let host = self
                .registry
                .get(host_name)
                .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
            host.is_populated()
        };
        if populated && !schedule.populated {
            return Ok(());
        }

        {
            let mut host = self
                .registry
                .get_mut(host_name)
                .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
            if host.restart_pending {
                return Ok(());
            }
            host.restart_pending = true;
        }

        let warn_times = schedule.warn.times_for(populated);
        let restart_in = warn_times.into_iter().max().unwrap_or(0);
        if restart_in > 0 && populated {
            self.warn_users(host_name, schedule, "shutdown", "server", restart_in).await;
        }

        let still_pending = {
            let host = self
                .registry
                .get(host_name)
                .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
            host.restart_pending
        };
        if !still_pending {
            return Ok(());
        }

        self.lifecycle.graceful_shutdown(host_name, "be shut down", &[]).await?;
        if let Some(mut host) = self.registry.get_mut(host_name) {
            host.restart_pending = false;
        }
        Ok(())
    }

    /// Evaluates each configured restart rule against the current mission
    /// clock / local time and, on the first match, spawns the restart. Only
    /// one rule fires per tick.
    async fn check_mission_state(self: Arc<Self>, host_name: &str, schedule: &ScheduleConfig, now: DateTime<Utc>) -> Result<(), HostctlError> {
        if schedule.restart.is_empty() {
            return Ok(());
        }
        let (restart_pending, populated, mission_time) = {
            let host = self
                .registry
                .get(host_name)
                .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
            (
                host.restart_pending,
                host.is_populated(),
                host.current_mission.as_ref().map(|m| m.mission_time).unwrap_or(0),
            )
        };
        if restart_pending {
            return Ok(());
        }

        for rule in &schedule.restart {
            if let Some(warn_time) = check_mission_restart(schedule, rule, now, mission_time, populated) {
                metrics::SCHEDULER_ACTIONS_TOTAL
                    .with_label_values(&[restart_method_label(rule.method)])
                    .inc();
                let this = self.clone();
                let host_name = host_name.to_string();
                let schedule = schedule.clone();
                let rule = rule.clone();
                tokio::spawn(async move {
                    this.execute_restart(host_name, schedule, rule, warn_time).await;
                });
                return Ok(());
            }
        }
        Ok(())
    }

    async fn execute_restart(self: Arc<Self>, host_name: String, schedule: ScheduleConfig, rule: RestartRule, max_warn_time: u64) {
        if let Err(e) = self.try_execute_restart(&host_name, &schedule, &rule, max_warn_time).await {
            warn!(host_name, error = %e, "scheduled mission restart failed");
        }
    }

    /// The restart decision tree: mission-end deferral, populated-host
    /// deferral up to `max_mission_time`, the warn ladder, then the method
    /// itself. Mirrors the populated-host warn-and-recheck pattern used for
    /// operator-triggered restarts, but against this rule's own ladder.
    async fn try_execute_restart(&self, host_name: &str, schedule: &ScheduleConfig, rule: &RestartRule, max_warn_time: u64) -> Result<(), HostctlError> {
        {
            let host = self
                .registry
                .get(host_name)
                .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
            if host.restart_pending {
                return Ok(());
            }
        }

        if rule.mission_end {
            let mut host = self
                .registry
                .get_mut(host_name)
                .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
            host.set_on_mission_end(PendingAction {
                command: restart_method_label(rule.method).to_string(),
                args: Vec::new(),
            });
            return Ok(());
        }

        let populated = {
            let host = self
                .registry
                .get(host_name)
                .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
            host.is_populated()
        };

        if populated {
            {
                let mut host = self
                    .registry
                    .get_mut(host_name)
                    .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
                if host.on_empty.is_none() {
                    host.on_empty = Some(PendingAction {
                        command: restart_method_label(rule.method).to_string(),
                        args: Vec::new(),
                    });
                }
            }

            if !rule.populated {
                match rule.max_mission_time {
                    None => {
                        let mut host = self
                            .registry
                            .get_mut(host_name)
                            .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
                        host.restart_pending = true;
                        return Ok(());
                    }
                    Some(max_minutes) => {
                        let mission_time = {
                            let host = self
                                .registry
                                .get(host_name)
                                .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
                            host.current_mission.as_ref().map(|m| m.mission_time).unwrap_or(0)
                        };
                        if mission_time <= (max_minutes * 60).saturating_sub(max_warn_time) {
                            return Ok(());
                        }
                    }
                }
            }

            {
                let mut host = self
                    .registry
                    .get_mut(host_name)
                    .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
                host.restart_pending = true;
            }

            let (what, item) = warn_labels(rule.method);
            self.warn_users(host_name, schedule, what, item, max_warn_time).await;

            let (still_pending, still_populated) = {
                let host = self
                    .registry
                    .get(host_name)
                    .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
                (host.restart_pending, host.is_populated())
            };
            if !still_pending || !still_populated {
                return Ok(());
            }
            if let Some(mut host) = self.registry.get_mut(host_name) {
                host.on_empty = None;
            }
        } else {
            let mut host = self
                .registry
                .get_mut(host_name)
                .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
            host.restart_pending = true;
        }

        match rule.method {
            RestartMethod::RestartWithShutdown => {
                self.lifecycle.graceful_shutdown(host_name, "restart", &[]).await?;
                self.lifecycle.startup(host_name, false).await?;
            }
            RestartMethod::Restart => {
                self.lifecycle.graceful_shutdown(host_name, "restart", &[]).await?;
                self.lifecycle.startup(host_name, true).await?;
            }
            RestartMethod::Rotate => {
                self.rotate_mission(host_name)?;
                self.lifecycle.graceful_shutdown(host_name, "restart", &[]).await?;
                self.lifecycle.startup(host_name, true).await?;
            }
        }

        if let Some(mut host) = self.registry.get_mut(host_name) {
            host.restart_pending = false;
        }
        Ok(())
    }

    /// Counts down from `max_warn_time` to zero, announcing at each
    /// configured rung. Stops early if the host leaves `RUNNING` or enters
    /// maintenance mid-countdown.
    async fn warn_users(&self, host_name: &str, schedule: &ScheduleConfig, what: &str, item: &str, max_warn_time: u64) {
        let warn_times = schedule.warn.times_for(true);
        let mut restart_in = max_warn_time;
        loop {
            let (running, maintenance) = {
                let Some(host) = self.registry.get(host_name) else { return };
                (host.status == HostStatus::Running, host.maintenance)
            };
            if restart_in == 0 || !running || maintenance {
                return;
            }
            if warn_times.contains(&restart_in) {
                self.announce(host_name, schedule, item, what, restart_in).await;
            }
            sleep(Duration::from_secs(1)).await;
            restart_in -= 1;
        }
    }

    async fn announce(&self, host_name: &str, schedule: &ScheduleConfig, item: &str, what: &str, seconds_remaining: u64) {
        let text = schedule
            .warn
            .text
            .replace("{item}", item)
            .replace("{what}", what)
            .replace("{when}", &format_countdown(seconds_remaining));
        let payload = serde_json::json!({ "host": host_name, "message": text });
        let envelope = Envelope::Event {
            name: "hostAnnounce".into(),
            payload,
        };
        let Ok(data) = serde_json::to_value(&envelope) else {
            warn!(host_name, "failed to serialize scheduler warning");
            return;
        };
        if let Err(e) = self.bus.publish(CHANNEL_BROADCASTS, self.guild_id, "", &data).await {
            warn!(host_name, error = %e, "failed to publish scheduler warning");
        }
    }

    fn rotate_mission(&self, host_name: &str) -> Result<(), HostctlError> {
        let mut host = self
            .registry
            .get_mut(host_name)
            .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
        let Some(mission) = host.current_mission.as_mut() else {
            return Ok(());
        };
        if mission.mission_list.is_empty() {
            return Ok(());
        }
        let current_index = mission.mission_list.iter().position(|m| m == &mission.filename).unwrap_or(0);
        let next_index = (current_index + 1) % mission.mission_list.len();
        let next_filename = mission.mission_list[next_index].clone();
        info!(host_name, next_filename, "rotating to next mission in list");
        mission.filename = next_filename;
        Ok(())
    }
}

/// Ascending-order warn-time scan: the soonest-firing rule that matches
/// wins, since that's the first boundary that will actually be crossed.
fn check_mission_restart(schedule: &ScheduleConfig, rule: &RestartRule, now: DateTime<Utc>, mission_time: u64, populated: bool) -> Option<u64> {
    let mut warn_times = schedule.warn.times_for(populated);
    warn_times.sort_unstable();
    for warn_time in warn_times {
        if let Some(local_times) = &rule.local_times {
            let restart_time = now + chrono::Duration::seconds(warn_time as i64);
            if local_times.iter().any(|t| config::is_in_timeframe(restart_time, t)) {
                return Some(warn_time);
            }
        } else if let Some(target_minutes) = rule.mission_time {
            if mission_time + warn_time >= target_minutes * 60 {
                return Some(warn_time);
            }
        }
    }
    None
}

fn warn_labels(method: RestartMethod) -> (&'static str, &'static str) {
    match method {
        RestartMethod::RestartWithShutdown => ("restart", "server"),
        RestartMethod::Restart => ("restart", "mission"),
        RestartMethod::Rotate => ("rotate", "mission"),
    }
}

fn restart_method_label(method: RestartMethod) -> &'static str {
    match method {
        RestartMethod::Restart => "restart",
        RestartMethod::RestartWithShutdown => "restart_with_shutdown",
        RestartMethod::Rotate => "rotate",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_method_labels_are_stable() {
        assert_eq!(restart_method_label(RestartMethod::Restart), "restart");
        assert_eq!(restart_method_label(RestartMethod::Rotate), "rotate");
    }

    #[test]
    fn warn_labels_treat_restart_with_shutdown_as_a_server_action() {
        assert_eq!(warn_labels(RestartMethod::RestartWithShutdown), ("restart", "server"));
        assert_eq!(warn_labels(RestartMethod::Restart), ("restart", "mission"));
    }

    #[test]
    fn check_mission_restart_fires_at_the_earliest_matching_boundary() {
        let mut schedule = ScheduleConfig::default();
        schedule.warn.times = vec![60, 30, 10];
        let rule = RestartRule {
            method: RestartMethod::Restart,
            mission_time: Some(10), // 600 seconds
            local_times: None,
            populated: true,
            mission_end: false,
            max_mission_time: None,
        };
        let now = Utc::now();
        // At 590s elapsed, the 10s warning is the first to satisfy 590+10>=600.
        let hit = check_mission_restart(&schedule, &rule, now, 590, true);
        assert_eq!(hit, Some(10));
    }

    #[test]
    fn check_mission_restart_ignores_rules_with_no_trigger_configured() {
        let schedule = ScheduleConfig::default();
        let rule = RestartRule {
            method: RestartMethod::Restart,
            mission_time: None,
            local_times: None,
            populated: true,
            mission_end: false,
            max_mission_time: None,
        };
        assert_eq!(check_mission_restart(&schedule, &rule, Utc::now(), 1000, true), None);
    }

    #[test]
    fn unpopulated_mission_restart_uses_zero_warn_time() {
        let mut schedule = ScheduleConfig::default();
        schedule.warn.times = vec![300, 60];
        let rule = RestartRule {
            method: RestartMethod::Rotate,
            mission_time: Some(1), // 60 seconds
            local_times: None,
            populated: true,
            mission_end: false,
            max_mission_time: None,
        };
        // unpopulated -> warn_times collapses to [0]; fires exactly at the boundary
        let hit = check_mission_restart(&schedule, &rule, Utc::now(), 60, false);
        assert_eq!(hit, Some(0));
    }

    #[test]
    fn weekly_mask_is_reexported_from_config() {
        let _mask: WeeklyMask = WeeklyMask::try_from("YYYYYYY".to_string()).unwrap();
    }
}
