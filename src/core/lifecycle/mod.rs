// src/core/lifecycle/mod.rs

//! Host lifecycle orchestration (component D/E): process start/stop,
//! the shutdown warn ladder, and the single-slot deferred actions
//! (`on_empty` / `on_mission_end`).

pub mod platform;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::core::bus::{Bus, Envelope, CHANNEL_BROADCASTS};
use crate::core::errors::HostctlError;
use crate::core::extensions::ExtensionChain;
use crate::core::model::{Host, HostEvent, HostStatus, PendingAction};
use crate::core::registry::HostRegistry;

pub use platform::{Platform, SpawnSpec};

/// Fallback warn ladder for scheduled restarts whose configuration doesn't
/// specify its own `warn.times`.
pub const DEFAULT_WARN_TIMES: &[u64] = &[600, 300, 120, 60, 30, 10];
/// Shorter ladder used for administrative, RPC-triggered restarts -- an
/// operator asking for an immediate restart shouldn't wait ten minutes for
/// the countdown the scheduled path uses.
pub const IMMEDIATE_WARN_TIMES: &[u64] = &[30, 10];

const STARTUP_TIMEOUT: Duration = Duration::from_secs(180);

pub struct LifecycleManager<P: Platform> {
    platform: Arc<P>,
    registry: Arc<HostRegistry>,
    bus: Arc<Bus>,
    guild_id: i64,
    dcs_executable: String,
    slow_system: bool,
    extensions: ExtensionChain,
}

impl<P: Platform> LifecycleManager<P> {
    pub fn new(
        platform: Arc<P>,
        registry: Arc<HostRegistry>,
        bus: Arc<Bus>,
        guild_id: i64,
        dcs_executable: impl Into<String>,
        slow_system: bool,
        extensions: ExtensionChain,
    ) -> Self {
        Self {
            platform,
            registry,
            bus,
            guild_id,
            dcs_executable: dcs_executable.into(),
            slow_system,
            extensions,
        }
    }

    /// Spawns the host's process and waits for it to report in. Mirrors the
    /// orchestrator's five startup steps: run the extension chain, optionally
    /// reprocess the mission first, launch the process, apply the host's
    /// priority/affinity settings, then block in `LOADING` until the process
    /// reports a real status -- a timeout here is fatal, since a process that
    /// never calls back is as good as one that never started.
    pub async fn startup(&self, host_name: &str, modify_mission: bool) -> Result<(), HostctlError> {
        let snapshot = self
            .registry
            .get(host_name)
            .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?
            .clone();

        self.extensions.before_start(&snapshot).await;
        if modify_mission {
            let filename = snapshot
                .current_mission
                .as_ref()
                .map(|m| m.filename.as_str())
                .unwrap_or_default();
            self.extensions.before_mission_load(&snapshot, filename).await;
        }

        let spec = SpawnSpec {
            program: self.dcs_executable.clone(),
            args: vec!["--server".into(), "--norender".into(), "-w".into(), snapshot.instance_name.clone()],
            working_dir: None,
        };
        let pid = self.platform.spawn(&spec).await?;
        self.platform.set_priority_and_affinity(pid, false, None).await?;

        {
            let mut host = self
                .registry
                .get_mut(host_name)
                .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
            host.pid = Some(pid);
            host.status = HostStatus::Loading;
            host.touch();
        }

        let timeout = if self.slow_system { STARTUP_TIMEOUT * 2 } else { STARTUP_TIMEOUT };
        match self.wait_for_leaving_loading(host_name, timeout).await {
            Ok(status) => {
                self.extensions.after_start(&snapshot).await;
                info!(host_name, ?status, "host startup completed");
                Ok(())
            }
            Err(e) => {
                warn!(host_name, error = %e, "startup timed out waiting for the host to report in");
                if let Some(mut host) = self.registry.get_mut(host_name) {
                    host.status = HostStatus::Shutdown;
                    host.pid = None;
                }
                Err(e)
            }
        }
    }

    async fn wait_for_leaving_loading(&self, host_name: &str, timeout: Duration) -> Result<HostStatus, HostctlError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.registry.get(host_name) {
                Some(host) if host.status != HostStatus::Loading => return Ok(host.status),
                Some(_) => {}
                None => return Err(HostctlError::HostNotFound(host_name.to_string())),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(HostctlError::Internal(format!(
                    "host '{host_name}' did not leave LOADING within {}s",
                    timeout.as_secs()
                )));
            }
            sleep(Duration::from_millis(500)).await;
        }
    }

    /// Runs the warn ladder, announcing the coming shutdown at each rung,
    /// then stops the process. Skips the ladder entirely for an unpopulated
    /// host -- there is no one to warn. Aborts early (without stopping the
    /// process) if the host enters maintenance mode mid-countdown -- an
    /// operator's cancellation takes priority over an already-scheduled
    /// restart.
    pub async fn graceful_shutdown(&self, host_name: &str, reason: &str, warn_times: &[u64]) -> Result<(), HostctlError> {
        let is_populated = {
            let host = self
                .registry
                .get(host_name)
                .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
            host.is_populated()
        };

        if !is_populated || warn_times.is_empty() {
            return self.stop_process(host_name).await;
        }

        let mut ladder = warn_times.to_vec();
        ladder.sort_unstable_by(|a, b| b.cmp(a));
        let mut remaining = ladder[0];

        for &rung in &ladder {
            if self.is_maintenance_cleared(host_name)? {
                info!(host_name, "shutdown aborted: maintenance flag cleared mid-countdown");
                return Ok(());
            }
            let sleep_for = remaining.saturating_sub(rung);
            if sleep_for > 0 {
                sleep(Duration::from_secs(sleep_for)).await;
            }
            remaining = rung;
            self.announce(host_name, rung, reason).await;
        }

        if self.is_maintenance_cleared(host_name)? {
            info!(host_name, "shutdown aborted at final rung: maintenance flag cleared");
            return Ok(());
        }

        self.stop_process(host_name).await
    }

    /// Returns `true` if the host's pending restart was cancelled (i.e. it is
    /// no longer flagged for maintenance and shouldn't actually go down).
    fn is_maintenance_cleared(&self, host_name: &str) -> Result<bool, HostctlError> {
        let host = self
            .registry
            .get(host_name)
            .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
        Ok(!host.maintenance && !host.restart_pending)
    }

    async fn announce(&self, host_name: &str, seconds_remaining: u64, reason: &str) {
        info!(host_name, seconds_remaining, reason, "shutdown warning");
        let text = format!("!!! {host_name} will {reason} in {} !!!", format_countdown(seconds_remaining));
        let payload = serde_json::json!({ "host": host_name, "message": text });
        let envelope = Envelope::Event {
            name: "hostAnnounce".into(),
            payload,
        };
        let Ok(data) = serde_json::to_value(&envelope) else {
            warn!(host_name, "failed to serialize announce envelope");
            return;
        };
        if let Err(e) = self.bus.publish(CHANNEL_BROADCASTS, self.guild_id, "", &data).await {
            warn!(host_name, error = %e, "failed to publish shutdown announcement");
        }
    }

    async fn stop_process(&self, host_name: &str) -> Result<(), HostctlError> {
        let pid = {
            let host = self
                .registry
                .get(host_name)
                .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
            host.pid
        };
        if let Some(pid) = pid {
            if let Some(host) = self.registry.get(host_name) {
                self.extensions.before_stop(&host).await;
            }
            self.platform.terminate_graceful(pid).await?;
        }
        if let Some(mut host) = self.registry.get_mut(host_name) {
            host.pid = None;
        }
        Ok(())
    }

    /// Force-kills a hung host: used when the heartbeat watchdog (component
    /// F) detects a process that stopped responding but never died.
    pub async fn force_kill(&self, host_name: &str) -> Result<(), HostctlError> {
        warn!(host_name, "force-killing hung host");
        let pid = {
            let host = self
                .registry
                .get(host_name)
                .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
            host.pid
        };
        if let Some(pid) = pid {
            self.platform.terminate_forced(pid).await?;
            let _ = self.platform.collect_minidump(pid, host_name).await;
        }
        if let Some(mut host) = self.registry.get_mut(host_name) {
            host.pid = None;
        }
        Ok(())
    }

    /// Applies the deferred action pending for `host` when the triggering
    /// event (`ProcessDead`'s sibling, mission end or population drop to
    /// zero) fires, then clears both slots -- only one of the two slots is
    /// ever consumed per trigger, per the data model's single-slot semantics.
    pub fn take_deferred_action(host: &mut Host, on_mission_end: bool) -> Option<PendingAction> {
        let action = if on_mission_end {
            host.on_mission_end.take()
        } else {
            host.on_empty.take()
        };
        if host.on_empty.is_none() && host.on_mission_end.is_none() {
            host.restart_pending = false;
        }
        action
    }

    /// Advances the host's state machine in response to `event`, persisting
    /// the result back into the registry.
    pub fn apply_event(&self, host_name: &str, event: HostEvent) -> Result<(), HostctlError> {
        let mut host = self
            .registry
            .get_mut(host_name)
            .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
        let next = crate::core::model::transition(host_name, host.status, &event)?;
        host.status = next;
        host.touch();
        Ok(())
    }
}

pub(crate) fn format_countdown(seconds: u64) -> String {
    if seconds >= 60 {
        let minutes = seconds / 60;
        format!("{minutes} minute{}", if minutes == 1 { "" } else { "s" })
    } else {
        format!("{seconds} second{}", if seconds == 1 { "" } else { "s" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_countdown_uses_minutes_above_a_minute() {
        assert_eq!(format_countdown(600), "10 minutes");
        assert_eq!(format_countdown(60), "1 minute");
    }

    #[test]
    fn format_countdown_uses_seconds_below_a_minute() {
        assert_eq!(format_countdown(30), "30 seconds");
        assert_eq!(format_countdown(1), "1 second");
    }
}
