// src/core/coordinator/mod.rs

//! The node coordinator (component H): heartbeats the local node's row,
//! and -- when it wins the periodic election -- holds the master role for
//! the guild. Election is a single row-locking transaction, not a gossip
//! vote: with the state store as the single source of truth there is no
//! need to count quorum across unreliable UDP peers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use sysinfo::System;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::core::errors::HostctlError;
use crate::core::metrics;
use crate::core::store::{NodeRow, Store};

const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

pub struct Coordinator {
    store: Store,
    guild_id: i64,
    local_node: String,
    public_ip: String,
    listen_address: String,
    listen_port: u16,
    preferred_master: bool,
    slow_system: bool,
    heartbeat_interval: Duration,
    is_master: Arc<AtomicBool>,
    system: parking_lot::Mutex<System>,
}

/// What a single election tick decided: at most one node gets promoted, and
/// zero or more (in the split-brain case, potentially several) get demoted.
/// Both lists are applied inside the same row-locked transaction that
/// produced them.
struct ElectionPlan {
    promote: Option<String>,
    demote: Vec<String>,
}

#[allow(clippy::too_many_arguments)]
impl Coordinator {
    pub fn new(
        store: Store,
        guild_id: i64,
        local_node: impl Into<String>,
        public_ip: impl Into<String>,
        listen_address: impl Into<String>,
        listen_port: u16,
        preferred_master: bool,
        slow_system: bool,
        heartbeat_interval: Option<Duration>,
    ) -> Self {
        Self {
            store,
            guild_id,
            local_node: local_node.into(),
            public_ip: public_ip.into(),
            listen_address: listen_address.into(),
            listen_port,
            preferred_master,
            slow_system,
            heartbeat_interval: heartbeat_interval.unwrap_or(DEFAULT_HEARTBEAT),
            is_master: Arc::new(AtomicBool::new(false)),
            system: parking_lot::Mutex::new(System::new()),
        }
    }

    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::Acquire)
    }

    /// A shared handle other components (the bus, the dispatcher) can poll
    /// without going through the coordinator itself.
    pub fn master_flag(&self) -> Arc<AtomicBool> {
        self.is_master.clone()
    }

    /// Inserts this node's row, failing fatally if a still-live node already
    /// holds this name -- two processes claiming the same node identity
    /// would otherwise both heartbeat the same row and corrupt the election.
    pub async fn register_self(&self) -> Result<(), HostctlError> {
        if let Some(existing) = self.store.get_node(self.guild_id, &self.local_node).await? {
            if Self::is_alive(&existing, Utc::now()) {
                return Err(HostctlError::DuplicateNode(self.local_node.clone()));
            }
        }
        let row = NodeRow {
            guild_id: self.guild_id,
            name: self.local_node.clone(),
            public_ip: self.public_ip.clone(),
            listen_address: self.listen_address.clone(),
            listen_port: self.listen_port as i32,
            master: false,
            last_seen: Utc::now(),
            preferred_master: self.preferred_master,
            heartbeat_seconds: self.heartbeat_interval.as_secs() as i64,
            slow_system: self.slow_system,
        };
        self.store.upsert_node(&row).await
    }

    /// Runs the heartbeat + election tick until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), HostctlError> {
        self.register_self().await?;

        // Stagger startup across nodes so a fleet that boots together doesn't
        // hammer the row lock in lockstep on every single tick.
        let jitter_ceiling_ms = (self.heartbeat_interval.as_millis() as u64).min(5000);
        let jitter_ms = rand::thread_rng().gen_range(0..=jitter_ceiling_ms);
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;

        let mut ticker = interval(self.heartbeat_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "coordinator tick failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("coordinator shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Logs this node's CPU and memory load alongside the heartbeat, so an
    /// operator diagnosing a `slow_system` flag has something to check it
    /// against.
    fn log_resource_snapshot(&self) {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();
        let cpu = system.global_cpu_usage();
        let used_mb = system.used_memory() / 1024 / 1024;
        let total_mb = system.total_memory() / 1024 / 1024;
        debug!(cpu_percent = cpu, used_mb, total_mb, "node resource snapshot");
    }

    async fn tick(&self) -> Result<(), HostctlError> {
        self.log_resource_snapshot();
        self.store.touch_node_heartbeat(self.guild_id, &self.local_node).await?;

        let local_node = self.local_node.clone();
        let guild_id = self.guild_id;
        let won = self
            .store
            .with_nodes_locked(guild_id, move |tx, rows| {
                Box::pin(async move {
                    let now = Utc::now();
                    let plan = Self::plan_election(&local_node, now, &rows);
                    for name in &plan.demote {
                        crate::core::store::Store::set_master_in_tx(tx, guild_id, name, false).await?;
                    }
                    if let Some(name) = &plan.promote {
                        crate::core::store::Store::set_master_in_tx(tx, guild_id, name, true).await?;
                    }
                    let now_master = plan.promote.as_deref() == Some(local_node.as_str())
                        || (plan.promote.is_none()
                            && rows.iter().any(|n| n.name == local_node && n.master)
                            && !plan.demote.contains(&local_node));
                    Ok::<bool, HostctlError>(now_master)
                })
            })
            .await?;

        let was_master = self.is_master.swap(won, Ordering::AcqRel);
        if was_master != won {
            metrics::MASTERSHIP_CHANGES_TOTAL.inc();
            info!(won, local_node = %self.local_node, "mastership changed");
        }
        metrics::IS_MASTER.set(if won { 1.0 } else { 0.0 });
        Ok(())
    }

    fn is_alive(node: &NodeRow, now: DateTime<Utc>) -> bool {
        let deadline_secs = node.heartbeat_seconds.max(1) * if node.slow_system { 2 } else { 1 };
        (now - node.last_seen).num_seconds() <= deadline_secs
    }

    /// The election algorithm, run under the row-lock transaction:
    /// 1. Drop nodes whose heartbeat is stale beyond their deadline -- they
    ///    are neither electable nor keep a master seat warm.
    /// 2. Count how many of the surviving nodes are flagged `master`.
    /// 3. Zero masters alive: promote the winning candidate (preferred nodes
    ///    first, lexicographically-first name as the final tie-break).
    /// 4. Exactly one master alive: it keeps the seat unless a different,
    ///    alive, `preferred_master` node exists, in which case that node
    ///    takes over.
    /// 5. More than one master alive (split-brain): demote every master
    ///    except the winning candidate.
    fn plan_election(local_node: &str, now: DateTime<Utc>, rows: &[NodeRow]) -> ElectionPlan {
        let alive: Vec<&NodeRow> = rows.iter().filter(|n| Self::is_alive(n, now)).collect();
        if alive.is_empty() {
            return ElectionPlan {
                promote: None,
                demote: rows.iter().filter(|n| n.master).map(|n| n.name.clone()).collect(),
            };
        }

        let masters: Vec<&&NodeRow> = alive.iter().filter(|n| n.master).collect();
        let winner = Self::pick_winner(&alive);

        match masters.len() {
            0 => ElectionPlan {
                promote: Some(winner.to_string()),
                demote: vec![],
            },
            1 => {
                let current = *masters[0];
                if current.name == winner || current.preferred_master {
                    ElectionPlan { promote: None, demote: vec![] }
                } else {
                    ElectionPlan {
                        promote: Some(winner.to_string()),
                        demote: vec![current.name.clone()],
                    }
                }
            }
            _ => {
                let demote = masters
                    .iter()
                    .filter(|m| m.name != winner)
                    .map(|m| m.name.clone())
                    .collect();
                let promote = if masters.iter().any(|m| m.name == winner) {
                    None
                } else {
                    Some(winner.to_string())
                };
                ElectionPlan { promote, demote }
            }
        }
        .tap_log(local_node)
    }

    fn pick_winner<'a>(alive: &[&'a NodeRow]) -> &'a str {
        let mut candidates: Vec<&&NodeRow> = alive.iter().filter(|n| n.preferred_master).collect();
        if candidates.is_empty() {
            candidates = alive.iter().collect();
        }
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        candidates.first().map(|n| n.name.as_str()).unwrap_or("")
    }
}

impl ElectionPlan {
    fn tap_log(self, local_node: &str) -> Self {
        if self.promote.is_some() || !self.demote.is_empty() {
            debug!(local_node, promote = ?self.promote, demote = ?self.demote, "election plan");
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, master: bool, preferred: bool, age_secs: i64) -> NodeRow {
        NodeRow {
            guild_id: 1,
            name: name.to_string(),
            public_ip: "127.0.0.1".into(),
            listen_address: "127.0.0.1".into(),
            listen_port: 9000,
            master,
            last_seen: Utc::now() - chrono::Duration::seconds(age_secs),
            preferred_master: preferred,
            heartbeat_seconds: 30,
            slow_system: false,
        }
    }

    #[test]
    fn no_master_alive_promotes_lexicographically_first() {
        let rows = vec![node("beta", false, false, 0), node("alpha", false, false, 0)];
        let plan = Coordinator::plan_election("alpha", Utc::now(), &rows);
        assert_eq!(plan.promote.as_deref(), Some("alpha"));
        assert!(plan.demote.is_empty());
    }

    #[test]
    fn no_master_alive_prefers_preferred_master_flag() {
        let rows = vec![node("alpha", false, false, 0), node("beta", false, true, 0)];
        let plan = Coordinator::plan_election("alpha", Utc::now(), &rows);
        assert_eq!(plan.promote.as_deref(), Some("beta"));
    }

    #[test]
    fn stale_master_is_dropped_from_consideration() {
        let rows = vec![node("alpha", true, false, 10_000), node("beta", false, false, 0)];
        let plan = Coordinator::plan_election("beta", Utc::now(), &rows);
        assert_eq!(plan.promote.as_deref(), Some("beta"));
    }

    #[test]
    fn single_master_keeps_seat_absent_a_preferred_rival() {
        let rows = vec![node("alpha", true, false, 0), node("beta", false, false, 0)];
        let plan = Coordinator::plan_election("alpha", Utc::now(), &rows);
        assert!(plan.promote.is_none());
        assert!(plan.demote.is_empty());
    }

    #[test]
    fn preferred_master_takes_over_from_a_plain_master() {
        let rows = vec![node("alpha", true, false, 0), node("beta", false, true, 0)];
        let plan = Coordinator::plan_election("beta", Utc::now(), &rows);
        assert_eq!(plan.promote.as_deref(), Some("beta"));
        assert_eq!(plan.demote, vec!["alpha".to_string()]);
    }

    #[test]
    fn split_brain_demotes_every_master_but_the_winner() {
        let rows = vec![node("alpha", true, false, 0), node("beta", true, true, 0)];
        let plan = Coordinator::plan_election("beta", Utc::now(), &rows);
        assert!(plan.promote.is_none());
        assert_eq!(plan.demote, vec!["alpha".to_string()]);
    }
}
