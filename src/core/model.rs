// src/core/model.rs

//! Core data model: nodes, hosts, missions, players, bans, and the host
//! lifecycle state machine. Mirrors the record shapes in the specification's
//! data model section.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::HostctlError;

/// A physical machine running one instance of the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub guild_id: i64,
    pub public_ip: String,
    pub listen_address: String,
    pub listen_port: u16,
    pub master: bool,
    pub last_seen: DateTime<Utc>,
    pub preferred_master: bool,
    pub heartbeat_seconds: u64,
    /// Doubles most timeouts when true; carried from `nodes.yaml`.
    pub slow_system: bool,
}

/// The lifecycle state of a managed host, per the specification's transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostStatus {
    Unregistered,
    Loading,
    Stopped,
    Paused,
    Running,
    Shutdown,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HostStatus::Unregistered => "UNREGISTERED",
            HostStatus::Loading => "LOADING",
            HostStatus::Stopped => "STOPPED",
            HostStatus::Paused => "PAUSED",
            HostStatus::Running => "RUNNING",
            HostStatus::Shutdown => "SHUTDOWN",
        };
        f.write_str(s)
    }
}

/// The event that drives a host state transition. Named after the UDP
/// commands and administrative actions that trigger them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    RegisterDcsServer,
    MissionLoadEnd,
    SimulationStart,
    SimulationResume,
    SimulationPause,
    SimulationStop,
    ProcessDead,
    OperatorShutdown,
}

impl std::fmt::Display for HostEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Applies a single state-machine transition, returning the new state or an
/// error if the event is not valid from the current state.
///
/// `process_dead` transitions are valid from any state except `Shutdown`, and
/// `operator_shutdown` is valid from any state (it always resolves to
/// `Shutdown`, possibly after the orchestrator's warn ladder has run).
pub fn transition(
    host_name: &str,
    from: HostStatus,
    event: &HostEvent,
) -> Result<HostStatus, HostctlError> {
    use HostEvent::*;
    use HostStatus::*;

    let to = match (from, event) {
        (Unregistered, RegisterDcsServer) | (Shutdown, RegisterDcsServer) => Loading,
        (Loading, MissionLoadEnd) => Stopped,
        (Stopped, SimulationStart) => Paused,
        (Paused, SimulationResume) => Running,
        (Running, SimulationPause) => Paused,
        (Running, SimulationStop) | (Paused, SimulationStop) => Stopped,
        (s, ProcessDead) if s != Shutdown => Shutdown,
        (_, OperatorShutdown) => Shutdown,
        _ => {
            return Err(HostctlError::InvalidTransition {
                host: host_name.to_string(),
                from: from.to_string(),
                event: event.to_string(),
            });
        }
    };
    Ok(to)
}

/// A player's side/coalition in the mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Spectator,
    Red,
    Blue,
    Neutral,
}

/// An ephemeral connected player, keyed by `id` within a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: u64,
    pub ucid: String,
    pub name: String,
    pub side: Side,
    pub slot: Option<String>,
    pub sub_slot: Option<String>,
    pub unit_type: Option<String>,
    pub group_name: Option<String>,
    pub active: bool,
    pub watchlist: bool,
}

/// A mission attached to a running host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub filename: String,
    pub display_name: String,
    pub theatre: String,
    pub start_time: u64,
    pub mission_time: u64,
    pub real_time: u64,
    pub airbases: Vec<String>,
    /// The rotation list this host cycles through for the `rotate` restart method.
    pub mission_list: Vec<String>,
}

/// A single-slot deferred action, consumed either on the host becoming empty
/// (`on_empty`) or on mission end (`on_mission_end`). Per the specification's
/// open-question resolution, a new assignment overwrites any pending one
/// rather than queuing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    pub command: String,
    pub args: Vec<String>,
}

/// A managed game-server instance, owned exclusively by one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub node_name: String,
    pub instance_name: String,
    pub dcs_port: u16,
    pub bot_port: u16,
    pub webgui_port: u16,
    pub status: HostStatus,
    pub maintenance: bool,
    #[serde(skip)]
    pub pid: Option<u32>,
    pub current_mission: Option<Mission>,
    pub players: HashMap<u64, Player>,
    /// ucid -> last-seen timestamp (seconds since epoch) for AFK tracking.
    pub afk: HashMap<String, u64>,
    pub on_empty: Option<PendingAction>,
    pub on_mission_end: Option<PendingAction>,
    pub restart_pending: bool,
    pub last_seen: DateTime<Utc>,
    pub extensions: Vec<String>,
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
}

impl Host {
    pub fn new(name: impl Into<String>, node_name: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_name: node_name.into(),
            instance_name: instance_name.into(),
            dcs_port: 0,
            bot_port: 0,
            webgui_port: 0,
            status: HostStatus::Unregistered,
            maintenance: false,
            pid: None,
            current_mission: None,
            players: HashMap::new(),
            afk: HashMap::new(),
            on_empty: None,
            on_mission_end: None,
            restart_pending: false,
            last_seen: Utc::now(),
            extensions: Vec::new(),
            settings: HashMap::new(),
        }
    }

    pub fn population(&self) -> usize {
        self.players.values().filter(|p| p.active).count()
    }

    pub fn is_populated(&self) -> bool {
        self.population() > 0
    }

    /// Sets a single-slot deferred action, implying `restart_pending = true`.
    /// Per the data-model invariant, setting either slot clears the other is
    /// NOT implied -- each slot is independent, but clearing `restart_pending`
    /// must clear both.
    pub fn set_on_empty(&mut self, action: PendingAction) {
        self.on_empty = Some(action);
        self.restart_pending = true;
    }

    pub fn set_on_mission_end(&mut self, action: PendingAction) {
        self.on_mission_end = Some(action);
        self.restart_pending = true;
    }

    pub fn clear_deferred_actions(&mut self) {
        self.on_empty = None;
        self.on_mission_end = None;
        self.restart_pending = false;
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }
}

/// A banned player. Active iff `banned_until > now`. The sentinel
/// `9999-12-31T00:00:00Z` means permanent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ban {
    pub ucid: String,
    pub banned_by: String,
    pub reason: String,
    pub banned_at: DateTime<Utc>,
    pub banned_until: DateTime<Utc>,
}

pub fn permanent_ban_sentinel() -> DateTime<Utc> {
    "9999-12-31T00:00:00Z".parse().expect("valid sentinel timestamp")
}

impl Ban {
    pub fn is_active(&self) -> bool {
        self.banned_until > Utc::now()
    }
}

/// A previously posted operator-facing message, keyed so it can be updated in
/// place instead of re-posted. `host_name` is `None` for master-scoped embeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedMessage {
    pub host_name: Option<String>,
    pub embed_name: String,
    pub external_message_id: String,
}

/// Monotonic-ish wall clock seconds since epoch, used for mission timers.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_from_unregistered_moves_to_loading() {
        let next = transition("h1", HostStatus::Unregistered, &HostEvent::RegisterDcsServer).unwrap();
        assert_eq!(next, HostStatus::Loading);
    }

    #[test]
    fn register_from_shutdown_moves_to_loading() {
        let next = transition("h1", HostStatus::Shutdown, &HostEvent::RegisterDcsServer).unwrap();
        assert_eq!(next, HostStatus::Loading);
    }

    #[test]
    fn full_lifecycle_walks_expected_path() {
        let mut status = HostStatus::Unregistered;
        for event in [
            HostEvent::RegisterDcsServer,
            HostEvent::MissionLoadEnd,
            HostEvent::SimulationStart,
            HostEvent::SimulationResume,
            HostEvent::SimulationPause,
            HostEvent::SimulationStop,
        ] {
            status = transition("h1", status, &event).unwrap();
        }
        assert_eq!(status, HostStatus::Stopped);
    }

    #[test]
    fn process_dead_is_valid_from_any_non_shutdown_state() {
        for status in [HostStatus::Loading, HostStatus::Stopped, HostStatus::Paused, HostStatus::Running] {
            assert_eq!(transition("h1", status, &HostEvent::ProcessDead).unwrap(), HostStatus::Shutdown);
        }
    }

    #[test]
    fn process_dead_from_shutdown_is_rejected() {
        assert!(transition("h1", HostStatus::Shutdown, &HostEvent::ProcessDead).is_err());
    }

    #[test]
    fn operator_shutdown_is_valid_from_any_state() {
        for status in [
            HostStatus::Unregistered,
            HostStatus::Loading,
            HostStatus::Stopped,
            HostStatus::Paused,
            HostStatus::Running,
            HostStatus::Shutdown,
        ] {
            assert_eq!(transition("h1", status, &HostEvent::OperatorShutdown).unwrap(), HostStatus::Shutdown);
        }
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let err = transition("h1", HostStatus::Unregistered, &HostEvent::SimulationStart).unwrap_err();
        assert!(matches!(err, HostctlError::InvalidTransition { .. }));
    }

    #[test]
    fn population_counts_only_active_players() {
        let mut host = Host::new("h1", "node1", "instance1");
        host.players.insert(
            1,
            Player {
                id: 1,
                ucid: "a".into(),
                name: "Alice".into(),
                side: Side::Blue,
                slot: None,
                sub_slot: None,
                unit_type: None,
                group_name: None,
                active: true,
                watchlist: false,
            },
        );
        host.players.insert(
            2,
            Player {
                id: 2,
                ucid: "b".into(),
                name: "Bob".into(),
                side: Side::Spectator,
                slot: None,
                sub_slot: None,
                unit_type: None,
                group_name: None,
                active: false,
                watchlist: false,
            },
        );
        assert_eq!(host.population(), 1);
        assert!(host.is_populated());
    }

    #[test]
    fn setting_one_deferred_slot_does_not_clear_the_other() {
        let mut host = Host::new("h1", "node1", "instance1");
        host.set_on_empty(PendingAction { command: "restart".into(), args: vec![] });
        host.set_on_mission_end(PendingAction { command: "rotate".into(), args: vec![] });
        assert!(host.on_empty.is_some());
        assert!(host.on_mission_end.is_some());
        assert!(host.restart_pending);

        host.on_empty = None;
        assert!(host.on_mission_end.is_some());
    }

    #[test]
    fn clear_deferred_actions_resets_both_slots_and_flag() {
        let mut host = Host::new("h1", "node1", "instance1");
        host.set_on_empty(PendingAction { command: "restart".into(), args: vec![] });
        host.clear_deferred_actions();
        assert!(host.on_empty.is_none());
        assert!(host.on_mission_end.is_none());
        assert!(!host.restart_pending);
    }

    #[test]
    fn ban_is_active_until_the_sentinel() {
        let ban = Ban {
            ucid: "abc".into(),
            banned_by: "admin".into(),
            reason: "cheating".into(),
            banned_at: Utc::now(),
            banned_until: permanent_ban_sentinel(),
        };
        assert!(ban.is_active());
    }
}
