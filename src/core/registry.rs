// src/core/registry.rs

//! The in-memory host registry: a node's view of the hosts it locally owns.
//! Mutation is restricted to the owning node; remote nodes only ever see
//! hosts through RPC proxies (see `crate::core::rpc`).

use dashmap::DashMap;
use dashmap::mapref::one::{Ref, RefMut};
use tokio::sync::broadcast;
use tracing::info;

use crate::core::errors::HostctlError;
use crate::core::model::Host;

/// A change to the registry's membership, broadcast to anyone who needs to
/// react to a host appearing, being renamed, or disappearing -- the RPC layer
/// uses this to merge a newly-observed node's hosts into the fleet view
/// without waiting for each one to individually re-register.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Registered(Host),
    Renamed { old_name: String, new_name: String },
    Removed(String),
}

/// An ordered, thread-safe map of host name -> host state, guarded by coarse
/// logical ownership: only the owning node's tasks ever take a `RefMut`.
#[derive(Debug)]
pub struct HostRegistry {
    hosts: DashMap<String, Host>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            hosts: DashMap::new(),
            events,
        }
    }

    /// Subscribes to registry membership changes. Lagging subscribers miss
    /// events rather than block a mutator -- a late embed refresh is
    /// harmless, a stalled registration is not.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        // No receivers is the common case outside of tests; not an error.
        let _ = self.events.send(event);
    }

    /// Registers a new host, or returns a port conflict error if `dcs_port`
    /// or `webgui_port` collides with an existing host on the same node.
    pub fn register(&self, host: Host) -> Result<(), HostctlError> {
        if let Some(existing) = self.find_port_conflict(&host.node_name, host.dcs_port, host.webgui_port, &host.name) {
            return Err(HostctlError::PortConflict {
                node: host.node_name.clone(),
                port: host.dcs_port,
                existing,
            });
        }
        info!(host = %host.name, node = %host.node_name, "registering host");
        self.hosts.insert(host.name.clone(), host.clone());
        self.emit(RegistryEvent::Registered(host));
        Ok(())
    }

    fn find_port_conflict(
        &self,
        node_name: &str,
        dcs_port: u16,
        webgui_port: u16,
        excluding: &str,
    ) -> Option<String> {
        self.hosts.iter().find_map(|entry| {
            let h = entry.value();
            if h.name == excluding || h.node_name != node_name {
                return None;
            }
            if (dcs_port != 0 && h.dcs_port == dcs_port) || (webgui_port != 0 && h.webgui_port == webgui_port) {
                Some(h.name.clone())
            } else {
                None
            }
        })
    }

    pub fn get(&self, name: &str) -> Option<Ref<'_, String, Host>> {
        self.hosts.get(name)
    }

    pub fn get_mut(&self, name: &str) -> Option<RefMut<'_, String, Host>> {
        self.hosts.get_mut(name)
    }

    pub fn remove(&self, name: &str) -> Option<Host> {
        let removed = self.hosts.remove(name).map(|(_, h)| h);
        if removed.is_some() {
            self.emit(RegistryEvent::Removed(name.to_string()));
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hosts.contains_key(name)
    }

    pub fn list(&self) -> Vec<Host> {
        self.hosts.iter().map(|e| e.value().clone()).collect()
    }

    pub fn list_for_node(&self, node_name: &str) -> Vec<Host> {
        self.hosts
            .iter()
            .filter(|e| e.value().node_name == node_name)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn find_by_port(&self, node_name: &str, port: u16) -> Option<String> {
        self.hosts.iter().find_map(|e| {
            let h = e.value();
            if h.node_name == node_name && (h.dcs_port == port || h.webgui_port == port) {
                Some(h.name.clone())
            } else {
                None
            }
        })
    }

    /// Cluster-wide rename: updates the registry key and the host's own name
    /// field. Callers are responsible for propagating the rename to
    /// `servers`/`instances`/`message_persistence` rows and broadcasting it.
    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<(), HostctlError> {
        let (_, mut host) = self
            .hosts
            .remove(old_name)
            .ok_or_else(|| HostctlError::HostNotFound(old_name.to_string()))?;
        host.name = new_name.to_string();
        self.hosts.insert(new_name.to_string(), host);
        info!(old_name, new_name, "renamed host");
        self.emit(RegistryEvent::Renamed {
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
        });
        Ok(())
    }

    pub fn mark_node_silent(&self, node_name: &str) {
        for mut entry in self.hosts.iter_mut() {
            if entry.node_name == node_name {
                entry.status = crate::core::model::HostStatus::Unregistered;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str, node: &str, dcs_port: u16) -> Host {
        let mut h = Host::new(name, node, format!("{name}-instance"));
        h.dcs_port = dcs_port;
        h.webgui_port = dcs_port + 1000;
        h
    }

    #[test]
    fn register_rejects_port_conflict() {
        let reg = HostRegistry::new();
        reg.register(host("a", "node1", 10308)).unwrap();
        let err = reg.register(host("b", "node1", 10308)).unwrap_err();
        assert!(matches!(err, HostctlError::PortConflict { .. }));
    }

    #[test]
    fn register_allows_same_port_on_different_nodes() {
        let reg = HostRegistry::new();
        reg.register(host("a", "node1", 10308)).unwrap();
        reg.register(host("b", "node2", 10308)).unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn rename_updates_key_and_field() {
        let reg = HostRegistry::new();
        reg.register(host("a", "node1", 10308)).unwrap();
        reg.rename("a", "a2").unwrap();
        assert!(reg.get("a2").is_some());
        assert!(reg.get("a").is_none());
        assert_eq!(reg.get("a2").unwrap().name, "a2");
    }

    #[test]
    fn mark_node_silent_reverts_status() {
        let reg = HostRegistry::new();
        let mut h = host("a", "node1", 10308);
        h.status = crate::core::model::HostStatus::Running;
        reg.register(h).unwrap();
        reg.mark_node_silent("node1");
        assert_eq!(reg.get("a").unwrap().status, crate::core::model::HostStatus::Unregistered);
    }
}
