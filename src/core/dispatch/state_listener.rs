// src/core/dispatch/state_listener.rs

//! Maps the UDP protocol's own lifecycle commands onto the host state
//! machine. This is the one listener every node always needs, since it is
//! what keeps a host's `HostStatus` in the registry in sync with reality.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::core::ingress::HostMessage;
use crate::core::lifecycle::{LifecycleManager, Platform};
use crate::core::model::HostEvent;

use super::Listener;

const EVENTS: &[&str] = &[
    "registerDCSServer",
    "onMissionLoadEnd",
    "onSimulationStart",
    "onSimulationResume",
    "onSimulationPause",
    "onSimulationStop",
];

pub struct HostStateListener<P: Platform> {
    lifecycle: Arc<LifecycleManager<P>>,
}

impl<P: Platform> HostStateListener<P> {
    pub fn new(lifecycle: Arc<LifecycleManager<P>>) -> Self {
        Self { lifecycle }
    }

    fn event_for(command: &str) -> Option<HostEvent> {
        match command {
            "registerDCSServer" => Some(HostEvent::RegisterDcsServer),
            "onMissionLoadEnd" => Some(HostEvent::MissionLoadEnd),
            "onSimulationStart" => Some(HostEvent::SimulationStart),
            "onSimulationResume" => Some(HostEvent::SimulationResume),
            "onSimulationPause" => Some(HostEvent::SimulationPause),
            "onSimulationStop" => Some(HostEvent::SimulationStop),
            _ => None,
        }
    }
}

#[async_trait]
impl<P: Platform> Listener for HostStateListener<P> {
    fn name(&self) -> &str {
        "host_state"
    }

    fn events(&self) -> &[&str] {
        EVENTS
    }

    async fn on_message(&self, message: &HostMessage) {
        let Some(event) = Self::event_for(&message.command) else {
            return;
        };
        if let Err(e) = self.lifecycle.apply_event(&message.server_name, event) {
            warn!(
                host = %message.server_name,
                command = %message.command,
                error = %e,
                "host state transition rejected"
            );
        }
    }
}
