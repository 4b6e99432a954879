// src/core/extensions.rs

//! Extension points for collaborators outside this crate's scope: mission
//! preprocessors, content-mod installers, and similar host-local plugins
//! that hook into a host's lifecycle without living in the control plane
//! itself (see the specification's Non-goals around mission templating and
//! mod distribution).

use async_trait::async_trait;

use crate::core::errors::HostctlError;
use crate::core::model::Host;

/// Lifecycle hooks an external collaborator can register against a host.
/// Default implementations are no-ops so an extension only needs to
/// override the hooks it cares about.
#[async_trait]
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self, _host: &Host) -> Result<(), HostctlError> {
        Ok(())
    }

    async fn before_mission_load(&self, _host: &Host, _mission_filename: &str) -> Result<(), HostctlError> {
        Ok(())
    }

    async fn before_start(&self, _host: &Host) -> Result<(), HostctlError> {
        Ok(())
    }

    async fn after_start(&self, _host: &Host) -> Result<(), HostctlError> {
        Ok(())
    }

    async fn before_stop(&self, _host: &Host) -> Result<(), HostctlError> {
        Ok(())
    }

    async fn shutdown(&self, _host: &Host) -> Result<(), HostctlError> {
        Ok(())
    }
}

/// Runs an ordered list of extensions through one hook, logging but not
/// aborting on an individual extension's failure -- a broken third-party
/// extension must not be able to block a host's own lifecycle.
pub struct ExtensionChain {
    extensions: Vec<Box<dyn Extension>>,
}

impl ExtensionChain {
    pub fn new(extensions: Vec<Box<dyn Extension>>) -> Self {
        Self { extensions }
    }

    pub async fn before_start(&self, host: &Host) {
        for ext in &self.extensions {
            if let Err(e) = ext.before_start(host).await {
                tracing::warn!(extension = ext.name(), host = %host.name, error = %e, "extension hook failed");
            }
        }
    }

    pub async fn before_mission_load(&self, host: &Host, mission_filename: &str) {
        for ext in &self.extensions {
            if let Err(e) = ext.before_mission_load(host, mission_filename).await {
                tracing::warn!(extension = ext.name(), host = %host.name, error = %e, "extension hook failed");
            }
        }
    }

    pub async fn after_start(&self, host: &Host) {
        for ext in &self.extensions {
            if let Err(e) = ext.after_start(host).await {
                tracing::warn!(extension = ext.name(), host = %host.name, error = %e, "extension hook failed");
            }
        }
    }

    pub async fn before_stop(&self, host: &Host) {
        for ext in &self.extensions {
            if let Err(e) = ext.before_stop(host).await {
                tracing::warn!(extension = ext.name(), host = %host.name, error = %e, "extension hook failed");
            }
        }
    }

    pub async fn shutdown(&self, host: &Host) {
        for ext in &self.extensions {
            if let Err(e) = ext.shutdown(host).await {
                tracing::warn!(extension = ext.name(), host = %host.name, error = %e, "extension hook failed");
            }
        }
    }
}
