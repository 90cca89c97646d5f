//! Explicit cluster context threaded through every harness operation

use std::sync::Arc;

use crate::config::HarnessConfig;
use crate::error::Result;
use crate::orchestrator::{JujuCli, Orchestrator};
use crate::process::{ProcessRegistry, SystemProcessRegistry};
use crate::store::{Connector, DataStore, MongoConnector};
use crate::topology::{self, ConnectionDescriptor};

/// Handles to the three boundary collaborators plus configuration.
///
/// Holds no resolved topology; see [`topology`] for why descriptors are
/// resolved per call.
#[derive(Clone)]
pub struct ClusterContext {
    config: HarnessConfig,
    orchestrator: Arc<dyn Orchestrator>,
    connector: Arc<dyn Connector>,
    processes: Arc<dyn ProcessRegistry>,
}

impl ClusterContext {
    pub fn new(
        config: HarnessConfig,
        orchestrator: Arc<dyn Orchestrator>,
        connector: Arc<dyn Connector>,
        processes: Arc<dyn ProcessRegistry>,
    ) -> Self {
        ClusterContext {
            config,
            orchestrator,
            connector,
            processes,
        }
    }

    /// Context for a live Juju model running MongoDB on this host
    pub fn live(config: HarnessConfig, juju: JujuCli) -> Self {
        Self::new(
            config,
            Arc::new(juju),
            Arc::new(MongoConnector::new()),
            Arc::new(SystemProcessRegistry::new()),
        )
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &dyn Orchestrator {
        self.orchestrator.as_ref()
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub fn processes(&self) -> &dyn ProcessRegistry {
        self.processes.as_ref()
    }

    /// Open the workload database through a given descriptor
    pub async fn open(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn DataStore>> {
        self.connector
            .connect(descriptor, &self.config.database)
            .await
    }

    /// Resolve a fresh descriptor and open the workload database
    pub async fn connect(&self) -> Result<Box<dyn DataStore>> {
        let descriptor = topology::resolve_descriptor(self).await?;
        self.open(&descriptor).await
    }
}
