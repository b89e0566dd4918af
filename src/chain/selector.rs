//! Ordered RPC endpoint failover.
//!
//! `select()` walks the configured endpoints in order and returns the first
//! one that answers `eth_blockNumber` within the probe timeout. Nothing is
//! cached between calls: every operation that needs the chain probes again,
//! so a node that went down since the last call is skipped automatically.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{ChainClient, Connector};
use crate::types::{ChainFault, ProviderEndpoint, TreasuryError};

/// A client whose endpoint just answered a liveness probe.
#[derive(Clone)]
pub struct ActiveConnection {
    pub endpoint: ProviderEndpoint,
    pub client: Arc<dyn ChainClient>,
    /// Block number returned by the probe.
    pub block_number: u64,
}

impl std::fmt::Debug for ActiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveConnection")
            .field("endpoint", &self.endpoint.name)
            .field("block_number", &self.block_number)
            .finish()
    }
}

pub struct ChainProviderSelector {
    endpoints: Vec<ProviderEndpoint>,
    connector: Arc<dyn Connector>,
    rpc_timeout: Duration,
    live: RwLock<Option<String>>,
}

impl ChainProviderSelector {
    pub fn new(
        endpoints: Vec<ProviderEndpoint>,
        connector: Arc<dyn Connector>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            endpoints,
            connector,
            rpc_timeout,
            live: RwLock::new(None),
        }
    }

    /// Return a connection to the first endpoint that answers.
    ///
    /// Fails with `Connectivity` when every endpoint fails; the live
    /// endpoint name is left unchanged in that case.
    pub async fn select(&self) -> Result<ActiveConnection, TreasuryError> {
        let mut last_error = String::from("no RPC endpoints configured");

        for endpoint in &self.endpoints {
            match self.probe(endpoint).await {
                Ok(connection) => {
                    self.mark_live(&endpoint.name).await;
                    debug!(
                        rpc = %endpoint.name,
                        block = connection.block_number,
                        "RPC endpoint selected"
                    );
                    return Ok(connection);
                }
                Err(fault) => {
                    warn!(rpc = %endpoint.name, error = %fault.message, "RPC endpoint failed");
                    last_error = format!("{}: {}", endpoint.name, fault.message);
                }
            }
        }

        Err(TreasuryError::Connectivity {
            attempted: self.endpoints.len(),
            last_error,
        })
    }

    async fn probe(&self, endpoint: &ProviderEndpoint) -> Result<ActiveConnection, ChainFault> {
        let client = self.connector.connect(endpoint)?;
        let block_number = match tokio::time::timeout(self.rpc_timeout, client.block_number()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ChainFault::timeout(format!(
                    "no answer within {}s",
                    self.rpc_timeout.as_secs()
                )))
            }
        };
        Ok(ActiveConnection {
            endpoint: endpoint.clone(),
            client,
            block_number,
        })
    }

    async fn mark_live(&self, name: &str) {
        let mut live = self.live.write().await;
        if live.as_deref() != Some(name) {
            info!(rpc = %name, previous = ?*live, "Live RPC endpoint changed");
            *live = Some(name.to_string());
        }
    }

    /// Name of the endpoint that answered the most recent successful probe.
    pub async fn live_endpoint(&self) -> Option<String> {
        self.live.read().await.clone()
    }

    /// Address of the treasury signer.
    pub fn treasury_address(&self) -> Address {
        self.connector.signer_address()
    }

    /// Bound applied to probes and to every RPC read.
    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    pub fn endpoints(&self) -> &[ProviderEndpoint] {
        &self.endpoints
    }
}
