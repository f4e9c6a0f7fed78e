use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;

use super::{RpcClient, RpcConnector};
use crate::error::RpcError;

/// Why an endpoint was not considered healthy.
#[derive(Debug)]
pub(super) enum ProbeFailure {
    Connect(RpcError),
    Status(RpcError),
    Timeout,
    CatchingUp,
}

/// Probes candidate endpoints and picks one of the healthy ones.
pub(super) struct NodeChooser<'a> {
    connector: &'a dyn RpcConnector,
    probe_timeout: Duration,
}

impl<'a> NodeChooser<'a> {
    pub(super) fn new(connector: &'a dyn RpcConnector, probe_timeout: Duration) -> Self {
        NodeChooser {
            connector,
            probe_timeout,
        }
    }

    async fn probe(&self, endpoint: &str) -> Result<Arc<dyn RpcClient>, ProbeFailure> {
        let client = self
            .connector
            .connect(endpoint)
            .map_err(ProbeFailure::Connect)?;
        match tokio::time::timeout(self.probe_timeout, client.status()).await {
            Err(_) => Err(ProbeFailure::Timeout),
            Ok(Err(e)) => Err(ProbeFailure::Status(e)),
            Ok(Ok(status)) if status.catching_up => Err(ProbeFailure::CatchingUp),
            Ok(Ok(_)) => Ok(client),
        }
    }

    /// Probe every endpoint at once and wait for all of them.
    pub(super) async fn healthy_nodes(&self, endpoints: &[String]) -> Vec<Arc<dyn RpcClient>> {
        let results =
            futures::future::join_all(endpoints.iter().map(|endpoint| self.probe(endpoint))).await;
        endpoints
            .iter()
            .zip(results)
            .filter_map(|(endpoint, result)| match result {
                Ok(client) => Some(client),
                Err(e) => {
                    tracing::debug!("Endpoint {endpoint} failed health probe: {e:?}");
                    None
                }
            })
            .collect()
    }

    pub(super) async fn choose_node(&self, endpoints: &[String]) -> Option<Arc<dyn RpcClient>> {
        let healthy = self.healthy_nodes(endpoints).await;
        tracing::debug!(
            "{} of {} endpoints passed health probes",
            healthy.len(),
            endpoints.len()
        );
        let mut rng = rand::thread_rng();
        healthy.as_slice().choose(&mut rng).cloned()
    }
}
