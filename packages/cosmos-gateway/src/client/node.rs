use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use super::{node_chooser::NodeChooser, RpcClient, RpcConnector};
use crate::error::ConnectionError;
use crate::store::{ChainSnapshot, ChainStore};

/// Source of the current time for connection validity checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settings shared by every chain's connection.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub connector: Arc<dyn RpcConnector>,
    pub clock: Arc<dyn Clock>,
    /// How long a chosen endpoint is used before probing again.
    pub ttl: chrono::Duration,
    pub probe_timeout: Duration,
}

/// A client handed out by [ChainConnection::client].
///
/// Carries the generation of the connection state it came from, so a caller
/// that sees it fail only invalidates that state and not a newer one.
#[derive(Clone)]
pub struct ActiveClient {
    client: Arc<dyn RpcClient>,
    generation: u64,
}

impl ActiveClient {
    pub fn client(&self) -> &Arc<dyn RpcClient> {
        &self.client
    }

    pub fn endpoint(&self) -> &str {
        self.client.endpoint()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

enum ConnectionState {
    Invalid,
    Active {
        client: Arc<dyn RpcClient>,
        valid_until: DateTime<Utc>,
    },
}

struct Guarded {
    state: ConnectionState,
    generation: u64,
}

/// The RPC connection of a single chain.
///
/// Cheap to read while valid. Once the TTL expires or the connection is
/// invalidated, the next caller probes every endpoint again while concurrent
/// callers wait for its result.
pub struct ChainConnection {
    chain_id: String,
    endpoints: RwLock<Arc<Vec<String>>>,
    guarded: RwLock<Guarded>,
    probe_lock: tokio::sync::Mutex<()>,
    settings: ConnectionSettings,
}

impl ChainConnection {
    pub fn new(
        chain_id: impl Into<String>,
        endpoints: Vec<String>,
        settings: ConnectionSettings,
    ) -> Self {
        ChainConnection {
            chain_id: chain_id.into(),
            endpoints: RwLock::new(Arc::new(endpoints)),
            guarded: RwLock::new(Guarded {
                state: ConnectionState::Invalid,
                generation: 0,
            }),
            probe_lock: tokio::sync::Mutex::new(()),
            settings,
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn endpoints(&self) -> Arc<Vec<String>> {
        self.endpoints.read().clone()
    }

    /// Replace the candidate endpoints, invalidating the connection if they changed.
    pub fn set_endpoints(&self, endpoints: Vec<String>) {
        let mut current = self.endpoints.write();
        if **current == endpoints {
            return;
        }
        *current = Arc::new(endpoints);
        drop(current);
        self.invalidate();
    }

    fn cached(&self) -> Option<ActiveClient> {
        let guarded = self.guarded.read();
        match &guarded.state {
            ConnectionState::Active {
                client,
                valid_until,
            } if self.settings.clock.now() < *valid_until => Some(ActiveClient {
                client: client.clone(),
                generation: guarded.generation,
            }),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.cached().is_some()
    }

    /// Get a healthy client, probing the endpoints if needed.
    pub async fn client(&self) -> Result<ActiveClient, ConnectionError> {
        if let Some(active) = self.cached() {
            return Ok(active);
        }

        let _probing = self.probe_lock.lock().await;
        // Someone else may have finished probing while we waited.
        if let Some(active) = self.cached() {
            return Ok(active);
        }

        let endpoints = self.endpoints();
        let chooser = NodeChooser::new(&*self.settings.connector, self.settings.probe_timeout);
        let client = chooser.choose_node(&endpoints).await.ok_or_else(|| {
            ConnectionError::NoAvailableRpc {
                chain_id: self.chain_id.clone(),
            }
        })?;
        tracing::debug!(
            "Using RPC endpoint {} for chain {}",
            client.endpoint(),
            self.chain_id
        );

        let valid_until = self.settings.clock.now() + self.settings.ttl;
        let mut guarded = self.guarded.write();
        guarded.generation += 1;
        guarded.state = ConnectionState::Active {
            client: client.clone(),
            valid_until,
        };
        Ok(ActiveClient {
            client,
            generation: guarded.generation,
        })
    }

    /// Force the next [Self::client] call to probe again.
    pub fn invalidate(&self) {
        self.guarded.write().state = ConnectionState::Invalid;
    }

    /// Invalidate only if the state has not been replaced since `generation`
    /// was handed out.
    pub fn invalidate_generation(&self, generation: u64) {
        let mut guarded = self.guarded.write();
        if guarded.generation == generation {
            tracing::debug!("Invalidating RPC connection for chain {}", self.chain_id);
            guarded.state = ConnectionState::Invalid;
        }
    }
}

/// Lazily created [ChainConnection]s for every chain in a [ChainStore].
///
/// Connections of chains dropped by a store refresh are discarded the next
/// time any connection is requested.
pub struct ConnectionManager {
    store: ChainStore,
    settings: ConnectionSettings,
    connections: RwLock<HashMap<String, Arc<ChainConnection>>>,
    /// The snapshot `connections` was last pruned against.
    pruned: Mutex<Weak<ChainSnapshot>>,
}

impl ConnectionManager {
    pub fn new(store: ChainStore, settings: ConnectionSettings) -> Self {
        ConnectionManager {
            store,
            settings,
            connections: RwLock::new(HashMap::new()),
            pruned: Mutex::new(Weak::new()),
        }
    }

    /// The connection of a chain, with its endpoints taken from the current store.
    pub fn connection(&self, chain_id: &str) -> Result<Arc<ChainConnection>, ConnectionError> {
        let snapshot = self.store.snapshot();
        self.prune(&snapshot);
        let endpoints = snapshot.get_by_id(chain_id)?.rpc_endpoints();
        let existing = self.connections.read().get(chain_id).cloned();
        let connection = match existing {
            Some(connection) => {
                connection.set_endpoints(endpoints);
                connection
            }
            None => self
                .connections
                .write()
                .entry(chain_id.to_owned())
                .or_insert_with(|| {
                    Arc::new(ChainConnection::new(
                        chain_id,
                        endpoints,
                        self.settings.clone(),
                    ))
                })
                .clone(),
        };
        Ok(connection)
    }

    pub async fn client(&self, chain_id: &str) -> Result<ActiveClient, ConnectionError> {
        self.connection(chain_id)?.client().await
    }

    /// Drop the connections of chains missing from `snapshot`, once per snapshot.
    fn prune(&self, snapshot: &Arc<ChainSnapshot>) {
        let mut pruned = self.pruned.lock();
        if Weak::ptr_eq(&pruned, &Arc::downgrade(snapshot)) {
            return;
        }
        self.connections.write().retain(|chain_id, _| {
            let keep = snapshot.get_by_id(chain_id).is_ok();
            if !keep {
                tracing::debug!("Dropping RPC connection for removed chain {chain_id}");
            }
            keep
        });
        *pruned = Arc::downgrade(snapshot);
    }

    pub fn invalidate(&self, chain_id: &str) {
        if let Some(connection) = self.connections.read().get(chain_id) {
            connection.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Apis, Chain, Rpc};
    use crate::client::testing::{Counters, FakeConnector, FakeNode, ManualClock};

    fn settings(connector: Arc<FakeConnector>, clock: Arc<ManualClock>) -> ConnectionSettings {
        ConnectionSettings {
            connector,
            clock,
            ttl: chrono::Duration::minutes(10),
            probe_timeout: Duration::from_secs(5),
        }
    }

    fn connection(
        endpoints: &[&str],
        connector: Arc<FakeConnector>,
        clock: Arc<ManualClock>,
    ) -> ChainConnection {
        ChainConnection::new(
            "test-1",
            endpoints.iter().map(|x| x.to_string()).collect(),
            settings(connector, clock),
        )
    }

    #[tokio::test]
    async fn cached_until_ttl() {
        let connector = Arc::new(FakeConnector::default().with_node("a", FakeNode::default()));
        let clock = Arc::new(ManualClock::default());
        let conn = connection(&["a"], connector.clone(), clock.clone());

        let first = conn.client().await.unwrap();
        assert_eq!(first.endpoint(), "a");
        assert_eq!(Counters::get(&connector.counters.status), 1);

        clock.advance(chrono::Duration::minutes(9));
        conn.client().await.unwrap();
        assert_eq!(Counters::get(&connector.counters.status), 1);

        clock.advance(chrono::Duration::minutes(1));
        assert!(!conn.is_valid());
        let second = conn.client().await.unwrap();
        assert_eq!(Counters::get(&connector.counters.status), 2);
        assert!(second.generation() > first.generation());
    }

    #[tokio::test]
    async fn no_available_rpc_stays_invalid() {
        let connector = Arc::new(FakeConnector::default());
        let clock = Arc::new(ManualClock::default());
        let conn = connection(&["a", "b"], connector.clone(), clock);

        let err = conn.client().await.err().unwrap();
        assert!(matches!(err, ConnectionError::NoAvailableRpc { .. }));
        assert!(!conn.is_valid());
        assert_eq!(Counters::get(&connector.counters.status), 2);

        // Every call probes again, no caching of failure.
        conn.client().await.err().unwrap();
        assert_eq!(Counters::get(&connector.counters.status), 4);

        connector.set_node("b", FakeNode::default());
        assert_eq!(conn.client().await.unwrap().endpoint(), "b");
    }

    #[tokio::test]
    async fn invalidate_forces_reprobe() {
        let connector = Arc::new(FakeConnector::default().with_node("a", FakeNode::default()));
        let clock = Arc::new(ManualClock::default());
        let conn = connection(&["a"], connector.clone(), clock);

        conn.client().await.unwrap();
        conn.invalidate();
        conn.client().await.unwrap();
        assert_eq!(Counters::get(&connector.counters.status), 2);
    }

    #[tokio::test]
    async fn stale_generation_does_not_invalidate() {
        let connector = Arc::new(FakeConnector::default().with_node("a", FakeNode::default()));
        let clock = Arc::new(ManualClock::default());
        let conn = connection(&["a"], connector.clone(), clock);

        let old = conn.client().await.unwrap();
        conn.invalidate();
        let new = conn.client().await.unwrap();
        conn.invalidate_generation(old.generation());
        assert!(conn.is_valid());
        conn.invalidate_generation(new.generation());
        assert!(!conn.is_valid());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_probe() {
        let connector = Arc::new(
            FakeConnector::default()
                .with_node(
                    "a",
                    FakeNode {
                        status_delay: Duration::from_millis(50),
                        ..FakeNode::default()
                    },
                )
                .with_node(
                    "b",
                    FakeNode {
                        status_delay: Duration::from_millis(50),
                        ..FakeNode::default()
                    },
                ),
        );
        let clock = Arc::new(ManualClock::default());
        let conn = Arc::new(connection(&["a", "b"], connector.clone(), clock));

        let tasks = (0..32)
            .map(|_| {
                let conn = conn.clone();
                tokio::spawn(async move { conn.client().await.map(|c| c.generation()) })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 1);
        }
        // One probe round: one status call per endpoint.
        assert_eq!(Counters::get(&connector.counters.status), 2);
    }

    fn chain(chain_id: &str, endpoints: &[&str]) -> Chain {
        Chain {
            chain_id: chain_id.to_owned(),
            chain_name: chain_id.to_owned(),
            bech32_prefix: chain_id.to_owned(),
            apis: Apis {
                rpc: endpoints
                    .iter()
                    .map(|address| Rpc {
                        address: address.to_string(),
                        provider: String::new(),
                    })
                    .collect(),
            },
            ..Chain::default()
        }
    }

    #[tokio::test]
    async fn manager_is_per_chain_and_follows_store() {
        let connector = Arc::new(
            FakeConnector::default()
                .with_node("a", FakeNode::default())
                .with_node("b", FakeNode::default()),
        );
        let clock = Arc::new(ManualClock::default());
        let store = ChainStore::new(vec![chain("one", &["a"]), chain("two", &["b"])]);
        let manager = ConnectionManager::new(store.clone(), settings(connector.clone(), clock));

        assert_eq!(manager.client("one").await.unwrap().endpoint(), "a");
        assert_eq!(manager.client("two").await.unwrap().endpoint(), "b");
        assert!(Arc::ptr_eq(
            &manager.connection("one").unwrap(),
            &manager.connection("one").unwrap()
        ));
        assert!(matches!(
            manager.client("three").await.err().unwrap(),
            ConnectionError::Store(_)
        ));

        store.replace(vec![chain("one", &["b"])]);
        assert_eq!(manager.client("one").await.unwrap().endpoint(), "b");
    }

    #[tokio::test]
    async fn removed_chains_lose_their_connection() {
        let connector = Arc::new(
            FakeConnector::default()
                .with_node("a", FakeNode::default())
                .with_node("b", FakeNode::default()),
        );
        let clock = Arc::new(ManualClock::default());
        let store = ChainStore::new(vec![chain("one", &["a"]), chain("two", &["b"])]);
        let manager = ConnectionManager::new(store.clone(), settings(connector, clock));

        let two = manager.connection("two").unwrap();
        manager.connection("one").unwrap();
        assert_eq!(manager.connections.read().len(), 2);

        store.replace(vec![chain("one", &["a"])]);
        manager.connection("one").unwrap();
        assert!(!manager.connections.read().contains_key("two"));
        assert_eq!(manager.connections.read().len(), 1);

        // Coming back creates a fresh connection.
        store.replace(vec![chain("one", &["a"]), chain("two", &["b"])]);
        assert!(!Arc::ptr_eq(&two, &manager.connection("two").unwrap()));
    }

    #[test]
    fn unchanged_endpoints_keep_the_connection() {
        let connector = Arc::new(FakeConnector::default());
        let clock = Arc::new(ManualClock::default());
        let conn = connection(&["a"], connector, clock);
        let before = conn.endpoints();
        conn.set_endpoints(vec!["a".to_owned()]);
        assert!(Arc::ptr_eq(&before, &conn.endpoints()));
        conn.set_endpoints(vec!["b".to_owned()]);
        assert_eq!(*conn.endpoints(), vec!["b".to_owned()]);
    }
}
