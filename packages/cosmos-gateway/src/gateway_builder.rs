use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::chain::Chain;
use crate::client::{
    Bridge, Clock, ConnectionManager, ConnectionSettings, HttpConnector, RpcConnector,
    SystemClock, TypeRegistry,
};
use crate::error::BuilderError;
use crate::events::{EventSource, EventSubscriber, TxNotifier, WebSocketSource};
use crate::gateway::Gateway;
use crate::registry::{FsRegistry, GithubRegistry, RegistryDocuments};
use crate::store::ChainStore;
use crate::txbuilder::SignMode;

/// Where chain metadata is loaded from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RegistrySource {
    /// The `cosmos/chain-registry` repository on GitHub.
    #[default]
    Github,
    /// A local checkout of the chain registry.
    Filesystem(PathBuf),
}

/// Used to build a [crate::Gateway].
#[derive(Clone, Default)]
pub struct GatewayBuilder {
    registry_source: RegistrySource,

    // Values with defaults
    connection_ttl: Option<Duration>,
    probe_timeout: Option<Duration>,
    query_timeout: Option<Duration>,
    gas_adjustment: Option<f64>,
    refresh_interval: Option<Duration>,
    sign_mode: Option<SignMode>,

    // Replaceable collaborators
    connector: Option<Arc<dyn RpcConnector>>,
    clock: Option<Arc<dyn Clock>>,
    event_source: Option<Arc<dyn EventSource>>,
    notifier: Option<Arc<dyn TxNotifier>>,
    type_registry: Option<TypeRegistry>,
    registry_documents: Option<Arc<dyn RegistryDocuments>>,
}

impl GatewayBuilder {
    /// Create a new [GatewayBuilder] with default options.
    pub fn new() -> GatewayBuilder {
        Self::default()
    }

    /// Where to load chains from
    pub fn registry_source(&self) -> &RegistrySource {
        &self.registry_source
    }

    /// See [Self::registry_source]
    pub fn set_registry_source(&mut self, registry_source: RegistrySource) {
        self.registry_source = registry_source;
    }

    /// How long a healthy RPC endpoint is reused before probing again
    ///
    /// Defaults to 10 minutes
    pub fn connection_ttl(&self) -> Duration {
        self.connection_ttl
            .unwrap_or_else(|| Duration::from_secs(10 * 60))
    }

    /// See [Self::connection_ttl]
    pub fn set_connection_ttl(&mut self, connection_ttl: Option<Duration>) {
        self.connection_ttl = connection_ttl;
    }

    /// Time allowed for each endpoint's `status` probe
    ///
    /// Defaults to 5 seconds
    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout.unwrap_or_else(|| Duration::from_secs(5))
    }

    /// See [Self::probe_timeout]
    pub fn set_probe_timeout(&mut self, probe_timeout: Option<Duration>) {
        self.probe_timeout = probe_timeout;
    }

    /// Time allowed for a single bridged query
    ///
    /// Defaults to 10 seconds
    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
            .unwrap_or_else(|| Duration::from_secs(10))
    }

    /// See [Self::query_timeout]
    pub fn set_query_timeout(&mut self, query_timeout: Option<Duration>) {
        self.query_timeout = query_timeout;
    }

    /// Multiplier applied to simulated gas
    ///
    /// Defaults to 1.3 following cosmjs.
    pub fn gas_adjustment(&self) -> f64 {
        self.gas_adjustment.unwrap_or(1.3)
    }

    /// See [Self::gas_adjustment]
    pub fn set_gas_adjustment(&mut self, gas_adjustment: Option<f64>) {
        self.gas_adjustment = gas_adjustment;
    }

    /// How often the refresh worker reloads the registry
    ///
    /// Defaults to 30 minutes
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
            .unwrap_or_else(|| Duration::from_secs(30 * 60))
    }

    /// See [Self::refresh_interval]
    pub fn set_refresh_interval(&mut self, refresh_interval: Option<Duration>) {
        self.refresh_interval = refresh_interval;
    }

    /// Sign mode used when a request does not name one
    ///
    /// Defaults to [SignMode::Direct]
    pub fn sign_mode(&self) -> SignMode {
        self.sign_mode.unwrap_or_default()
    }

    /// See [Self::sign_mode]
    pub fn set_sign_mode(&mut self, sign_mode: Option<SignMode>) {
        self.sign_mode = sign_mode;
    }

    /// Override how RPC endpoints are connected to. Defaults to HTTP JSON-RPC.
    pub fn set_connector(&mut self, connector: Option<Arc<dyn RpcConnector>>) {
        self.connector = connector;
    }

    /// Override the clock used for connection validity. Defaults to the system clock.
    pub fn set_clock(&mut self, clock: Option<Arc<dyn Clock>>) {
        self.clock = clock;
    }

    /// Override where transaction events come from. Defaults to the node websocket.
    pub fn set_event_source(&mut self, event_source: Option<Arc<dyn EventSource>>) {
        self.event_source = event_source;
    }

    /// Receiver of transaction events
    ///
    /// Without one, sends never subscribe to events.
    pub fn notifier(&self) -> Option<&Arc<dyn TxNotifier>> {
        self.notifier.as_ref()
    }

    /// See [Self::notifier]
    pub fn set_notifier(&mut self, notifier: Option<Arc<dyn TxNotifier>>) {
        self.notifier = notifier;
    }

    /// Decoders for polymorphic reply fields
    ///
    /// Defaults to [TypeRegistry::cosmos]
    pub fn type_registry(&self) -> TypeRegistry {
        self.type_registry
            .clone()
            .unwrap_or_else(TypeRegistry::cosmos)
    }

    /// See [Self::type_registry]
    pub fn set_type_registry(&mut self, type_registry: Option<TypeRegistry>) {
        self.type_registry = type_registry;
    }

    /// Read registry documents from here instead of [Self::registry_source].
    pub fn set_registry_documents(&mut self, documents: Option<Arc<dyn RegistryDocuments>>) {
        self.registry_documents = documents;
    }

    fn http_client() -> Result<reqwest::Client, BuilderError> {
        Ok(reqwest::Client::builder()
            .user_agent("cosmos-gateway")
            .build()?)
    }

    fn documents(&self) -> Result<Arc<dyn RegistryDocuments>, BuilderError> {
        Ok(match (&self.registry_documents, &self.registry_source) {
            (Some(documents), _) => documents.clone(),
            (None, RegistrySource::Github) => Arc::new(GithubRegistry::new(Self::http_client()?)),
            (None, RegistrySource::Filesystem(root)) => Arc::new(FsRegistry::new(root.clone())),
        })
    }

    /// Load the registry and build the gateway.
    pub async fn build(&self) -> Result<Gateway, BuilderError> {
        let documents = self.documents()?;
        let chains = documents.load_chains().await?;
        tracing::info!("Loaded {} chains from the registry", chains.len());
        self.build_inner(documents, chains)
    }

    /// Build the gateway over already loaded chains.
    pub fn build_with_chains(&self, chains: Vec<Chain>) -> Result<Gateway, BuilderError> {
        self.build_inner(self.documents()?, chains)
    }

    fn build_inner(
        &self,
        documents: Arc<dyn RegistryDocuments>,
        chains: Vec<Chain>,
    ) -> Result<Gateway, BuilderError> {
        let ttl = chrono::Duration::from_std(self.connection_ttl()).map_err(|source| {
            BuilderError::InvalidDuration {
                name: "connection_ttl",
                source,
            }
        })?;
        let connector = match &self.connector {
            Some(connector) => connector.clone(),
            None => Arc::new(HttpConnector::new(Self::http_client()?)),
        };
        let settings = ConnectionSettings {
            connector,
            clock: self.clock.clone().unwrap_or_else(|| Arc::new(SystemClock)),
            ttl,
            probe_timeout: self.probe_timeout(),
        };

        let store = ChainStore::new(chains);
        let connections = Arc::new(ConnectionManager::new(store.clone(), settings));
        let bridge = Bridge::new(
            connections.clone(),
            Some(self.type_registry()),
            self.query_timeout(),
        );
        let events = EventSubscriber::new(
            connections,
            self.event_source
                .clone()
                .unwrap_or_else(|| Arc::new(WebSocketSource)),
            self.notifier.clone(),
        );

        Ok(Gateway {
            store,
            bridge,
            events,
            documents,
            refresh_interval: self.refresh_interval(),
            gas_adjustment: self.gas_adjustment(),
            sign_mode: self.sign_mode(),
        })
    }
}
