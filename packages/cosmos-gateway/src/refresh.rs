//! Periodic reload of the chain registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::RegistryError;
use crate::registry::RegistryDocuments;
use crate::store::ChainStore;

/// Reloads every chain on a fixed interval and publishes the result.
///
/// A failed reload keeps the previous chains.
pub struct RefreshWorker {
    documents: Arc<dyn RegistryDocuments>,
    store: ChainStore,
    interval: Duration,
}

impl RefreshWorker {
    pub fn new(documents: Arc<dyn RegistryDocuments>, store: ChainStore, interval: Duration) -> Self {
        RefreshWorker {
            documents,
            store,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Load the registry once, replacing the store on success. Returns the
    /// number of chains published.
    ///
    /// An empty load is an error and leaves the store untouched.
    pub async fn refresh_once(&self) -> Result<usize, RegistryError> {
        let chains = self.documents.load_chains().await?;
        if chains.is_empty() {
            return Err(RegistryError::NoChains);
        }
        let count = chains.len();
        self.store.replace(chains);
        Ok(count)
    }

    /// Refresh every interval until `cancel` fires.
    ///
    /// The first refresh happens one interval after the call, the store is
    /// expected to be loaded already.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval =
            tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => match self.refresh_once().await {
                    Ok(count) => tracing::debug!("Refreshed chain registry, {count} chains"),
                    Err(e) => tracing::error!("Unable to refresh chain registry: {e}"),
                },
            }
        }
        tracing::debug!("Refresh worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{asset_json, chain_json, MemoryRegistry};

    fn registry() -> MemoryRegistry {
        MemoryRegistry::default().with_chain(
            "juno",
            &chain_json("juno", "juno-1", "juno", 118),
            &asset_json("juno"),
        )
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_chains() {
        let store = ChainStore::new(vec![crate::chain::tests::osmosis()]);
        let mut broken = registry();
        broken.docs.insert("cosmoshub".to_owned(), (None, None));
        let worker = RefreshWorker::new(Arc::new(broken), store.clone(), Duration::from_secs(1));
        worker.refresh_once().await.unwrap_err();
        assert_eq!(store.prefixes(), vec!["osmo"]);

        let worker = RefreshWorker::new(Arc::new(registry()), store.clone(), Duration::from_secs(1));
        assert_eq!(worker.refresh_once().await.unwrap(), 1);
        assert_eq!(store.prefixes(), vec!["juno"]);
    }

    #[tokio::test]
    async fn empty_refresh_keeps_previous_chains() {
        let store = ChainStore::new(vec![crate::chain::tests::osmosis()]);
        let worker = RefreshWorker::new(
            Arc::new(MemoryRegistry::default()),
            store.clone(),
            Duration::from_secs(1),
        );
        assert!(matches!(
            worker.refresh_once().await.unwrap_err(),
            RegistryError::NoChains
        ));
        assert_eq!(store.prefixes(), vec!["osmo"]);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_on_interval_until_cancelled() {
        let store = ChainStore::default();
        let worker = RefreshWorker::new(Arc::new(registry()), store.clone(), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(store.prefixes().is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.prefixes(), vec!["juno"]);

        cancel.cancel();
        handle.await.unwrap();
    }
}
