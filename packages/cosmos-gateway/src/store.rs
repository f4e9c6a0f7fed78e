use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::address::address_hrp;
use crate::chain::{Chain, ChainSummary};
use crate::error::StoreError;

/// An immutable view of every loaded chain.
#[derive(Debug, Default)]
pub struct ChainSnapshot {
    by_id: HashMap<String, Arc<Chain>>,
    by_prefix: HashMap<String, Arc<Chain>>,
    prefixes: Vec<String>,
    summaries: Vec<ChainSummary>,
}

impl ChainSnapshot {
    /// Index the chains, keeping the first chain seen for a duplicated ID or
    /// prefix.
    pub fn new(chains: Vec<Chain>) -> Self {
        let mut snapshot = ChainSnapshot::default();
        for chain in chains {
            let chain = Arc::new(chain);
            snapshot.summaries.push(chain.summary());
            snapshot
                .by_id
                .entry(chain.chain_id.clone())
                .or_insert_with(|| chain.clone());
            if !snapshot.by_prefix.contains_key(&chain.bech32_prefix) {
                snapshot.prefixes.push(chain.bech32_prefix.clone());
                snapshot
                    .by_prefix
                    .insert(chain.bech32_prefix.clone(), chain);
            }
        }
        snapshot
    }

    pub fn get_by_id(&self, chain_id: &str) -> Result<Arc<Chain>, StoreError> {
        self.by_id
            .get(chain_id)
            .cloned()
            .ok_or_else(|| StoreError::ChainNotFound {
                chain_id: chain_id.to_owned(),
            })
    }

    pub fn get_by_prefix(&self, prefix: &str) -> Option<Arc<Chain>> {
        self.by_prefix.get(prefix).cloned()
    }

    /// Find the chain an address belongs to.
    ///
    /// The bech32 human readable part is tried first. Otherwise the first
    /// prefix, in load order, that the address starts with wins.
    pub fn get_by_address(&self, address: &str) -> Result<Arc<Chain>, StoreError> {
        address_hrp(address)
            .and_then(|hrp| self.get_by_prefix(hrp))
            .or_else(|| {
                self.prefixes
                    .iter()
                    .find(|prefix| address.starts_with(prefix.as_str()))
                    .and_then(|prefix| self.get_by_prefix(prefix))
            })
            .ok_or_else(|| StoreError::ChainNotFoundForAddress {
                address: address.to_owned(),
            })
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn summaries(&self) -> &[ChainSummary] {
        &self.summaries
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

/// Shared, atomically replaceable set of chains.
///
/// Readers take an [Arc] to the current snapshot and keep using it even if a
/// refresh replaces it in the meantime.
#[derive(Clone, Default)]
pub struct ChainStore {
    current: Arc<RwLock<Arc<ChainSnapshot>>>,
}

impl ChainStore {
    pub fn new(chains: Vec<Chain>) -> Self {
        ChainStore {
            current: Arc::new(RwLock::new(Arc::new(ChainSnapshot::new(chains)))),
        }
    }

    pub fn snapshot(&self) -> Arc<ChainSnapshot> {
        self.current.read().clone()
    }

    /// Publish a new set of chains.
    pub fn replace(&self, chains: Vec<Chain>) {
        let snapshot = Arc::new(ChainSnapshot::new(chains));
        tracing::info!("Publishing chain store with {} chains", snapshot.len());
        *self.current.write() = snapshot;
    }

    pub fn get_by_id(&self, chain_id: &str) -> Result<Arc<Chain>, StoreError> {
        self.snapshot().get_by_id(chain_id)
    }

    pub fn get_by_address(&self, address: &str) -> Result<Arc<Chain>, StoreError> {
        self.snapshot().get_by_address(address)
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.snapshot().prefixes().to_vec()
    }

    pub fn summaries(&self) -> Vec<ChainSummary> {
        self.snapshot().summaries().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::tests::osmosis;

    fn chain(chain_id: &str, prefix: &str) -> Chain {
        Chain {
            chain_id: chain_id.to_owned(),
            chain_name: chain_id.to_owned(),
            bech32_prefix: prefix.to_owned(),
            slip44: 118,
            ..Chain::default()
        }
    }

    fn store() -> ChainStore {
        ChainStore::new(vec![
            chain("cosmoshub-4", "cosmos"),
            chain("cosmoshub-legacy", "cosmos"),
            chain("injective-1", "inj"),
            chain("injective-evm", "injevm"),
            osmosis(),
        ])
    }

    #[test]
    fn lookups() {
        let store = store();
        assert_eq!(store.get_by_id("osmosis-1").unwrap().bech32_prefix, "osmo");
        assert_eq!(
            store.get_by_id("missing").unwrap_err(),
            StoreError::ChainNotFound {
                chain_id: "missing".to_owned()
            }
        );
        assert_eq!(store.prefixes(), vec!["cosmos", "inj", "injevm", "osmo"]);
        assert_eq!(store.summaries().len(), 5);
        assert_eq!(store.summaries()[4].name, "osmosis");
    }

    #[test]
    fn address_lookup_prefers_exact_prefix() {
        let store = store();
        let injevm = "injevm1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu";
        assert_eq!(store.get_by_address(injevm).unwrap().chain_id, "injective-evm");
        assert_eq!(
            store
                .get_by_address("inj1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu")
                .unwrap()
                .chain_id,
            "injective-1"
        );
        assert_eq!(
            store
                .get_by_address("cosmos19rl4cm2hmr8afy4kldpxz3fka4jguq0auqdal4")
                .unwrap()
                .chain_id,
            "cosmoshub-4"
        );
        store.get_by_address("juno1abc").unwrap_err();
    }

    #[test]
    fn address_lookup_falls_back_to_prefix_match() {
        let store = store();
        // No bech32 separator at all.
        assert_eq!(store.get_by_address("osmoabc").unwrap().chain_id, "osmosis-1");
    }

    #[test]
    fn replace_is_atomic_for_readers() {
        let store = store();
        let before = store.snapshot();
        store.replace(vec![chain("juno-1", "juno")]);
        assert_eq!(before.len(), 5);
        before.get_by_id("osmosis-1").unwrap();
        assert_eq!(store.prefixes(), vec!["juno"]);
        store.get_by_id("osmosis-1").unwrap_err();
    }

    #[test]
    fn concurrent_readers_see_whole_snapshots() {
        let store = store();
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    if i % 2 == 0 {
                        store.replace(vec![chain("juno-1", "juno")]);
                    } else {
                        store.replace(vec![chain("a-1", "a"), chain("b-1", "b")]);
                    }
                }
            })
        };
        for _ in 0..200 {
            let snapshot = store.snapshot();
            assert_eq!(snapshot.len(), snapshot.summaries().len());
            for summary in snapshot.summaries() {
                snapshot.get_by_id(&summary.id).unwrap();
            }
        }
        writer.join().unwrap();
    }
}
