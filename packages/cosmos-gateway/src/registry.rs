//! Loading chain metadata from a checkout of, or the GitHub repository for,
//! `cosmos/chain-registry`.

use std::fmt::Display;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use tonic::async_trait;

use crate::chain::{AssetList, Chain};
use crate::error::RegistryError;

/// One of the two documents each registry chain directory holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegistryFile {
    Chain,
    AssetList,
}

impl RegistryFile {
    pub fn file_name(self) -> &'static str {
        match self {
            RegistryFile::Chain => "chain.json",
            RegistryFile::AssetList => "assetlist.json",
        }
    }
}

impl Display for RegistryFile {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Directories in the registry that never hold a mainnet Cosmos chain.
pub fn is_excluded_directory(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_') || name == "testnets" || name == "thorchain"
}

/// A place registry documents can be read from.
#[async_trait]
pub trait RegistryDocuments: Send + Sync {
    /// Every top level directory name, exclusions included.
    async fn list_chain_names(&self) -> Result<Vec<String>, RegistryError>;

    async fn fetch_document(
        &self,
        chain_name: &str,
        file: RegistryFile,
    ) -> Result<Vec<u8>, RegistryError>;

    /// Load every supported chain, stopping at the first failure.
    async fn load_chains(&self) -> Result<Vec<Chain>, RegistryError> {
        let mut chains = vec![];
        for chain_name in chain_names(self).await? {
            if let Some(chain) = load_chain(self, &chain_name).await? {
                chains.push(chain);
            }
        }
        Ok(chains)
    }
}

async fn chain_names<D: RegistryDocuments + ?Sized>(docs: &D) -> Result<Vec<String>, RegistryError> {
    let mut names = docs.list_chain_names().await?;
    names.retain(|name| !is_excluded_directory(name));
    Ok(names)
}

fn parse_document<T: DeserializeOwned>(
    chain_name: &str,
    file: RegistryFile,
    bytes: &[u8],
) -> Result<T, RegistryError> {
    serde_json::from_slice(bytes).map_err(|source| RegistryError::Parse {
        chain_name: chain_name.to_owned(),
        file,
        source,
    })
}

/// Load a single chain directory.
///
/// Returns `None` for chains whose coin type is neither 118 nor 60. Their
/// asset list is never fetched.
pub async fn load_chain<D: RegistryDocuments + ?Sized>(
    docs: &D,
    chain_name: &str,
) -> Result<Option<Chain>, RegistryError> {
    let bytes = docs.fetch_document(chain_name, RegistryFile::Chain).await?;
    let mut chain: Chain = parse_document(chain_name, RegistryFile::Chain, &bytes)?;
    if !chain.is_supported_coin_type() {
        tracing::debug!(
            "Skipping chain {chain_name} with coin type {}",
            chain.slip44
        );
        return Ok(None);
    }

    let bytes = docs
        .fetch_document(chain_name, RegistryFile::AssetList)
        .await?;
    let assets: AssetList = parse_document(chain_name, RegistryFile::AssetList, &bytes)?;
    chain.asset = assets
        .assets
        .into_iter()
        .next()
        .ok_or_else(|| RegistryError::AssetNotFound {
            chain_name: chain.chain_name.clone(),
        })?;
    chain.init_gas_prices();
    chain.init_rpc_urls();
    Ok(Some(chain))
}

/// A local checkout of the chain registry.
#[derive(Clone, Debug)]
pub struct FsRegistry {
    root: PathBuf,
}

impl FsRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsRegistry { root: root.into() }
    }
}

#[async_trait]
impl RegistryDocuments for FsRegistry {
    async fn list_chain_names(&self) -> Result<Vec<String>, RegistryError> {
        let mut entries = fs_err::tokio::read_dir(&self.root).await?;
        let mut names = vec![];
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn fetch_document(
        &self,
        chain_name: &str,
        file: RegistryFile,
    ) -> Result<Vec<u8>, RegistryError> {
        let path = self.root.join(chain_name).join(file.file_name());
        Ok(fs_err::tokio::read(path).await?)
    }
}

const GITHUB_TREE_URL: &str =
    "https://api.github.com/repos/cosmos/chain-registry/git/trees/master";
const GITHUB_RAW_URL: &str = "https://raw.githubusercontent.com/cosmos/chain-registry/master";

/// The chain registry on GitHub.
///
/// Chains are downloaded concurrently and every failure is reported at once.
#[derive(Clone, Debug)]
pub struct GithubRegistry {
    client: reqwest::Client,
    tree_url: String,
    raw_url: String,
}

#[derive(serde::Deserialize)]
struct Tree {
    tree: Vec<TreeEntry>,
}

#[derive(serde::Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

impl GithubRegistry {
    pub fn new(client: reqwest::Client) -> Self {
        GithubRegistry {
            client,
            tree_url: GITHUB_TREE_URL.to_owned(),
            raw_url: GITHUB_RAW_URL.to_owned(),
        }
    }

    /// Point at a mirror instead of GitHub.
    pub fn with_urls(
        client: reqwest::Client,
        tree_url: impl Into<String>,
        raw_url: impl Into<String>,
    ) -> Self {
        GithubRegistry {
            client,
            tree_url: tree_url.into(),
            raw_url: raw_url.into(),
        }
    }

    async fn get(&self, url: String) -> Result<reqwest::Response, RegistryError> {
        let res = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, "cosmos-gateway")
            .send()
            .await
            .map_err(|source| RegistryError::Http {
                url: url.clone(),
                source,
            })?;
        if res.status().is_success() {
            Ok(res)
        } else {
            Err(RegistryError::HttpStatus {
                url,
                status: res.status(),
            })
        }
    }
}

#[async_trait]
impl RegistryDocuments for GithubRegistry {
    async fn list_chain_names(&self) -> Result<Vec<String>, RegistryError> {
        let url = self.tree_url.clone();
        let tree: Tree = self
            .get(url.clone())
            .await?
            .json()
            .await
            .map_err(|source| RegistryError::Http { url, source })?;
        Ok(tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "tree")
            .map(|entry| entry.path)
            .collect())
    }

    async fn fetch_document(
        &self,
        chain_name: &str,
        file: RegistryFile,
    ) -> Result<Vec<u8>, RegistryError> {
        let url = format!("{}/{chain_name}/{file}", self.raw_url);
        let bytes = self
            .get(url.clone())
            .await?
            .bytes()
            .await
            .map_err(|source| RegistryError::Http { url, source })?;
        Ok(bytes.to_vec())
    }

    async fn load_chains(&self) -> Result<Vec<Chain>, RegistryError> {
        load_chains_concurrently(self).await
    }
}

/// Load every chain at once, collecting all failures into one error.
pub async fn load_chains_concurrently<D: RegistryDocuments + ?Sized>(
    docs: &D,
) -> Result<Vec<Chain>, RegistryError> {
    let names = chain_names(docs).await?;
    let results =
        futures::future::join_all(names.iter().map(|chain_name| load_chain(docs, chain_name)))
            .await;

    let mut chains = vec![];
    let mut errors = vec![];
    for result in results {
        match result {
            Ok(Some(chain)) => chains.push(chain),
            Ok(None) => (),
            Err(e) => errors.push(e.to_string()),
        }
    }
    if errors.is_empty() {
        Ok(chains)
    } else {
        Err(RegistryError::Aggregate { errors })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Registry documents held in memory, keyed by chain name.
    #[derive(Default)]
    pub(crate) struct MemoryRegistry {
        pub(crate) docs: BTreeMap<String, (Option<String>, Option<String>)>,
        pub(crate) fetches: AtomicUsize,
    }

    impl MemoryRegistry {
        pub(crate) fn with_chain(mut self, name: &str, chain: &str, assets: &str) -> Self {
            self.docs.insert(
                name.to_owned(),
                (Some(chain.to_owned()), Some(assets.to_owned())),
            );
            self
        }
    }

    #[async_trait]
    impl RegistryDocuments for MemoryRegistry {
        async fn list_chain_names(&self) -> Result<Vec<String>, RegistryError> {
            Ok(self.docs.keys().cloned().collect())
        }

        async fn fetch_document(
            &self,
            chain_name: &str,
            file: RegistryFile,
        ) -> Result<Vec<u8>, RegistryError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let (chain, assets) = self.docs.get(chain_name).cloned().unwrap_or_default();
            let doc = match file {
                RegistryFile::Chain => chain,
                RegistryFile::AssetList => assets,
            };
            doc.map(String::into_bytes).ok_or_else(|| {
                RegistryError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{chain_name}/{file} missing"),
                ))
            })
        }
    }

    pub(crate) fn chain_json(name: &str, chain_id: &str, prefix: &str, slip44: u32) -> String {
        serde_json::json!({
            "chain_name": name,
            "chain_id": chain_id,
            "pretty_name": name.to_uppercase(),
            "bech32_prefix": prefix,
            "slip44": slip44,
            "key_algos": ["secp256k1"],
            "fees": {"fee_tokens": [{"denom": format!("u{prefix}"), "fixed_min_gas_price": 0.0}]},
            "apis": {"rpc": [
                {"address": format!("https://rpc.{name}.example"), "provider": "one"},
                {"address": format!("tcp://rpc.{name}.example:26657"), "provider": "two"}
            ]}
        })
        .to_string()
    }

    pub(crate) fn asset_json(prefix: &str) -> String {
        serde_json::json!({
            "assets": [{
                "description": format!("{prefix} token"),
                "base": format!("u{prefix}"),
                "display": prefix,
                "symbol": prefix.to_uppercase(),
                "denom_units": [
                    {"denom": format!("u{prefix}"), "exponent": 0},
                    {"denom": prefix, "exponent": 6}
                ]
            }]
        })
        .to_string()
    }

    fn sample() -> MemoryRegistry {
        MemoryRegistry::default()
            .with_chain(
                "cosmoshub",
                &chain_json("cosmoshub", "cosmoshub-4", "cosmos", 118),
                &asset_json("atom"),
            )
            .with_chain(
                "evmos",
                &chain_json("evmos", "evmos_9001-2", "evmos", 60),
                &asset_json("evmos"),
            )
            .with_chain(
                "secret",
                &chain_json("secret", "secret-4", "secret", 529),
                &asset_json("scrt"),
            )
            .with_chain(
                "_IBC",
                &chain_json("ibc", "ibc", "ibc", 118),
                &asset_json("ibc"),
            )
            .with_chain(
                "testnets",
                &chain_json("testnets", "testnets", "test", 118),
                &asset_json("test"),
            )
    }

    #[test]
    fn exclusions() {
        for name in [".git", ".github", "_IBC", "_non-cosmos", "_template", "testnets", "thorchain"] {
            assert!(is_excluded_directory(name), "{name}");
        }
        assert!(!is_excluded_directory("osmosis"));
    }

    #[tokio::test]
    async fn sequential_load_filters_and_normalizes() {
        let registry = sample();
        let chains = registry.load_chains().await.unwrap();
        let ids = chains.iter().map(|c| c.chain_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["cosmoshub-4", "evmos_9001-2"]);

        let hub = &chains[0];
        assert_eq!(hub.asset.base, "uatom");
        assert_eq!(hub.rpc_endpoints(), vec!["https://rpc.cosmoshub.example:443"]);
        assert_eq!(hub.gas_prices.average, crate::chain::DEFAULT_AVERAGE_GAS_PRICE);

        // Two documents per supported chain, one for the unsupported chain.
        assert_eq!(registry.fetches.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn sequential_load_fails_fast() {
        let mut registry = sample();
        registry.docs.insert("aaa".to_owned(), (None, None));
        registry.load_chains().await.unwrap_err();
        assert_eq!(registry.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_asset_list() {
        let registry = MemoryRegistry::default().with_chain(
            "juno",
            &chain_json("juno", "juno-1", "juno", 118),
            r#"{"assets": []}"#,
        );
        let err = registry.load_chains().await.unwrap_err();
        assert_eq!(err.to_string(), "chain: juno, asset not found");
    }

    #[tokio::test]
    async fn concurrent_load_aggregates_errors() {
        let registry = sample()
            .with_chain("juno", &chain_json("juno", "juno-1", "juno", 118), r#"{"assets": []}"#)
            .with_chain("akash", "not json", "{}");
        let err = load_chains_concurrently(&registry).await.unwrap_err();
        match &err {
            RegistryError::Aggregate { errors } => assert_eq!(errors.len(), 2),
            _ => panic!("unexpected error {err:?}"),
        }
        let message = err.to_string();
        assert!(message.starts_with("Errors while downloading registry data: "));
        assert!(message.contains("chain: juno, asset not found; "));
        assert!(message.ends_with("; "));
    }

    #[tokio::test]
    async fn concurrent_load_keeps_listing_order() {
        let chains = load_chains_concurrently(&sample()).await.unwrap();
        let names = chains.iter().map(|c| c.chain_name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["cosmoshub", "evmos"]);
    }

    #[tokio::test]
    async fn filesystem_registry() {
        let root = std::env::temp_dir().join(format!("cosmos-gateway-registry-{}", rand::random::<u64>()));
        for (dir, chain, assets) in [
            ("osmosis", chain_json("osmosis", "osmosis-1", "osmo", 118), asset_json("osmo")),
            ("_template", "{}".to_owned(), "{}".to_owned()),
        ] {
            let dir = root.join(dir);
            fs_err::create_dir_all(&dir).unwrap();
            fs_err::write(dir.join("chain.json"), chain).unwrap();
            fs_err::write(dir.join("assetlist.json"), assets).unwrap();
        }
        fs_err::write(root.join("README.md"), "not a chain").unwrap();

        let registry = FsRegistry::new(&root);
        let chains = registry.load_chains().await.unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].chain_id, "osmosis-1");

        fs_err::remove_file(root.join("osmosis").join("assetlist.json")).unwrap();
        registry.load_chains().await.unwrap_err();
        fs_err::remove_dir_all(&root).unwrap();
    }
}
