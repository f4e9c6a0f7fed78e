#![allow(missing_docs)]
//! Error types exposed by this package.

use crate::registry::RegistryFile;

/// Errors converting between display and base amounts.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DenomError {
    #[error("invalid amount: {amount:?}")]
    InvalidAmount { amount: String },
    #[error("invalid coin: {coin:?}")]
    InvalidCoin { coin: String },
    #[error("chain: {chain_name}, base denom not found")]
    BaseDenomNotFound { chain_name: String },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid bech32 address {address:?}: {reason}")]
    InvalidBech32 { address: String, reason: String },
    #[error("invalid raw address length {len}, expected 20 or 32 bytes")]
    InvalidLength { len: usize },
    #[error("invalid address prefix {prefix:?}: {reason}")]
    InvalidPrefix { prefix: String, reason: String },
}

/// Errors deriving, restoring or using a private key.
#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    #[error("invalid mnemonic size, available values: 12, 24; provided size {size}")]
    InvalidMnemonicSize { size: usize },
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("unsupported coin type {coin_type}, available values: 118, 60")]
    UnsupportedCoinType { coin_type: u32 },
    #[error("invalid derivation path {path}: {source}")]
    InvalidDerivationPath {
        path: String,
        source: bitcoin::util::bip32::Error,
    },
    #[error("key derivation failed: {0}")]
    Derivation(bitcoin::util::bip32::Error),
    #[error("invalid hex private key: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid secp256k1 private key: {0}")]
    InvalidSecretKey(bitcoin::secp256k1::Error),
    #[error("signing failed: {0}")]
    Signing(bitcoin::secp256k1::Error),
    #[error("at least one chain is needed")]
    NoChainPrefixes,
}

/// Problems with a single chain's registry data.
#[derive(thiserror::Error, Debug)]
pub enum ChainError {
    #[error("invalid RPC URL {address:?}: {source}")]
    InvalidRpcUrl {
        address: String,
        source: url::ParseError,
    },
    #[error("unsupported scheme {scheme:?} in RPC URL {address:?}, expected http or https")]
    UnsupportedScheme { address: String, scheme: String },
    #[error("RPC URL {address:?} has no host")]
    MissingHost { address: String },
}

/// Errors loading chain metadata from a registry source.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("error requesting {url}: {source}")]
    Http { url: String, source: reqwest::Error },
    #[error("chain-registry repository responded with status {status} for {url}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("unable to parse {file} of chain {chain_name}: {source}")]
    Parse {
        chain_name: String,
        file: RegistryFile,
        source: serde_json::Error,
    },
    #[error("chain: {chain_name}, asset not found")]
    AssetNotFound { chain_name: String },
    #[error("Errors while downloading registry data: {}", join_errors(.errors))]
    Aggregate { errors: Vec<String> },
    #[error("chain registry returned no supported chains")]
    NoChains,
}

fn join_errors(errors: &[String]) -> String {
    errors.iter().map(|e| format!("{e}; ")).collect()
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("chain not found: {chain_id}")]
    ChainNotFound { chain_id: String },
    #[error("no chain found for address {address}")]
    ChainNotFoundForAddress { address: String },
}

/// Errors obtaining a healthy connection to a chain.
#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no available RPC endpoint for chain {chain_id}")]
    NoAvailableRpc { chain_id: String },
}

/// Errors talking to a single Tendermint RPC endpoint.
#[derive(thiserror::Error, Debug)]
pub enum RpcError {
    #[error("unable to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("network error calling {method} on {endpoint}: {source}")]
    Http {
        endpoint: String,
        method: &'static str,
        source: reqwest::Error,
    },
    #[error("{method} on {endpoint} timed out")]
    Timeout {
        endpoint: String,
        method: &'static str,
    },
    #[error("{endpoint} returned error {code} for {method}: {message} {data}")]
    JsonRpc {
        endpoint: String,
        method: &'static str,
        code: i64,
        message: String,
        data: String,
    },
    #[error("invalid {method} response from {endpoint}: {reason}")]
    InvalidResponse {
        endpoint: String,
        method: &'static str,
        reason: String,
    },
    #[error("websocket error on {endpoint}: {source}")]
    WebSocket {
        endpoint: String,
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
}

/// Errors bridging a unary query onto `abci_query`.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("query {path} failed with code {code} (codespace {codespace:?}): {log}")]
    Node {
        path: String,
        code: u32,
        codespace: String,
        log: String,
        status: tonic::Status,
    },
    #[error("transport failure during {path}: {source}")]
    Transport { path: String, source: RpcError },
    #[error("query {path} timed out")]
    Timeout { path: String },
    #[error("streaming call {path} is not supported")]
    StreamingNotSupported { path: String },
    #[error("invalid {header} header: {value:?}")]
    InvalidHeader { header: &'static str, value: String },
    #[error("unable to decode {type_name} from {path}: {source}")]
    Codec {
        path: String,
        type_name: &'static str,
        source: prost::DecodeError,
    },
    #[error("expected exactly one block height in the response of {path}, found {count}")]
    ResponseHeight { path: String, count: usize },
}

impl BridgeError {
    /// The gRPC status a caller of the bridge would see.
    pub fn to_status(&self) -> tonic::Status {
        match self {
            BridgeError::Node { status, .. } => tonic::Status::new(status.code(), status.message()),
            BridgeError::InvalidHeader { .. } => tonic::Status::invalid_argument(self.to_string()),
            BridgeError::StreamingNotSupported { .. } => {
                tonic::Status::unimplemented(self.to_string())
            }
            BridgeError::Timeout { .. } => tonic::Status::deadline_exceeded(self.to_string()),
            BridgeError::Connection(_) | BridgeError::Transport { .. } => {
                tonic::Status::unavailable(self.to_string())
            }
            BridgeError::Codec { .. } | BridgeError::ResponseHeight { .. } => {
                tonic::Status::internal(self.to_string())
            }
        }
    }

    /// Whether the node reported the queried item as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BridgeError::Node { status, .. } if status.code() == tonic::Code::NotFound)
    }
}

/// Errors building, signing, simulating or broadcasting a transaction.
#[derive(thiserror::Error, Debug)]
pub enum TxError {
    #[error("from address {from} and to address {to} belong to different chains")]
    InvalidChainPair { from: String, to: String },
    #[error("chain ID or from/to addresses must be provided")]
    MissingChain,
    #[error("sign mode {mode:?} is unknown, available values: direct, amino-json")]
    SignModeUnknown { mode: String },
    #[error("invalid gas limit {gas:?}")]
    InvalidGasLimit { gas: String },
    #[error("account {address} not found in the account query response")]
    MissingAccount { address: String },
    #[error("simulation of the transaction returned no gas info")]
    MissingGasInfo,
    #[error("transaction failed with code: {code}; TxHash: {tx_hash}; log: {raw_log}")]
    BroadcastFailed {
        code: u32,
        tx_hash: String,
        raw_log: String,
    },
    #[error("unable to encode amino sign doc: {0}")]
    AminoJson(#[from] serde_json::Error),
    #[error(transparent)]
    Denom(#[from] DenomError),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("broadcast failed on {endpoint}: {source}")]
    Broadcast { endpoint: String, source: RpcError },
}

/// Errors subscribing to transaction events.
#[derive(thiserror::Error, Debug)]
pub enum SubscribeError {
    #[error("no transaction notifier configured")]
    NoNotifier,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("subscription rejected by {endpoint}: {message}")]
    Rejected { endpoint: String, message: String },
    #[error("no websocket URL for RPC endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Errors building a [crate::Gateway].
#[derive(thiserror::Error, Debug)]
pub enum BuilderError {
    #[error("unable to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("{name} is out of range: {source}")]
    InvalidDuration {
        name: &'static str,
        source: chrono::OutOfRangeError,
    },
}

/// Any error returned by the [crate::Gateway] facade.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Denom(#[from] DenomError),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error(transparent)]
    Subscribe(#[from] SubscribeError),
    #[error(transparent)]
    Builder(#[from] BuilderError),
}
