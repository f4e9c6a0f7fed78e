pub use address::{convert_address_prefix, parse_raw_address, Address, RawAddress};
pub use chain::{Chain, ChainSummary, GasPrices};
pub use client::{
    Bridge, BridgeReply, BridgeRequest, Clock, ConnectionManager, HttpConnector, RpcClient,
    RpcConnector, TypeRegistry,
};
pub use cosmos_sdk_proto as proto;
pub use cosmos_sdk_proto::cosmos::base::v1beta1::Coin;
pub use denom::ParsedCoin;
pub use error::Error;
pub use events::{EventSource, EventSubscriber, TxEvent, TxNotifier, WebSocketSource};
pub use gateway::{
    AccountResponse, BalanceResponse, CheckBalanceInput, CreateAccountInput, Gateway,
    RestoreAccountInput, SendInput, SendResponse, SendWithEventsInput, SendWithEventsResponse,
    SimulateInput, SimulateResponse, ValidatorInfo,
};
pub use gateway_builder::{GatewayBuilder, RegistrySource};
pub use refresh::RefreshWorker;
pub use registry::{FsRegistry, GithubRegistry, RegistryDocuments};
pub use store::ChainStore;
pub use txbuilder::{SignMode, TxBuilder};
pub use wallet::{KeyAlgorithm, PrivateKey, SeedPhrase};

mod address;
mod chain;
pub mod client;
pub mod denom;
pub mod error;
mod events;
mod gateway;
mod gateway_builder;
mod refresh;
mod registry;
mod store;
mod txbuilder;
pub mod wallet;

#[cfg(feature = "clap")]
pub mod clap;
