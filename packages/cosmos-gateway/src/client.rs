//! Connections to Tendermint RPC nodes and the query bridge built on them.

mod bridge;
mod jsonrpc;
mod node;
mod node_chooser;
mod query;
mod unpack;

use std::sync::Arc;

use tonic::async_trait;

use crate::error::RpcError;

pub use bridge::{Bridge, BridgeReply, ReplyMetadata, BLOCK_HEIGHT_HEADER, PROVE_HEADER};
pub use jsonrpc::{HttpConnector, HttpRpcClient};
pub(crate) use jsonrpc::string_or_number;
pub use node::{
    ActiveClient, ChainConnection, Clock, ConnectionManager, ConnectionSettings, SystemClock,
};
pub use query::BridgeRequest;
pub use unpack::{
    EthAccount, PolymorphicFields, Resolved, ResolvedAccount, ResolvedPubKey, TypeRegistry,
};

/// The parts of a node's `status` response the health probe looks at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeStatus {
    pub network: String,
    pub latest_block_height: i64,
    pub catching_up: bool,
}

/// Result of an `abci_query` call. A non-zero `code` is an application error.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AbciQueryResponse {
    pub code: u32,
    pub codespace: String,
    pub log: String,
    pub value: Vec<u8>,
    pub height: i64,
}

/// Result of `broadcast_tx_sync`: the outcome of `CheckTx` only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastTxResponse {
    pub code: u32,
    pub codespace: String,
    pub log: String,
    pub data: String,
    pub hash: String,
}

/// A single Tendermint RPC endpoint.
#[async_trait]
pub trait RpcClient: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn status(&self) -> Result<NodeStatus, RpcError>;

    async fn abci_query(
        &self,
        path: &str,
        data: Vec<u8>,
        height: i64,
        prove: bool,
    ) -> Result<AbciQueryResponse, RpcError>;

    async fn broadcast_tx_sync(&self, tx_bytes: Vec<u8>) -> Result<BroadcastTxResponse, RpcError>;
}

/// Creates [RpcClient]s for endpoint URLs.
pub trait RpcConnector: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RpcClient>, RpcError>;
}
