use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use tonic::async_trait;

use super::{AbciQueryResponse, BroadcastTxResponse, NodeStatus, RpcClient, RpcConnector};
use crate::error::RpcError;

#[derive(serde::Serialize)]
struct Request<P> {
    jsonrpc: &'static str,
    method: &'static str,
    id: u64,
    params: P,
}

#[derive(serde::Serialize)]
struct AbciQueryParams<'a> {
    path: &'a str,
    data: String,
    height: String,
    prove: bool,
}

#[derive(serde::Serialize)]
struct BroadcastParams {
    tx: String,
}

#[derive(serde::Serialize)]
struct NoParams {}

#[derive(Deserialize, Debug)]
struct Response<T> {
    result: Option<T>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: String,
}

#[derive(Deserialize, Debug)]
struct StatusResult {
    node_info: NodeInfo,
    sync_info: SyncInfo,
}

#[derive(Deserialize, Debug)]
struct NodeInfo {
    #[serde(default)]
    network: String,
}

#[derive(Deserialize, Debug)]
struct SyncInfo {
    #[serde(default, deserialize_with = "string_or_number")]
    latest_block_height: i64,
    #[serde(default)]
    catching_up: bool,
}

#[derive(Deserialize, Debug)]
struct AbciQueryResult {
    response: AbciQueryBody,
}

#[derive(Deserialize, Debug)]
struct AbciQueryBody {
    #[serde(default, deserialize_with = "string_or_number")]
    code: u32,
    #[serde(default)]
    codespace: String,
    #[serde(default)]
    log: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    height: i64,
}

#[derive(Deserialize, Debug)]
struct BroadcastResult {
    #[serde(default, deserialize_with = "string_or_number")]
    code: u32,
    #[serde(default)]
    codespace: String,
    #[serde(default)]
    log: String,
    #[serde(default)]
    data: String,
    hash: String,
}

/// Tendermint encodes 64 bit integers as strings, but not consistently.
pub(crate) fn string_or_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Number(T),
        Text(String),
    }
    match Raw::<T>::deserialize(deserializer)? {
        Raw::Number(x) => Ok(x),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Tendermint JSON-RPC over HTTP.
#[derive(Clone, Debug)]
pub struct HttpRpcClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRpcClient {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        HttpRpcClient {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn call<P, R>(&self, method: &'static str, params: P) -> Result<R, RpcError>
    where
        P: serde::Serialize,
        R: DeserializeOwned,
    {
        let req = Request {
            jsonrpc: "2.0",
            method,
            id: rand::random::<u32>().into(),
            params,
        };
        let http_error = |source| RpcError::Http {
            endpoint: self.endpoint.clone(),
            method,
            source,
        };

        let raw_body = self
            .client
            .post(&self.endpoint)
            .json(&req)
            .send()
            .await
            .map_err(http_error)?
            .error_for_status()
            .map_err(http_error)?
            .text()
            .await
            .map_err(http_error)?;
        tracing::trace!("{method} response from {}: {raw_body}", self.endpoint);

        parse_response(&self.endpoint, method, &raw_body)
    }
}

fn parse_response<R: DeserializeOwned>(
    endpoint: &str,
    method: &'static str,
    raw_body: &str,
) -> Result<R, RpcError> {
    let invalid = |reason: String| RpcError::InvalidResponse {
        endpoint: endpoint.to_owned(),
        method,
        reason,
    };
    let res = serde_json::from_str::<Response<R>>(raw_body)
        .map_err(|e| invalid(format!("unable to parse JSON response {raw_body}: {e}")))?;
    match (res.result, res.error) {
        (_, Some(ErrorBody {
            code,
            message,
            data,
        })) => Err(RpcError::JsonRpc {
            endpoint: endpoint.to_owned(),
            method,
            code,
            message,
            data,
        }),
        (Some(result), None) => Ok(result),
        (None, None) => Err(invalid("neither result nor error present".to_owned())),
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn status(&self) -> Result<NodeStatus, RpcError> {
        let res: StatusResult = self.call("status", NoParams {}).await?;
        Ok(NodeStatus {
            network: res.node_info.network,
            latest_block_height: res.sync_info.latest_block_height,
            catching_up: res.sync_info.catching_up,
        })
    }

    async fn abci_query(
        &self,
        path: &str,
        data: Vec<u8>,
        height: i64,
        prove: bool,
    ) -> Result<AbciQueryResponse, RpcError> {
        let res: AbciQueryResult = self
            .call(
                "abci_query",
                AbciQueryParams {
                    path,
                    data: hex::encode(data),
                    height: height.to_string(),
                    prove,
                },
            )
            .await?;
        let res = res.response;
        let value = match res.value {
            None => vec![],
            Some(value) => base64::engine::general_purpose::STANDARD
                .decode(value)
                .map_err(|e| RpcError::InvalidResponse {
                    endpoint: self.endpoint.clone(),
                    method: "abci_query",
                    reason: format!("invalid base64 value: {e}"),
                })?,
        };
        Ok(AbciQueryResponse {
            code: res.code,
            codespace: res.codespace,
            log: res.log,
            value,
            height: res.height,
        })
    }

    async fn broadcast_tx_sync(&self, tx_bytes: Vec<u8>) -> Result<BroadcastTxResponse, RpcError> {
        let res: BroadcastResult = self
            .call(
                "broadcast_tx_sync",
                BroadcastParams {
                    tx: base64::engine::general_purpose::STANDARD.encode(tx_bytes),
                },
            )
            .await?;
        Ok(BroadcastTxResponse {
            code: res.code,
            codespace: res.codespace,
            log: res.log,
            data: res.data,
            hash: res.hash,
        })
    }
}

/// Hands out [HttpRpcClient]s sharing one connection pool.
#[derive(Clone, Debug)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(client: reqwest::Client) -> Self {
        HttpConnector { client }
    }
}

impl RpcConnector for HttpConnector {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn super::RpcClient>, RpcError> {
        Ok(Arc::new(HttpRpcClient::new(self.client.clone(), endpoint)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status() {
        let res: StatusResult = parse_response(
            "http://node:26657",
            "status",
            r#"{"jsonrpc":"2.0","id":1,"result":{
                "node_info":{"network":"osmosis-1","version":"0.34.24"},
                "sync_info":{"latest_block_height":"8504367","catching_up":false}
            }}"#,
        )
        .unwrap();
        assert_eq!(res.node_info.network, "osmosis-1");
        assert_eq!(res.sync_info.latest_block_height, 8504367);
        assert!(!res.sync_info.catching_up);
    }

    #[test]
    fn parses_abci_query_failure() {
        let res: AbciQueryResult = parse_response(
            "http://node:26657",
            "abci_query",
            r#"{"jsonrpc":"2.0","id":1,"result":{"response":{
                "code":22,"log":"account not found","info":"","index":"0",
                "key":null,"value":null,"proofOps":null,"height":"120","codespace":"sdk"
            }}}"#,
        )
        .unwrap();
        assert_eq!(res.response.code, 22);
        assert_eq!(res.response.height, 120);
        assert_eq!(res.response.value, None);
        assert_eq!(res.response.codespace, "sdk");
    }

    #[test]
    fn parses_rpc_error() {
        let err = parse_response::<BroadcastResult>(
            "http://node:26657",
            "broadcast_tx_sync",
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32603,"message":"Internal error","data":"tx already exists in cache"}}"#,
        )
        .unwrap_err();
        match err {
            RpcError::JsonRpc { code, data, .. } => {
                assert_eq!(code, -32603);
                assert_eq!(data, "tx already exists in cache");
            }
            _ => panic!("unexpected error {err:?}"),
        }
    }

    #[test]
    fn parses_broadcast() {
        let res: BroadcastResult = parse_response(
            "http://node:26657",
            "broadcast_tx_sync",
            r#"{"jsonrpc":"2.0","id":1,"result":{"code":0,"data":"","log":"[]","codespace":"","hash":"0D1F0E7C"}}"#,
        )
        .unwrap();
        assert_eq!(res.code, 0);
        assert_eq!(res.hash, "0D1F0E7C");
    }

    #[test]
    fn rejects_garbage() {
        parse_response::<StatusResult>("http://node:26657", "status", "<html>").unwrap_err();
        parse_response::<StatusResult>("http://node:26657", "status", r#"{"jsonrpc":"2.0"}"#)
            .unwrap_err();
    }
}
