use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use tonic::metadata::MetadataMap;

use super::{
    node::ConnectionManager, query::BridgeRequest, unpack::PolymorphicFields, AbciQueryResponse,
    Resolved, TypeRegistry,
};
use crate::error::BridgeError;

/// Request header selecting the block height to query at.
pub const BLOCK_HEIGHT_HEADER: &str = "x-cosmos-block-height";
/// Request header asking the node to include a proof.
pub const PROVE_HEADER: &str = "x-cosmos-query-prove";

/// Metadata of a successful bridged call.
#[derive(Debug, Default)]
pub struct ReplyMetadata {
    /// Carries [BLOCK_HEIGHT_HEADER] with the height the node answered at.
    pub metadata: MetadataMap,
    /// Every registered `Any` value found in the reply.
    pub resolved: Vec<Resolved>,
}

/// A decoded reply from [Bridge::query].
#[derive(Debug)]
pub struct BridgeReply<T> {
    pub value: T,
    pub metadata: MetadataMap,
    pub resolved: Vec<Resolved>,
}

impl<T> BridgeReply<T> {
    /// All block heights the reply metadata carries.
    pub fn block_heights(&self) -> Vec<&str> {
        self.metadata
            .get_all(BLOCK_HEIGHT_HEADER)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect()
    }
}

/// Sends unary gRPC-style queries to a chain as `abci_query` calls.
#[derive(Clone)]
pub struct Bridge {
    connections: Arc<ConnectionManager>,
    registry: Option<Arc<TypeRegistry>>,
    query_timeout: Duration,
}

fn read_headers(metadata: &MetadataMap) -> Result<(i64, bool), BridgeError> {
    let height = match metadata.get(BLOCK_HEIGHT_HEADER) {
        None => 0,
        Some(value) => {
            let invalid = || BridgeError::InvalidHeader {
                header: BLOCK_HEIGHT_HEADER,
                value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            };
            let height = value
                .to_str()
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(invalid)?;
            if height < 0 {
                return Err(invalid());
            }
            height
        }
    };
    let prove = match metadata.get(PROVE_HEADER) {
        None => false,
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|s| s.parse::<bool>().ok())
            .ok_or_else(|| BridgeError::InvalidHeader {
                header: PROVE_HEADER,
                value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            })?,
    };
    Ok((height, prove))
}

fn node_status(code: u32, log: &str) -> tonic::Status {
    match code {
        18 => tonic::Status::invalid_argument(log),
        4 => tonic::Status::unauthenticated(log),
        38 => tonic::Status::not_found(log),
        _ => tonic::Status::unknown(log),
    }
}

fn node_error(path: &str, res: AbciQueryResponse) -> BridgeError {
    BridgeError::Node {
        path: path.to_owned(),
        code: res.code,
        status: node_status(res.code, &res.log),
        codespace: res.codespace,
        log: res.log,
    }
}

impl Bridge {
    pub fn new(
        connections: Arc<ConnectionManager>,
        registry: Option<TypeRegistry>,
        query_timeout: Duration,
    ) -> Self {
        Bridge {
            connections,
            registry: registry.map(Arc::new),
            query_timeout,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Perform the unary call `path` on `chain_id`, decoding into `reply`.
    ///
    /// `reply` is only written once the node answered successfully and the
    /// whole response decoded.
    pub async fn invoke<Req, Res>(
        &self,
        chain_id: &str,
        path: &str,
        request: tonic::Request<Req>,
        reply: &mut Res,
    ) -> Result<ReplyMetadata, BridgeError>
    where
        Req: prost::Message,
        Res: prost::Message + Default + PolymorphicFields,
    {
        let (height, prove) = read_headers(request.metadata())?;
        let data = request.into_inner().encode_to_vec();

        let connection = self.connections.connection(chain_id)?;
        let active = connection.client().await?;
        tracing::debug!(
            "Bridging {path} for chain {chain_id} to {} at height {height}",
            active.endpoint()
        );

        let res = match tokio::time::timeout(
            self.query_timeout,
            active.client().abci_query(path, data, height, prove),
        )
        .await
        {
            Ok(Ok(res)) => res,
            Ok(Err(source)) => {
                connection.invalidate_generation(active.generation());
                return Err(BridgeError::Transport {
                    path: path.to_owned(),
                    source,
                });
            }
            Err(_) => {
                connection.invalidate_generation(active.generation());
                return Err(BridgeError::Timeout {
                    path: path.to_owned(),
                });
            }
        };
        if res.code != 0 {
            return Err(node_error(path, res));
        }

        let codec_error = |type_name, source| {
            connection.invalidate_generation(active.generation());
            BridgeError::Codec {
                path: path.to_owned(),
                type_name,
                source,
            }
        };
        let decoded =
            Res::decode(res.value.as_slice()).map_err(|e| codec_error(std::any::type_name::<Res>(), e))?;
        let resolved = match &self.registry {
            None => vec![],
            Some(registry) => registry
                .resolve_all(decoded.polymorphic_fields())
                .map_err(|e| codec_error("Any", e))?,
        };
        *reply = decoded;

        let mut metadata = MetadataMap::new();
        metadata.insert(BLOCK_HEIGHT_HEADER, res.height.into());
        Ok(ReplyMetadata { metadata, resolved })
    }

    /// Query the latest height without a proof.
    pub async fn query<R: BridgeRequest>(
        &self,
        chain_id: &str,
        request: R,
    ) -> Result<BridgeReply<R::Response>, BridgeError> {
        self.query_request(chain_id, tonic::Request::new(request))
            .await
    }

    /// Typed form of [Self::invoke], honoring the request's headers.
    pub async fn query_request<R: BridgeRequest>(
        &self,
        chain_id: &str,
        request: tonic::Request<R>,
    ) -> Result<BridgeReply<R::Response>, BridgeError> {
        let mut value = R::Response::default();
        let ReplyMetadata { metadata, resolved } = self
            .invoke(chain_id, R::PATH, request, &mut value)
            .await?;
        Ok(BridgeReply {
            value,
            metadata,
            resolved,
        })
    }

    /// Streaming calls have no `abci_query` equivalent.
    pub fn new_stream(&self, path: &str) -> Result<Infallible, BridgeError> {
        Err(BridgeError::StreamingNotSupported {
            path: path.to_owned(),
        })
    }
}
