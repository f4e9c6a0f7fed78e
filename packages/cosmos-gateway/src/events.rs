//! Notifications about transactions sent by an address.
//!
//! A subscription watches the chain for the first transaction sent from an
//! address, hands it to a [TxNotifier] and then tears itself down.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{stream::BoxStream, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;

use crate::client::{string_or_number, ConnectionManager};
use crate::error::{RpcError, SubscribeError};

/// Outcome of a delivered transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxEvent {
    pub tx_hash: String,
    pub code: u32,
    pub log: String,
    pub info: String,
    pub gas_used: i64,
    pub gas_wanted: i64,
}

/// Receives transaction events, e.g. to forward them as push notifications.
#[async_trait]
pub trait TxNotifier: Send + Sync {
    async fn notify(&self, event: TxEvent, params: &BTreeMap<String, String>) -> anyhow::Result<()>;
}

pub type EventStream = BoxStream<'static, Result<TxEvent, SubscribeError>>;

/// Opens event subscriptions on a node.
///
/// Dropping the returned stream ends the subscription.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn subscribe(&self, endpoint: &str, query: &str) -> Result<EventStream, SubscribeError>;
}

/// The websocket URL of a normalized RPC endpoint.
pub fn websocket_url(endpoint: &str) -> Result<String, SubscribeError> {
    let invalid = |reason: String| SubscribeError::InvalidEndpoint {
        endpoint: endpoint.to_owned(),
        reason,
    };
    let mut url = url::Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid(format!("cannot switch to {scheme}")))?;
    let path = format!("{}/websocket", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url.to_string())
}

/// Tendermint's event query for transfers sent by `address`.
pub fn transfer_query(address: &str) -> String {
    format!("tm.event = 'Tx' AND transfer.sender = '{address}'")
}

#[derive(Deserialize)]
struct EventMessage {
    result: Option<EventResult>,
    error: Option<EventError>,
}

#[derive(Deserialize)]
struct EventError {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: String,
}

#[derive(Deserialize)]
struct EventResult {
    data: Option<EventData>,
    #[serde(default)]
    events: HashMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct EventData {
    value: EventValue,
}

#[derive(Deserialize)]
struct EventValue {
    #[serde(rename = "TxResult")]
    tx_result: Option<TxResultBody>,
}

#[derive(Deserialize)]
struct TxResultBody {
    result: ExecResult,
}

#[derive(Deserialize)]
struct ExecResult {
    #[serde(default, deserialize_with = "string_or_number")]
    code: u32,
    #[serde(default)]
    log: String,
    #[serde(default)]
    info: String,
    #[serde(default, deserialize_with = "string_or_number")]
    gas_used: i64,
    #[serde(default, deserialize_with = "string_or_number")]
    gas_wanted: i64,
}

/// Parse one websocket frame. Frames without a transaction result, such as
/// the subscription acknowledgement, yield `None`.
fn parse_event(endpoint: &str, text: &str) -> Result<Option<TxEvent>, RpcError> {
    let message: EventMessage =
        serde_json::from_str(text).map_err(|e| RpcError::InvalidResponse {
            endpoint: endpoint.to_owned(),
            method: "subscribe",
            reason: e.to_string(),
        })?;
    if let Some(EventError {
        code,
        message,
        data,
    }) = message.error
    {
        return Err(RpcError::JsonRpc {
            endpoint: endpoint.to_owned(),
            method: "subscribe",
            code,
            message,
            data,
        });
    }
    let Some(mut result) = message.result else {
        return Ok(None);
    };
    let Some(tx_result) = result.data.and_then(|data| data.value.tx_result) else {
        return Ok(None);
    };
    let tx_hash = result
        .events
        .remove("tx.hash")
        .and_then(|hashes| hashes.into_iter().next())
        .unwrap_or_default();
    let ExecResult {
        code,
        log,
        info,
        gas_used,
        gas_wanted,
    } = tx_result.result;
    Ok(Some(TxEvent {
        tx_hash,
        code,
        log,
        info,
        gas_used,
        gas_wanted,
    }))
}

/// [EventSource] speaking Tendermint JSON-RPC over a websocket.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketSource;

#[async_trait]
impl EventSource for WebSocketSource {
    async fn subscribe(&self, endpoint: &str, query: &str) -> Result<EventStream, SubscribeError> {
        let url = websocket_url(endpoint)?;
        let ws_error = |source| RpcError::WebSocket {
            endpoint: url.clone(),
            source: Box::new(source),
        };
        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(ws_error)?;
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "subscribe",
            "id": 1,
            "params": { "query": query },
        });
        socket
            .send(Message::text(request.to_string()))
            .await
            .map_err(ws_error)?;

        loop {
            match socket.next().await {
                None | Some(Ok(Message::Close(_))) => {
                    return Err(SubscribeError::Rejected {
                        endpoint: url.clone(),
                        message: "connection closed before acknowledging".to_owned(),
                    })
                }
                Some(Err(e)) => return Err(ws_error(e).into()),
                Some(Ok(Message::Text(text))) => match parse_event(&url, text.as_str()) {
                    Ok(_) => break,
                    Err(e) => {
                        return Err(SubscribeError::Rejected {
                            endpoint: url.clone(),
                            message: e.to_string(),
                        })
                    }
                },
                Some(Ok(_)) => continue,
            }
        }
        tracing::debug!("Subscribed to {query:?} on {url}");

        let stream = futures::stream::unfold((socket, url), |(mut socket, url)| async move {
            loop {
                let item: Result<TxEvent, SubscribeError> = match socket.next().await? {
                    Ok(Message::Text(text)) => match parse_event(&url, text.as_str()) {
                        Ok(Some(event)) => Ok(event),
                        Ok(None) => continue,
                        Err(e) => Err(e.into()),
                    },
                    Ok(Message::Close(_)) => return None,
                    Ok(_) => continue,
                    Err(e) => Err(RpcError::WebSocket {
                        endpoint: url.clone(),
                        source: Box::new(e),
                    }
                    .into()),
                };
                return Some((item, (socket, url)));
            }
        });
        Ok(stream.boxed())
    }
}

struct Listener {
    id: u64,
    cancel: CancellationToken,
}

/// Runs one listener task per subscription tag.
pub struct EventSubscriber {
    connections: Arc<ConnectionManager>,
    source: Arc<dyn EventSource>,
    notifier: Option<Arc<dyn TxNotifier>>,
    listeners: Arc<Mutex<HashMap<String, Listener>>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl EventSubscriber {
    pub fn new(
        connections: Arc<ConnectionManager>,
        source: Arc<dyn EventSource>,
        notifier: Option<Arc<dyn TxNotifier>>,
    ) -> Self {
        EventSubscriber {
            connections,
            source,
            notifier,
            listeners: Arc::default(),
            next_id: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn subscription_tag(chain_id: &str, address: &str) -> String {
        format!("gateway-{chain_id}-{address}")
    }

    /// Watch for the next transaction sent by `address` on `chain_id`.
    ///
    /// Returns the subscription tag. An existing subscription with the same
    /// tag is cancelled and replaced.
    pub async fn subscribe(
        &self,
        chain_id: &str,
        address: &str,
        params: BTreeMap<String, String>,
    ) -> Result<String, SubscribeError> {
        let notifier = self.notifier.clone().ok_or(SubscribeError::NoNotifier)?;
        let connection = self.connections.connection(chain_id)?;
        let active = connection.client().await?;
        let mut events = match self
            .source
            .subscribe(active.endpoint(), &transfer_query(address))
            .await
        {
            Ok(events) => events,
            Err(e) => {
                connection.invalidate_generation(active.generation());
                return Err(e);
            }
        };

        let tag = Self::subscription_tag(chain_id, address);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = self.shutdown.child_token();
        if let Some(previous) = self.listeners.lock().insert(
            tag.clone(),
            Listener {
                id,
                cancel: cancel.clone(),
            },
        ) {
            previous.cancel.cancel();
        }

        let listeners = self.listeners.clone();
        let task_tag = tag.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Subscription {task_tag} cancelled");
                }
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        tracing::debug!("Transaction event for {task_tag}: {event:?}");
                        if let Err(e) = notifier.notify(event, &params).await {
                            tracing::warn!("Unable to deliver transaction event for {task_tag}: {e:?}");
                        }
                    }
                    Some(Err(e)) => tracing::warn!("Subscription {task_tag} failed: {e}"),
                    None => tracing::debug!("Subscription {task_tag} closed by the node"),
                },
            }
            {
                let mut listeners = listeners.lock();
                if listeners.get(&task_tag).map(|x| x.id) == Some(id) {
                    listeners.remove(&task_tag);
                }
            }
            drop(events);
        });
        Ok(tag)
    }

    /// Cancel a subscription. Returns whether it was still active.
    pub fn unsubscribe(&self, tag: &str) -> bool {
        match self.listeners.lock().remove(tag) {
            Some(listener) => {
                listener.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, tag: &str) -> bool {
        self.listeners.lock().contains_key(tag)
    }

    /// Cancel every running subscription.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.listeners.lock().clear();
    }
}
