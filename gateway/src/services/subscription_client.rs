//! Subscription proxying over a persistent WebSocket (spec §4.1 `subscribe`),
//! speaking the `graphql-transport-ws` subprotocol, reconnecting with exponential
//! backoff.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::SubgraphError;
use crate::services::subgraph_client::GraphQlRequest;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct SubscriptionClient {
    ws_url: url::Url,
    service: String,
    cancel: CancellationToken,
}

impl SubscriptionClient {
    pub fn new(service: &str, ws_url: url::Url) -> Self {
        SubscriptionClient {
            ws_url,
            service: service.to_string(),
            cancel: CancellationToken::new(),
        }
    }

    /// `subscribe` (§4.1): returns a channel of payloads, reconnecting the
    /// underlying socket with exponential backoff on disconnect until `close` is
    /// called.
    pub fn subscribe(&self, request: GraphQlRequest) -> mpsc::Receiver<Result<Value, SubgraphError>> {
        let (sender, receiver) = mpsc::channel(16);
        let ws_url = self.ws_url.clone();
        let service = self.service.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut backoff = Duration::from_millis(200);
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                match run_connection(&ws_url, &request, &sender, &cancel).await {
                    Ok(()) => return, // graceful server close or cancellation
                    Err(err) => {
                        warn!(service = %service, error = %err, "subscription socket closed, reconnecting");
                        if sender
                            .send(Err(SubgraphError::SubscriptionClosed {
                                service: service.clone(),
                                message: err.to_string(),
                            }))
                            .await
                            .is_err()
                        {
                            return; // receiver dropped
                        }
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return,
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        });

        receiver
    }

    pub fn close(&self) {
        info!(service = %self.service, "closing subscription client");
        self.cancel.cancel();
    }
}

async fn run_connection(
    ws_url: &url::Url,
    request: &GraphQlRequest,
    sender: &mpsc::Sender<Result<Value, SubgraphError>>,
    cancel: &CancellationToken,
) -> Result<(), SError> {
    let (mut socket, _) = tokio_tungstenite::connect_async(ws_url.as_str())
        .await
        .map_err(|e| SError(e.to_string()))?;

    let init = serde_json::json!({"type": "connection_init"});
    socket
        .send(Message::Text(init.to_string()))
        .await
        .map_err(|e| SError(e.to_string()))?;

    let subscribe_msg = serde_json::json!({
        "id": "1",
        "type": "subscribe",
        "payload": request,
    });
    socket
        .send(Message::Text(subscribe_msg.to_string()))
        .await
        .map_err(|e| SError(e.to_string()))?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = socket.close(None).await;
                return Ok(());
            }
            frame = socket.next() => {
                let Some(frame) = frame else { return Ok(()) };
                let frame = frame.map_err(|e| SError(e.to_string()))?;
                match frame {
                    Message::Text(text) => {
                        let envelope: Value = serde_json::from_str(&text).map_err(|e| SError(e.to_string()))?;
                        match envelope.get("type").and_then(Value::as_str) {
                            Some("next") => {
                                if let Some(payload) = envelope.get("payload").cloned() {
                                    if sender.send(Ok(payload)).await.is_err() {
                                        return Ok(());
                                    }
                                }
                            }
                            Some("complete") => return Ok(()),
                            Some("error") => {
                                return Err(SError(envelope.to_string()));
                            }
                            _ => {}
                        }
                    }
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }
        }
    }
}

/// Small local error wrapper so `run_connection` doesn't need its own taxonomy
/// entry; reconnect logic only cares about the message.
struct SError(String);

impl std::fmt::Display for SError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
