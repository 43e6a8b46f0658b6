//! Per-subgraph query batching (spec §4.1 "If `allowBatching` is enabled,
//! concurrent calls issued within a single event-loop tick are coalesced into one
//! array-body request").
//!
//! Grounded in the teacher's `batching.rs` coordinator: a background task owns an
//! `mpsc` channel of [`BatchQuery`]s, collects everything that arrives before the
//! next yield point, and flushes them as one request, demultiplexing responses
//! positionally back to each caller's oneshot.

use tokio::sync::{mpsc, oneshot};

use super::subgraph_client::{GraphQlRequest, GraphQlResponse};
use crate::error::SubgraphError;

pub struct BatchQuery {
    pub request: GraphQlRequest,
    pub reply: oneshot::Sender<Result<GraphQlResponse, SubgraphError>>,
}

#[derive(Clone)]
pub struct Batcher {
    sender: mpsc::UnboundedSender<BatchQuery>,
}

impl Batcher {
    /// Spawns the batching coordinator loop. `flush` sends the coalesced array
    /// body and returns the per-call responses in the same order.
    pub fn spawn<F, Fut>(flush: F) -> Self
    where
        F: Fn(Vec<GraphQlRequest>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Vec<Result<GraphQlResponse, SubgraphError>>> + Send,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<BatchQuery>();
        tokio::spawn(async move {
            while let Some(first) = receiver.recv().await {
                let mut batch = vec![first];
                // Coalesce whatever else has already queued; don't wait further
                // than the current yield point (§4.1 "within a single event-loop
                // tick").
                tokio::task::yield_now().await;
                while let Ok(next) = receiver.try_recv() {
                    batch.push(next);
                }

                let (requests, replies): (Vec<_>, Vec<_>) = batch
                    .into_iter()
                    .map(|b| (b.request, b.reply))
                    .unzip();
                let results = flush(requests).await;
                for (reply, result) in replies.into_iter().zip(results.into_iter()) {
                    let _ = reply.send(result);
                }
            }
        });
        Batcher { sender }
    }

    pub async fn call(&self, request: GraphQlRequest) -> Result<GraphQlResponse, SubgraphError> {
        let (reply, recv) = oneshot::channel();
        self.sender
            .send(BatchQuery { request, reply })
            .map_err(|_| SubgraphError::Transport {
                service: "batcher".to_string(),
                message: "batching coordinator has shut down".to_string(),
            })?;
        recv.await.map_err(|_| SubgraphError::Transport {
            service: "batcher".to_string(),
            message: "batching coordinator dropped the reply channel".to_string(),
        })?
    }
}
