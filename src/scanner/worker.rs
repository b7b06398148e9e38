//! RelationWorker: off-thread relationship inference
//!
//! Requests are plain messages (text + entity spans in, relationships + stats
//! out) correlated by request id. The worker task runs each extraction on the
//! blocking pool; callers wait with a deadline and fall back to in-line
//! extraction when it passes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::scanner::analyzer::LinguisticAnalyzer;
use crate::scanner::error::ScanError;
use crate::scanner::relation::{EntitySpan, ExtractedRelationship, RelationCortex, RelationStats};

const QUEUE_DEPTH: usize = 16;

#[derive(Debug, Clone)]
pub struct RelationRequest {
    pub request_id: u64,
    pub text: String,
    pub spans: Vec<EntitySpan>,
}

#[derive(Debug, Clone)]
pub struct RelationResponse {
    pub request_id: u64,
    pub relationships: Vec<ExtractedRelationship>,
    pub stats: RelationStats,
}

struct Envelope {
    request: RelationRequest,
    reply: oneshot::Sender<RelationResponse>,
}

pub struct RelationWorker {
    tx: mpsc::Sender<Envelope>,
    next_id: AtomicU64,
    timeout: Duration,
    handle: JoinHandle<()>,
}

impl std::fmt::Debug for RelationWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationWorker")
            .field("timeout", &self.timeout)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl RelationWorker {
    /// Start the worker task. Rules are fixed for the worker's lifetime.
    /// Must be called inside a tokio runtime.
    pub fn spawn(
        cortex: Arc<RelationCortex>,
        analyzer: Arc<dyn LinguisticAnalyzer>,
        timeout: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Envelope>(QUEUE_DEPTH);

        let handle = tokio::spawn(async move {
            while let Some(Envelope { request, reply }) = rx.recv().await {
                if reply.is_closed() {
                    debug!(request_id = request.request_id, "caller gone, request skipped");
                    continue;
                }
                let cortex = Arc::clone(&cortex);
                let analyzer = Arc::clone(&analyzer);
                let request_id = request.request_id;

                let computed = tokio::task::spawn_blocking(move || {
                    let analysis = analyzer.analyze(&request.text);
                    cortex.extract_with_stats(&request.text, &request.spans, &analysis)
                })
                .await;

                match computed {
                    Ok((relationships, stats)) => {
                        let response = RelationResponse {
                            request_id,
                            relationships,
                            stats,
                        };
                        if reply.send(response).is_err() {
                            debug!(request_id, "caller gave up before reply");
                        }
                    }
                    Err(e) => warn!(request_id, error = %e, "relation extraction task failed"),
                }
            }
        });

        Self {
            tx,
            next_id: AtomicU64::new(0),
            timeout,
            handle,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Submit a request and wait for its reply, at most `timeout`.
    pub async fn extract(
        &self,
        text: String,
        spans: Vec<EntitySpan>,
    ) -> Result<RelationResponse, ScanError> {
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            request: RelationRequest {
                request_id,
                text,
                spans,
            },
            reply: reply_tx,
        };

        let exchange = async {
            self.tx
                .send(envelope)
                .await
                .map_err(|_| ScanError::WorkerUnavailable("worker stopped".to_string()))?;
            reply_rx
                .await
                .map_err(|_| ScanError::WorkerUnavailable(format!("request {} dropped", request_id)))
        };

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ScanError::WorkerTimeout {
                request_id,
                timeout_ms: self.timeout.as_millis() as u64,
            })??;

        if response.request_id != request_id {
            return Err(ScanError::WorkerUnavailable(format!(
                "reply {} does not match request {}",
                response.request_id, request_id
            )));
        }
        Ok(response)
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for RelationWorker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
