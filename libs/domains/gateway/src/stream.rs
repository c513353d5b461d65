//! Bounded, order-preserving adapter between a request stream and a unary operation.
//!
//! One pump task per stream owns the input, the worker set and the only
//! sender of the response channel:
//!
//! ```text
//! requests ──> pump ──spawn──> worker (seq 0) ─┐
//!               │  ──spawn──> worker (seq 1) ─┤──> reorder buffer ──> responses
//!               │  ...        (at most C)     ─┘         (pump)
//! ```
//!
//! The pump stops reading input while `C` items are outstanding, emits
//! responses strictly in arrival order, and drops the sender once input has
//! ended and every accepted item has been answered. If the consumer goes away
//! the pump returns and its worker set aborts whatever is still running.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{Id, JoinSet};
use tokio_stream::wrappers::ReceiverStream;
use tonic::Code;
use tracing::{debug, warn};

use crate::error::GatewayResult;
use crate::metrics::GatewayMetrics;
use crate::models::{StreamResponse, StreamStatus};

#[derive(Debug, Clone, Copy)]
pub struct StreamProxy {
    concurrency: usize,
}

impl StreamProxy {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `handler` for every item of `requests`, answering in input order.
    ///
    /// A failed item produces [`StreamResponse::Error`] in its slot and the
    /// stream carries on.
    pub fn proxy<Req, Resp, S, F, Fut>(
        &self,
        operation: &'static str,
        requests: S,
        handler: F,
    ) -> ReceiverStream<StreamResponse<Resp>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        S: Stream<Item = Req> + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GatewayResult<Resp>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.concurrency);
        let pump = Pump {
            operation,
            concurrency: self.concurrency,
            handler: Arc::new(handler),
            tx,
        };
        tokio::spawn(pump.run(requests));
        ReceiverStream::new(rx)
    }
}

struct Pump<Resp, F> {
    operation: &'static str,
    concurrency: usize,
    handler: Arc<F>,
    tx: mpsc::Sender<StreamResponse<Resp>>,
}

fn to_response<T>(operation: &'static str, result: GatewayResult<T>) -> StreamResponse<T> {
    GatewayMetrics::record_stream_item(operation, result.is_ok());
    match result {
        Ok(value) => StreamResponse::Response(value),
        Err(err) => {
            debug!(operation, error = %err, "Stream item failed");
            StreamResponse::Error(StreamStatus {
                code: err.code(),
                message: err.to_string(),
            })
        }
    }
}

impl<Resp, F> Pump<Resp, F>
where
    Resp: Send + 'static,
{
    async fn run<Req, S, Fut>(self, requests: S)
    where
        Req: Send + 'static,
        S: Stream<Item = Req> + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GatewayResult<Resp>> + Send + 'static,
    {
        let mut requests = pin!(requests);
        let mut workers: JoinSet<StreamResponse<Resp>> = JoinSet::new();
        let mut sequence_of: HashMap<Id, u64> = HashMap::new();
        let mut ready: BTreeMap<u64, StreamResponse<Resp>> = BTreeMap::new();
        let mut received: u64 = 0;
        let mut next_out: u64 = 0;
        let mut input_open = true;

        loop {
            let outstanding = (received - next_out) as usize;
            if !input_open && outstanding == 0 {
                break;
            }

            tokio::select! {
                biased;

                _ = self.tx.closed() => {
                    debug!(
                        operation = self.operation,
                        in_flight = workers.len(),
                        "Stream consumer gone, abandoning in-flight items"
                    );
                    return;
                }

                Some(joined) = workers.join_next_with_id(), if !workers.is_empty() => {
                    let (seq, response) = match joined {
                        Ok((id, response)) => (sequence_of.remove(&id), response),
                        Err(err) => {
                            warn!(operation = self.operation, error = %err, "Stream worker died");
                            let response = StreamResponse::Error(StreamStatus {
                                code: Code::Internal,
                                message: "stream item task failed".into(),
                            });
                            (sequence_of.remove(&err.id()), response)
                        }
                    };
                    if let Some(seq) = seq {
                        ready.insert(seq, response);
                    }

                    while let Some(response) = ready.remove(&next_out) {
                        if self.tx.send(response).await.is_err() {
                            return;
                        }
                        next_out += 1;
                    }
                }

                item = requests.next(), if input_open && outstanding < self.concurrency => {
                    match item {
                        Some(request) => {
                            let handler = self.handler.clone();
                            let operation = self.operation;
                            let handle = workers.spawn(async move {
                                to_response(operation, handler(request).await)
                            });
                            sequence_of.insert(handle.id(), received);
                            received += 1;
                        }
                        None => {
                            debug!(operation = self.operation, received, "Stream input ended");
                            input_open = false;
                        }
                    }
                }
            }
        }
        // The sender drops with `self`, closing the response stream.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::stream;
    use tokio::sync::oneshot;

    use crate::error::GatewayError;

    #[tokio::test(start_paused = true)]
    async fn test_responses_keep_request_order() {
        let proxy = StreamProxy::new(8);
        let requests = stream::iter(0u64..8);

        // Later items finish first.
        let responses: Vec<_> = proxy
            .proxy("test", requests, |i| async move {
                tokio::time::sleep(Duration::from_millis(100 - i * 10)).await;
                Ok::<_, GatewayError>(i)
            })
            .collect()
            .await;

        let values: Vec<u64> = responses.into_iter().filter_map(|r| r.response()).collect();
        assert_eq!(values, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outstanding_items_are_bounded() {
        let proxy = StreamProxy::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (c, p) = (current.clone(), peak.clone());

        let responses: Vec<_> = proxy
            .proxy("test", stream::iter(0..20), move |i: u32| {
                let (current, peak) = (c.clone(), p.clone());
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(u64::from(i % 4) * 5 + 1)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, GatewayError>(i)
                }
            })
            .collect()
            .await;

        assert_eq!(responses.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_failed_item_keeps_its_slot() {
        let proxy = StreamProxy::new(4);
        let responses: Vec<_> = proxy
            .proxy("test", stream::iter(0..4), |i: u32| async move {
                if i == 1 {
                    Err(GatewayError::NotFound(format!("item-{i}")))
                } else {
                    Ok(i)
                }
            })
            .collect()
            .await;

        assert_eq!(responses.len(), 4);
        assert_eq!(responses[0], StreamResponse::Response(0));
        match &responses[1] {
            StreamResponse::Error(status) => assert_eq!(status.code, Code::NotFound),
            other => panic!("unexpected response: {other:?}"),
        }
        assert_eq!(responses[3], StreamResponse::Response(3));
    }

    #[tokio::test]
    async fn test_empty_input_closes_output() {
        let proxy = StreamProxy::new(2);
        let responses: Vec<StreamResponse<u32>> = proxy
            .proxy("test", stream::iter(Vec::<u32>::new()), |i| async move { Ok(i) })
            .collect()
            .await;
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_consumer_aborts_workers() {
        let proxy = StreamProxy::new(2);
        let (guard_tx, guard_rx) = oneshot::channel::<()>();
        let guard = Arc::new(std::sync::Mutex::new(Some(guard_tx)));

        // One item, then the input stays open forever.
        let requests = stream::iter(vec![0u32]).chain(stream::pending());
        let responses = proxy.proxy("test", requests, move |i| {
            let held = guard.lock().unwrap().take();
            async move {
                let _held = held;
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<_, GatewayError>(i)
            }
        });
        tokio::task::yield_now().await;
        drop(responses);

        // The guard is dropped only when the worker is aborted.
        let dropped = tokio::time::timeout(Duration::from_secs(5), guard_rx).await;
        assert!(matches!(dropped, Ok(Err(_))));
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        assert_eq!(StreamProxy::new(0).concurrency(), 1);
    }
}
