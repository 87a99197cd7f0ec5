//! Fan one progress stream out to several subscribers.
//!
//! # Data Flow
//! ```text
//! response body ──▶ pump task ──┬──▶ subscriber 0 (bounded)
//!                               ├──▶ subscriber 1 (bounded)
//!                               └──▶ ...
//! ```
//!
//! Every subscriber sees every event once, in order. A subscriber that is
//! dropped is removed without affecting the others; a source failure is
//! delivered to all of them.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::progress::decode::EventResult;

/// Default events buffered per subscriber.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

#[derive(Debug)]
struct PumpHandle(AbortHandle);

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// One consumer's view of a broadcast.
#[derive(Debug)]
pub struct Subscriber {
    rx: mpsc::Receiver<EventResult>,
    _pump: Arc<PumpHandle>,
}

impl Subscriber {
    pub async fn recv(&mut self) -> Option<EventResult> {
        self.rx.recv().await
    }
}

impl Stream for Subscriber {
    type Item = EventResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<EventResult>> {
        self.rx.poll_recv(cx)
    }
}

/// Start pumping `source` into `count` subscribers.
///
/// All subscribers exist before the first event is read, so none of them can
/// miss the start of the stream. Must be called within a Tokio runtime.
pub fn broadcast<S>(source: S, count: usize, capacity: usize) -> Vec<Subscriber>
where
    S: Stream<Item = EventResult> + Send + 'static,
{
    let capacity = capacity.max(1);
    let (senders, receivers): (Vec<_>, Vec<_>) =
        (0..count).map(|_| mpsc::channel(capacity)).unzip();

    let task = tokio::spawn(pump(source, senders));
    let handle = Arc::new(PumpHandle(task.abort_handle()));

    receivers
        .into_iter()
        .map(|rx| Subscriber {
            rx,
            _pump: Arc::clone(&handle),
        })
        .collect()
}

async fn pump<S>(source: S, mut senders: Vec<mpsc::Sender<EventResult>>)
where
    S: Stream<Item = EventResult> + Send,
{
    let mut source = std::pin::pin!(source);

    while let Some(item) = source.next().await {
        let failed = item.is_err();

        let mut live = Vec::with_capacity(senders.len());
        for tx in senders.drain(..) {
            if tx.send(item.clone()).await.is_ok() {
                live.push(tx);
            } else {
                tracing::trace!("Progress subscriber went away");
            }
        }
        senders = live;

        if failed || senders.is_empty() {
            break;
        }
    }

    tracing::trace!(subscribers = senders.len(), "Progress broadcast finished");
}
