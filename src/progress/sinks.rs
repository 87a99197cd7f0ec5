//! Consumers for progress streams.

use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::progress::broadcast::{broadcast, DEFAULT_SUBSCRIBER_CAPACITY};
use crate::progress::decode::{EventResult, ProgressError};
use crate::progress::event::ProgressEvent;

/// Collect every event until the stream ends.
///
/// The first error ends collection; events gathered before it are discarded
/// so a failed pull is never mistaken for a finished one.
pub async fn wait_for_completion<S>(events: S) -> Result<Vec<ProgressEvent>, ProgressError>
where
    S: Stream<Item = EventResult>,
{
    let mut events = std::pin::pin!(events);
    let mut collected = Vec::new();
    while let Some(event) = events.next().await {
        collected.push(event?);
    }
    Ok(collected)
}

/// Run `on_event` for each event as it arrives, without retaining them.
pub async fn follow<S, F>(events: S, mut on_event: F) -> Result<(), ProgressError>
where
    S: Stream<Item = EventResult>,
    F: FnMut(&ProgressEvent),
{
    let mut events = std::pin::pin!(events);
    while let Some(event) = events.next().await {
        on_event(&event?);
    }
    Ok(())
}

/// Write a line per displayable event to `out`.
pub async fn follow_into<S, W>(events: S, mut out: W) -> Result<(), ProgressError>
where
    S: Stream<Item = EventResult>,
    W: AsyncWrite + Unpin,
{
    let mut events = std::pin::pin!(events);
    while let Some(event) = events.next().await {
        if let Some(line) = event?.display_line() {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
        }
    }
    out.flush().await?;
    Ok(())
}

/// Print progress to stdout as it arrives.
pub async fn follow_in_console<S>(events: S) -> Result<(), ProgressError>
where
    S: Stream<Item = EventResult>,
{
    follow_into(events, tokio::io::stdout()).await
}

/// Print progress to `out` while also collecting every event.
///
/// One response body feeds both consumers through a broadcast; the first
/// failure on either side ends both.
pub async fn collect_and_follow<S, W>(
    events: S,
    out: W,
) -> Result<Vec<ProgressEvent>, ProgressError>
where
    S: Stream<Item = EventResult> + Send + 'static,
    W: AsyncWrite + Unpin,
{
    collect_and_follow_with(events, out, DEFAULT_SUBSCRIBER_CAPACITY).await
}

/// [`collect_and_follow`] with `capacity` events buffered per consumer.
pub async fn collect_and_follow_with<S, W>(
    events: S,
    out: W,
    capacity: usize,
) -> Result<Vec<ProgressEvent>, ProgressError>
where
    S: Stream<Item = EventResult> + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let mut subscribers = broadcast(events, 2, capacity).into_iter();
    let (Some(collector), Some(follower)) = (subscribers.next(), subscribers.next()) else {
        return Ok(Vec::new());
    };

    let (collected, ()) = tokio::try_join!(wait_for_completion(collector), follow_into(follower, out))?;
    Ok(collected)
}

/// [`collect_and_follow`] printing to stdout.
pub async fn collect_and_follow_in_console<S>(events: S) -> Result<Vec<ProgressEvent>, ProgressError>
where
    S: Stream<Item = EventResult> + Send + 'static,
{
    collect_and_follow(events, tokio::io::stdout()).await
}
