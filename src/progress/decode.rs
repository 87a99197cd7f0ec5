//! Newline-delimited JSON decoding for progress streams.

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{future, Stream, StreamExt, TryStreamExt};
use thiserror::Error;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

use crate::client::body::BoxError;
use crate::progress::event::ProgressEvent;

/// Errors ending a progress stream.
///
/// `Clone` so one failure can reach every subscriber of a broadcast.
#[derive(Debug, Clone, Error)]
pub enum ProgressError {
    /// The engine reported a failure in-band.
    #[error("engine reported an error: {message}")]
    Daemon { message: String, code: Option<i64> },

    #[error("malformed progress event {line:?}: {source}")]
    Decode {
        line: String,
        #[source]
        source: Arc<serde_json::Error>,
    },

    #[error("progress line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("progress stream failed: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for ProgressError {
    fn from(err: io::Error) -> Self {
        ProgressError::Io(Arc::new(err))
    }
}

/// Item type of every progress stream.
pub type EventResult = Result<ProgressEvent, ProgressError>;

/// Boxed stream of progress events.
pub type EventStream = Pin<Box<dyn Stream<Item = EventResult> + Send>>;

/// Parse one line. Events carrying an error become `Err`.
pub fn parse_event(line: &str) -> EventResult {
    let event: ProgressEvent = serde_json::from_str(line).map_err(|e| ProgressError::Decode {
        line: line.to_string(),
        source: Arc::new(e),
    })?;

    if let Some(message) = event.error_message() {
        return Err(ProgressError::Daemon {
            message: message.to_string(),
            code: event.error_detail.as_ref().and_then(|d| d.code),
        });
    }
    Ok(event)
}

/// Decode a chunked response body into progress events.
///
/// Lines may span chunk boundaries; blank lines are skipped. `max_line_bytes`
/// bounds the memory a single malformed line can take.
pub fn decode_events<S, E>(body: S, max_line_bytes: Option<usize>) -> EventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    let limit = max_line_bytes.unwrap_or(usize::MAX);
    let reader = StreamReader::new(body.map_err(|e| io::Error::other::<BoxError>(e.into())));
    let lines = FramedRead::new(reader, LinesCodec::new_with_max_length(limit));

    let events = lines
        .try_filter(|line| future::ready(!line.trim().is_empty()))
        .map(move |line| match line {
            Ok(line) => parse_event(&line),
            Err(LinesCodecError::MaxLineLengthExceeded) => Err(ProgressError::LineTooLong(limit)),
            Err(LinesCodecError::Io(e)) => Err(e.into()),
        });

    Box::pin(events)
}
