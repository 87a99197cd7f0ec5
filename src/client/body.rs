//! Request body helpers.

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use serde::Serialize;

/// Boxed error used by request bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type accepted by every agent request.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

pub fn empty() -> Body {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn full(bytes: impl Into<Bytes>) -> Body {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Serialize `value` as a JSON body.
pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Body, serde_json::Error> {
    Ok(full(serde_json::to_vec(value)?))
}

/// Stream a body chunk by chunk without buffering it.
pub fn stream<S, E>(chunks: S) -> Body
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    StreamBody::new(
        chunks
            .map_ok(Frame::data)
            .map_err(|e| -> BoxError { e.into() }),
    )
    .boxed_unsync()
}
