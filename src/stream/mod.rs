//! # Streamed Loader Bodies
//!
//! Loaders may answer with a body in the deferred wire format: an initial
//! JSON record followed by sections that fill in fields later. This module
//! holds the parser and the `Deferred` handle a pending field turns into.

pub mod deferred;

pub use deferred::{DEFERRED_PROMISE_PREFIX, ParsedDeferred, parse_deferred};

use std::collections::HashMap;
use std::fmt;

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;

use crate::core::result::RouteError;

/// Raw response body, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, std::io::Error>>;

/// Pending fields of one loader result, keyed by field name.
pub type DeferredMap = HashMap<String, Deferred>;

/// Why a deferred field did not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredError {
    /// The body ended before the initial record arrived.
    MissingInitial,
    /// A section was not valid `event:json`.
    Parse(String),
    /// The server reported an error for this field.
    Rejected(RouteError),
    /// The body ended before this field was resolved.
    StreamEnded,
    /// Reading the body failed.
    Stream(String),
    /// The body was abandoned before this field was resolved.
    Aborted,
}

impl fmt::Display for DeferredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferredError::MissingInitial => write!(f, "No initial deferred data found."),
            DeferredError::Parse(msg) => write!(f, "deferred parse error: {msg}"),
            DeferredError::Rejected(err) => write!(f, "{err}"),
            DeferredError::StreamEnded => write!(f, "Response stream ended."),
            DeferredError::Stream(msg) => write!(f, "deferred stream error: {msg}"),
            DeferredError::Aborted => write!(f, "Deferred data aborted."),
        }
    }
}

impl std::error::Error for DeferredError {}

impl From<DeferredError> for RouteError {
    fn from(err: DeferredError) -> Self {
        match err {
            DeferredError::Rejected(inner) => inner,
            other => RouteError::new(other.to_string()),
        }
    }
}

type DeferredFuture = Shared<BoxFuture<'static, Result<Value, DeferredError>>>;

/// A field value that arrives later. Cheap to clone; every clone sees the
/// same result.
#[derive(Clone)]
pub struct Deferred {
    inner: DeferredFuture,
}

impl Deferred {
    pub(crate) fn from_receiver(
        rx: tokio::sync::oneshot::Receiver<Result<Value, DeferredError>>,
    ) -> Self {
        // A dropped sender means the reader went away without an answer.
        let fut = rx.map(|r| r.unwrap_or(Err(DeferredError::StreamEnded)));
        Self {
            inner: fut.boxed().shared(),
        }
    }

    /// Already-settled value.
    pub fn ready(result: Result<Value, DeferredError>) -> Self {
        Self {
            inner: futures::future::ready(result).boxed().shared(),
        }
    }

    /// Waits for the field to settle.
    pub async fn wait(&self) -> Result<Value, DeferredError> {
        self.inner.clone().await
    }

    /// The result, if it has settled and been polled.
    pub fn peek(&self) -> Option<&Result<Value, DeferredError>> {
        self.inner.peek()
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peek() {
            Some(result) => f.debug_tuple("Deferred").field(result).finish(),
            None => f.write_str("Deferred(<pending>)"),
        }
    }
}

/// Splits an in-memory body into a stream of `chunk_size` pieces. Pieces
/// may end in the middle of a UTF-8 sequence, as network chunks do.
pub fn chunked_body(bytes: Vec<u8>, chunk_size: usize) -> ByteStream {
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
        bytes.chunks(chunk_size).map(|c| Ok(c.to_vec())).collect();
    stream::iter(chunks).boxed()
}
