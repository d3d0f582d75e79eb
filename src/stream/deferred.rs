//! Deferred wire format parser.
//!
//! ```text
//! {"title":"Post","comments":"__deferred_promise:comments"}
//!
//! data:{"comments":[...]}
//!
//! error:{"related":{"message":"timed out","stack":"..."}}
//! ```
//!
//! Sections are separated by a blank line. The first is the initial record;
//! string fields starting with [`DEFERRED_PROMISE_PREFIX`] are placeholders
//! that later `data:` or `error:` sections fill in. Only the initial record
//! is awaited; the rest of the body is read on a spawned task until it
//! ends or the caller's token is cancelled.

use std::collections::{HashMap, VecDeque};

use futures::StreamExt;
use log::{debug, warn};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{ByteStream, Deferred, DeferredError, DeferredMap};
use crate::core::result::RouteError;

pub const DEFERRED_PROMISE_PREFIX: &str = "__deferred_promise:";

const SECTION_SEPARATOR: &str = "\n\n";

type Resolver = oneshot::Sender<Result<Value, DeferredError>>;

#[derive(Debug)]
pub struct ParsedDeferred {
    /// The initial record, with placeholder strings left as they arrived.
    /// `None` when there was no body at all.
    pub initial: Option<Value>,
    pub deferred: DeferredMap,
}

/// Reads the initial record from `body` and returns it together with a
/// `Deferred` for every placeholder field.
///
/// Must be called inside a tokio runtime when the body has placeholders:
/// the remaining sections are consumed by a spawned task. Cancelling
/// `abort` drops the body and settles every pending field with
/// [`DeferredError::Aborted`].
pub async fn parse_deferred(
    body: Option<ByteStream>,
    abort: CancellationToken,
) -> Result<ParsedDeferred, DeferredError> {
    let Some(body) = body else {
        return Ok(ParsedDeferred {
            initial: None,
            deferred: DeferredMap::new(),
        });
    };

    let mut reader = SectionReader::new(body);
    let section = reader
        .next_section()
        .await?
        .ok_or(DeferredError::MissingInitial)?;
    let initial: Value =
        serde_json::from_str(&section).map_err(|e| DeferredError::Parse(e.to_string()))?;

    let mut deferred = DeferredMap::new();
    let mut resolvers = HashMap::new();
    if let Value::Object(fields) = &initial {
        for (field, value) in fields {
            if let Value::String(s) = value
                && s.starts_with(DEFERRED_PROMISE_PREFIX)
            {
                let (tx, rx) = oneshot::channel();
                resolvers.insert(field.clone(), tx);
                deferred.insert(field.clone(), Deferred::from_receiver(rx));
            }
        }
    }

    debug!(
        "Deferred initial record parsed, {} pending field(s)",
        resolvers.len()
    );
    if !resolvers.is_empty() {
        tokio::spawn(resolve_remaining(reader, resolvers, abort));
    }

    Ok(ParsedDeferred {
        initial: Some(initial),
        deferred,
    })
}

/// Feeds the rest of the body to the resolvers. Whatever is still pending
/// when the body ends (or breaks, or is aborted) is settled with the reason.
async fn resolve_remaining(
    mut reader: SectionReader,
    mut resolvers: HashMap<String, Resolver>,
    abort: CancellationToken,
) {
    let reason = loop {
        if resolvers.is_empty() {
            return;
        }
        let next = tokio::select! {
            biased;
            _ = abort.cancelled() => {
                debug!("Deferred body aborted with {} field(s) pending", resolvers.len());
                break DeferredError::Aborted;
            }
            next = reader.next_section() => next,
        };
        match next {
            Ok(Some(section)) => {
                if let Err(e) = apply_section(&section, &mut resolvers) {
                    warn!("Deferred section failed: {}", e);
                    break e;
                }
            }
            Ok(None) => break DeferredError::StreamEnded,
            Err(e) => {
                warn!("Deferred body read failed: {}", e);
                break e;
            }
        }
    };
    drop(reader);

    for (field, tx) in resolvers.drain() {
        debug!("Settling unresolved deferred field {}: {}", field, reason);
        let _ = tx.send(Err(reason.clone()));
    }
}

fn apply_section(
    section: &str,
    resolvers: &mut HashMap<String, Resolver>,
) -> Result<(), DeferredError> {
    if section.is_empty() {
        return Ok(());
    }
    let (event, payload) = section
        .split_once(':')
        .ok_or_else(|| DeferredError::Parse(format!("section without event: {section}")))?;

    match event {
        "data" => {
            let fields: Map<String, Value> =
                serde_json::from_str(payload).map_err(|e| DeferredError::Parse(e.to_string()))?;
            for (field, value) in fields {
                if let Some(tx) = resolvers.remove(&field) {
                    debug!("Deferred field resolved: {}", field);
                    let _ = tx.send(Ok(value));
                }
            }
        }
        "error" => {
            let fields: HashMap<String, RouteError> =
                serde_json::from_str(payload).map_err(|e| DeferredError::Parse(e.to_string()))?;
            for (field, err) in fields {
                if let Some(tx) = resolvers.remove(&field) {
                    debug!("Deferred field errored: {} ({})", field, err);
                    let _ = tx.send(Err(DeferredError::Rejected(err)));
                }
            }
        }
        other => debug!("Ignoring deferred section with unknown event {:?}", other),
    }
    Ok(())
}

/// Turns a chunked body into `\n\n`-separated text sections.
struct SectionReader {
    body: ByteStream,
    buffer: Vec<u8>,
    sections: VecDeque<String>,
    closed: bool,
}

impl SectionReader {
    fn new(body: ByteStream) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            sections: VecDeque::new(),
            closed: false,
        }
    }

    async fn next_section(&mut self) -> Result<Option<String>, DeferredError> {
        if let Some(section) = self.sections.pop_front() {
            return Ok(Some(section));
        }

        // One section at a time while the body is open, so the initial
        // record is handed out as soon as its separator arrives.
        while !self.closed && !self.split_one() {
            match self.body.next().await {
                Some(Ok(chunk)) => {
                    debug!("Deferred chunk received: {} bytes", chunk.len());
                    self.buffer.extend_from_slice(&chunk);
                }
                Some(Err(e)) => return Err(DeferredError::Stream(e.to_string())),
                None => self.closed = true,
            }
        }

        if let Some(section) = self.sections.pop_front() {
            return Ok(Some(section));
        }

        // Body finished: whatever is buffered splits all at once.
        if !self.buffer.is_empty() {
            let text = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            self.sections
                .extend(text.split(SECTION_SEPARATOR).map(str::to_string));
        }
        Ok(self.sections.pop_front())
    }

    /// Moves the first complete section out of the buffer. Returns false
    /// when there is none yet.
    ///
    /// The separator is searched in raw bytes: `\n` never occurs inside a
    /// multi-byte UTF-8 sequence, so a chunk ending mid-character just waits
    /// for the rest, while invalid bytes decode to U+FFFD instead of holding
    /// up every later section.
    fn split_one(&mut self) -> bool {
        let separator = SECTION_SEPARATOR.as_bytes();
        let Some(pos) = self
            .buffer
            .windows(separator.len())
            .position(|window| window == separator)
        else {
            return false;
        };
        let head = String::from_utf8_lossy(&self.buffer[..pos]).into_owned();
        self.buffer.drain(..pos + separator.len());
        self.sections.push_back(head);
        true
    }
}
