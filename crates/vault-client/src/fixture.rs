//! Synthetic event-stream payloads and a byte-stream test double.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use serde_json::{Value, json};

use crate::decoder::DONE_SENTINEL;
use crate::errors::ClientError;

/// Model id written into fixture frames.
pub const FIXTURE_MODEL: &str = "vault-fixture";

/// Splits `text` into the per-frame pieces the fixture emits.
///
/// Each piece keeps its trailing space, so concatenating them yields `text`.
pub fn fixture_words(text: &str) -> Vec<&str> {
    text.split_inclusive(' ').collect()
}

/// Builds a complete event-stream body for `text` using [`FIXTURE_MODEL`].
pub fn event_stream_payload(text: &str) -> String {
    event_stream_payload_for(text, FIXTURE_MODEL)
}

/// Builds a complete event-stream body for `text`: one data frame per word,
/// a content-free `stop` frame, then the sentinel. Frames are separated by
/// blank lines.
pub fn event_stream_payload_for(text: &str, model: &str) -> String {
    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
    let created = chrono::Utc::now().timestamp();

    let mut out = String::new();
    for word in fixture_words(text) {
        let frame = chunk_frame(&id, created, model, json!({ "content": word }), Value::Null);
        push_data_frame(&mut out, &frame.to_string());
    }
    let stop = chunk_frame(&id, created, model, json!({}), json!("stop"));
    push_data_frame(&mut out, &stop.to_string());
    push_data_frame(&mut out, DONE_SENTINEL);
    out
}

fn chunk_frame(id: &str, created: i64, model: &str, delta: Value, finish_reason: Value) -> Value {
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }],
    })
}

fn push_data_frame(out: &mut String, payload: &str) {
    out.push_str("data: ");
    out.push_str(payload);
    out.push_str("\n\n");
}

/// Cuts `bytes` into reads of at most `size` bytes (at least one).
pub fn split_bytes(bytes: &[u8], size: usize) -> Vec<Bytes> {
    bytes
        .chunks(size.max(1))
        .map(Bytes::copy_from_slice)
        .collect()
}

#[derive(Debug)]
enum Tail {
    Close,
    Fail(ClientError),
    Stall,
}

/// In-memory byte stream standing in for a response body.
///
/// Records how many reads were served and whether it has been dropped, so
/// tests can assert that the reader was released.
#[derive(Debug)]
pub struct FixtureStream {
    chunks: VecDeque<Bytes>,
    tail: Tail,
    reads: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl FixtureStream {
    /// Serves `chunks` in order and then closes.
    pub fn new(chunks: Vec<Bytes>) -> Self {
        Self {
            chunks: chunks.into(),
            tail: Tail::Close,
            reads: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Serves `payload` in reads of `chunk_size` bytes.
    pub fn from_payload(payload: &[u8], chunk_size: usize) -> Self {
        Self::new(split_bytes(payload, chunk_size))
    }

    /// Fails with `err` after the last chunk instead of closing.
    pub fn then_fail(mut self, err: ClientError) -> Self {
        self.tail = Tail::Fail(err);
        self
    }

    /// Never completes after the last chunk, like an idle connection.
    pub fn then_stall(mut self) -> Self {
        self.tail = Tail::Stall;
        self
    }

    /// Number of chunks handed out so far.
    pub fn read_probe(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }

    /// Flips to `true` when the stream is dropped.
    pub fn release_probe(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }
}

impl Stream for FixtureStream {
    type Item = Result<Bytes, ClientError>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(chunk) = this.chunks.pop_front() {
            this.reads.fetch_add(1, Ordering::SeqCst);
            return Poll::Ready(Some(Ok(chunk)));
        }
        match std::mem::replace(&mut this.tail, Tail::Close) {
            Tail::Close => Poll::Ready(None),
            Tail::Fail(err) => Poll::Ready(Some(Err(err))),
            Tail::Stall => {
                this.tail = Tail::Stall;
                Poll::Pending
            }
        }
    }
}

impl Drop for FixtureStream {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
