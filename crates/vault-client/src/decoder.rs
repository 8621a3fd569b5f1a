//! Incremental decoder turning an event-stream body into [`StreamEvent`]s.
//!
//! Bytes are decoded to text with a stateful UTF-8 decoder, reassembled into
//! newline-terminated lines, and each line is classified as ignorable, a data
//! frame, or the `[DONE]` sentinel.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::StreamExt as _;
use futures::{Stream, stream};
use tracing::{debug, warn};

use crate::cancel::{AbortSignal, is_aborted, wait_aborted};
use crate::errors::ClientError;
use crate::event::{StreamEvent, extract_content_delta};

/// Payload that marks the intentional end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data: ";
const COMMENT_PREFIX: char = ':';

/// Lazily produced sequence of decoded events.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send + 'static>>;

/// UTF-8 decoder that carries incomplete multi-byte sequences across reads.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decodes as much of `bytes` (plus any carried tail) as forms complete
    /// characters. Invalid sequences become U+FFFD.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        loop {
            let (valid, invalid_len) = match std::str::from_utf8(&self.pending) {
                Ok(_) => (self.pending.len(), None),
                Err(err) => (err.valid_up_to(), err.error_len()),
            };
            out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
            match invalid_len {
                Some(len) => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..valid + len);
                }
                None => {
                    // Whatever is left is the start of a character split by the read.
                    self.pending.drain(..valid);
                    return out;
                }
            }
        }
    }

    /// Flushes the carried tail at end of input.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Accumulates text and hands back complete lines, keeping the unterminated
/// tail for the next push.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: String,
}

impl LineBuffer {
    /// Appends `text` and returns every line completed by it, in order.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buf.push_str(text);
        let Some(last_newline) = self.buf.rfind('\n') else {
            return Vec::new();
        };
        let tail = self.buf.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buf, tail);
        complete[..last_newline]
            .split('\n')
            .map(ToOwned::to_owned)
            .collect()
    }

    /// Takes the unterminated tail, leaving the buffer empty.
    pub fn take_remainder(&mut self) -> String {
        std::mem::take(&mut self.buf)
    }
}

/// Classification of a single line of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Blank lines, comments, and non-data fields.
    Ignored,
    /// The `[DONE]` sentinel.
    Done,
    /// A data frame payload, not yet parsed.
    Data(&'a str),
}

/// Classifies one line.
pub fn classify_line(line: &str) -> Frame<'_> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(COMMENT_PREFIX) {
        return Frame::Ignored;
    }
    match line.strip_prefix(DATA_PREFIX) {
        Some(DONE_SENTINEL) => Frame::Done,
        Some(payload) => Frame::Data(payload),
        None => Frame::Ignored,
    }
}

/// Parses a data payload into a `Chunk`. Malformed JSON yields `None`.
pub fn parse_data_payload(payload: &str) -> Option<StreamEvent> {
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(raw) => Some(StreamEvent::Chunk {
            content_delta: extract_content_delta(&raw),
            raw,
        }),
        Err(err) => {
            warn!(event = "stream.frame_skipped", error = %err, payload_len = payload.len() as u64, "skipping malformed data frame");
            None
        }
    }
}

/// Synchronous core of the decoder: bytes in, events out.
///
/// Once the sentinel has been seen every further call is a no-op.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    text: Utf8Decoder,
    lines: LineBuffer,
    finished: bool,
}

impl FrameDecoder {
    /// Feeds one read. Returns `true` once the stream has terminated.
    pub fn push_bytes(&mut self, bytes: &[u8], out: &mut VecDeque<StreamEvent>) -> bool {
        if self.finished {
            return true;
        }
        let text = self.text.decode(bytes);
        let lines = self.lines.push(&text);
        self.push_lines(lines, out)
    }

    /// Signals end of input: flushes the tail and emits `Done` unless the
    /// sentinel already did.
    pub fn finish(&mut self, out: &mut VecDeque<StreamEvent>) {
        if self.finished {
            return;
        }
        let text = self.text.finish();
        let mut lines = self.lines.push(&text);
        lines.push(self.lines.take_remainder());
        if !self.push_lines(lines, out) {
            out.push_back(StreamEvent::Done);
            self.finished = true;
        }
    }

    /// Returns `true` once a terminal event has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn push_lines(&mut self, lines: Vec<String>, out: &mut VecDeque<StreamEvent>) -> bool {
        for line in &lines {
            match classify_line(line) {
                Frame::Ignored => {}
                Frame::Done => {
                    out.push_back(StreamEvent::Done);
                    self.finished = true;
                    return true;
                }
                Frame::Data(payload) => {
                    if let Some(event) = parse_data_payload(payload) {
                        out.push_back(event);
                    }
                }
            }
        }
        false
    }
}

enum Read {
    Aborted,
    Next(Option<Result<Bytes, ClientError>>),
}

/// Decodes `source` into a lazy, non-restartable event sequence.
///
/// The sequence ends after `Done` or `Error` and keeps returning `None`
/// afterwards. If `signal` fires, it ends silently without a terminal event.
/// The source is dropped on every exit path, including when the returned
/// stream itself is dropped.
pub fn decode_event_stream<S>(source: S, signal: Option<AbortSignal>) -> EventStream
where
    S: Stream<Item = Result<Bytes, ClientError>> + Send + 'static,
{
    struct State<S> {
        stream_id: uuid::Uuid,
        source: Option<Pin<Box<S>>>,
        decoder: FrameDecoder,
        pending: VecDeque<StreamEvent>,
        signal: Option<AbortSignal>,
    }

    impl<S> State<S> {
        fn release(&mut self, reason: &'static str) {
            if self.source.take().is_some() {
                debug!(event = "stream.released", stream_id = %self.stream_id, reason, "released stream reader");
            }
        }
    }

    let state = State {
        stream_id: uuid::Uuid::new_v4(),
        source: Some(Box::pin(source)),
        decoder: FrameDecoder::default(),
        pending: VecDeque::new(),
        signal,
    };
    debug!(event = "stream.opened", stream_id = %state.stream_id, "decoding event stream");

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if is_aborted(&state.signal) {
                state.pending.clear();
                state.release("aborted");
                return None;
            }
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            let Some(source) = state.source.as_mut() else {
                return None;
            };

            let read = tokio::select! {
                biased;
                () = wait_aborted(&mut state.signal) => Read::Aborted,
                next = source.next() => Read::Next(next),
            };

            match read {
                Read::Aborted => {
                    state.release("aborted");
                    return None;
                }
                Read::Next(Some(Ok(chunk))) => {
                    if state.decoder.push_bytes(&chunk, &mut state.pending) {
                        state.release("sentinel");
                    }
                }
                Read::Next(Some(Err(cause))) => {
                    state.release("read_failed");
                    if is_aborted(&state.signal) {
                        return None;
                    }
                    warn!(event = "stream.read_failed", stream_id = %state.stream_id, error = %cause, "event stream read failed");
                    state.pending.push_back(StreamEvent::Error { cause });
                }
                Read::Next(None) => {
                    state.release("closed");
                    state.decoder.finish(&mut state.pending);
                }
            }
        }
    })
    .fuse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::AbortHandle;
    use crate::fixture::{FixtureStream, event_stream_payload, fixture_words, split_bytes};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn decode_all(chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut decoder = FrameDecoder::default();
        let mut out = VecDeque::new();
        for chunk in chunks {
            decoder.push_bytes(chunk, &mut out);
        }
        decoder.finish(&mut out);
        out.into_iter().collect()
    }

    fn contents(events: &[StreamEvent]) -> Vec<Option<&str>> {
        events.iter().map(StreamEvent::content_delta).collect()
    }

    #[test]
    fn utf8_decoder_carries_split_multibyte_character() {
        let bytes = "é🚀".as_bytes();
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&bytes[..1]), "");
        assert_eq!(decoder.decode(&bytes[1..3]), "é");
        assert_eq!(decoder.decode(&bytes[3..5]), "");
        assert_eq!(decoder.decode(&bytes[5..]), "🚀");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn utf8_decoder_replaces_invalid_bytes_and_flushes_tail() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb\xe2\x82"), "a\u{FFFD}b");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[test]
    fn line_buffer_keeps_unterminated_tail() {
        let mut lines = LineBuffer::default();
        assert!(lines.push("data: {\"a\"").is_empty());
        assert_eq!(lines.push(":1}\n\ndata: x"), vec!["data: {\"a\":1}", ""]);
        assert_eq!(lines.take_remainder(), "data: x");
    }

    #[test]
    fn classify_line_recognizes_frame_kinds() {
        assert_eq!(classify_line(""), Frame::Ignored);
        assert_eq!(classify_line("   \r"), Frame::Ignored);
        assert_eq!(classify_line(": keep-alive"), Frame::Ignored);
        assert_eq!(classify_line("event: message"), Frame::Ignored);
        assert_eq!(classify_line("data: [DONE]\r"), Frame::Done);
        assert_eq!(classify_line("  data: {\"x\":1}  "), Frame::Data("{\"x\":1}"));
    }

    #[test]
    fn fixture_of_n_words_yields_n_content_chunks_then_stop_then_done() {
        let text = "Hello! I am Vault AI.";
        let payload = event_stream_payload(text);
        let events = decode_all(&[payload.as_bytes()]);
        let words = fixture_words(text);

        assert_eq!(events.len(), words.len() + 2);
        for (event, word) in events.iter().zip(&words) {
            assert_eq!(event.content_delta(), Some(*word));
        }
        let stop = &events[words.len()];
        assert_eq!(stop.content_delta(), None);
        assert_eq!(stop.finish_reason(), Some("stop"));
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[test]
    fn concatenated_deltas_reproduce_source_text() {
        for text in ["Hello! I am Vault AI.", "one", "spaced  out  text ", "Grüße, 世界 🚀"] {
            let payload = event_stream_payload(text);
            let rebuilt: String = decode_all(&[payload.as_bytes()])
                .iter()
                .filter_map(StreamEvent::content_delta)
                .collect();
            assert_eq!(rebuilt, text);
        }
    }

    #[test]
    fn arbitrary_split_points_produce_identical_events() {
        let payload = event_stream_payload("Grüße aus 東京 🚀 und mehr");
        let bytes = payload.as_bytes();
        let whole = decode_all(&[bytes]);

        for cut in 0..=bytes.len() {
            let (a, b) = bytes.split_at(cut);
            assert_eq!(decode_all(&[a, b]), whole, "split at byte {cut}");
        }
        for size in [1, 2, 3, 5, 7, 64] {
            let chunks = split_bytes(bytes, size);
            let refs: Vec<&[u8]> = chunks.iter().map(|c| c.as_ref()).collect();
            assert_eq!(decode_all(&refs), whole, "chunk size {size}");
        }
    }

    #[test]
    fn missing_sentinel_still_ends_with_done() {
        let events = decode_all(&[b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n"]);
        assert_eq!(contents(&events), vec![Some("hi"), None]);
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[test]
    fn unterminated_final_line_is_processed_at_close() {
        let events = decode_all(&[b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}"]);
        assert_eq!(contents(&events), vec![Some("tail"), None]);
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[test]
    fn malformed_frame_is_skipped() {
        let good = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n";
        let bad = "data: {\"choices\":[{\"delta\":\n\n";
        let events = decode_all(&[good.as_bytes(), bad.as_bytes(), good.as_bytes(), b"data: [DONE]\n\n"]);
        assert_eq!(contents(&events), vec![Some("a"), Some("a"), None]);
    }

    #[test]
    fn sentinel_discards_rest_of_buffer() {
        let input = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\ndata: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n";
        let events = decode_all(&[input.as_bytes()]);
        assert_eq!(contents(&events), vec![Some("a"), None]);
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn async_decoder_matches_sync_core_and_releases_source() {
        let payload = event_stream_payload("Hello! I am Vault AI.");
        let source = FixtureStream::from_payload(payload.as_bytes(), 3);
        let released = source.release_probe();

        let events: Vec<StreamEvent> = decode_event_stream(source, None).collect().await;
        assert_eq!(events, decode_all(&[payload.as_bytes()]));
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn sentinel_stops_reading_upstream() {
        let chunks = vec![
            Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n"),
            Bytes::from_static(b"data: [DONE]\n\n"),
            Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n"),
        ];
        let source = FixtureStream::new(chunks);
        let reads = source.read_probe();
        let released = source.release_probe();

        let events: Vec<StreamEvent> = decode_event_stream(source, None).collect().await;
        assert_eq!(contents(&events), vec![Some("a"), None]);
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        assert_eq!(reads.load(Ordering::SeqCst), 2);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn read_failure_becomes_single_error_event() {
        let source = FixtureStream::new(vec![Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
        )])
        .then_fail(ClientError::transport("connection reset"));
        let released = source.release_probe();

        let mut events = decode_event_stream(source, None);
        assert_eq!(
            events.next().await.and_then(|e| e.content_delta().map(ToOwned::to_owned)),
            Some("a".to_owned())
        );
        match events.next().await {
            Some(StreamEvent::Error { cause }) => {
                assert_eq!(cause.status_code, 0);
                assert_eq!(cause.message, "connection reset");
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn abort_while_suspended_ends_silently_and_releases_reader() {
        let source = FixtureStream::new(vec![Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
        )])
        .then_stall();
        let released = source.release_probe();
        let handle = AbortHandle::new();
        let mut events = decode_event_stream(source, Some(handle.signal()));

        let first = events.next().await.expect("first chunk");
        assert_eq!(first.content_delta(), Some("a"));
        assert!(!released.load(Ordering::SeqCst));

        let abort = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            abort.abort();
        });
        let next = tokio::time::timeout(Duration::from_secs(2), events.next())
            .await
            .expect("abort wakes the decoder");
        assert_eq!(next, None);
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn abort_discards_already_decoded_events() {
        let payload = event_stream_payload("several words in one read");
        let source = FixtureStream::new(vec![Bytes::from(payload)]);
        let released = source.release_probe();
        let handle = AbortHandle::new();
        let mut events = decode_event_stream(source, Some(handle.signal()));

        assert!(events.next().await.is_some());
        handle.abort();
        assert_eq!(events.next().await, None);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn concurrent_streams_do_not_share_buffers() {
        let first = event_stream_payload("the first panel");
        let second = event_stream_payload("ein zweites Fenster 🚀");
        let (a, b) = tokio::join!(
            collect_text(decode_event_stream(FixtureStream::from_payload(first.as_bytes(), 3), None)),
            collect_text(decode_event_stream(FixtureStream::from_payload(second.as_bytes(), 5), None)),
        );
        assert_eq!(a, "the first panel");
        assert_eq!(b, "ein zweites Fenster 🚀");
    }

    async fn collect_text(events: EventStream) -> String {
        events
            .filter_map(|event| async move { event.content_delta().map(ToOwned::to_owned) })
            .collect()
            .await
    }

    #[tokio::test]
    async fn dropping_the_event_stream_releases_reader() {
        let source = FixtureStream::new(Vec::new()).then_stall();
        let released = source.release_probe();
        let events = decode_event_stream(source, None);
        drop(events);
        assert!(released.load(Ordering::SeqCst));
    }
}
