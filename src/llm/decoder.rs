//! Decoder for the line-delimited streaming response body
//!
//! The body is a sequence of newline-separated lines. Lines starting with
//! `data: ` carry either the `[DONE]` sentinel or a JSON chunk whose
//! `choices[0].delta.content` holds the next piece of assistant text. Every
//! other line is ignored.
//!
//! Chunks from the transport are not aligned to lines, so the decoder keeps
//! the trailing partial line (as raw bytes, since a chunk may also split a
//! UTF-8 sequence) until the rest of it arrives.

use crate::Result;
use async_stream::stream;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::{trace, warn};

/// Marker every payload line starts with
pub const DATA_PREFIX: &str = "data: ";

/// Payload marking the end of the stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded protocol event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// Next fragment of assistant text (may be empty)
    Delta(String),
    /// End of the stream; nothing follows
    End,
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

impl ChunkPayload {
    fn into_content(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .unwrap_or_default()
    }
}

/// Incremental decoder turning raw body chunks into [`StreamEvent`]s
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Bytes of the current, not yet terminated line
    pending: Vec<u8>,

    /// Set once `End` has been produced
    finished: bool,

    /// Number of lines skipped because they could not be parsed
    skipped: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk, returning the events of every line it completes
    ///
    /// Once `End` has been returned, further input is ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let frame = decode_line(&self.pending[start..end]);
            start = end + 1;

            match frame {
                Frame::Event(StreamEvent::End) => {
                    events.push(StreamEvent::End);
                    self.finish_now();
                    return events;
                }
                Frame::Event(event) => events.push(event),
                Frame::Malformed => self.skipped += 1,
                Frame::Ignored => {}
            }
        }
        self.pending.drain(..start);

        events
    }

    /// Signal end of input
    ///
    /// A non-empty unterminated last line is decoded as if it were complete,
    /// then `End` is produced (unless it already was).
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = Vec::new();
        let rest = std::mem::take(&mut self.pending);
        match decode_line(&rest) {
            Frame::Event(StreamEvent::Delta(text)) => events.push(StreamEvent::Delta(text)),
            Frame::Malformed => self.skipped += 1,
            _ => {}
        }
        events.push(StreamEvent::End);
        self.finish_now();
        events
    }

    /// Whether `End` has been produced
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of malformed lines skipped so far
    pub fn skipped_lines(&self) -> usize {
        self.skipped
    }

    fn finish_now(&mut self) {
        self.finished = true;
        self.pending.clear();
    }
}

/// Outcome of decoding one complete line
enum Frame {
    Event(StreamEvent),
    Ignored,
    Malformed,
}

fn decode_line(raw: &[u8]) -> Frame {
    let line = String::from_utf8_lossy(raw);
    let line = line.strip_suffix('\r').unwrap_or(&line);
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::Ignored;
    };

    trace!("Stream frame: {:?}", payload);

    if payload == DONE_SENTINEL {
        return Frame::Event(StreamEvent::End);
    }

    match serde_json::from_str::<ChunkPayload>(payload) {
        Ok(chunk) => {
            if let Some(error) = &chunk.error {
                warn!("Skipping API error frame: {}", error);
                return Frame::Ignored;
            }
            Frame::Event(StreamEvent::Delta(chunk.into_content()))
        }
        Err(e) => {
            warn!("Skipping malformed stream frame: {}, data: {}", e, payload);
            Frame::Malformed
        }
    }
}

/// Decode a chunk stream lazily into an ordered event stream
///
/// The returned stream always ends with `StreamEvent::End` unless the source
/// yields an error, which is passed through as the final item.
pub fn decode_stream<S>(source: S) -> impl Stream<Item = Result<StreamEvent>> + Send
where
    S: Stream<Item = Result<Vec<u8>>> + Send,
{
    stream! {
        let mut decoder = StreamDecoder::new();
        let mut source = Box::pin(source);

        while let Some(chunk) = source.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in decoder.feed(&bytes) {
                        yield Ok(event);
                    }
                    if decoder.is_finished() {
                        return;
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        for event in decoder.finish() {
            yield Ok(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EcoWiseError;

    fn frame(content: &str) -> String {
        format!(
            "data: {}\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    fn deltas(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Delta(text) => Some(text.clone()),
                StreamEvent::End => None,
            })
            .collect()
    }

    fn decode_all(chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.feed(chunk));
        }
        events.extend(decoder.finish());
        events
    }

    #[test]
    fn test_two_chunks_with_done() {
        let first = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n";
        let second = "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\ndata: [DONE]\n";

        let mut decoder = StreamDecoder::new();
        let mut events = decoder.feed(first.as_bytes());
        assert_eq!(events, vec![StreamEvent::Delta("Hi".into())]);

        events = decoder.feed(second.as_bytes());
        assert_eq!(
            events,
            vec![StreamEvent::Delta(" there".into()), StreamEvent::End]
        );
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_partial_line_is_buffered() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.feed(b"data: {\"choices\":[{\"del").is_empty());
        assert!(decoder.feed(b"ta\":{\"content\":\"ok\"}}]}").is_empty());
        assert_eq!(decoder.feed(b"\n"), vec![StreamEvent::Delta("ok".into())]);
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        let body = format!(
            "{}{}: keep-alive\n\n{}data: [DONE]\n",
            frame("Reusable "),
            frame("bags ♻ save "),
            frame("plastic.")
        );
        let bytes = body.as_bytes();
        let whole = decode_all(&[bytes]);

        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(decode_all(&[a, b]), whole, "split at {}", split);
        }

        let single_bytes: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_all(&single_bytes), whole);
        assert_eq!(deltas(&whole).concat(), "Reusable bags ♻ save plastic.");
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let with_bad = format!("data: {{not json}}\n{}data: [DONE]\n", frame("ok"));
        let without_bad = format!("{}data: [DONE]\n", frame("ok"));

        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(with_bad.as_bytes());
        assert_eq!(decoder.skipped_lines(), 1);
        assert_eq!(events, decode_all(&[without_bad.as_bytes()]));
        assert_eq!(deltas(&events).concat(), "ok");
    }

    #[test]
    fn test_nothing_after_done() {
        let body = format!("{}data: [DONE]\n{}", frame("a"), frame("b"));
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(body.as_bytes());
        assert_eq!(events, vec![StreamEvent::Delta("a".into()), StreamEvent::End]);
        assert!(decoder.feed(frame("c").as_bytes()).is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_end_of_input_terminates() {
        let mut decoder = StreamDecoder::new();
        let mut events = decoder.feed(frame("x").as_bytes());
        events.extend(decoder.finish());
        assert_eq!(events, vec![StreamEvent::Delta("x".into()), StreamEvent::End]);
    }

    #[test]
    fn test_unterminated_last_line() {
        let body = frame("tail");
        let events = decode_all(&[body.trim_end().as_bytes()]);
        assert_eq!(events, vec![StreamEvent::Delta("tail".into()), StreamEvent::End]);
    }

    #[test]
    fn test_missing_content_defaults_to_empty() {
        let events = decode_all(&[
            b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
            b"data: {\"choices\":[]}\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":null}}]}\n",
        ]);
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta(String::new()),
                StreamEvent::Delta(String::new()),
                StreamEvent::Delta(String::new()),
                StreamEvent::End,
            ]
        );
    }

    #[test]
    fn test_other_lines_ignored() {
        let events = decode_all(&[
            b": OPENROUTER PROCESSING\r\n",
            b"event: ping\n",
            b"\n",
            b"data:{\"choices\":[]}\n",
        ]);
        assert_eq!(events, vec![StreamEvent::End]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let events = decode_all(&[b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\r\ndata: [DONE]\r\n"]);
        assert_eq!(events, vec![StreamEvent::Delta("a".into()), StreamEvent::End]);
    }

    #[test]
    fn test_error_frame_is_skipped() {
        let events = decode_all(&[
            b"data: {\"error\":{\"message\":\"rate limited\"}}\n",
            frame("after").as_bytes(),
        ]);
        assert_eq!(events, vec![StreamEvent::Delta("after".into()), StreamEvent::End]);
    }

    #[tokio::test]
    async fn test_decode_stream_preserves_order() {
        let chunks = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n".to_vec()),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\ndata: [DONE]\n".to_vec()),
            Ok(frame("ignored").into_bytes()),
        ];
        let events: Vec<_> = decode_stream(futures::stream::iter(chunks))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|e| e.unwrap())
            .collect();

        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("Hi".into()),
                StreamEvent::Delta(" there".into()),
                StreamEvent::End,
            ]
        );
    }

    #[tokio::test]
    async fn test_decode_stream_passes_source_error() {
        let chunks = vec![
            Ok(frame("partial").into_bytes()),
            Err(EcoWiseError::Stream("connection reset".into())),
            Ok(frame("never").into_bytes()),
        ];
        let items: Vec<_> = decode_stream(futures::stream::iter(chunks)).collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &StreamEvent::Delta("partial".into()));
        assert!(matches!(items[1], Err(EcoWiseError::Stream(_))));
    }
}
