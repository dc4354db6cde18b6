//! Splitting streamed response bodies into frames.
//!
//! Two framings are used by the backend: server-sent events for push
//! transports and newline-delimited JSON for plain request transports. Both
//! produce the raw frame payload as a `String`; parsing is left to the
//! consumer so malformed frames can be skipped without ending the stream.

use std::collections::VecDeque;

use futures::stream::{self, BoxStream, Stream, StreamExt};

use super::{ApiError, ApiResult};

/// A stream of raw frame payloads.
pub type FrameStream = BoxStream<'static, ApiResult<String>>;

/// Incremental decoder turning body chunks into frame payloads.
pub trait FrameDecoder: Send + 'static {
    /// Feed a chunk, returning every frame completed by it.
    fn push(&mut self, chunk: &[u8]) -> Vec<String>;

    /// Flush whatever is left once the body has ended.
    fn finish(&mut self) -> Vec<String>;
}

/// Position of the first occurrence of `needle` in `haystack`.
fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Server-sent events: events are separated by a blank line, payload lines
/// start with `data:`.
///
/// Bytes are buffered until an event is complete so a multi-byte character
/// split across chunks decodes intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn take_event(event: &[u8]) -> Option<String> {
        let event = String::from_utf8_lossy(event);
        let data: Vec<&str> = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|data| data.strip_prefix(' ').unwrap_or(data))
            .collect();

        if data.is_empty() {
            return None;
        }

        let payload = data.join("\n");
        if payload == "[DONE]" {
            return None;
        }
        Some(payload)
    }
}

impl FrameDecoder for SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // A bare CR never appears unescaped inside a JSON payload.
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut frames = Vec::new();
        while let Some(event_end) = find_bytes(&self.buffer, b"\n\n") {
            let event: Vec<u8> = self.buffer.drain(..event_end + 2).collect();
            frames.extend(Self::take_event(&event[..event_end]));
        }
        frames
    }

    fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        Self::take_event(&rest).into_iter().collect()
    }
}

/// Newline-delimited JSON: one frame per non-empty line.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    fn take_line(line: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        (!line.is_empty()).then(|| line.to_string())
    }
}

impl FrameDecoder for LineDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            frames.extend(Self::take_line(&line[..line_end]));
        }
        frames
    }

    fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        Self::take_line(&rest).into_iter().collect()
    }
}

struct DecodeState<S, D> {
    body: S,
    decoder: D,
    pending: VecDeque<String>,
    done: bool,
}

/// Decode a chunked body into a [`FrameStream`].
///
/// A body error is yielded once as `Err` and ends the stream.
pub fn decode_frames<S, B, E, D>(body: S, decoder: D) -> FrameStream
where
    S: Stream<Item = Result<B, E>> + Unpin + Send + 'static,
    B: AsRef<[u8]>,
    E: Into<ApiError>,
    D: FrameDecoder,
{
    let state = DecodeState {
        body,
        decoder,
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.done {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.decoder.push(chunk.as_ref());
                    state.pending.extend(frames);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.done = true;
                    let frames = state.decoder.finish();
                    state.pending.extend(frames);
                }
            }
        }
    })
    .boxed()
}
