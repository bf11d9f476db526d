//! Server-sent event decoding for chat completion streams.
//!
//! The service answers with `data: {json}` events separated by blank lines
//! and finishes with `data: [DONE]`. Each event's delta may carry a text
//! fragment; events without text (role announcements, keep-alives) are
//! skipped so the resulting stream only yields non-empty chunks.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use crate::error::CompletionError;

const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Default, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// What one complete event means for the chunk stream.
#[derive(Debug, PartialEq)]
enum Decoded {
    Chunk(String),
    Skip,
    Done,
    Failed(CompletionError),
}

struct DecodeState<S> {
    bytes: S,
    buffer: Vec<u8>,
    finished: bool,
}

/// Turn a response body into a stream of text chunks.
///
/// Transport errors and error events end the stream with a single
/// `UnknownService` item; chunks yielded before that stay delivered.
pub fn chunk_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, CompletionError>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let state = DecodeState {
        bytes: byte_stream,
        buffer: Vec::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        loop {
            if let Some(event) = take_event(&mut state.buffer) {
                match decode_event(&event) {
                    Decoded::Chunk(text) => return Some((Ok(text), state)),
                    Decoded::Skip => continue,
                    Decoded::Done => return None,
                    Decoded::Failed(err) => {
                        state.finished = true;
                        return Some((Err(err), state));
                    }
                }
            }

            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
                }
                Some(Err(e)) => {
                    state.finished = true;
                    let err = CompletionError::UnknownService(format!("stream interrupted: {e}"));
                    return Some((Err(err), state));
                }
                None => {
                    // Flush an event the server did not terminate with a blank line
                    state.finished = true;
                    let rest = std::mem::take(&mut state.buffer);
                    return match decode_event(&String::from_utf8_lossy(&rest)) {
                        Decoded::Chunk(text) => Some((Ok(text), state)),
                        Decoded::Failed(err) => Some((Err(err), state)),
                        Decoded::Skip | Decoded::Done => None,
                    };
                }
            }
        }
    })
}

/// Remove the first complete event from the buffer.
fn take_event(buffer: &mut Vec<u8>) -> Option<String> {
    let end = buffer.windows(2).position(|w| w == b"\n\n")?;
    let event: Vec<u8> = buffer.drain(..end + 2).collect();
    Some(String::from_utf8_lossy(&event[..end]).into_owned())
}

fn decode_event(event: &str) -> Decoded {
    let data: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();
    if data.is_empty() {
        return Decoded::Skip;
    }
    let data = data.join("\n");
    let data = data.trim();
    if data == DONE_MARKER {
        return Decoded::Done;
    }

    let parsed: StreamEvent = match serde_json::from_str(data) {
        Ok(parsed) => parsed,
        Err(e) => {
            return Decoded::Failed(CompletionError::UnknownService(format!(
                "malformed stream event: {e}"
            )));
        }
    };

    if let Some(error) = parsed.error {
        let detail = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Decoded::Failed(CompletionError::UnknownService(detail));
    }

    match parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
    {
        Some(text) if !text.is_empty() => Decoded::Chunk(text),
        _ => Decoded::Skip,
    }
}
