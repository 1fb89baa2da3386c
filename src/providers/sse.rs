//! Incremental decoder for upstream Server-Sent-Events bodies.
//!
//! Network chunks do not line up with event boundaries (or even UTF-8 boundaries), so
//! bytes are buffered until a blank line terminates an event.

use super::ProviderError;
use async_stream::try_stream;
use futures::{Stream, StreamExt};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes and returns the `data` payload of every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(end) = find_event_end(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(data) = data_of(&event[..end]) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flushes a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        data_of(&rest)
    }
}

/// `data` payloads of a streamed response body, including a trailing unterminated
/// event. Fails if no bytes arrive for `idle`.
pub(crate) fn data_events(
    provider: &'static str,
    response: reqwest::Response,
    idle: Duration,
) -> impl Stream<Item = Result<String, ProviderError>> + Send + 'static {
    try_stream! {
        let mut bytes = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        loop {
            let next = tokio::time::timeout(idle, bytes.next())
                .await
                .map_err(|_| ProviderError::stalled(provider, idle))?;
            let chunk = match next {
                Some(chunk) => chunk.map_err(|e| ProviderError::from_reqwest(provider, e))?,
                None => break,
            };
            for data in decoder.push(&chunk) {
                yield data;
            }
        }
        if let Some(data) = decoder.finish() {
            yield data;
        }
    }
}

fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn data_of(event: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(event);
    let lines: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
