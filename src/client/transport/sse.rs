//! Server-sent events framing shared by the HTTP transports.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;

use crate::{Error, Result};

const COMPACT_THRESHOLD: usize = 8192;

/// One SSE event: the optional `event:` name and the joined `data:` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

pin_project! {
    /// Splits a byte stream into SSE events. Comments, pings and the
    /// `[DONE]` sentinel are skipped.
    pub struct SseParser<S> {
        #[pin]
        inner: S,
        buffer: Vec<u8>,
        pos: usize,
    }
}

impl<S> SseParser<S>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>>,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(4096),
            pos: 0,
        }
    }
}

/// Position and length of the next event delimiter (`\n\n` or `\r\n\r\n`).
fn find_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n");
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) if b < a => Some((b, 4)),
        (Some(a), _) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

pub(crate) fn parse_event(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(name) = line.strip_prefix("event:") {
            event = Some(name.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    let data = data.join("\n");
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" || event.as_deref() == Some("ping") {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.to_string(),
    })
}

impl<S> Stream for SseParser<S>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>>,
{
    type Item = Result<SseEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some((rel, len)) = find_delimiter(&this.buffer[*this.pos..]) {
                let start = *this.pos;
                let end = start + rel;
                let parsed = match std::str::from_utf8(&this.buffer[start..end]) {
                    Ok(block) => parse_event(block),
                    Err(e) => {
                        return Poll::Ready(Some(Err(Error::Stream(format!(
                            "invalid UTF-8 in event: {}",
                            e
                        )))));
                    }
                };
                *this.pos = end + len;

                if this.buffer.len() > COMPACT_THRESHOLD && *this.pos > this.buffer.len() / 2 {
                    this.buffer.drain(..*this.pos);
                    *this.pos = 0;
                }

                if let Some(event) = parsed {
                    return Poll::Ready(Some(Ok(event)));
                }
                continue;
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    if *this.pos > 0 && this.buffer.len() + bytes.len() > COMPACT_THRESHOLD * 2 {
                        this.buffer.drain(..*this.pos);
                        *this.pos = 0;
                    }
                    this.buffer.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(Error::Network(e))));
                }
                Poll::Ready(None) => {
                    let rest = std::mem::take(this.buffer);
                    let start = std::mem::take(this.pos);
                    let event = std::str::from_utf8(&rest[start.min(rest.len())..])
                        .ok()
                        .and_then(parse_event);
                    return Poll::Ready(event.map(Ok));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
