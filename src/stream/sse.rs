//! `text/event-stream` framing and the HTTP transport built on it.

use std::future::Future;
use std::io;

use bytes::{Buf, BytesMut};
use futures_util::TryStreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;
use tracing::info;

use super::{EventStream, EventTransport, ServerEvent, SubscriptionKey};
use crate::api::ApiClient;
use crate::{Result, TrackerError};

/// Longest line accepted before the stream is considered corrupt.
const MAX_LINE_BYTES: usize = 1 << 20;

/// Decodes server-sent events from a byte stream.
///
/// Handles `event:`, `data:` and `id:` fields, `:` comment lines, and
/// both `\n` and `\r\n` line endings. Multiple `data:` lines in one frame
/// are joined with `\n`. A frame is dispatched on a blank line if it has
/// data or an explicit event name.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: Option<String>,
    id: Option<String>,
}

impl SseDecoder {
    fn take_event(&mut self) -> Option<ServerEvent> {
        let event = self.event.take();
        let data = self.data.take();
        let id = self.id.take();
        if event.is_none() && data.is_none() {
            return None;
        }
        Some(ServerEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: data.unwrap_or_default(),
            id,
        })
    }

    fn apply_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "id" => self.id = Some(value.to_string()),
            // `retry` and unknown fields are ignored.
            _ => {}
        }
    }
}

impl Decoder for SseDecoder {
    type Item = ServerEvent;
    type Error = TrackerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ServerEvent>> {
        loop {
            let Some(newline) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE_BYTES {
                    return Err(TrackerError::Stream(format!(
                        "event stream line exceeds {MAX_LINE_BYTES} bytes"
                    )));
                }
                return Ok(None);
            };

            let raw = src.split_to(newline + 1);
            let line = std::str::from_utf8(&raw[..newline])
                .map_err(|e| TrackerError::Stream(format!("event stream is not utf-8: {e}")))?;
            let line = line.strip_suffix('\r').unwrap_or(line);

            if line.is_empty() {
                if let Some(event) = self.take_event() {
                    return Ok(Some(event));
                }
            } else {
                self.apply_line(line);
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<ServerEvent>> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        if src.has_remaining() {
            let rest = src.split_to(src.len());
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.apply_line(line.strip_suffix('\r').unwrap_or(&line));
        }
        Ok(self.take_event())
    }
}

/// Opens `GET {base}/prices/stream[?items=..]` as an event stream.
#[derive(Debug, Clone)]
pub struct HttpEventSource {
    client: ApiClient,
}

impl HttpEventSource {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Stream URL for a subscription key.
    pub fn endpoint(&self, key: &SubscriptionKey) -> String {
        stream_endpoint(self.client.base_url(), key)
    }
}

fn stream_endpoint(base_url: &str, key: &SubscriptionKey) -> String {
    match key.query_value() {
        Some(ids) => format!("{base_url}/prices/stream?items={ids}"),
        None => format!("{base_url}/prices/stream"),
    }
}

impl EventTransport for HttpEventSource {
    fn open(&self, key: &SubscriptionKey) -> impl Future<Output = Result<EventStream>> + Send {
        let url = self.endpoint(key);
        let request = self
            .client
            .http()
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        async move {
            let response = request.send().await?.error_for_status()?;
            info!(url = %url, status = %response.status(), "Event stream accepted");

            let body = response.bytes_stream().map_err(io::Error::other);
            let events = FramedRead::new(StreamReader::new(body), SseDecoder::default());
            Ok(Box::pin(events) as EventStream)
        }
    }
}
