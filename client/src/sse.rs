//! Server-sent-events change feed.
//!
//! Streams `/api/events`, turning every chunk's `event: change` frames into one
//! batch. A dropped connection is reported as `Disconnected` and retried with
//! capped exponential backoff; the subscriber keeps the last snapshot meanwhile.

use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use futures::StreamExt;
use globe_shared::{CHANGE_EVENT_NAME, ChangeNotice};
use reqwest::Url;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::{debug, warn};

use crate::error::SubscriptionError;
use crate::feed::{ChangeFeed, ChangeStream, FeedMessage};

const RECONNECT_BASE_MS: u64 = 500;
const RECONNECT_MAX_MS: u64 = 10_000;

pub fn reconnect_backoff_ms(consecutive_failures: u32) -> u64 {
    let exponent = consecutive_failures.saturating_sub(1).min(6);
    let factor = 1u64 << exponent;
    (RECONNECT_BASE_MS * factor).min(RECONNECT_MAX_MS)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// `\r\n`, `\r` and `\n` all end a line, also when a `\r\n` pair is split
/// across chunks.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: BytesMut,
    after_cr: bool,
}

impl SseParser {
    /// Append raw bytes and return every frame completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.reserve(chunk.len());
        for &byte in chunk {
            if std::mem::take(&mut self.after_cr) && byte == b'\n' {
                continue;
            }
            if byte == b'\r' {
                self.after_cr = true;
                self.buf.put_u8(b'\n');
            } else {
                self.buf.put_u8(byte);
            }
        }
        let mut frames = Vec::new();
        while let Some(end) = find_frame_end(&self.buf) {
            let raw = self.buf.split_to(end);
            self.buf.advance(2);
            if let Some(frame) = parse_frame(&raw) {
                frames.push(frame);
            }
        }
        frames
    }

    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}

fn find_frame_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_frame(raw: &[u8]) -> Option<SseFrame> {
    let text = String::from_utf8_lossy(raw);
    let mut event = None;
    let mut data: Option<String> = None;
    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => match &mut data {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }
    data.map(|data| SseFrame { event, data })
}

/// Keep only well-formed change notices.
pub fn change_notices(frames: &[SseFrame]) -> Vec<ChangeNotice> {
    frames
        .iter()
        .filter(|frame| frame.event.as_deref() == Some(CHANGE_EVENT_NAME))
        .filter_map(|frame| match serde_json::from_str::<ChangeNotice>(&frame.data) {
            Ok(notice) => Some(notice),
            Err(e) => {
                warn!(error = %e, "ignoring malformed change notice");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct SseFeed {
    client: reqwest::Client,
    url: Url,
}

impl SseFeed {
    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    /// Feed for `{base}/api/events`.
    pub fn for_base(base_url: &str) -> Result<Self, SubscriptionError> {
        let mut url =
            Url::parse(base_url).map_err(|e| SubscriptionError::Connect(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| SubscriptionError::Connect(format!("{base_url:?} cannot carry a path")))?
            .pop_if_empty()
            .extend(["api", "events"]);
        Ok(Self::new(url))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl ChangeFeed for SseFeed {
    fn connect(&self) -> ChangeStream {
        let client = self.client.clone();
        let url = self.url.clone();
        Box::pin(async_stream::stream! {
            let mut failures: u32 = 0;
            loop {
                let response = client
                    .get(url.clone())
                    .header(ACCEPT, "text/event-stream")
                    .header(CACHE_CONTROL, "no-cache")
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status);

                let error = match response {
                    Ok(response) => {
                        failures = 0;
                        debug!(%url, "change feed connected");
                        yield FeedMessage::Connected;

                        let mut parser = SseParser::default();
                        let mut body = response.bytes_stream();
                        loop {
                            match body.next().await {
                                Some(Ok(chunk)) => {
                                    let notices = change_notices(&parser.push(&chunk));
                                    if !notices.is_empty() {
                                        yield FeedMessage::Batch(notices);
                                    }
                                }
                                Some(Err(e)) => break SubscriptionError::Closed(e.to_string()),
                                None => break SubscriptionError::Closed("stream ended".to_string()),
                            }
                        }
                    }
                    Err(e) => SubscriptionError::Connect(e.to_string()),
                };

                failures = failures.saturating_add(1);
                yield FeedMessage::Disconnected(error);
                let backoff_ms = reconnect_backoff_ms(failures);
                debug!(attempt = failures, backoff_ms, "change feed reconnect scheduled");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::net::SocketAddr;

    use axum::Router;
    use axum::response::sse::{Event, Sse};
    use axum::routing::get;
    use futures::StreamExt;
    use globe_shared::{ChangeKind, ChangeNotice, Table};

    use super::{SseFeed, SseParser, change_notices, reconnect_backoff_ms};
    use crate::feed::{ChangeFeed, FeedMessage};

    #[test]
    fn backoff_doubles_up_to_cap() {
        assert_eq!(reconnect_backoff_ms(1), 500);
        assert_eq!(reconnect_backoff_ms(2), 1000);
        assert_eq!(reconnect_backoff_ms(5), 8000);
        assert_eq!(reconnect_backoff_ms(6), 10_000);
        assert_eq!(reconnect_backoff_ms(40), 10_000);
    }

    #[test]
    fn parser_handles_split_chunks_and_comments() {
        let mut parser = SseParser::default();
        assert!(parser.push(b": keep-alive\n\nevent: cha").is_empty());
        let frames = parser.push(
            b"nge\r\ndata: {\"seq\":1,\"table\":\"locations\",\"kind\":\"insert\",\"timestamp\":\"t\"}\r\n\r\n",
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("change"));
        assert_eq!(parser.pending_bytes(), 0);

        let notices = change_notices(&frames);
        assert_eq!(
            notices,
            vec![ChangeNotice {
                seq: 1,
                table: Table::Locations,
                kind: ChangeKind::Insert,
                timestamp: "t".to_string(),
            }]
        );
    }

    #[test]
    fn other_events_and_bad_json_are_skipped() {
        let mut parser = SseParser::default();
        let frames = parser.push(b"event: ping\ndata: {}\n\nevent: change\ndata: nope\n\n");
        assert_eq!(frames.len(), 2);
        assert!(change_notices(&frames).is_empty());
    }

    #[test]
    fn lone_carriage_returns_end_lines() {
        let mut parser = SseParser::default();
        let frames = parser.push(b"event: change\rdata: a\rdata: b\r\r");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("change"));
        assert_eq!(frames[0].data, "a\nb");

        // A CRLF pair split across chunks is a single line break.
        assert!(parser.push(b"data: c\r").is_empty());
        assert!(parser.push(b"\n").is_empty());
        let frames = parser.push(b"\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "c");
        assert_eq!(parser.pending_bytes(), 0);
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut parser = SseParser::default();
        let frames = parser.push(b"data: a\ndata: b\n\n");
        assert_eq!(frames[0].data, "a\nb");
        assert_eq!(frames[0].event, None);
    }

    async fn spawn_test_server(app: Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test app");
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn streams_change_batches_then_reports_disconnect() {
        let app = Router::new().route(
            "/api/events",
            get(|| async {
                let notice = ChangeNotice {
                    seq: 7,
                    table: Table::Profiles,
                    kind: ChangeKind::Update,
                    timestamp: "2026-01-01T00:00:00Z".to_string(),
                };
                let event = Event::default()
                    .event("change")
                    .json_data(&notice)
                    .expect("serialize notice");
                Sse::new(futures::stream::iter([Ok::<_, Infallible>(event)]))
            }),
        );
        let (addr, server_handle) = spawn_test_server(app).await;

        let feed = SseFeed::for_base(&format!("http://{addr}")).expect("feed url");
        assert_eq!(feed.url().path(), "/api/events");
        let mut stream = feed.connect();

        assert_eq!(stream.next().await, Some(FeedMessage::Connected));
        match stream.next().await {
            Some(FeedMessage::Batch(notices)) => {
                assert_eq!(notices.len(), 1);
                assert_eq!(notices[0].seq, 7);
            }
            other => panic!("expected a batch, got {other:?}"),
        }
        assert!(matches!(
            stream.next().await,
            Some(FeedMessage::Disconnected(_))
        ));

        server_handle.abort();
        let _ = server_handle.await;
    }
}
