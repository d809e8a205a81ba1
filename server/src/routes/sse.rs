use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use bytes::Bytes;
use chrono::Utc;
use futures::stream::Stream;
use globe_shared::{CHANGE_EVENT_NAME, ChangeKind, ChangeNotice, Table};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::config::SSE_KEEPALIVE_SECS;
use crate::state::AppState;

pub async fn change_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = async_stream::stream! {
        let mut stream = BroadcastStream::new(rx);

        while let Some(result) = stream.next().await {
            match result {
                Ok(notice) => {
                    let Some(payload) = event_payload(notice.json.as_ref()) else {
                        warn!(
                            seq = notice.seq,
                            "notice payload is not valid utf-8; dropping SSE event"
                        );
                        continue;
                    };
                    yield Ok(
                        Event::default()
                            .id(notice.seq.to_string())
                            .event(CHANGE_EVENT_NAME)
                            .data(payload),
                    );
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    state.observability.record_lagged_client();
                    warn!(
                        skipped_events = skipped,
                        "SSE client lagged behind broadcast buffer; sending resync notice"
                    );
                    // Notices carry no rows, so one synthetic change is enough
                    // to make the client reload everything it missed.
                    let seq = state.current_seq();
                    let resync = ChangeNotice {
                        seq,
                        table: Table::Locations,
                        kind: ChangeKind::Update,
                        timestamp: Utc::now().to_rfc3339(),
                    };
                    match serde_json::to_string(&resync) {
                        Ok(payload) => yield Ok(
                            Event::default()
                                .id(seq.to_string())
                                .event(CHANGE_EVENT_NAME)
                                .data(payload),
                        ),
                        Err(e) => warn!(error = %e, "failed to serialize resync notice"),
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEPALIVE_SECS))
            .text("keep-alive"),
    )
}

fn event_payload(bytes: &Bytes) -> Option<&str> {
    std::str::from_utf8(bytes.as_ref()).ok()
}
