//! SSE boundary: attaches a client connection to a job's event broker.

use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tracing::warn;
use uuid::Uuid;

use recon_core::EventFrame;
use recon_model::ScanId;

use crate::errors::AppError;
use crate::state::AppState;

/// Stream a job's progress events until `done` or client disconnect.
///
/// Replays the last known status/stats snapshot first, then live events.
/// A reconnecting client re-fetches the job and resubscribes; the gap in
/// log lines between disconnect and reconnect is accepted.
pub async fn stream_scan_events(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    let id = ScanId(scan_id);
    let (replay, receiver) = state.service().subscribe(&id).await?;
    let service = state.service().clone();

    let stream = async_stream::stream! {
        let mut last_sequence = 0u64;
        for frame in replay {
            if frame.sequence <= last_sequence {
                continue;
            }
            last_sequence = frame.sequence;
            let done = frame.event.is_done();
            if let Some(event) = frame_to_event(&frame) {
                yield Ok::<Event, Infallible>(event);
            }
            if done {
                return;
            }
        }

        let mut live = BroadcastStream::new(receiver);
        while let Some(item) = live.next().await {
            match item {
                Ok(frame) => {
                    if frame.sequence <= last_sequence {
                        continue;
                    }
                    last_sequence = frame.sequence;
                    let done = frame.event.is_done();
                    if let Some(event) = frame_to_event(&frame) {
                        yield Ok::<Event, Infallible>(event);
                    }
                    if done {
                        return;
                    }
                }
                Err(err) => {
                    // Slow consumer: oldest log frames were dropped for
                    // this subscriber. Log lines are lost, but the latest
                    // status/stats snapshot is re-sent so state-bearing
                    // frames survive the gap.
                    warn!("scan stream lagged: {err}");
                    if let Ok((snapshot, _)) = service.subscribe(&id).await {
                        for frame in snapshot {
                            if frame.sequence <= last_sequence {
                                continue;
                            }
                            last_sequence = frame.sequence;
                            let done = frame.event.is_done();
                            if let Some(event) = frame_to_event(&frame) {
                                yield Ok::<Event, Infallible>(event);
                            }
                            if done {
                                return;
                            }
                        }
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(default_keep_alive()))
}

fn frame_to_event(frame: &EventFrame) -> Option<Event> {
    match serde_json::to_string(&frame.event) {
        Ok(data) => Some(Event::default().id(frame.sequence.to_string()).data(data)),
        Err(err) => {
            warn!("failed to serialize progress event: {err}");
            None
        }
    }
}

fn default_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keep-alive")
}
