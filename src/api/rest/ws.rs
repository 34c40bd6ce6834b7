use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::assignment::{Assignment, AssignmentEvent};
use crate::state::AppState;

/// `?journey_id=` narrows the feed to one journey.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct FeedFilter {
    pub journey_id: Option<Uuid>,
}

impl FeedFilter {
    fn admits(&self, assignment: &Assignment) -> bool {
        self.journey_id.is_none_or(|id| assignment.journey_id == id)
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    /// Current assignments, sent once right after the upgrade.
    Snapshot { assignments: Vec<Assignment> },
    Change(AssignmentEvent),
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(filter): Query<FeedFilter>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, filter))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, filter: FeedFilter) {
    let (mut sender, mut receiver) = socket.split();
    // Subscribe before reading the snapshot so no change falls in between.
    let mut events = BroadcastStream::new(state.assignment_events_tx.subscribe());

    let assignments: Vec<Assignment> = match state.store.assignments().await {
        Ok(all) => all.into_iter().filter(|a| filter.admits(a)).collect(),
        Err(err) => {
            warn!(error = %err, "assignment snapshot unavailable; closing feed");
            return;
        }
    };
    let snapshot_len = assignments.len();
    if send_frame(&mut sender, &Frame::Snapshot { assignments }).await.is_err() {
        return;
    }

    info!(journey_id = ?filter.journey_id, snapshot_len, "assignment feed client connected");

    let send_task = tokio::spawn(async move {
        while let Some(next) = events.next().await {
            let event = match next {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "assignment feed client lagging; events dropped");
                    continue;
                }
            };
            if !filter.admits(&event.assignment) {
                continue;
            }
            if send_frame(&mut sender, &Frame::Change(event)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("assignment feed client disconnected");
}

/// Errors only when the socket is gone; unserializable frames are logged and dropped.
async fn send_frame<S>(sender: &mut S, frame: &Frame) -> Result<(), S::Error>
where
    S: SinkExt<Message> + Unpin,
{
    match serde_json::to_string(frame) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(err) => {
            warn!(error = %err, "failed to serialize assignment feed frame");
            Ok(())
        }
    }
}
