//! Live viewer connections.
//!
//! A viewer gets one `init-leaderboard` frame on connect and then every `new-tip` and
//! `leaderboard-update` the broadcaster publishes, as JSON text frames. Anything the viewer sends
//! is ignored apart from close frames.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::extract::ws::{Message, WebSocket};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tracing::{Instrument, instrument};

use crate::api::server::AppState;
use crate::broadcast::ViewerEvent;

#[derive(Debug, Error)]
enum SocketErr {
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Send(#[from] axum::Error),

    #[error("socket write exceeded {0:?}")]
    Timeout(Duration),
}

#[instrument(skip(ws, state))]
pub async fn viewer_socket(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| serve_viewer(socket, state))
}

async fn serve_viewer(socket: WebSocket, state: Arc<AppState>) {
    // registered before the snapshot is read so that no update between the two is lost
    let mut handle = state.registry.register();
    let span = tracing::info_span!("viewer", subscription = %handle.id());

    async move {
        tracing::info!("viewer connected");
        let send_timeout = state.settings.send_timeout;
        let (mut sink, mut stream) = socket.split();

        let init = match state
            .query
            .top_tippers(state.settings.leaderboard_size)
            .await
        {
            Ok(top) => ViewerEvent::InitLeaderboard(top),
            Err(e) => {
                tracing::error!(error = %e, "unable to read bootstrap leaderboard");
                return;
            }
        };

        if let Err(e) = send_event(&mut sink, &init, send_timeout).await {
            tracing::info!(error = %e, "viewer dropped during bootstrap");
            return;
        }

        loop {
            tokio::select! {
                event = handle.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = send_event(&mut sink, &event, send_timeout).await {
                        tracing::info!(error = %e, "disconnecting viewer");
                        break;
                    }
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }

        tracing::info!("viewer disconnected");
        // dropping the handle unregisters the viewer
        drop(handle);
    }
    .instrument(span)
    .await
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &ViewerEvent,
    send_timeout: Duration,
) -> Result<(), SocketErr> {
    let frame = serde_json::to_string(event)?;

    tokio::time::timeout(send_timeout, sink.send(Message::Text(frame.into())))
        .await
        .map_err(|_| SocketErr::Timeout(send_timeout))??;

    Ok(())
}
