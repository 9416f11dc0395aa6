//! WebSocket handler for local clients.
//!
//! Responsibilities:
//! - Upgrade HTTP -> WS on `/doom` (game) and `/meta` (control UI)
//! - Attach a local session to the relay and pump its outbound queue
//! - Lifecycle: heartbeat ping, close on socket error
//! - Decode-once, then hand control text or gameplay frames to the relay

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, State},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{Duration, MissedTickBehavior};
use tracing::Instrument;

use doommesh_core::error::Result;

use crate::app_state::AppState;
use crate::realtime::ClientKind;
use crate::transport::codec::{decode, Inbound};

pub async fn doom_upgrade(State(app): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(app, ws, ClientKind::Game)
}

pub async fn meta_upgrade(State(app): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(app, ws, ClientKind::Meta)
}

fn upgrade(app: AppState, ws: WebSocketUpgrade, kind: ClientKind) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = run_session(app, kind, socket).await {
            tracing::debug!(kind = kind.as_str(), error = %e, "local session ended");
        }
    })
}

async fn run_session(app: AppState, kind: ClientKind, socket: WebSocket) -> Result<()> {
    let cfg = &app.cfg().relay;
    let mut session = app.relay().attach(kind, cfg.client_queue).await?;
    let span = tracing::info_span!("local", client = session.id(), kind = kind.as_str());

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut ping_tick = tokio::time::interval(Duration::from_millis(cfg.ping_interval_ms));
    ping_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    async move {
        loop {
            tokio::select! {
                // outbound writer
                out = session.recv() => {
                    let Some(m) = out else { break };
                    if ws_tx.send(m.to_ws_message()).await.is_err() {
                        break;
                    }
                }

                // inbound reader
                incoming = ws_rx.next() => {
                    let Some(Ok(msg)) = incoming else { break };
                    match decode(msg) {
                        Ok(Inbound::Control(text)) => session.send_text(text).await?,
                        Ok(Inbound::Frame(frame)) => {
                            if kind == ClientKind::Meta {
                                tracing::debug!("binary frame on control socket ignored");
                                continue;
                            }
                            session.send_game_frame(frame).await?;
                        }
                        Ok(Inbound::Ping(payload)) => {
                            if ws_tx.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Ok(Inbound::Pong) => {}
                        Ok(Inbound::Close) => break,
                        Err(e) => {
                            let code = e.drop_code();
                            tracing::debug!(reason = %e, code = code.as_str(), "local frame dropped");
                            app.metrics().drops.inc(&[("code", code.as_str())]);
                        }
                    }
                }

                // heartbeat
                _ = ping_tick.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
    .instrument(span)
    .await
}
