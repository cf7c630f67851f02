//! Per-connection controller (spec component C7).
//!
//! Each accepted WebSocket owns one controller loop, one reader task,
//! and — while streaming — one streamer task. The controller is the
//! only place that touches connection-level state; the reader and
//! streamer tasks only ever talk to it through a channel or through the
//! session they share.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Extension, State, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;
use tunnel_task::ShutdownHandle;

use crate::claims::Claims;
use crate::event::ServerEvent;
use crate::http::CloseReason;
use crate::session::Session;
use crate::state::AppState;
use crate::ws::{self, TransportError};

pub async fn handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_connection(state, claims, socket))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Idle,
    Streaming,
}

async fn run_connection(state: AppState, claims: Claims, socket: WebSocket) {
    let conf = state.conf.get_conf();
    let (sink, mut stream) = socket.split();
    let sink = Arc::new(Mutex::new(sink));

    let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();
    let mut app_shutdown = state.shutdown.clone();
    let (client_tx, mut client_rx) = mpsc::channel::<Result<crate::event::ClientEvent, TransportError>>(32);

    let reader = tunnel_task::ChildTask::spawn(async move {
        let mut signal = shutdown_signal;
        loop {
            let outcome = tokio::select! {
                () = signal.wait() => break,
                outcome = ws::read_client_event(&mut stream) => outcome,
            };
            let is_fatal = outcome.is_err();
            if client_tx.send(outcome).await.is_err() || is_fatal {
                break;
            }
        }
    });

    let mut conn_state = ConnState::Idle;
    let mut session: Option<Arc<Session>> = None;
    let mut streamer: Option<tokio::task::JoinHandle<()>> = None;
    let cancel_notify = Arc::new(Notify::new());

    let mut heartbeat = tokio::time::interval(conf.heartbeat_interval());
    heartbeat.tick().await; // first tick fires immediately; consume it up front
    let mut idle_deadline = Instant::now() + conf.idle_timeout();

    let close_reason = loop {
        let idle_sleep = tokio::time::sleep_until(idle_deadline);
        tokio::pin!(idle_sleep);

        tokio::select! {
            () = app_shutdown.wait() => break CloseReason::Normal,

            _ = heartbeat.tick() => {
                if ws::write_ping(&mut *sink.lock().await).await.is_err() {
                    break CloseReason::InternalError;
                }
            }

            () = &mut idle_sleep, if conn_state == ConnState::Idle => {
                break CloseReason::IdleTimeout;
            }

            () = cancel_notify.notified() => {
                break CloseReason::Normal;
            }

            res = async { streamer.as_mut().expect("guarded by is_some()").await }, if streamer.is_some() => {
                streamer = None;
                // A pre-empted session's streamer always exits via
                // `Session::consume` returning `None` around the same
                // time `cancel_notify` fires; the two wakeups race, so
                // the flag — not which `select!` arm won — decides.
                if session.as_ref().is_some_and(|s| s.was_preempted()) {
                    break CloseReason::Normal;
                }
                if res.is_err() {
                    tracing::debug!("streamer task panicked");
                }
                break CloseReason::InternalError;
            }

            maybe = client_rx.recv() => {
                match maybe {
                    None => break CloseReason::InternalError,
                    Some(Err(err)) if err.is_closed() => break CloseReason::Normal,
                    Some(Err(TransportError::MalformedPayload(_))) => break CloseReason::InvalidCommand,
                    Some(Err(_)) => break CloseReason::UnsupportedData,
                    Some(Ok(event)) => {
                        idle_deadline = Instant::now() + conf.idle_timeout();
                        match event {
                            crate::event::ClientEvent::StartStreaming { filters } => {
                                if conn_state == ConnState::Streaming {
                                    // A second start_streaming on the same connection
                                    // just replaces the filters in place.
                                    if let Some(current) = &session {
                                        current.set_filters(filters.unwrap_or_default());
                                    }
                                } else {
                                    // Idle -> streaming: enforce the capacity/pre-emption
                                    // rule. A session already registered for this same
                                    // actor is reclaimed (its connection is closed); a
                                    // session registered for any other actor blocks this
                                    // request outright, capping live streams at one.
                                    if state.logger.active_sessions() > 0 {
                                        match state.logger.active_session(&claims.actor) {
                                            Some(existing) => {
                                                existing.pre_empt();
                                                state.logger.remove(&existing);
                                            }
                                            None => break CloseReason::SessionLimitExceeded,
                                        }
                                    }

                                    let s = Session::new(
                                        conf.session_capacity,
                                        claims.actor.clone(),
                                        Arc::clone(&cancel_notify),
                                    );
                                    s.set_filters(filters.unwrap_or_default());
                                    state.logger.listen(Arc::clone(&s));

                                    session = Some(Arc::clone(&s));
                                    let sink = Arc::clone(&sink);
                                    streamer = Some(tokio::spawn(streamer_task(s, sink)));
                                    conn_state = ConnState::Streaming;
                                }
                            }
                            crate::event::ClientEvent::StopStreaming => {
                                if let Some(s) = session.take() {
                                    s.stop();
                                    state.logger.remove(&s);
                                    if let Some(handle) = streamer.take() {
                                        let _ = handle.await;
                                    }
                                }
                                conn_state = ConnState::Idle;
                            }
                            crate::event::ClientEvent::Unknown => unreachable!("filtered out by the transport layer"),
                        }
                    }
                }
            }
        }
    };

    if let Some(s) = session.take() {
        s.stop();
        state.logger.remove(&s);
    }
    if let Some(handle) = streamer.take() {
        handle.abort();
    }
    reader.abort();

    let _ = ws::send_close(&mut *sink.lock().await, close_reason).await;
    shutdown_handle.signal();
}

async fn streamer_task(session: Arc<Session>, sink: Arc<Mutex<SplitSink<WebSocket, Message>>>) {
    const BATCH: usize = 32;
    loop {
        let Some(first) = session.consume().await else {
            return;
        };
        let mut logs = vec![first];
        while logs.len() < BATCH {
            match tokio::time::timeout(Duration::from_millis(10), session.consume()).await {
                Ok(Some(event)) => logs.push(event),
                _ => break,
            }
        }

        let mut sink = sink.lock().await;
        if ws::write_server_event(&mut *sink, &ServerEvent::Logs { logs }).await.is_err() {
            return;
        }
    }
}
