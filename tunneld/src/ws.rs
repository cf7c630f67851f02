//! WebSocket transport helpers (spec component C5).
//!
//! Thin wrappers over axum's split socket halves: decode incoming text
//! frames into the typed event model, encode outgoing events into text
//! frames, and classify errors so the controller can tell "the peer
//! hung up" apart from "something actually went wrong".

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};

use crate::event::{self, ClientEvent, ServerEvent};
use crate::http::CloseReason;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer closed the connection")]
    Closed,
    #[error("received a non-text frame")]
    NonText,
    #[error("received an unrecognized message type")]
    InvalidMessageType,
    #[error("received a malformed payload for a recognized message type")]
    MalformedPayload(#[source] serde_json::Error),
    #[error("websocket I/O error: {0}")]
    Io(#[from] axum::Error),
}

impl TransportError {
    /// Whether this error represents the peer going away, as opposed to a
    /// protocol violation the caller should respond to with a close frame.
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}

fn classify(err: event::CodecError) -> TransportError {
    match err {
        event::CodecError::Envelope(_) => TransportError::InvalidMessageType,
        event::CodecError::MalformedPayload(e) => TransportError::MalformedPayload(e),
    }
}

pub async fn read_client_event(stream: &mut SplitStream<WebSocket>) -> Result<ClientEvent, TransportError> {
    match next_text(stream).await? {
        None => Err(TransportError::Closed),
        Some(text) => {
            let decoded = event::decode_client_event(&text).map_err(classify)?;
            match decoded {
                ClientEvent::Unknown => Err(TransportError::InvalidMessageType),
                other => Ok(other),
            }
        }
    }
}

pub async fn read_server_event(stream: &mut SplitStream<WebSocket>) -> Result<ServerEvent, TransportError> {
    match next_text(stream).await? {
        None => Err(TransportError::Closed),
        Some(text) => {
            let decoded = event::decode_server_event(&text).map_err(classify)?;
            match decoded {
                ServerEvent::Unknown => Err(TransportError::InvalidMessageType),
                other => Ok(other),
            }
        }
    }
}

async fn next_text(stream: &mut SplitStream<WebSocket>) -> Result<Option<Utf8Bytes>, TransportError> {
    loop {
        match stream.next().await {
            None => return Ok(None),
            Some(Ok(Message::Text(text))) => return Ok(Some(text)),
            Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Binary(_))) => return Err(TransportError::NonText),
            Some(Err(err)) => return Err(TransportError::Io(err)),
        }
    }
}

pub async fn write_client_event<S>(sink: &mut S, event: &ClientEvent) -> Result<(), TransportError>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let text = event::encode_client_event(event);
    sink.send(Message::Text(Utf8Bytes::from(text))).await.map_err(TransportError::Io)
}

pub async fn write_server_event<S>(sink: &mut S, event: &ServerEvent) -> Result<(), TransportError>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let text = event::encode_server_event(event);
    sink.send(Message::Text(Utf8Bytes::from(text))).await.map_err(TransportError::Io)
}

pub async fn write_ping<S>(sink: &mut S) -> Result<(), TransportError>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    sink.send(Message::Ping(Bytes::new())).await.map_err(TransportError::Io)
}

pub async fn send_close<S>(sink: &mut S, reason: CloseReason) -> Result<(), TransportError>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let frame = CloseFrame {
        code: reason.code(),
        reason: Utf8Bytes::from_static(reason.reason()),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
    let _ = sink.close().await;
    Ok(())
}
