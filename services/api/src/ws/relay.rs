//! Audio Frame Relay
//!
//! Both ends of a session are reduced to a [`Connection`]: a stream of
//! inbound [`Wire`] messages and a sink of outbound [`Frame`]s. Each
//! direction gets its own bounded queue; a reader awaits space in the queue
//! before reading on, so a slow destination only stalls its own direction.
//! Messages the session itself originates travel on a separate control
//! queue per writer and never wait behind relayed audio.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{
    Sink, SinkExt, Stream, StreamExt, future,
    stream::{self, BoxStream, PollNext},
};
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::{WebSocketStream, tungstenite::Message as WsMessage};
use tracing::{debug, trace};

/// An outbound message. Audio payloads are opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Audio(Bytes),
    Text(String),
}

/// An inbound message, with transport-level chatter already filtered out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wire {
    Audio(Bytes),
    Text(String),
    Close,
    Ignored,
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Audio(data) => Message::Binary(data),
            Frame::Text(text) => Message::Text(text.into()),
        }
    }
}

impl From<Frame> for WsMessage {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Audio(data) => WsMessage::Binary(data),
            Frame::Text(text) => WsMessage::Text(text.into()),
        }
    }
}

impl From<Message> for Wire {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Binary(data) => Wire::Audio(data),
            Message::Text(text) => Wire::Text(text.as_str().to_owned()),
            Message::Close(_) => Wire::Close,
            Message::Ping(_) | Message::Pong(_) => Wire::Ignored,
        }
    }
}

impl From<WsMessage> for Wire {
    fn from(msg: WsMessage) -> Self {
        match msg {
            WsMessage::Binary(data) => Wire::Audio(data),
            WsMessage::Text(text) => Wire::Text(text.as_str().to_owned()),
            WsMessage::Close(_) => Wire::Close,
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => Wire::Ignored,
        }
    }
}

pub type FrameStream = BoxStream<'static, anyhow::Result<Wire>>;
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = anyhow::Error> + Send>>;

/// One end of a session, independent of the underlying transport.
pub struct Connection {
    pub frames: FrameStream,
    pub sink: FrameSink,
}

impl Connection {
    pub fn new<St, Si>(frames: St, sink: Si) -> Self
    where
        St: Stream<Item = anyhow::Result<Wire>> + Send + 'static,
        Si: Sink<Frame, Error = anyhow::Error> + Send + 'static,
    {
        Self {
            frames: frames.boxed(),
            sink: Box::pin(sink),
        }
    }

    /// The browser side, accepted through axum.
    pub fn caller(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self::new(
            stream.map(|msg| msg.map(Wire::from).map_err(anyhow::Error::from)),
            sink.sink_map_err(anyhow::Error::from)
                .with(|frame: Frame| future::ready(Ok::<_, anyhow::Error>(Message::from(frame)))),
        )
    }

    /// The conversational agent side, dialed with tokio-tungstenite.
    pub fn agent<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        Self::new(
            stream.map(|msg| msg.map(Wire::from).map_err(anyhow::Error::from)),
            sink.sink_map_err(anyhow::Error::from)
                .with(|frame: Frame| future::ready(Ok::<_, anyhow::Error>(WsMessage::from(frame)))),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Caller,
    Agent,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Caller => "caller",
            Side::Agent => "agent",
        })
    }
}

/// Why a reader stopped.
#[derive(Debug)]
pub enum RelayEnd {
    /// The source closed cleanly.
    SourceClosed,
    /// The source failed at the transport level.
    SourceError(anyhow::Error),
    /// The destination queue is gone; its writer stopped.
    DestinationClosed,
}

/// A bounded queue feeding one direction's writer.
pub fn queue(capacity: usize) -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
    mpsc::channel(capacity)
}

/// Reads `frames` until the source ends, forwarding audio into `audio`.
///
/// Text is handed to `control` when given and dropped otherwise. Audio waits
/// for room in the queue, which is what pauses reads when the destination is
/// behind. While waiting, at most one further message is read so that a
/// hangup is still noticed.
pub async fn pump(
    side: Side,
    mut frames: FrameStream,
    audio: mpsc::Sender<Frame>,
    control: Option<mpsc::Sender<String>>,
) -> RelayEnd {
    let mut ahead = None;
    loop {
        let item = match ahead.take() {
            Some(item) => item,
            None => frames.next().await,
        };
        match item {
            Some(Ok(Wire::Audio(data))) => {
                trace!(%side, len = data.len(), "Relaying audio frame");
                let waited = tokio::select! {
                    biased;
                    permit = audio.reserve() => Ok(permit),
                    next = frames.next() => Err(next),
                };
                let permit = match waited {
                    Ok(permit) => permit,
                    Err(None | Some(Ok(Wire::Close))) => return RelayEnd::SourceClosed,
                    Err(Some(Err(e))) => return RelayEnd::SourceError(e),
                    Err(next) => {
                        ahead = Some(next);
                        audio.reserve().await
                    }
                };
                match permit {
                    Ok(permit) => permit.send(Frame::Audio(data)),
                    Err(_) => return RelayEnd::DestinationClosed,
                }
            }
            Some(Ok(Wire::Text(text))) => match &control {
                Some(control) => {
                    if control.send(text).await.is_err() {
                        return RelayEnd::DestinationClosed;
                    }
                }
                None => debug!(%side, "Ignoring text frame"),
            },
            Some(Ok(Wire::Ignored)) => {}
            Some(Ok(Wire::Close)) | None => return RelayEnd::SourceClosed,
            Some(Err(e)) => return RelayEnd::SourceError(e),
        }
    }
}

fn receiver_stream(mut rx: mpsc::Receiver<Frame>) -> impl Stream<Item = Frame> + Send {
    stream::poll_fn(move |cx| rx.poll_recv(cx))
}

/// Writes queued frames to `sink`, then closes it once every sender of both
/// queues is gone. Control frames go first when both are ready; each queue
/// keeps its own order.
///
/// A peer that accepts no frame for `stall_limit` counts as gone. On any
/// write failure the remaining frames are discarded.
pub async fn drain(
    audio: mpsc::Receiver<Frame>,
    control: mpsc::Receiver<Frame>,
    mut sink: FrameSink,
    stall_limit: Duration,
) -> anyhow::Result<()> {
    let mut frames = stream::select_with_strategy(
        receiver_stream(control),
        receiver_stream(audio),
        |_: &mut ()| PollNext::Left,
    );
    while let Some(frame) = frames.next().await {
        tokio::time::timeout(stall_limit, sink.send(frame))
            .await
            .map_err(|_| anyhow::anyhow!("peer accepted no data for {stall_limit:?}"))??;
    }
    sink.close().await
}
