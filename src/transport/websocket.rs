//! WebSocket transport: one hub frame per WebSocket message.

use std::mem;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    WebSocketStream,
    accept_async,
    tungstenite::Message as WsMessage,
};
use tokio_util::sync::CancellationToken;

use super::{PipeEnd, TransferFormat, Transport, TransportError, TransportKind};

enum State<S> {
    /// Upgrade not yet performed.
    Raw(S),
    Open(WebSocketStream<S>),
    Finished,
}

/// WebSocket transport over any async byte stream.
pub struct WebSocketTransport<S> {
    state: State<S>,
    format: TransferFormat,
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Transport for a raw server-side stream; [`Transport::start`] performs
    /// the upgrade handshake.
    #[must_use]
    pub fn accept(stream: S) -> Self {
        Self {
            state: State::Raw(stream),
            format: TransferFormat::Text,
        }
    }

    /// Transport for a stream that has already completed the upgrade.
    #[must_use]
    pub fn from_stream(stream: WebSocketStream<S>) -> Self {
        Self {
            state: State::Open(stream),
            format: TransferFormat::Text,
        }
    }

    fn outbound(&self, frame: Bytes) -> Result<WsMessage, TransportError> {
        match self.format {
            TransferFormat::Binary => Ok(WsMessage::binary(frame)),
            TransferFormat::Text => String::from_utf8(frame.to_vec())
                .map(WsMessage::text)
                .map_err(|e| {
                    TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
                }),
        }
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn kind(&self) -> TransportKind { TransportKind::WebSockets }

    async fn start(&mut self, format: TransferFormat) -> Result<(), TransportError> {
        self.format = format;
        self.state = match mem::replace(&mut self.state, State::Finished) {
            State::Raw(stream) => State::Open(accept_async(stream).await?),
            other => other,
        };
        Ok(())
    }

    async fn process(
        &mut self,
        pipe: PipeEnd,
        stop: CancellationToken,
    ) -> Result<(), TransportError> {
        let State::Open(ws) = mem::replace(&mut self.state, State::Finished) else {
            return Err(TransportError::NotStarted);
        };
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = pipe.split();
        let mut input = Some(tx);
        let mut remote_closed = false;

        loop {
            tokio::select! {
                biased;

                () = stop.cancelled(), if input.is_some() => {
                    tracing::debug!("websocket transport stopping; input closed");
                    input = None;
                }

                frame = rx.recv() => match frame {
                    Some(frame) if remote_closed => {
                        tracing::trace!(len = frame.len(), "discarding frame after peer close");
                    }
                    Some(frame) => {
                        let message = self.outbound(frame)?;
                        sink.send(message).await?;
                    }
                    None => break,
                },

                message = stream.next(), if input.is_some() => match message {
                    Some(Ok(message @ (WsMessage::Text(_) | WsMessage::Binary(_)))) => {
                        if let Some(tx) = &input
                            && tx.send(message.into_data()).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        tracing::debug!(?frame, "websocket closed by peer");
                        remote_closed = true;
                        input = None;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        remote_closed = true;
                        input = None;
                    }
                },
            }
        }

        if !remote_closed
            && let Err(e) = sink.send(WsMessage::Close(None)).await
        {
            tracing::debug!(error = %e, "failed to send websocket close frame");
        }
        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "failed to close websocket sink");
        }
        Ok(())
    }
}
