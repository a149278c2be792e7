//! Server-Sent Events transport.
//!
//! Output is written to a streaming HTTP response as `data:` events. Input
//! arrives separately, through HTTP POSTs delivered via a [`PostHandle`].
//! Only text framing is possible because event streams are UTF-8.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use super::{PipeEnd, PostHandle, TransferFormat, Transport, TransportError, TransportKind};

/// Comment sent when the stream opens so proxies flush the headers.
const PREAMBLE: &[u8] = b":\r\n";

/// SSE transport writing events to `W`.
pub struct SseTransport<W> {
    writer: W,
    posts: mpsc::Receiver<Bytes>,
}

impl<W> SseTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Create a transport writing to `writer`; POST bodies go to the returned
    /// handle.
    #[must_use]
    pub fn new(writer: W, post_capacity: usize) -> (Self, PostHandle) {
        let (post, posts) = PostHandle::channel(post_capacity);
        (Self { writer, posts }, post)
    }
}

/// Render one frame as an event: one `data:` line per payload line.
#[must_use]
pub fn format_event(frame: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(frame.len() + 16);
    for line in frame.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        out.put_slice(b"data: ");
        out.put_slice(line);
        out.put_slice(b"\r\n");
    }
    out.put_slice(b"\r\n");
    out.freeze()
}

#[async_trait]
impl<W> Transport for SseTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn kind(&self) -> TransportKind { TransportKind::ServerSentEvents }

    async fn start(&mut self, format: TransferFormat) -> Result<(), TransportError> {
        if format != TransferFormat::Text {
            return Err(TransportError::UnsupportedFormat {
                kind: self.kind(),
                format,
            });
        }
        self.writer.write_all(PREAMBLE).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn process(
        &mut self,
        pipe: PipeEnd,
        stop: CancellationToken,
    ) -> Result<(), TransportError> {
        let (tx, mut rx) = pipe.split();
        let mut input = Some(tx);
        loop {
            tokio::select! {
                biased;

                () = stop.cancelled(), if input.is_some() => {
                    input = None;
                    self.posts.close();
                }

                frame = rx.recv() => match frame {
                    Some(frame) => {
                        self.writer.write_all(&format_event(&frame)).await?;
                        self.writer.flush().await?;
                    }
                    None => break,
                },

                body = self.posts.recv(), if input.is_some() => match body {
                    Some(body) => {
                        if let Some(tx) = &input
                            && tx.send(body).await.is_err()
                        {
                            break;
                        }
                    }
                    None => input = None,
                },
            }
        }
        self.writer.shutdown().await?;
        Ok(())
    }
}
