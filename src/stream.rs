use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::response::Response;
use bytes::Bytes;
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use tokio::sync::{mpsc, oneshot};

use crate::error::TransferError;
use crate::transfer::{ResponseHead, ResponseSink};

/// At most one chunk waits between the engine and the transport.
const CHANNEL_CAPACITY: usize = 1;

fn disconnected() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped by client")
}

/// Create a connected sink, head receiver and response body.
///
/// The transfer task writes into the [`ChannelSink`]; the request handler
/// waits for the [`ResponseHead`] and answers with the [`TransferBody`].
pub fn channel() -> (ChannelSink, oneshot::Receiver<ResponseHead>, TransferBody) {
    let (head_tx, head_rx) = oneshot::channel();
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let sink = ChannelSink { head: Some(head_tx), tx };
    let body = TransferBody { rx, length: None };
    (sink, head_rx, body)
}

/// [`ResponseSink`] feeding a [`TransferBody`].
///
/// Writes wait while the previous chunk is still queued, and `flush` waits
/// until the body has taken it, so memory stays bounded to about two chunks
/// per transfer. Once the body is dropped every call fails with
/// [`io::ErrorKind::BrokenPipe`].
pub struct ChannelSink {
    head: Option<oneshot::Sender<ResponseHead>>,
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl ChannelSink {
    /// Push `err` into the body so the transport aborts the response instead
    /// of ending it cleanly.
    pub async fn abort(&mut self, err: &TransferError) {
        // a dropped body needs no abort
        let _ = self.tx.send(Err(io::Error::other(err.to_string()))).await;
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    async fn send_head(&mut self, head: ResponseHead) -> io::Result<()> {
        let sender = self
            .head
            .take()
            .ok_or_else(|| io::Error::other("response head already sent"))?;
        sender.send(head).map_err(|_| disconnected())
    }

    async fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        self.tx.send(Ok(chunk)).await.map_err(|_| disconnected())
    }

    async fn flush(&mut self) -> io::Result<()> {
        // a free slot means the body has taken the last chunk
        self.tx.reserve().await.map(drop).map_err(|_| disconnected())
    }
}

/// Response body stream. Implements [`Stream`] and [`Body`].
#[derive(Debug)]
pub struct TransferBody {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    length: Option<u64>,
}

impl TransferBody {
    /// Announce the exact body length to the transport.
    pub fn with_length(mut self, length: Option<u64>) -> Self {
        self.length = length;
        self
    }
}

impl Body for TransferBody {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        match self.length {
            Some(length) => SizeHint::with_exact(length),
            None => SizeHint::default(),
        }
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl Stream for TransferBody {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Option<io::Result<Bytes>>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl ResponseHead {
    /// Assemble the final response around `body`.
    pub fn into_response(self, body: TransferBody) -> Response {
        let body = body.with_length(self.content_length());
        let mut response = Response::new(axum::body::Body::new(body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
