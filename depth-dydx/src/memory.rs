//! In-memory transport
//!
//! Stands in for the venue when driving the connection from tests. Only
//! built with the `test-util` feature. Each queued session is handed out by
//! exactly one `connect` call; the remote end lets the caller feed frames in
//! and read what the connection sent.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::{stream, Sink};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use depth_core::{FeedError, FeedResult};

use crate::websocket::{Connector, FrameSink, FrameStream};

/// Remote end of one in-memory session
#[derive(Debug)]
pub struct MemoryRemote {
    inbound: mpsc::UnboundedSender<FeedResult<String>>,
    /// Frames the connection sent, in order
    pub outbound: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl MemoryRemote {
    /// Deliver a text frame to the connection
    pub fn send(&self, frame: impl Into<String>) {
        let _ = self.inbound.send(Ok(frame.into()));
    }

    /// Deliver a transport error to the connection
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.inbound.send(Err(FeedError::transport(reason)));
    }

    /// End the inbound stream, as a server closing the socket would
    pub fn close(self) {}

    /// Whether the connection sent a close on this session
    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Outbound half of a session
struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
    closed: Arc<AtomicBool>,
}

impl Sink<String> for MemorySink {
    type Error = FeedError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<FeedResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, frame: String) -> FeedResult<()> {
        match &self.tx {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| FeedError::transport("remote end dropped")),
            None => Err(FeedError::transport("sink already closed")),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<FeedResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<FeedResult<()>> {
        self.tx = None;
        self.closed.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

/// Connector handing out pre-queued in-memory sessions
#[derive(Default)]
pub struct MemoryConnector {
    sessions: Mutex<VecDeque<(FrameSink, FrameStream)>>,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a session for the next connect attempt
    pub fn push_session(&self) -> MemoryRemote {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<FeedResult<String>>();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();

        let frames = stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });
        let closed = Arc::new(AtomicBool::new(false));
        let sink = MemorySink {
            tx: Some(outbound_tx),
            closed: closed.clone(),
        };

        self.sessions
            .lock()
            .push_back((Box::pin(sink), Box::pin(frames)));

        MemoryRemote {
            inbound: inbound_tx,
            outbound: outbound_rx,
            closed,
        }
    }

    /// Number of connect calls made so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> FeedResult<(FrameSink, FrameStream)> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .pop_front()
            .ok_or_else(|| FeedError::transport("Connection refused: no session available"))
    }
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnector")
            .field("queued", &self.sessions.lock().len())
            .field("attempts", &self.attempts())
            .finish()
    }
}
