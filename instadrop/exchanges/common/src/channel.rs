//! The ordered, reliable message channel a transfer session runs over.
//!
//! Sessions are written against [`FrameChannel`] so the same state machines
//! drive a relay WebSocket in production and an in-process pipe in tests.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};

use crate::Frame;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result of a non-blocking receive.
#[derive(Debug, PartialEq, Eq)]
pub enum TryRecv {
    Frame(Frame),
    Empty,
    Closed,
}

/// An ordered, reliable, duplicate-free duplex of [`Frame`]s.
pub trait FrameChannel: Send {
    /// Queues `frame` for delivery.
    fn send(
        &mut self,
        frame: Frame,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Next inbound frame, or `None` once the channel is closed.
    fn recv(&mut self) -> impl Future<Output = Option<Frame>> + Send;

    fn try_recv(&mut self) -> TryRecv;

    /// Bytes accepted by `send` that have not left the local queue yet.
    fn buffered_amount(&self) -> u64;

    fn close(&mut self) -> impl Future<Output = Result<(), ChannelError>> + Send;
}

/// In-process [`FrameChannel`] made of two unbounded queues.
///
/// `buffered_amount` counts bytes sent but not yet received by the peer, so
/// a peer that stops reading makes the counter grow.
#[derive(Debug)]
pub struct MemoryChannel {
    tx: Option<UnboundedSender<Frame>>,
    rx: UnboundedReceiver<Frame>,
    outbound: Arc<AtomicU64>,
    inbound: Arc<AtomicU64>,
}

impl MemoryChannel {
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a_to_b = Arc::new(AtomicU64::new(0));
        let b_to_a = Arc::new(AtomicU64::new(0));

        let a = Self {
            tx: Some(a_tx),
            rx: a_rx,
            outbound: a_to_b.clone(),
            inbound: b_to_a.clone(),
        };
        let b = Self {
            tx: Some(b_tx),
            rx: b_rx,
            outbound: b_to_a,
            inbound: a_to_b,
        };
        (a, b)
    }

    fn received(&self, frame: &Frame) {
        self.inbound
            .fetch_sub(frame.len() as u64, Ordering::AcqRel);
    }
}

impl FrameChannel for MemoryChannel {
    async fn send(&mut self, frame: Frame) -> Result<(), ChannelError> {
        let tx = self.tx.as_ref().ok_or(ChannelError::Closed)?;
        let len = frame.len() as u64;
        self.outbound.fetch_add(len, Ordering::AcqRel);
        tx.send(frame).map_err(|_| {
            self.outbound.fetch_sub(len, Ordering::AcqRel);
            ChannelError::Closed
        })
    }

    async fn recv(&mut self) -> Option<Frame> {
        let frame = self.rx.recv().await?;
        self.received(&frame);
        Some(frame)
    }

    fn try_recv(&mut self) -> TryRecv {
        match self.rx.try_recv() {
            Ok(frame) => {
                self.received(&frame);
                TryRecv::Frame(frame)
            }
            Err(TryRecvError::Empty) => TryRecv::Empty,
            Err(TryRecvError::Disconnected) => TryRecv::Closed,
        }
    }

    fn buffered_amount(&self) -> u64 {
        self.outbound.load(Ordering::Acquire)
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}
