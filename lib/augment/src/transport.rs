// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Augmentor-facing transport seam.
//!
//! Not `Sync`: sockets can't be shared across threads. The driver takes the
//! transport by value and is the only task touching it.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::protocol::PeerAddr;

/// Event delivered by the transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// Inbound multipart message; frame 0 is the peer address.
    Message { frames: Vec<String> },

    /// A peer connection went away.
    Disconnected { addr: PeerAddr },
}

/// Framed, peer-addressed message channel to connected augmentors.
#[async_trait]
pub trait AugmentorTransport: Send {
    /// Receive the next inbound event.
    async fn recv(&mut self) -> Result<TransportEvent>;

    /// Send payload frames to a specific peer. Best-effort: a send the
    /// peer never receives surfaces only as an absent RESPONSE.
    async fn send(&mut self, addr: &PeerAddr, frames: Vec<String>) -> Result<()>;

    /// Transport name for logs.
    fn name(&self) -> &'static str;
}

/// In-process transport for tests.
pub struct InProcessTransport {
    event_rx: mpsc::UnboundedReceiver<TransportEvent>,
    out_tx: mpsc::UnboundedSender<(PeerAddr, Vec<String>)>,
}

/// The augmentor side of an [`InProcessTransport`] pair.
pub struct InProcessAugmentorHandle {
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    out_rx: Mutex<mpsc::UnboundedReceiver<(PeerAddr, Vec<String>)>>,
}

impl InProcessTransport {
    /// Create a connected transport/augmentor pair.
    pub fn new() -> (Self, InProcessAugmentorHandle) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let transport = Self { event_rx, out_tx };
        let handle = InProcessAugmentorHandle {
            event_tx,
            out_rx: Mutex::new(out_rx),
        };

        (transport, handle)
    }
}

impl InProcessAugmentorHandle {
    /// Deliver payload frames to the loop as if sent from `addr`.
    pub fn send(&self, addr: &str, payload: &[&str]) -> Result<()> {
        let mut frames = Vec::with_capacity(payload.len() + 1);
        frames.push(addr.to_string());
        frames.extend(payload.iter().map(|s| s.to_string()));

        self.event_tx
            .send(TransportEvent::Message { frames })
            .map_err(|_| anyhow!("loop disconnected"))
    }

    /// Deliver a connection-lost event for `addr`.
    pub fn disconnect(&self, addr: &str) -> Result<()> {
        self.event_tx
            .send(TransportEvent::Disconnected {
                addr: PeerAddr::from(addr),
            })
            .map_err(|_| anyhow!("loop disconnected"))
    }

    /// Next message the loop sent to any augmentor.
    pub async fn recv(&self) -> Option<(PeerAddr, Vec<String>)> {
        let mut rx = self.out_rx.lock();
        rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&self) -> Option<(PeerAddr, Vec<String>)> {
        self.out_rx.lock().try_recv().ok()
    }
}

#[async_trait]
impl AugmentorTransport for InProcessTransport {
    async fn recv(&mut self) -> Result<TransportEvent> {
        self.event_rx
            .recv()
            .await
            .ok_or_else(|| anyhow!("all augmentor handles disconnected"))
    }

    async fn send(&mut self, addr: &PeerAddr, frames: Vec<String>) -> Result<()> {
        self.out_tx
            .send((addr.clone(), frames))
            .map_err(|_| anyhow!("augmentor handle disconnected"))
    }

    fn name(&self) -> &'static str {
        "in_process"
    }
}
