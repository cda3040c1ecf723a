// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! ZMQ transport for the augmentor-facing endpoint.
//!
//! A single ROUTER socket carries both directions: ZMQ prepends the peer
//! identity to inbound messages, which becomes frame 0 of the delivered
//! vector, and sends route by pushing the identity frame back in front.
//! Augmentors are expected to set a printable socket identity, since the
//! address shows up in metric names.
//!
//! ROUTER sockets do not report peer loss; disconnections reach the loop
//! through the membership layer instead.

use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tmq::{router, Context, Message, Multipart};

use crate::protocol::PeerAddr;
use crate::transport::{AugmentorTransport, TransportEvent};

/// Default high-water mark for the augmentor socket.
pub const DEFAULT_HWM: i32 = 10_000;

/// Configuration for the ZMQ augmentor endpoint.
#[derive(Clone, Debug)]
pub struct ZmqEndpointConfig {
    pub host: String,
    /// Inclusive port range scanned for a free port at bind time.
    pub port_range: (u16, u16),
    /// High-water mark in both directions; past it, sends drop.
    pub hwm: i32,
}

impl ZmqEndpointConfig {
    pub fn new(host: impl Into<String>, port_range: (u16, u16)) -> Self {
        Self {
            host: host.into(),
            port_range,
            hwm: DEFAULT_HWM,
        }
    }

    pub fn with_hwm(mut self, hwm: i32) -> Self {
        self.hwm = hwm;
        self
    }
}

impl Default for ZmqEndpointConfig {
    fn default() -> Self {
        Self::new("*", (18000, 18099))
    }
}

/// ROUTER-socket transport bound to a local TCP endpoint.
pub struct ZmqAugmentorTransport {
    router: router::Router,
    endpoint: String,
}

impl ZmqAugmentorTransport {
    /// Bind to the first free port in the configured range.
    ///
    /// Bind failure across the whole range is fatal to the subsystem.
    pub fn bind(config: &ZmqEndpointConfig) -> Result<Self> {
        let context = Context::new();
        let (lo, hi) = config.port_range;
        let mut last_err = None;

        for port in lo..=hi {
            let addr = format!("tcp://{}:{}", config.host, port);
            match router::router(&context)
                .set_sndhwm(config.hwm)
                .set_rcvhwm(config.hwm)
                .bind(&addr)
            {
                Ok(router) => {
                    tracing::info!(endpoint = %addr, hwm = config.hwm, "augmentor endpoint bound");
                    return Ok(Self {
                        router,
                        endpoint: addr,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(anyhow!(
            "no free augmentor port in {}..={} on {}: {:?}",
            lo,
            hi,
            config.host,
            last_err
        ))
    }

    /// Bind to an explicit URI instead of scanning a port range.
    pub fn bind_uri(uri: &str) -> Result<Self> {
        let context = Context::new();
        let router = router::router(&context)
            .set_sndhwm(DEFAULT_HWM)
            .set_rcvhwm(DEFAULT_HWM)
            .bind(uri)
            .map_err(|e| anyhow!("error binding augmentor endpoint {}: {}", uri, e))?;

        tracing::info!(endpoint = %uri, "augmentor endpoint bound");
        Ok(Self {
            router,
            endpoint: uri.to_string(),
        })
    }

    /// The URI the socket actually bound.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AugmentorTransport for ZmqAugmentorTransport {
    async fn recv(&mut self) -> Result<TransportEvent> {
        match self.router.next().await {
            Some(Ok(msg)) => {
                let frames: Vec<String> = msg
                    .iter()
                    .map(|frame| String::from_utf8_lossy(frame).into_owned())
                    .collect();
                if frames.len() < 2 {
                    return Err(anyhow!(
                        "invalid ROUTER message: expected identity + payload, got {} frames",
                        frames.len()
                    ));
                }
                Ok(TransportEvent::Message { frames })
            }
            Some(Err(e)) => Err(anyhow!("ROUTER receive error: {}", e)),
            None => Err(anyhow!("ROUTER socket closed")),
        }
    }

    async fn send(&mut self, addr: &PeerAddr, frames: Vec<String>) -> Result<()> {
        let mut parts = VecDeque::with_capacity(frames.len() + 1);
        parts.push_back(Message::from(addr.as_str().as_bytes().to_vec()));
        for frame in frames {
            parts.push_back(Message::from(frame.into_bytes()));
        }

        self.router
            .send(Multipart(parts))
            .await
            .map_err(|e| anyhow!("failed to send to {}: {}", addr, e))
    }

    fn name(&self) -> &'static str {
        "zmq"
    }
}
