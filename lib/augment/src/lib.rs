// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]

pub mod auction;
pub mod augmentation;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod expiry;
pub mod hub;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod zmq;

#[cfg(test)]
mod tests;

// Auction-side types
pub use auction::{
    AgentConfig, AuctionId, AuctionInfo, GroupPotentialBidders, OnFinished, PotentialBidder,
};
pub use augmentation::{Augmentation, AugmentationList};

// The loop
pub use config::LoopConfig;
pub use hub::{AugmentationDriver, AugmentationLoop};

// Registry
pub use registry::{AugmentorInfo, AugmentorInstance, AugmentorRegistry, RegistrySnapshot};

// Wire protocol & transports
pub use error::ProtocolError;
pub use protocol::{PeerAddr, PROTOCOL_VERSION};
pub use transport::{
    AugmentorTransport, InProcessAugmentorHandle, InProcessTransport, TransportEvent,
};
pub use zmq::{ZmqAugmentorTransport, ZmqEndpointConfig};

// Capabilities
pub use clock::{Clock, SystemClock};
pub use discovery::{NullDirectory, ServiceDirectory, StaticDirectory};
pub use metrics::{MetricsSink, NullSink, RecordingSink};
