// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Augmentor wire protocol.
//!
//! Messages are multipart string frames addressed by peer identity; frame 0
//! is always the peer address the transport assigned. Four shapes exist:
//!
//! ```text
//! CONFIG    (augmentor -> loop)  [addr, "CONFIG", "1.0", name, max_in_flight?]
//! CONFIGOK  (loop -> augmentor)  [addr, "CONFIGOK"]
//! AUGMENT   (loop -> augmentor)  [addr, "AUGMENT", "1.0", name, auction_id,
//!                                 request_format, request, agents, timestamp]
//! RESPONSE  (augmentor -> loop)  [addr, "RESPONSE", "1.0", start_ts,
//!                                 auction_id, name, body]
//! ```
//!
//! Timestamps are decimal seconds since the epoch. The agents frame is the
//! sorted agent-id set encoded as concatenated netstrings
//! (`<decimal byte length>:<id>,`), a length-prefixed layout that is stable
//! across both sides of the wire.

use std::collections::BTreeSet;
use std::fmt;

use crate::auction::AuctionId;
use crate::error::ProtocolError;

/// The only protocol version spoken.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Peer identity assigned by the transport.
///
/// Augmentors are expected to set a printable socket identity; the address
/// doubles as the instance key in metric names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerAddr(String);

impl PeerAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddr {
    fn from(addr: &str) -> Self {
        Self(addr.to_string())
    }
}

/// Decoded RESPONSE message.
#[derive(Debug)]
pub struct ResponseMessage {
    pub addr: PeerAddr,
    /// When the loop dispatched the request, echoed back by the augmentor.
    pub start_time: f64,
    pub auction_id: AuctionId,
    pub augmentor: String,
    pub body: String,
}

/// Message decoded off the augmentor-facing socket.
#[derive(Debug)]
pub enum AugmentorMessage {
    Config {
        addr: PeerAddr,
        name: String,
        /// Raw cap from the optional fifth frame; `None` when absent. The
        /// loop applies its default for absent or negative values.
        max_in_flight: Option<i64>,
    },
    Response(ResponseMessage),
}

/// Decode an inbound frame vector (frame 0 = peer address).
pub fn decode_client_message(frames: &[String]) -> Result<AugmentorMessage, ProtocolError> {
    if frames.len() < 2 {
        return Err(ProtocolError::WrongFrameCount {
            kind: "augmentor",
            expected: "at least 2",
            got: frames.len(),
        });
    }

    match frames[1].as_str() {
        "CONFIG" => decode_config(frames),
        "RESPONSE" => decode_response(frames),
        other => Err(ProtocolError::UnknownMessageType {
            got: other.to_string(),
        }),
    }
}

fn check_version(kind: &'static str, version: &str) -> Result<(), ProtocolError> {
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch {
            kind,
            got: version.to_string(),
        });
    }
    Ok(())
}

fn decode_config(frames: &[String]) -> Result<AugmentorMessage, ProtocolError> {
    if !(4..=5).contains(&frames.len()) {
        return Err(ProtocolError::WrongFrameCount {
            kind: "CONFIG",
            expected: "4 to 5",
            got: frames.len(),
        });
    }

    check_version("CONFIG", &frames[2])?;

    let name = frames[3].clone();
    if name.is_empty() {
        return Err(ProtocolError::EmptyAugmentorName);
    }

    let max_in_flight = match frames.get(4) {
        Some(raw) => Some(raw.parse::<i64>().map_err(|_| ProtocolError::BadField {
            field: "max_in_flight",
            got: raw.clone(),
        })?),
        None => None,
    };

    Ok(AugmentorMessage::Config {
        addr: PeerAddr::new(frames[0].clone()),
        name,
        max_in_flight,
    })
}

fn decode_response(frames: &[String]) -> Result<AugmentorMessage, ProtocolError> {
    if frames.len() != 7 {
        return Err(ProtocolError::WrongFrameCount {
            kind: "RESPONSE",
            expected: "exactly 7",
            got: frames.len(),
        });
    }

    check_version("RESPONSE", &frames[2])?;

    let start_time = frames[3]
        .parse::<f64>()
        .map_err(|_| ProtocolError::BadField {
            field: "start_timestamp",
            got: frames[3].clone(),
        })?;

    Ok(AugmentorMessage::Response(ResponseMessage {
        addr: PeerAddr::new(frames[0].clone()),
        start_time,
        auction_id: AuctionId::new(frames[4].clone()),
        augmentor: frames[5].clone(),
        body: frames[6].clone(),
    }))
}

/// Payload frames for a CONFIGOK reply.
pub fn config_ok_frames() -> Vec<String> {
    vec!["CONFIGOK".to_string()]
}

/// Payload frames for an AUGMENT request.
pub fn augment_frames(
    augmentor: &str,
    auction_id: &AuctionId,
    request_format: &str,
    request: &str,
    agents: &str,
    dispatch_time: f64,
) -> Vec<String> {
    vec![
        "AUGMENT".to_string(),
        PROTOCOL_VERSION.to_string(),
        augmentor.to_string(),
        auction_id.as_str().to_string(),
        request_format.to_string(),
        request.to_string(),
        agents.to_string(),
        format_timestamp(dispatch_time),
    ]
}

/// Render a wire timestamp (decimal seconds since the epoch).
pub fn format_timestamp(seconds: f64) -> String {
    format!("{:.6}", seconds)
}

/// Encode an agent-id set as concatenated netstrings.
pub fn encode_agents<'a, I>(agents: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = String::new();
    for agent in agents {
        out.push_str(&agent.len().to_string());
        out.push(':');
        out.push_str(agent);
        out.push(',');
    }
    out
}

/// Decode a netstring-encoded agent-id set.
pub fn decode_agents(blob: &str) -> Result<BTreeSet<String>, ProtocolError> {
    let mut agents = BTreeSet::new();
    let mut pos = 0;

    while pos < blob.len() {
        let colon = blob[pos..]
            .find(':')
            .map(|i| pos + i)
            .ok_or(ProtocolError::MalformedAgents { offset: pos })?;
        let len: usize = blob[pos..colon]
            .parse()
            .map_err(|_| ProtocolError::MalformedAgents { offset: pos })?;

        let start = colon + 1;
        let end = start + len;
        let id = blob
            .get(start..end)
            .ok_or(ProtocolError::MalformedAgents { offset: start })?;
        if blob.as_bytes().get(end) != Some(&b',') {
            return Err(ProtocolError::MalformedAgents { offset: end });
        }

        agents.insert(id.to_string());
        pos = end + 1;
    }

    Ok(agents)
}
