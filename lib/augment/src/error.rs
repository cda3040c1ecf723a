// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the augmentor wire protocol.

use thiserror::Error;

/// Ways an inbound augmentor frame vector can be malformed.
///
/// Malformed messages are logged, counted, and dropped; the loop keeps
/// running.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame count outside the allowed range for the message type.
    #[error("{kind} message has wrong frame count: expected {expected}, got {got}")]
    WrongFrameCount {
        kind: &'static str,
        expected: &'static str,
        got: usize,
    },

    /// Top-level message type is not one we speak.
    #[error("unknown augmentor message type: {got}")]
    UnknownMessageType { got: String },

    /// Protocol version other than "1.0".
    #[error("unsupported {kind} version: {got}")]
    VersionMismatch { kind: &'static str, got: String },

    /// CONFIG carried an empty augmentor name.
    #[error("no augmentor name specified")]
    EmptyAugmentorName,

    /// A numeric field did not parse.
    #[error("bad {field} field: {got}")]
    BadField { field: &'static str, got: String },

    /// The agents blob ended mid-entry or carried a bad length prefix.
    #[error("malformed agents blob at byte {offset}")]
    MalformedAgents { offset: usize },
}
