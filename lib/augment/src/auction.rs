// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Auction-side types handed to the loop by the router.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::augmentation::AugmentationList;

/// Unique auction identifier, assigned by the router.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AuctionId(String);

impl AuctionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AuctionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The slice of a bidding agent's configuration the loop cares about: which
/// augmentors must be consulted before the agent bids.
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    augmentations: Vec<String>,
}

impl AgentConfig {
    pub fn new(augmentations: Vec<String>) -> Self {
        Self { augmentations }
    }

    /// Names of the augmentors this agent requires.
    pub fn augmentations(&self) -> &[String] {
        &self.augmentations
    }
}

/// One bidder that may participate in the auction.
#[derive(Debug, Clone)]
pub struct PotentialBidder {
    pub agent: String,
    pub config: Arc<AgentConfig>,
}

/// Bidders grouped by shared exchange connection.
pub type GroupPotentialBidders = Vec<PotentialBidder>;

/// Everything the loop needs to know about one auction.
///
/// Ownership passes into the loop at dispatch and back out through the
/// completion callback, with `augmentations` filled in along the way.
#[derive(Debug)]
pub struct AuctionInfo {
    pub id: AuctionId,
    pub request: String,
    pub request_format: String,
    pub potential_groups: Vec<GroupPotentialBidders>,

    /// Collected responses, keyed by augmentor name.
    pub augmentations: BTreeMap<String, AugmentationList>,
}

impl AuctionInfo {
    pub fn new(
        id: AuctionId,
        request: impl Into<String>,
        request_format: impl Into<String>,
        potential_groups: Vec<GroupPotentialBidders>,
    ) -> Self {
        Self {
            id,
            request: request.into(),
            request_format: request_format.into(),
            potential_groups,
            augmentations: BTreeMap::new(),
        }
    }

    /// Union of augmentor names required by any bidder in any group.
    pub fn required_augmentors(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for group in &self.potential_groups {
            for bidder in group {
                for name in bidder.config.augmentations() {
                    names.insert(name.clone());
                }
            }
        }
        names
    }

    /// Distinct agent ids across all groups, in stable order.
    pub fn agents(&self) -> BTreeSet<&str> {
        let mut agents = BTreeSet::new();
        for group in &self.potential_groups {
            for bidder in group {
                agents.insert(bidder.agent.as_str());
            }
        }
        agents
    }
}

/// One-shot completion callback; consumes the auction it was created for.
pub type OnFinished = Box<dyn FnOnce(AuctionInfo) + Send + 'static>;
