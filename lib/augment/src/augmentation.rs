// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Augmentation data model.
//!
//! An augmentor responds with a JSON object keyed by tag; each tag carries
//! the accounts it applies to plus free-form data. Responses for the same
//! auction merge per augmentor, and merging is idempotent for repeated
//! entries with an equal (account, tag) pair.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Data contributed under a single tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Augmentation {
    /// Accounts the tag applies to.
    #[serde(default)]
    pub accounts: BTreeSet<String>,

    /// Augmentor-defined payload carried through to bidding.
    #[serde(default)]
    pub data: Value,
}

/// Everything one augmentor contributed to one auction: tag -> augmentation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AugmentationList {
    pub entries: BTreeMap<String, Augmentation>,
}

impl AugmentationList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode a RESPONSE body.
    ///
    /// Empty and literal `"null"` bodies are the empty list; anything else
    /// must be a JSON object of tag -> augmentation.
    pub fn parse_body(body: &str) -> serde_json::Result<Self> {
        if body.is_empty() || body == "null" {
            return Ok(Self::default());
        }
        serde_json::from_str(body)
    }

    /// Merge another list into this one.
    ///
    /// Accounts are unioned per tag; non-null incoming data replaces the
    /// stored data for that tag.
    pub fn merge(&mut self, other: AugmentationList) {
        for (tag, aug) in other.entries {
            let slot = self.entries.entry(tag).or_default();
            slot.accounts.extend(aug.accounts);
            if !aug.data.is_null() {
                slot.data = aug.data;
            }
        }
    }
}
