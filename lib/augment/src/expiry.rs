// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-flight auction map with deadline ordering.
//!
//! [`AugmentingMap`] pairs an id-keyed entry map with a lazy min-heap over
//! `(deadline, id)`. Insertion is O(log n); the expiry sweep pops everything
//! due in one pass. Entries removed through completion leave a stale heap
//! node behind, discarded whenever it surfaces.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::time::Instant;

use crate::auction::{AuctionId, AuctionInfo, OnFinished};

/// One auction awaiting augmentation.
pub struct AuctionEntry {
    pub info: AuctionInfo,
    pub deadline: Instant,

    /// Augmentor names still awaited. Non-empty at insertion by
    /// construction: an empty intersection completes on the caller thread
    /// and never reaches the map.
    pub outstanding: BTreeSet<String>,

    pub on_finished: OnFinished,
}

/// Map of in-flight auctions, ordered by deadline for expiry.
#[derive(Default)]
pub struct AugmentingMap {
    entries: HashMap<AuctionId, AuctionEntry>,
    deadlines: BinaryHeap<Reverse<(Instant, AuctionId)>>,
}

impl AugmentingMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &AuctionId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn insert(&mut self, entry: AuctionEntry) {
        let id = entry.info.id.clone();
        self.deadlines.push(Reverse((entry.deadline, id.clone())));
        self.entries.insert(id, entry);
    }

    pub fn get_mut(&mut self, id: &AuctionId) -> Option<&mut AuctionEntry> {
        self.entries.get_mut(id)
    }

    /// Remove a completed entry. Its heap node stays behind and is skipped
    /// later.
    pub fn remove(&mut self, id: &AuctionId) -> Option<AuctionEntry> {
        self.entries.remove(id)
    }

    /// Earliest live deadline, discarding stale heap nodes on the way.
    ///
    /// Lets the expiry tick return without scanning when nothing is due.
    pub fn earliest(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.deadlines.peek() {
            match self.entries.get(id) {
                Some(entry) if entry.deadline == *deadline => return Some(*deadline),
                _ => {
                    self.deadlines.pop();
                }
            }
        }
        None
    }

    /// Pop every entry whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<AuctionEntry> {
        let mut due = Vec::new();

        while let Some(Reverse((deadline, _))) = self.deadlines.peek() {
            if *deadline > now {
                break;
            }
            let Some(Reverse((deadline, id))) = self.deadlines.pop() else {
                break;
            };
            let live = self
                .entries
                .get(&id)
                .is_some_and(|entry| entry.deadline == deadline);
            if live {
                if let Some(entry) = self.entries.remove(&id) {
                    due.push(entry);
                }
            }
        }

        due
    }
}
