// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Live augmentor registry and per-augmentor instance pool.
//!
//! The loop task owns the mutable side: instances come and go with CONFIG
//! and disconnect events, and in-flight counters move with dispatch and
//! RESPONSE. A name-sorted, immutable [`RegistrySnapshot`] is published
//! through an [`ArcSwap`] so dispatchers on arbitrary threads can intersect
//! against the live set without taking a lock; a displaced snapshot stays
//! alive until its last reader guard drops.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::protocol::PeerAddr;

/// One live connection to an augmentor process.
#[derive(Debug, Clone)]
pub struct AugmentorInstance {
    addr: PeerAddr,
    max_in_flight: i64,
    in_flight: i64,
}

impl AugmentorInstance {
    pub fn new(addr: PeerAddr, max_in_flight: i64) -> Self {
        Self {
            addr,
            max_in_flight,
            in_flight: 0,
        }
    }

    pub fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    pub fn max_in_flight(&self) -> i64 {
        self.max_in_flight
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight
    }

    /// Account for a request dispatched to this instance.
    pub fn begin_request(&mut self) {
        self.in_flight += 1;
    }

    /// Account for a response (or a request that will never be answered).
    pub fn end_request(&mut self) {
        self.in_flight = (self.in_flight - 1).max(0);
    }
}

/// One logical augmentor: a name plus its connected instances.
#[derive(Debug, Default)]
pub struct AugmentorInfo {
    name: String,
    instances: Vec<AugmentorInstance>,
}

impl AugmentorInfo {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instances: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instances(&self) -> &[AugmentorInstance] {
        &self.instances
    }

    /// Pick the least-loaded instance with spare capacity.
    ///
    /// Ties break toward the earliest-configured instance (strict `<` while
    /// scanning). Returns `None` when every instance is saturated; the
    /// caller leaves the augmentor outstanding and lets the deadline fire.
    pub fn pick_instance(&mut self) -> Option<&mut AugmentorInstance> {
        let mut best: Option<usize> = None;
        let mut min_in_flight = i64::MAX;

        for (idx, instance) in self.instances.iter().enumerate() {
            if instance.in_flight >= min_in_flight {
                continue;
            }
            if instance.in_flight >= instance.max_in_flight {
                continue;
            }
            best = Some(idx);
            min_in_flight = instance.in_flight;
        }

        match best {
            Some(idx) => Some(&mut self.instances[idx]),
            None => None,
        }
    }

    pub fn find_instance(&mut self, addr: &PeerAddr) -> Option<&mut AugmentorInstance> {
        self.instances.iter_mut().find(|i| i.addr == *addr)
    }

    /// Outstanding requests summed over all instances.
    pub fn total_in_flight(&self) -> i64 {
        self.instances.iter().map(|i| i.in_flight).sum()
    }

    fn remove_instance(&mut self, addr: &PeerAddr) -> bool {
        let before = self.instances.len();
        self.instances.retain(|i| i.addr != *addr);
        self.instances.len() != before
    }
}

/// Immutable, name-sorted view of the live augmentor set.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    names: Vec<String>,
}

impl RegistrySnapshot {
    /// Live names in lexicographic order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Writer side of the registry; loop task only.
pub struct AugmentorRegistry {
    augmentors: BTreeMap<String, AugmentorInfo>,
    snapshot: Arc<ArcSwap<RegistrySnapshot>>,
}

impl AugmentorRegistry {
    pub fn new() -> Self {
        Self {
            augmentors: BTreeMap::new(),
            snapshot: Arc::new(ArcSwap::from_pointee(RegistrySnapshot::default())),
        }
    }

    /// Shared handle dispatchers read the published snapshot through.
    pub fn snapshot_handle(&self) -> Arc<ArcSwap<RegistrySnapshot>> {
        Arc::clone(&self.snapshot)
    }

    /// Register an instance under `name`.
    ///
    /// The caller is responsible for evicting any prior instance at the
    /// same address first (re-registration is replace). Returns true when
    /// the logical augmentor did not exist before.
    pub fn configure(&mut self, name: &str, addr: PeerAddr, max_in_flight: i64) -> bool {
        let created = !self.augmentors.contains_key(name);
        self.augmentors
            .entry(name.to_string())
            .or_insert_with(|| AugmentorInfo::new(name))
            .instances
            .push(AugmentorInstance::new(addr, max_in_flight));

        self.publish();
        created
    }

    /// Remove the instance at `addr` wherever it is registered.
    ///
    /// An augmentor whose last instance goes away is destroyed; in-flight
    /// auctions referencing it expire naturally. Returns the names the
    /// instance was removed from.
    pub fn disconnect(&mut self, addr: &PeerAddr) -> Vec<String> {
        let mut removed = Vec::new();
        let mut destroyed = Vec::new();

        for (name, info) in self.augmentors.iter_mut() {
            if info.remove_instance(addr) {
                removed.push(name.clone());
                if info.instances.is_empty() {
                    destroyed.push(name.clone());
                }
            }
        }

        for name in &destroyed {
            self.augmentors.remove(name);
        }

        if !destroyed.is_empty() {
            self.publish();
        }
        removed
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut AugmentorInfo> {
        self.augmentors.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AugmentorInfo)> {
        self.augmentors.iter()
    }

    pub fn len(&self) -> usize {
        self.augmentors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.augmentors.is_empty()
    }

    fn publish(&self) {
        // BTreeMap keys come out already sorted.
        let names = self.augmentors.keys().cloned().collect();
        self.snapshot.store(Arc::new(RegistrySnapshot { names }));
    }
}

impl Default for AugmentorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
