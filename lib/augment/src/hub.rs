// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The augmentation loop.
//!
//! [`AugmentationLoop`] is the handle the router holds: `augment` computes
//! which live augmentors an auction needs and either completes on the
//! calling thread (nothing to consult) or enqueues the auction for the
//! driver. [`AugmentationDriver`] is the single task owning the mutable
//! registry and the transport; it multiplexes the inbox, disconnect events,
//! augmentor messages, the deadline sweep, and the stats tick.
//!
//! Completion is exactly-once per accepted auction: either every awaited
//! augmentor responded, or the deadline sweep fired. Callbacks always run
//! outside the in-flight map lock, so they may re-enter the public API.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auction::{AuctionId, AuctionInfo, OnFinished};
use crate::augmentation::AugmentationList;
use crate::clock::Clock;
use crate::config::LoopConfig;
use crate::discovery::ServiceDirectory;
use crate::expiry::{AuctionEntry, AugmentingMap};
use crate::metrics::MetricsSink;
use crate::protocol::{self, AugmentorMessage, PeerAddr, ResponseMessage};
use crate::registry::{AugmentorRegistry, RegistrySnapshot};
use crate::transport::{AugmentorTransport, TransportEvent};

/// State shared between the caller handle and the driver.
struct Shared {
    augmenting: Mutex<AugmentingMap>,
    snapshot: Arc<ArcSwap<RegistrySnapshot>>,
    idle: watch::Sender<bool>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
}

/// Caller-facing handle to the augmentation loop.
///
/// Cheap to clone; all methods are safe from arbitrary threads.
#[derive(Clone)]
pub struct AugmentationLoop {
    shared: Arc<Shared>,
    inbox: mpsc::UnboundedSender<AuctionEntry>,
    disconnections: mpsc::UnboundedSender<PeerAddr>,
}

impl AugmentationLoop {
    /// Create a loop over the given transport.
    ///
    /// Returns the handle plus the driver; the driver must be given to
    /// [`AugmentationDriver::run`] (or `spawn`) for anything to move.
    pub fn new<T: AugmentorTransport>(
        config: LoopConfig,
        transport: T,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> (Self, AugmentationDriver<T>) {
        let registry = AugmentorRegistry::new();
        let (idle_tx, _) = watch::channel(true);

        let shared = Arc::new(Shared {
            augmenting: Mutex::new(AugmentingMap::new()),
            snapshot: registry.snapshot_handle(),
            idle: idle_tx,
            metrics,
            clock,
        });

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();

        let handle = Self {
            shared: Arc::clone(&shared),
            inbox: inbox_tx,
            disconnections: disconnect_tx,
        };

        let driver = AugmentationDriver {
            shared,
            registry,
            transport,
            inbox: inbox_rx,
            disconnections: disconnect_rx,
            config,
        };

        (handle, driver)
    }

    /// Bind the ZMQ endpoint and register it with the service directory.
    ///
    /// Scans the configured port range for a free port; failure across the
    /// whole range is fatal and propagates.
    pub fn bind(
        config: LoopConfig,
        directory: &dyn ServiceDirectory,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, AugmentationDriver<crate::zmq::ZmqAugmentorTransport>)> {
        let transport = crate::zmq::ZmqAugmentorTransport::bind(&config.endpoint_config())?;
        directory.register(&config.service_name, transport.endpoint())?;
        Ok(Self::new(config, transport, metrics, clock))
    }

    /// Submit an auction for augmentation.
    ///
    /// Intersects the augmentors the auction's bidders require with the
    /// live registry snapshot. When the intersection is empty the callback
    /// runs synchronously on this thread and nothing reaches the driver;
    /// otherwise the auction is queued and completes when every awaited
    /// augmentor has responded or `deadline` passes, whichever is first.
    pub fn augment(&self, info: AuctionInfo, deadline: Instant, on_finished: OnFinished) {
        let required = info.required_augmentors();
        let snapshot = self.shared.snapshot.load();

        // Linear merge of the two name-sorted sequences.
        let mut outstanding = BTreeSet::new();
        let mut need = required.iter();
        let mut live = snapshot.names().iter();
        let (mut n, mut l) = (need.next(), live.next());
        while let (Some(wanted), Some(available)) = (n, l) {
            match wanted.as_str().cmp(available.as_str()) {
                Ordering::Equal => {
                    self.shared.metrics.hit("augmentation.request");
                    self.shared
                        .metrics
                        .hit(&format!("augmentor.{}.request", wanted));
                    outstanding.insert(wanted.clone());
                    n = need.next();
                    l = live.next();
                }
                Ordering::Less => n = need.next(),
                Ordering::Greater => l = live.next(),
            }
        }

        if outstanding.is_empty() {
            // Nothing to consult; the auction continues straight away.
            on_finished(info);
            return;
        }

        let entry = AuctionEntry {
            info,
            deadline,
            outstanding,
            on_finished,
        };
        if let Err(mpsc::error::SendError(entry)) = self.inbox.send(entry) {
            warn!(auction_id = %entry.info.id, "augmentation loop is gone, dropping auction");
        }
    }

    /// Number of auctions currently awaiting augmentors.
    pub fn num_augmenting(&self) -> usize {
        self.shared.augmenting.lock().len()
    }

    /// Whether the given auction is currently awaiting augmentors.
    pub fn currently_augmenting(&self, id: &AuctionId) -> bool {
        self.shared.augmenting.lock().contains(id)
    }

    /// Route a membership-layer disconnection to the driver.
    pub fn notify_disconnection(&self, addr: PeerAddr) {
        let _ = self.disconnections.send(addr);
    }

    /// Wait until no auction is awaiting augmentors.
    ///
    /// The idle flag flips on the expiry tick after the map drains, so
    /// resolution lags completion by up to one tick period.
    pub async fn sleep_until_idle(&self) {
        let mut rx = self.shared.idle.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// The loop task. Owns the registry, the transport, and the queue receivers.
pub struct AugmentationDriver<T: AugmentorTransport> {
    shared: Arc<Shared>,
    registry: AugmentorRegistry,
    transport: T,
    inbox: mpsc::UnboundedReceiver<AuctionEntry>,
    disconnections: mpsc::UnboundedReceiver<PeerAddr>,
    config: LoopConfig,
}

impl<T: AugmentorTransport> AugmentationDriver<T> {
    /// Drain all sources until cancelled or the transport dies.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(transport = self.transport.name(), "augmentation loop starting");

        let mut expiry = interval(self.config.expiry_tick);
        expiry.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats = interval(self.config.stats_tick);
        stats.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("augmentation loop shutting down");
                    return Ok(());
                }
                Some(entry) = self.inbox.recv() => {
                    self.do_augmentation(entry).await;
                }
                Some(addr) = self.disconnections.recv() => {
                    self.do_disconnection(&addr);
                }
                event = self.transport.recv() => {
                    match event {
                        Ok(TransportEvent::Message { frames }) => {
                            self.handle_augmentor_message(&frames).await;
                        }
                        Ok(TransportEvent::Disconnected { addr }) => {
                            self.do_disconnection(&addr);
                        }
                        Err(e) => {
                            error!(error = %e, "transport error, shutting down");
                            return Err(e);
                        }
                    }
                }
                _ = expiry.tick() => self.check_expiries(),
                _ = stats.tick() => self.record_stats(),
            }
        }
    }

    /// Run on a fresh task, handing back the join handle.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<Result<()>>
    where
        T: 'static,
    {
        tokio::spawn(self.run(cancel))
    }

    async fn handle_augmentor_message(&mut self, frames: &[String]) {
        match protocol::decode_client_message(frames) {
            Ok(AugmentorMessage::Config {
                addr,
                name,
                max_in_flight,
            }) => self.do_config(addr, name, max_in_flight).await,
            Ok(AugmentorMessage::Response(response)) => self.do_response(response),
            Err(e) => {
                warn!(error = %e, "dropping malformed augmentor message");
                self.shared.metrics.hit("augmentation.protocolError");
            }
        }
    }

    /// Fan an accepted auction out to one instance per awaited augmentor.
    async fn do_augmentation(&mut self, entry: AuctionEntry) {
        let start = self.shared.clock.now();
        let metrics = Arc::clone(&self.shared.metrics);

        let id = entry.info.id.clone();
        let outstanding: Vec<String> = entry.outstanding.iter().cloned().collect();
        let agents = protocol::encode_agents(entry.info.agents());
        let request = entry.info.request.clone();
        let request_format = entry.info.request_format.clone();

        {
            let mut augmenting = self.shared.augmenting.lock();
            if augmenting.contains(&id) {
                warn!(auction_id = %id, "duplicate auction id detected");
                metrics.hit("duplicateAuction");
                return;
            }
            augmenting.insert(entry);
        }
        self.shared.idle.send_replace(false);

        for name in &outstanding {
            // The augmentor may have disconnected between the snapshot
            // intersection and now; the name stays outstanding and the
            // deadline completes the auction.
            let instance = match self.registry.get_mut(name) {
                Some(info) => info.pick_instance(),
                None => None,
            };
            let Some(instance) = instance else {
                metrics.hit(&format!("augmentor.{}.noAvailableInstances", name));
                continue;
            };

            instance.begin_request();
            let addr = instance.addr().clone();
            metrics.hit(&format!("augmentor.{}.instances.{}.requests", name, addr));

            let frames = protocol::augment_frames(
                name,
                &id,
                &request_format,
                &request,
                &agents,
                self.shared.clock.unix_time(),
            );
            if let Err(e) = self.transport.send(&addr, frames).await {
                // Best-effort; the entry expires if the peer never hears us.
                warn!(augmentor = %name, addr = %addr, error = %e, "failed to send AUGMENT");
            }
        }

        let elapsed = self.shared.clock.now().saturating_duration_since(start);
        metrics.histogram("requestTimeMs", elapsed.as_secs_f64() * 1e3);
    }

    /// Register (or re-register) an augmentor instance.
    async fn do_config(&mut self, addr: PeerAddr, name: String, max_in_flight: Option<i64>) {
        let cap = max_in_flight
            .filter(|v| *v >= 0)
            .unwrap_or(self.config.default_max_in_flight);

        // Re-registration replaces: any prior instance at this address goes
        // away first, whatever name it was registered under.
        self.do_disconnection(&addr);

        let created = self.registry.configure(&name, addr.clone(), cap);
        if created {
            self.shared
                .metrics
                .hit(&format!("augmentor.{}.configured", name));
        }
        self.shared
            .metrics
            .hit(&format!("augmentor.{}.instances.{}.configured", name, addr));
        info!(augmentor = %name, addr = %addr, max_in_flight = cap, "augmentor instance configured");

        if let Err(e) = self.transport.send(&addr, protocol::config_ok_frames()).await {
            warn!(addr = %addr, error = %e, "failed to send CONFIGOK");
        }
    }

    /// Remove the instance at `addr` wherever it is registered.
    fn do_disconnection(&mut self, addr: &PeerAddr) {
        for name in self.registry.disconnect(addr) {
            self.shared
                .metrics
                .hit(&format!("augmentor.{}.instances.{}.disconnected", name, addr));
            info!(augmentor = %name, addr = %addr, "augmentor instance disconnected");
        }
    }

    /// Fold an augmentor response into its auction.
    fn do_response(&mut self, response: ResponseMessage) {
        let metrics = Arc::clone(&self.shared.metrics);
        metrics.hit("augmentation.response");

        let empty_body = response.body.is_empty() || response.body == "null";

        let parse_start = self.shared.clock.now();
        let list = match AugmentationList::parse_body(&response.body) {
            Ok(list) => list,
            Err(e) => {
                warn!(augmentor = %response.augmentor, error = %e, "failed to parse augmentation body");
                metrics.hit(&format!(
                    "augmentor.{}.responseParsingExceptions",
                    response.augmentor
                ));
                AugmentationList::default()
            }
        };
        let parse_elapsed = self.shared.clock.now().saturating_duration_since(parse_start);
        metrics.histogram("responseParseTimeMs", parse_elapsed.as_secs_f64() * 1e3);

        let time_taken_ms = (self.shared.clock.unix_time() - response.start_time) * 1e3;
        metrics.histogram(
            &format!("augmentor.{}.timeTakenMs", response.augmentor),
            time_taken_ms,
        );
        metrics.histogram(
            &format!("augmentor.{}.responseLengthBytes", response.augmentor),
            response.body.len() as f64,
        );

        if let Some(info) = self.registry.get_mut(&response.augmentor) {
            if let Some(instance) = info.find_instance(&response.addr) {
                instance.end_request();
            }
        }

        let mut finished = None;
        {
            let mut augmenting = self.shared.augmenting.lock();
            match augmenting.get_mut(&response.auction_id) {
                None => {
                    // Late response after expiry.
                    metrics.hit("augmentation.unknown");
                    metrics.hit(&format!(
                        "augmentor.{}.instances.{}.unknown",
                        response.augmentor, response.addr
                    ));
                }
                Some(entry) => {
                    let kind = if empty_body { "nullResponse" } else { "validResponse" };
                    metrics.hit(&format!(
                        "augmentor.{}.instances.{}.{}",
                        response.augmentor, response.addr, kind
                    ));

                    entry
                        .info
                        .augmentations
                        .entry(response.augmentor.clone())
                        .or_default()
                        .merge(list);

                    entry.outstanding.remove(&response.augmentor);
                    if entry.outstanding.is_empty() {
                        finished = augmenting.remove(&response.auction_id);
                    }
                }
            }
        }

        if let Some(entry) = finished {
            (entry.on_finished)(entry.info);
        }
    }

    /// Complete everything whose deadline has passed.
    fn check_expiries(&mut self) {
        let now = self.shared.clock.now();

        let (due, drained) = {
            let mut augmenting = self.shared.augmenting.lock();
            let due = match augmenting.earliest() {
                Some(earliest) if earliest <= now => augmenting.expire(now),
                _ => Vec::new(),
            };
            (due, augmenting.is_empty())
        };

        for entry in due {
            for name in &entry.outstanding {
                self.shared
                    .metrics
                    .hit(&format!("augmentor.{}.expiredTooLate", name));
            }
            debug!(
                auction_id = %entry.info.id,
                outstanding = entry.outstanding.len(),
                "auction augmentation expired"
            );
            (entry.on_finished)(entry.info);
        }

        if drained {
            self.shared.idle.send_if_modified(|idle| {
                if *idle {
                    false
                } else {
                    *idle = true;
                    true
                }
            });
        }
    }

    /// Publish per-augmentor in-flight gauges.
    fn record_stats(&self) {
        for (name, info) in self.registry.iter() {
            self.shared.metrics.gauge(
                &format!("augmentor.{}.numInFlight", name),
                info.total_in_flight() as f64,
            );
        }
    }
}
