// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the augmentation loop.

#[cfg(test)]
mod integration {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    use crate::auction::{AgentConfig, AuctionId, AuctionInfo, OnFinished, PotentialBidder};
    use crate::clock::SystemClock;
    use crate::config::LoopConfig;
    use crate::hub::AugmentationLoop;
    use crate::metrics::RecordingSink;
    use crate::transport::{InProcessAugmentorHandle, InProcessTransport};

    struct Harness {
        hub: AugmentationLoop,
        augmentors: InProcessAugmentorHandle,
        metrics: Arc<RecordingSink>,
        cancel: CancellationToken,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    fn start() -> Harness {
        let metrics = Arc::new(RecordingSink::new());
        let (transport, augmentors) = InProcessTransport::new();

        let (hub, driver) = AugmentationLoop::new(
            LoopConfig::default(),
            transport,
            metrics.clone(),
            Arc::new(SystemClock),
        );

        let cancel = CancellationToken::new();
        driver.spawn(cancel.clone());

        Harness {
            hub,
            augmentors,
            metrics,
            cancel,
        }
    }

    /// Send CONFIG and wait for the CONFIGOK reply.
    async fn configure(h: &Harness, addr: &str, name: &str, max_in_flight: Option<&str>) {
        match max_in_flight {
            Some(cap) => h
                .augmentors
                .send(addr, &["CONFIG", "1.0", name, cap])
                .unwrap(),
            None => h.augmentors.send(addr, &["CONFIG", "1.0", name]).unwrap(),
        }

        let (to, frames) = h.augmentors.recv().await.unwrap();
        assert_eq!(to.as_str(), addr);
        assert_eq!(frames, vec!["CONFIGOK"]);
    }

    fn auction(id: &str, augmentors: &[&str]) -> AuctionInfo {
        let bidder = PotentialBidder {
            agent: "agent1".to_string(),
            config: Arc::new(AgentConfig::new(
                augmentors.iter().map(|s| s.to_string()).collect(),
            )),
        };
        AuctionInfo::new(
            AuctionId::from(id),
            r#"{"imp": []}"#,
            "datacratic",
            vec![vec![bidder]],
        )
    }

    fn completion() -> (OnFinished, oneshot::Receiver<AuctionInfo>) {
        let (tx, rx) = oneshot::channel();
        let callback: OnFinished = Box::new(move |info| {
            let _ = tx.send(info);
        });
        (callback, rx)
    }

    async fn finished(rx: oneshot::Receiver<AuctionInfo>) -> AuctionInfo {
        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("completion did not arrive")
            .expect("completion callback dropped without firing")
    }

    #[tokio::test]
    async fn test_fan_out_completion() {
        let h = start();
        configure(&h, "p-a", "alpha", Some("10")).await;
        configure(&h, "p-b", "beta", Some("10")).await;

        let (callback, rx) = completion();
        h.hub.augment(
            auction("x1", &["alpha", "beta"]),
            Instant::now() + Duration::from_millis(100),
            callback,
        );

        // One AUGMENT per augmentor, then answer both.
        for _ in 0..2 {
            let (addr, frames) = h.augmentors.recv().await.unwrap();
            assert_eq!(frames[0], "AUGMENT");
            assert_eq!(frames[1], "1.0");
            assert_eq!(frames[3], "x1");
            assert_eq!(frames[4], "datacratic");

            let name = frames[2].clone();
            let body = if name == "alpha" {
                r#"{"seg": {"accounts": ["acct1"], "data": {"score": 4}}}"#
            } else {
                "null"
            };
            h.augmentors
                .send(
                    addr.as_str(),
                    &["RESPONSE", "1.0", &frames[7], "x1", &name, body],
                )
                .unwrap();
        }

        let info = finished(rx).await;
        assert!(info.augmentations.contains_key("alpha"));
        assert!(info.augmentations.contains_key("beta"));
        assert!(info.augmentations["alpha"].entries["seg"]
            .accounts
            .contains("acct1"));
        assert!(info.augmentations["beta"].is_empty());

        assert_eq!(h.metrics.counter_value("augmentation.request"), 2);
        assert_eq!(h.metrics.counter_value("augmentation.response"), 2);
        assert_eq!(
            h.metrics
                .counter_value("augmentor.alpha.instances.p-a.validResponse"),
            1
        );
        assert_eq!(
            h.metrics
                .counter_value("augmentor.beta.instances.p-b.nullResponse"),
            1
        );
        assert_eq!(h.hub.num_augmenting(), 0);
    }

    #[tokio::test]
    async fn test_partial_timeout() {
        let h = start();
        configure(&h, "p-a", "alpha", None).await;
        configure(&h, "p-b", "beta", None).await;

        let (callback, rx) = completion();
        let submitted = Instant::now();
        h.hub.augment(
            auction("x2", &["alpha", "beta"]),
            submitted + Duration::from_millis(50),
            callback,
        );

        // Answer only alpha; beta stays outstanding until the deadline.
        for _ in 0..2 {
            let (addr, frames) = h.augmentors.recv().await.unwrap();
            if frames[2] == "alpha" {
                h.augmentors
                    .send(
                        addr.as_str(),
                        &["RESPONSE", "1.0", &frames[7], "x2", "alpha", "{}"],
                    )
                    .unwrap();
            }
        }

        let info = finished(rx).await;
        assert!(submitted.elapsed() >= Duration::from_millis(50));
        assert!(info.augmentations.contains_key("alpha"));
        assert!(!info.augmentations.contains_key("beta"));
        assert_eq!(h.metrics.counter_value("augmentor.beta.expiredTooLate"), 1);
        assert_eq!(h.hub.num_augmenting(), 0);
    }

    #[tokio::test]
    async fn test_unknown_augmentor_completes_synchronously() {
        let h = start();

        let (callback, mut rx) = completion();
        h.hub.augment(
            auction("x3", &["gamma"]),
            Instant::now() + Duration::from_millis(100),
            callback,
        );

        // Callback ran on this thread, before augment returned.
        let info = rx.try_recv().expect("expected synchronous completion");
        assert!(info.augmentations.is_empty());
        assert_eq!(h.hub.num_augmenting(), 0);
        assert_eq!(h.metrics.counter_value("augmentation.request"), 0);
    }

    #[tokio::test]
    async fn test_saturated_instance_expires_second_auction() {
        let h = start();
        configure(&h, "p-a", "alpha", Some("1")).await;

        let (cb1, rx1) = completion();
        h.hub.augment(
            auction("s1", &["alpha"]),
            Instant::now() + Duration::from_millis(500),
            cb1,
        );
        let (addr, frames) = h.augmentors.recv().await.unwrap();
        assert_eq!(frames[3], "s1");

        // The single slot is taken; the second auction can't dispatch and
        // rides its deadline down.
        let (cb2, rx2) = completion();
        h.hub.augment(
            auction("s2", &["alpha"]),
            Instant::now() + Duration::from_millis(50),
            cb2,
        );

        let info2 = finished(rx2).await;
        assert!(info2.augmentations.is_empty());
        assert_eq!(
            h.metrics
                .counter_value("augmentor.alpha.noAvailableInstances"),
            1
        );
        assert_eq!(h.metrics.counter_value("augmentor.alpha.expiredTooLate"), 1);

        // Answering the first auction frees the slot.
        h.augmentors
            .send(
                addr.as_str(),
                &["RESPONSE", "1.0", &frames[7], "s1", "alpha", "{}"],
            )
            .unwrap();
        finished(rx1).await;

        let (cb3, rx3) = completion();
        h.hub.augment(
            auction("s3", &["alpha"]),
            Instant::now() + Duration::from_millis(500),
            cb3,
        );
        let (addr, frames) = h.augmentors.recv().await.unwrap();
        assert_eq!(frames[3], "s3");
        h.augmentors
            .send(
                addr.as_str(),
                &["RESPONSE", "1.0", &frames[7], "s3", "alpha", "{}"],
            )
            .unwrap();
        finished(rx3).await;
    }

    #[tokio::test]
    async fn test_reconfig_replaces_instance() {
        let h = start();
        configure(&h, "p1", "alpha", Some("5")).await;
        configure(&h, "p1", "alpha", Some("1")).await;

        assert_eq!(
            h.metrics
                .counter_value("augmentor.alpha.instances.p1.configured"),
            2
        );
        assert_eq!(
            h.metrics
                .counter_value("augmentor.alpha.instances.p1.disconnected"),
            1
        );

        // Exactly one instance remains and the new cap of 1 is in effect:
        // the first auction dispatches, the second saturates.
        let (cb1, _rx1) = completion();
        h.hub.augment(
            auction("r1", &["alpha"]),
            Instant::now() + Duration::from_millis(500),
            cb1,
        );
        let (_, frames) = h.augmentors.recv().await.unwrap();
        assert_eq!(frames[3], "r1");

        let (cb2, rx2) = completion();
        h.hub.augment(
            auction("r2", &["alpha"]),
            Instant::now() + Duration::from_millis(40),
            cb2,
        );
        finished(rx2).await;
        assert_eq!(
            h.metrics
                .counter_value("augmentor.alpha.noAvailableInstances"),
            1
        );
    }

    #[tokio::test]
    async fn test_duplicate_auction_id_is_dropped() {
        let h = start();
        configure(&h, "p-a", "alpha", None).await;

        let (cb1, rx1) = completion();
        h.hub.augment(
            auction("dup", &["alpha"]),
            Instant::now() + Duration::from_millis(300),
            cb1,
        );
        let (addr, frames) = h.augmentors.recv().await.unwrap();

        let (cb2, mut rx2) = completion();
        h.hub.augment(
            auction("dup", &["alpha"]),
            Instant::now() + Duration::from_millis(300),
            cb2,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.metrics.counter_value("duplicateAuction"), 1);
        // The duplicate's callback is never invoked; its sender was dropped.
        assert!(rx2.try_recv().is_err());

        h.augmentors
            .send(
                addr.as_str(),
                &["RESPONSE", "1.0", &frames[7], "dup", "alpha", "{}"],
            )
            .unwrap();
        finished(rx1).await;
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_response_counts_unknown() {
        let h = start();
        configure(&h, "p-a", "alpha", None).await;

        let (callback, rx) = completion();
        h.hub.augment(
            auction("late", &["alpha"]),
            Instant::now() + Duration::from_millis(30),
            callback,
        );
        let (addr, frames) = h.augmentors.recv().await.unwrap();

        // Let it expire, then answer anyway.
        finished(rx).await;
        h.augmentors
            .send(
                addr.as_str(),
                &["RESPONSE", "1.0", &frames[7], "late", "alpha", "{}"],
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.metrics.counter_value("augmentation.unknown"), 1);
        assert_eq!(
            h.metrics
                .counter_value("augmentor.alpha.instances.p-a.unknown"),
            1
        );
        assert_eq!(h.hub.num_augmenting(), 0);

        // The loop is still healthy.
        let (cb2, rx2) = completion();
        h.hub.augment(
            auction("after", &["alpha"]),
            Instant::now() + Duration::from_millis(300),
            cb2,
        );
        let (addr, frames) = h.augmentors.recv().await.unwrap();
        h.augmentors
            .send(
                addr.as_str(),
                &["RESPONSE", "1.0", &frames[7], "after", "alpha", "{}"],
            )
            .unwrap();
        finished(rx2).await;
    }

    #[tokio::test]
    async fn test_unparsable_body_still_completes() {
        let h = start();
        configure(&h, "p-a", "alpha", None).await;

        let (callback, rx) = completion();
        h.hub.augment(
            auction("x4", &["alpha"]),
            Instant::now() + Duration::from_millis(300),
            callback,
        );
        let (addr, frames) = h.augmentors.recv().await.unwrap();
        h.augmentors
            .send(
                addr.as_str(),
                &["RESPONSE", "1.0", &frames[7], "x4", "alpha", "not json"],
            )
            .unwrap();

        let info = finished(rx).await;
        assert!(info.augmentations.contains_key("alpha"));
        assert!(info.augmentations["alpha"].is_empty());
        assert_eq!(
            h.metrics
                .counter_value("augmentor.alpha.responseParsingExceptions"),
            1
        );
        assert_eq!(h.metrics.counter_value("augmentor.alpha.expiredTooLate"), 0);
    }

    #[tokio::test]
    async fn test_malformed_messages_are_skipped() {
        let h = start();

        h.augmentors.send("p-a", &["CONFIG", "2.0", "alpha"]).unwrap();
        h.augmentors.send("p-a", &["PING", "1.0"]).unwrap();
        h.augmentors.send("p-a", &["RESPONSE", "1.0", "1.0"]).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.metrics.counter_value("augmentation.protocolError"), 3);
        assert!(h.augmentors.try_recv().is_none());

        // Well-formed traffic still works afterwards.
        configure(&h, "p-a", "alpha", None).await;
    }

    #[tokio::test]
    async fn test_disconnected_augmentor_leaves_dispatch_path() {
        let h = start();
        configure(&h, "p-a", "alpha", None).await;
        h.augmentors.disconnect("p-a").unwrap();

        // Once the driver processes the disconnect, the snapshot no longer
        // carries the name and submissions complete synchronously.
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut attempt = 0;
        loop {
            let (callback, mut rx) = completion();
            h.hub.augment(
                auction(&format!("d{}", attempt), &["alpha"]),
                Instant::now() + Duration::from_millis(10),
                callback,
            );
            if rx.try_recv().is_ok() {
                break;
            }
            assert!(Instant::now() < deadline, "snapshot never updated");
            attempt += 1;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(
            h.metrics
                .counter_value("augmentor.alpha.instances.p-a.disconnected"),
            1
        );
    }

    #[tokio::test]
    async fn test_idle_tracking() {
        let h = start();

        // Nothing in flight yet.
        h.hub.sleep_until_idle().await;

        configure(&h, "p-a", "alpha", None).await;
        let (callback, rx) = completion();
        h.hub.augment(
            auction("i1", &["alpha"]),
            Instant::now() + Duration::from_millis(40),
            callback,
        );

        // Dispatch happened, so the loop is busy.
        let _ = h.augmentors.recv().await.unwrap();
        assert_eq!(h.hub.num_augmenting(), 1);
        assert!(h.hub.currently_augmenting(&AuctionId::from("i1")));

        // Expiry drains the map and wakes us.
        h.hub.sleep_until_idle().await;
        assert_eq!(h.hub.num_augmenting(), 0);
        finished(rx).await;
    }
}
