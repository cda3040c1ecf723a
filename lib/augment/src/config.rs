// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Loop configuration.

use std::time::Duration;

/// Tunables for the augmentation loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Name the bound endpoint registers under in the service directory.
    pub service_name: String,

    /// Host the ZMQ endpoint binds on.
    pub bind_host: String,

    /// Inclusive port range scanned at bind time.
    pub port_range: (u16, u16),

    /// Socket high-water mark.
    pub hwm: i32,

    /// Period of the deadline sweep.
    pub expiry_tick: Duration,

    /// Period of the in-flight gauge publication. Deliberately co-prime
    /// with the expiry tick.
    pub stats_tick: Duration,

    /// Cap applied when CONFIG omits max_in_flight or sends a negative
    /// value.
    pub default_max_in_flight: i64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            service_name: "augmentors".to_string(),
            bind_host: "*".to_string(),
            port_range: (18000, 18099),
            hwm: crate::zmq::DEFAULT_HWM,
            expiry_tick: Duration::from_millis(1),
            stats_tick: Duration::from_millis(977),
            default_max_in_flight: 3000,
        }
    }
}

impl LoopConfig {
    /// Create from environment variables.
    ///
    /// Environment variables:
    /// - `ROUTER_AUGMENT_SERVICE_NAME`: directory service name
    /// - `ROUTER_AUGMENT_BIND_HOST`: bind host (default: `*`)
    /// - `ROUTER_AUGMENT_PORT_MIN` / `ROUTER_AUGMENT_PORT_MAX`: port range
    /// - `ROUTER_AUGMENT_HWM`: socket high-water mark
    /// - `ROUTER_AUGMENT_EXPIRY_TICK_MS`: deadline sweep period
    /// - `ROUTER_AUGMENT_STATS_TICK_MS`: gauge publication period
    /// - `ROUTER_AUGMENT_MAX_IN_FLIGHT`: default per-instance cap
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let service_name =
            std::env::var("ROUTER_AUGMENT_SERVICE_NAME").unwrap_or(defaults.service_name);
        let bind_host = std::env::var("ROUTER_AUGMENT_BIND_HOST").unwrap_or(defaults.bind_host);

        let port_min = env_parse("ROUTER_AUGMENT_PORT_MIN", defaults.port_range.0);
        let port_max = env_parse("ROUTER_AUGMENT_PORT_MAX", defaults.port_range.1);
        let hwm = env_parse("ROUTER_AUGMENT_HWM", defaults.hwm);

        let expiry_tick = Duration::from_millis(env_parse(
            "ROUTER_AUGMENT_EXPIRY_TICK_MS",
            defaults.expiry_tick.as_millis() as u64,
        ));
        let stats_tick = Duration::from_millis(env_parse(
            "ROUTER_AUGMENT_STATS_TICK_MS",
            defaults.stats_tick.as_millis() as u64,
        ));

        let default_max_in_flight = env_parse(
            "ROUTER_AUGMENT_MAX_IN_FLIGHT",
            defaults.default_max_in_flight,
        );

        Self {
            service_name,
            bind_host,
            port_range: (port_min, port_max),
            hwm,
            expiry_tick,
            stats_tick,
            default_max_in_flight,
        }
    }

    pub fn with_ticks(mut self, expiry: Duration, stats: Duration) -> Self {
        self.expiry_tick = expiry;
        self.stats_tick = stats;
        self
    }

    pub fn with_default_max_in_flight(mut self, cap: i64) -> Self {
        self.default_max_in_flight = cap;
        self
    }

    /// ZMQ endpoint settings derived from this configuration.
    pub fn endpoint_config(&self) -> crate::zmq::ZmqEndpointConfig {
        crate::zmq::ZmqEndpointConfig::new(self.bind_host.clone(), self.port_range)
            .with_hwm(self.hwm)
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
