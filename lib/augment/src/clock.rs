// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Time source capability.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Time source for the loop.
///
/// Deadlines and tick comparisons use the monotonic `now`; wire timestamps
/// use `unix_time` (decimal seconds since the epoch).
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn unix_time(&self) -> f64;
}

/// Wall/monotonic clock backed by the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_time(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(clock.unix_time() > 0.0);
    }
}
