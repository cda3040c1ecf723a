// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Service directory capability.
//!
//! Once the augmentor endpoint is bound, it registers under a service name
//! so augmentor processes can find it through the membership layer. The
//! directory itself lives outside this crate.

use anyhow::Result;
use parking_lot::Mutex;

/// Registration side of the membership layer.
pub trait ServiceDirectory: Send + Sync {
    fn register(&self, service: &str, endpoint: &str) -> Result<()>;
}

/// Directory that drops registrations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDirectory;

impl ServiceDirectory for NullDirectory {
    fn register(&self, _service: &str, _endpoint: &str) -> Result<()> {
        Ok(())
    }
}

/// In-memory directory for tests and single-process setups.
#[derive(Default)]
pub struct StaticDirectory {
    entries: Mutex<Vec<(String, String)>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent endpoint registered under `service`.
    pub fn lookup(&self, service: &str) -> Option<String> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|(s, _)| s == service)
            .map(|(_, e)| e.clone())
    }
}

impl ServiceDirectory for StaticDirectory {
    fn register(&self, service: &str, endpoint: &str) -> Result<()> {
        self.entries
            .lock()
            .push((service.to_string(), endpoint.to_string()));
        Ok(())
    }
}
