// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scripted port probe for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::probe::{PortProbe, process_exists};

/// Probe answering from an in-memory table of port holders.
///
/// A port stays bound while any of its listed holders is alive, or forever
/// if it was bound without holders. Liveness questions go to the real
/// process table unless a PID was marked dead explicitly.
#[derive(Debug, Default)]
pub struct MockProbe {
    ports: Mutex<HashMap<u16, Vec<u32>>>,
    dead: Mutex<HashSet<u32>>,
}

impl MockProbe {
    /// Probe with no bound ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `port` as held by `pids`. An empty list means bound by an unknown holder.
    pub fn bind(&self, port: u16, pids: Vec<u32>) {
        if let Ok(mut ports) = self.ports.lock() {
            ports.insert(port, pids);
        }
    }

    /// Mark `port` as free.
    pub fn release(&self, port: u16) {
        if let Ok(mut ports) = self.ports.lock() {
            ports.remove(&port);
        }
    }

    /// Report `pid` as not existing.
    pub fn mark_dead(&self, pid: u32) {
        if let Ok(mut dead) = self.dead.lock() {
            dead.insert(pid);
        }
    }
}

#[async_trait]
impl PortProbe for MockProbe {
    async fn is_bound(&self, port: u16) -> bool {
        let holders = match self.ports.lock() {
            Ok(ports) => ports.get(&port).cloned(),
            Err(_) => None,
        };
        match holders {
            None => false,
            Some(pids) if pids.is_empty() => true,
            Some(pids) => pids.iter().any(|pid| self.pid_alive(*pid)),
        }
    }

    async fn holders(&self, port: u16) -> Vec<u32> {
        self.ports
            .lock()
            .ok()
            .and_then(|ports| ports.get(&port).cloned())
            .unwrap_or_default()
    }

    fn pid_alive(&self, pid: u32) -> bool {
        if self.dead.lock().map(|d| d.contains(&pid)).unwrap_or(false) {
            return false;
        }
        process_exists(pid)
    }
}
