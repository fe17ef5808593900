// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Running counters of a bridge.
#[derive(Debug)]
pub struct BridgeStats {
    /// Messages received from the bus.
    pub messages: AtomicU64,

    /// Messages that decoded to no command (unknown topic, action or device).
    pub ignored: AtomicU64,

    /// Moves that started.
    pub moves: AtomicU64,

    /// Moves that did not start.
    pub move_failures: AtomicU64,

    /// Completed discovery cycles.
    pub discoveries: AtomicU64,

    /// Handler errors (bad payloads, bus or store failures).
    pub errors: AtomicU64,

    started: Instant,
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeStats {
    pub fn new() -> Self {
        Self {
            messages: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            moves: AtomicU64::new(0),
            move_failures: AtomicU64::new(0),
            discoveries: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current counters.
    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            moves: self.moves.load(Ordering::Relaxed),
            move_failures: self.move_failures.load(Ordering::Relaxed),
            discoveries: self.discoveries.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Snapshot of bridge counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStatsSnapshot {
    pub messages: u64,
    pub ignored: u64,
    pub moves: u64,
    pub move_failures: u64,
    pub discoveries: u64,
    pub errors: u64,
    pub uptime_secs: u64,
}

impl BridgeStatsSnapshot {
    /// Messages per second since start.
    pub fn messages_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.messages as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}
