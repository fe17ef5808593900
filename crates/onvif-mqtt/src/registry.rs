// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device registry.
//!
//! Holds the live device set. A discovery cycle merges fresh probe matches
//! with the persisted overrides, writes the merged set back to the store and
//! swaps it in. Devices that survive a swap keep their motion state.

use crate::device::DeviceRecord;
use crate::motion::{MotionPhase, MotionState};
use crate::store::{DeviceStore, StoreError};
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A live device: its record plus the motion state of its control session.
pub struct Device<S> {
    record: RwLock<DeviceRecord>,
    motion: Mutex<MotionState<S>>,
}

impl<S> Device<S> {
    pub fn new(record: DeviceRecord) -> Self {
        Self {
            record: RwLock::new(record),
            motion: Mutex::new(MotionState::default()),
        }
    }

    pub fn identifier(&self) -> String {
        self.record.read().identifier.clone()
    }

    /// Snapshot of the current record.
    pub fn record(&self) -> DeviceRecord {
        self.record.read().clone()
    }

    /// Replace the record, leaving the motion state alone.
    pub fn update(&self, record: DeviceRecord) {
        *self.record.write() = record;
    }

    /// Current motion phase (waits for any in-flight operation).
    pub async fn phase(&self) -> MotionPhase {
        self.motion.lock().await.phase()
    }

    pub(crate) fn motion(&self) -> &Mutex<MotionState<S>> {
        &self.motion
    }

    fn has_identifier(&self, identifier: &str) -> bool {
        self.record.read().identifier == identifier
    }
}

impl<S> std::fmt::Debug for Device<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("record", &*self.record.read())
            .finish_non_exhaustive()
    }
}

/// Merge freshly discovered records with persisted ones.
///
/// Discovered records win for every field they carry; persisted overrides
/// (inversion flags, display name, unknown keys) survive. Persisted records
/// that were not discovered are kept unchanged after the discovered ones.
pub fn reconcile(discovered: &[DeviceRecord], persisted: &[DeviceRecord]) -> Vec<DeviceRecord> {
    merge(discovered, persisted).0
}

/// Same as [`reconcile`], also returning how many leading entries came from
/// discovery.
fn merge(discovered: &[DeviceRecord], persisted: &[DeviceRecord]) -> (Vec<DeviceRecord>, usize) {
    let by_id: HashMap<&str, &DeviceRecord> = persisted
        .iter()
        .map(|r| (r.identifier.as_str(), r))
        .collect();

    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(discovered.len() + persisted.len());

    for fresh in discovered {
        if !seen.insert(fresh.identifier.as_str()) {
            continue;
        }
        let mut record = fresh.clone();
        if let Some(old) = by_id.get(fresh.identifier.as_str()) {
            record.adopt_overrides(old);
        }
        merged.push(record);
    }

    let discovered_count = merged.len();

    for old in persisted {
        if seen.insert(old.identifier.as_str()) {
            merged.push(old.clone());
        }
    }

    (merged, discovered_count)
}

/// Result of one registry refresh.
#[derive(Debug)]
pub struct Refresh {
    /// Merged records of the devices seen in this discovery pass.
    pub discovered: Vec<DeviceRecord>,

    /// Size of the installed device set.
    pub total: usize,

    /// Set when the merged set could not be written back.
    pub save_error: Option<StoreError>,
}

/// Live device set shared by the router and motion controller.
pub struct DeviceRegistry<S> {
    devices: ArcSwap<Vec<Arc<Device<S>>>>,
}

impl<S> Default for DeviceRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> DeviceRegistry<S> {
    pub fn new() -> Self {
        Self {
            devices: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn lookup(&self, identifier: &str) -> Option<Arc<Device<S>>> {
        self.devices
            .load()
            .iter()
            .find(|d| d.has_identifier(identifier))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.load().is_empty()
    }

    /// Snapshot of every record, in registry order.
    pub fn records(&self) -> Vec<DeviceRecord> {
        self.devices.load().iter().map(|d| d.record()).collect()
    }

    /// Swap in a new device set.
    ///
    /// Known identifiers keep their `Device` (record updated in place) so an
    /// open session or pending stop carries over.
    pub fn install(&self, records: Vec<DeviceRecord>) {
        let current = self.devices.load_full();
        let next: Vec<Arc<Device<S>>> = records
            .into_iter()
            .map(|record| {
                match current.iter().find(|d| d.has_identifier(&record.identifier)) {
                    Some(existing) => {
                        existing.update(record);
                        Arc::clone(existing)
                    }
                    None => Arc::new(Device::new(record)),
                }
            })
            .collect();

        tracing::debug!("Installed {} devices", next.len());
        self.devices.store(Arc::new(next));
    }

    /// Merge `discovered` with the store, persist and install the result.
    ///
    /// A load failure aborts before anything changes. A save failure is
    /// reported in [`Refresh::save_error`] after the merged set is installed.
    pub fn refresh<T>(&self, discovered: &[DeviceRecord], store: &T) -> Result<Refresh, StoreError>
    where
        T: DeviceStore + ?Sized,
    {
        let persisted = store.load()?;
        let (merged, discovered_count) = merge(discovered, &persisted);

        let save_error = match store.save(&merged) {
            Ok(()) => None,
            Err(e) => {
                tracing::error!("Failed to persist device set: {}", e);
                Some(e)
            }
        };

        let total = merged.len();
        let discovered = merged[..discovered_count].to_vec();
        self.install(merged);

        tracing::info!(
            discovered = discovered.len(),
            total,
            "Device registry refreshed"
        );

        Ok(Refresh {
            discovered,
            total,
            save_error,
        })
    }
}
