// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge between the bus and the cameras.
//!
//! The bridge owns the device registry and motion controller, announces
//! devices after each discovery cycle and dispatches bus commands.

use crate::bus::{BusError, BusEvent, EventStream, MessageBus};
use crate::command::{parse_command, Command, CommandDefaults, CommandError};
use crate::config::BridgeConfig;
use crate::device::DeviceRecord;
use crate::discovery::DeviceSource;
use crate::motion::{MotionController, MoveOutcome};
use crate::registry::{DeviceRegistry, Refresh};
use crate::session::SessionProvider;
use crate::stats::{BridgeStats, BridgeStatsSnapshot};
use crate::store::{DeviceStore, StoreError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Failed to encode device record: {0}")]
    Encode(serde_json::Error),
}

/// Discovery, registry, motion and bus wired together.
pub struct Bridge<P: SessionProvider, B, D> {
    prefix: String,
    defaults: CommandDefaults,
    registry: DeviceRegistry<P::Session>,
    motion: MotionController<P>,
    bus: B,
    source: D,
    store: Box<dyn DeviceStore>,
    subscribed: Mutex<HashSet<String>>,
    reload: tokio::sync::Mutex<()>,
    stats: BridgeStats,
}

impl<P, B, D> Bridge<P, B, D>
where
    P: SessionProvider,
    B: MessageBus,
    D: DeviceSource,
{
    pub fn new(
        config: &BridgeConfig,
        provider: P,
        bus: B,
        source: D,
        store: Box<dyn DeviceStore>,
    ) -> Self {
        Self {
            prefix: config.mqtt.prefix.clone(),
            defaults: CommandDefaults::from_config(config),
            registry: DeviceRegistry::new(),
            motion: MotionController::new(provider, &config.motion),
            bus,
            source,
            store,
            subscribed: Mutex::new(HashSet::new()),
            reload: tokio::sync::Mutex::new(()),
            stats: BridgeStats::new(),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry<P::Session> {
        &self.registry
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn stats(&self) -> BridgeStatsSnapshot {
        self.stats.snapshot()
    }

    fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.prefix, suffix)
    }

    /// Run one discovery cycle: discover, merge with the store, announce.
    ///
    /// Cycles never overlap; a reload requested during a cycle waits for it.
    pub async fn reload(&self) -> Result<Refresh, BridgeError> {
        let _cycle = self.reload.lock().await;

        let discovered = self.source.discover().await;
        let refresh = self.registry.refresh(&discovered, self.store.as_ref())?;
        BridgeStats::bump(&self.stats.discoveries);

        for record in &refresh.discovered {
            if let Err(e) = self.announce(record).await {
                BridgeStats::bump(&self.stats.errors);
                tracing::warn!(device = %record.identifier, "Announce failed: {}", e);
            }
        }

        Ok(refresh)
    }

    /// Publish `record` and make sure its command topic is subscribed.
    pub async fn announce(&self, record: &DeviceRecord) -> Result<(), BridgeError> {
        let payload = serde_json::to_vec(record).map_err(BridgeError::Encode)?;

        self.bus
            .publish(&self.topic("announce"), payload.clone())
            .await?;
        self.bus
            .publish(
                &self.topic(&format!("{}/announce", record.identifier)),
                payload,
            )
            .await?;

        let first = self.subscribed.lock().insert(record.identifier.clone());
        if first {
            let topic = self.topic(&format!("{}/command", record.identifier));
            if let Err(e) = self.bus.subscribe(&topic).await {
                self.subscribed.lock().remove(&record.identifier);
                return Err(e.into());
            }
        }

        tracing::debug!(device = %record.identifier, name = %record.display_name(), "Announced");
        Ok(())
    }

    /// Subscribe the global command topic and every known device topic.
    pub async fn subscribe_all(&self) -> Result<(), BridgeError> {
        self.bus.subscribe(&self.topic("command")).await?;

        let identifiers: Vec<String> = self.subscribed.lock().iter().cloned().collect();
        for identifier in identifiers {
            self.bus
                .subscribe(&self.topic(&format!("{}/command", identifier)))
                .await?;
        }
        Ok(())
    }

    /// Decode and execute one bus message.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<(), BridgeError> {
        BridgeStats::bump(&self.stats.messages);

        match parse_command(&self.prefix, topic, payload, &self.defaults)? {
            Some(command) => self.dispatch(command).await,
            None => {
                BridgeStats::bump(&self.stats.ignored);
                tracing::trace!(%topic, "Ignoring message");
                Ok(())
            }
        }
    }

    pub async fn dispatch(&self, command: Command) -> Result<(), BridgeError> {
        match command {
            Command::Reload => {
                tracing::info!("Reload requested");
                self.reload().await?;
            }
            Command::Announce { device } => {
                let Some(found) = self.registry.lookup(&device) else {
                    BridgeStats::bump(&self.stats.ignored);
                    tracing::debug!(%device, "Announce for unknown device");
                    return Ok(());
                };
                self.announce(&found.record()).await?;
            }
            Command::Move {
                device,
                direction,
                stop_after,
                credentials,
            } => {
                let Some(found) = self.registry.lookup(&device) else {
                    BridgeStats::bump(&self.stats.ignored);
                    tracing::debug!(%device, "Move for unknown device");
                    return Ok(());
                };

                let outcome = self
                    .motion
                    .move_device(&found, direction.velocity(), stop_after, &credentials)
                    .await;
                self.record_outcome(&device, &outcome);
            }
        }
        Ok(())
    }

    fn record_outcome(&self, device: &str, outcome: &MoveOutcome) {
        match outcome {
            MoveOutcome::Moving { velocity, stop_in } => {
                BridgeStats::bump(&self.stats.moves);
                tracing::info!(
                    %device,
                    x = velocity.x,
                    y = velocity.y,
                    stop_in_ms = stop_in.as_millis() as u64,
                    "Moving"
                );
                return;
            }
            MoveOutcome::CredentialMismatch => {
                tracing::info!(%device, "Credentials differ from the open session, move ignored");
            }
            MoveOutcome::NoEndpoint => {
                tracing::warn!(%device, "Device has no control endpoint");
            }
            MoveOutcome::SessionUnavailable(e) => {
                tracing::warn!(%device, "Could not open control session: {}", e);
            }
            MoveOutcome::CommandFailed(e) => {
                tracing::warn!(%device, "Move command failed: {}", e);
            }
        }
        BridgeStats::bump(&self.stats.move_failures);
    }

    /// Serve `events` until the stream closes.
    ///
    /// The first discovery cycle runs in the background; every message is
    /// handled on its own task.
    pub async fn run<E: EventStream>(self: Arc<Self>, mut events: E) -> Result<(), BridgeError> {
        self.subscribe_all().await?;

        let bridge = Arc::clone(&self);
        tokio::spawn(async move {
            if let Err(e) = bridge.reload().await {
                tracing::error!("Initial discovery failed: {}", e);
            }
        });

        while let Some(event) = events.next().await {
            let bridge = Arc::clone(&self);
            match event {
                BusEvent::Connected => {
                    tokio::spawn(async move {
                        if let Err(e) = bridge.subscribe_all().await {
                            tracing::warn!("Resubscribe failed: {}", e);
                        }
                    });
                }
                BusEvent::Message { topic, payload } => {
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_message(&topic, &payload).await {
                            BridgeStats::bump(&bridge.stats.errors);
                            tracing::warn!(%topic, "Command failed: {}", e);
                        }
                    });
                }
            }
        }

        tracing::info!("Bus event stream closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ControlSession, Credentials, SessionError, Velocity};
    use crate::store::JsonFileStore;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeBus {
        published: Mutex<Vec<(String, Vec<u8>)>>,
        subscriptions: Mutex<Vec<String>>,
    }

    impl MessageBus for Arc<FakeBus> {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
            self.published.lock().push((topic.to_string(), payload));
            Ok(())
        }

        async fn subscribe(&self, topic: &str) -> Result<(), BusError> {
            self.subscriptions.lock().push(topic.to_string());
            Ok(())
        }
    }

    struct FixedSource(Vec<DeviceRecord>);

    impl DeviceSource for FixedSource {
        async fn discover(&self) -> Vec<DeviceRecord> {
            self.0.clone()
        }
    }

    struct NullSession(String, Credentials, Arc<Mutex<Vec<Velocity>>>);

    impl ControlSession for NullSession {
        fn endpoint(&self) -> &str {
            &self.0
        }

        fn credentials(&self) -> &Credentials {
            &self.1
        }

        async fn continuous_move(&self, velocity: Velocity) -> Result<(), SessionError> {
            self.2.lock().push(velocity);
            Ok(())
        }

        async fn stop(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct NullProvider(Arc<Mutex<Vec<Velocity>>>);

    impl SessionProvider for NullProvider {
        type Session = NullSession;

        async fn open(
            &self,
            endpoint: &str,
            credentials: &Credentials,
        ) -> Result<NullSession, SessionError> {
            Ok(NullSession(
                endpoint.to_string(),
                credentials.clone(),
                Arc::clone(&self.0),
            ))
        }
    }

    fn camera(id: &str) -> DeviceRecord {
        let mut record = DeviceRecord::new(id);
        record.address = "10.0.0.2".into();
        record.xaddrs = "http://10.0.0.2/onvif/device_service".into();
        record
    }

    fn setup(
        dir: &tempfile::TempDir,
        found: Vec<DeviceRecord>,
    ) -> (Bridge<NullProvider, Arc<FakeBus>, FixedSource>, Arc<FakeBus>) {
        let bus = Arc::new(FakeBus::default());
        let store = JsonFileStore::new(dir.path().join("cams.json"));
        let bridge = Bridge::new(
            &BridgeConfig::default(),
            NullProvider::default(),
            Arc::clone(&bus),
            FixedSource(found),
            Box::new(store),
        );
        (bridge, bus)
    }

    #[tokio::test]
    async fn test_reload_announces_and_subscribes_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (bridge, bus) = setup(&dir, vec![camera("urn:uuid:a")]);

        bridge.reload().await.expect("reload");
        bridge.reload().await.expect("reload");

        let topics: Vec<String> = bus.published.lock().iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(
            topics,
            [
                "onvif/announce",
                "onvif/urn:uuid:a/announce",
                "onvif/announce",
                "onvif/urn:uuid:a/announce"
            ]
        );
        assert_eq!(*bus.subscriptions.lock(), ["onvif/urn:uuid:a/command"]);
        assert_eq!(bridge.stats().discoveries, 2);
    }

    #[tokio::test]
    async fn test_unknown_device_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (bridge, bus) = setup(&dir, vec![]);
        bridge.reload().await.expect("reload");

        bridge
            .handle_message("onvif/urn:uuid:ghost/command", br#"{"action":"up"}"#)
            .await
            .expect("handle");

        assert!(bus.published.lock().is_empty());
        assert!(bridge.motion.provider().0.lock().is_empty());
        assert_eq!(bridge.stats().ignored, 1);
    }

    #[tokio::test]
    async fn test_move_command_reaches_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cam = camera("urn:uuid:a");
        cam.invert_vertical = true;
        let (bridge, _) = setup(&dir, vec![cam]);
        bridge.reload().await.expect("reload");

        bridge
            .handle_message("onvif/urn:uuid:a/command", br#"{"action":"upright","timeout":50}"#)
            .await
            .expect("handle");

        assert_eq!(
            *bridge.motion.provider().0.lock(),
            [Velocity::new(1.0, -1.0)]
        );
        assert_eq!(bridge.stats().moves, 1);
    }

    #[tokio::test]
    async fn test_device_announce_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (bridge, bus) = setup(&dir, vec![camera("urn:uuid:a")]);
        bridge.reload().await.expect("reload");
        bus.published.lock().clear();

        bridge
            .handle_message("onvif/urn:uuid:a/command", br#"{"action":"announce"}"#)
            .await
            .expect("handle");

        let published = bus.published.lock();
        assert_eq!(published.len(), 2);
        let record: DeviceRecord = serde_json::from_slice(&published[1].1).expect("json");
        assert_eq!(record.identifier, "urn:uuid:a");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (bridge, _) = setup(&dir, vec![]);

        let result = bridge.handle_message("onvif/command", b"reload").await;
        assert!(matches!(result, Err(BridgeError::Command(_))));
    }

    #[tokio::test]
    async fn test_persisted_only_devices_accept_commands_but_are_not_announced() {
        let dir = tempfile::tempdir().expect("tempdir");
        JsonFileStore::new(dir.path().join("cams.json"))
            .save(&[camera("urn:uuid:offline")])
            .expect("seed");
        let (bridge, bus) = setup(&dir, vec![]);

        bridge.reload().await.expect("reload");
        assert!(bus.published.lock().is_empty());
        assert!(bridge.registry().lookup("urn:uuid:offline").is_some());

        bridge
            .dispatch(Command::Move {
                device: "urn:uuid:offline".into(),
                direction: crate::command::Direction::Left,
                stop_after: Duration::from_millis(10),
                credentials: Credentials::default(),
            })
            .await
            .expect("dispatch");
        assert_eq!(
            *bridge.motion.provider().0.lock(),
            [Velocity::new(-1.0, 0.0)]
        );
    }
}
