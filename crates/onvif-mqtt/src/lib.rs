// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ONVIF camera bridge for MQTT
//!
//! Discovers ONVIF cameras on the local network, announces them on an MQTT
//! broker and drives their pan/tilt motors from MQTT commands.
//!
//! # Features
//!
//! - **Discovery**: WS-Discovery probes on every configured interface
//! - **Device Registry**: merges discovered devices with persisted overrides
//! - **Motion Control**: continuous moves with a debounced auto-stop
//! - **Command Routing**: per-device and global command topics
//!
//! # Quick Start
//!
//! ```bash
//! # Default broker (tcp://localhost:1883) and prefix (onvif)
//! onvif-mqtt
//!
//! # Explicit broker and credentials
//! MQTT_SERVER=tcp://10.0.0.5:1883 DEFAULT_USER=admin DEFAULT_PASSWORD=secret onvif-mqtt
//!
//! # Using config file
//! onvif-mqtt --config bridge.toml
//! ```
//!
//! # Topics
//!
//! | Topic | Direction | Payload |
//! |-------|-----------|---------|
//! | `onvif/announce` | out | device record |
//! | `onvif/<urn>/announce` | out | device record |
//! | `onvif/command` | in | `{"action":"announce"}` or `"reload"` |
//! | `onvif/<urn>/command` | in | `{"action":"up","timeout":500}` |

pub mod bridge;
pub mod bus;
pub mod command;
pub mod config;
pub mod device;
pub mod discovery;
pub mod envelope;
pub mod motion;
pub mod onvif;
pub mod registry;
pub mod session;
pub mod stats;
pub mod store;

pub use bridge::{Bridge, BridgeError};
pub use bus::{BusError, BusEvent, EventStream, MessageBus, MqttBus, MqttEvents};
pub use command::{Command, CommandDefaults, CommandError, Direction, Topic};
pub use config::{BridgeConfig, ConfigError};
pub use device::DeviceRecord;
pub use discovery::{DeviceSource, DiscoveryEngine};
pub use motion::{MotionController, MotionPhase, MoveOutcome};
pub use onvif::{OnvifSession, OnvifSessionProvider};
pub use registry::{reconcile, Device, DeviceRegistry, Refresh};
pub use session::{ControlSession, Credentials, SessionError, SessionProvider, Velocity};
pub use stats::{BridgeStats, BridgeStatsSnapshot};
pub use store::{DeviceStore, JsonFileStore, StoreError};
