// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command topics and payloads.
//!
//! Topics handled:
//! - `<prefix>/command`: `{"action":"announce"}` or `"reload"` rediscovers.
//! - `<prefix>/<identifier>/command`: `{"action": ..., "timeout": ms,
//!   "user": ..., "password": ...}` for one device.

use crate::config::BridgeConfig;
use crate::session::{Credentials, Velocity};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Command errors.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Where a message was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic<'a> {
    /// `<prefix>/command`
    Global,
    /// `<prefix>/<identifier>/command`
    Device(&'a str),
    /// Anything else.
    Other,
}

/// Classify `topic` relative to `prefix`.
pub fn parse_topic<'a>(prefix: &str, topic: &'a str) -> Topic<'a> {
    let Some(rest) = topic
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
    else {
        return Topic::Other;
    };

    if rest == "command" {
        return Topic::Global;
    }

    match rest.strip_suffix("/command") {
        Some(identifier) if !identifier.is_empty() && !identifier.contains('/') => {
            Topic::Device(identifier)
        }
        _ => Topic::Other,
    }
}

/// The eight pan/tilt directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
}

impl Direction {
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "upleft" => Some(Self::UpLeft),
            "upright" => Some(Self::UpRight),
            "downleft" => Some(Self::DownLeft),
            "downright" => Some(Self::DownRight),
            _ => None,
        }
    }

    /// Unit velocity, x = pan (right positive), y = tilt (up positive).
    pub fn velocity(self) -> Velocity {
        let (x, y) = match self {
            Self::Up => (0.0, 1.0),
            Self::Down => (0.0, -1.0),
            Self::Left => (-1.0, 0.0),
            Self::Right => (1.0, 0.0),
            Self::UpLeft => (-1.0, 1.0),
            Self::UpRight => (1.0, 1.0),
            Self::DownLeft => (-1.0, -1.0),
            Self::DownRight => (1.0, -1.0),
        };
        Velocity::new(x, y)
    }
}

/// A decoded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Run discovery again and announce the results.
    Reload,
    /// Announce one device.
    Announce { device: String },
    /// Move one device.
    Move {
        device: String,
        direction: Direction,
        stop_after: Duration,
        credentials: Credentials,
    },
}

/// Values used when a move command leaves fields out.
#[derive(Debug, Clone)]
pub struct CommandDefaults {
    pub timeout: Duration,
    pub user: String,
    pub password: String,
}

impl CommandDefaults {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            timeout: config.motion.default_timeout(),
            user: config.default_user.clone().unwrap_or_default(),
            password: config.default_password.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DevicePayload {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    timeout: Option<f64>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Decode one message. `Ok(None)` means the message is not for us.
pub fn parse_command(
    prefix: &str,
    topic: &str,
    payload: &[u8],
    defaults: &CommandDefaults,
) -> Result<Option<Command>, CommandError> {
    match parse_topic(prefix, topic) {
        Topic::Global => {
            let value: Value = serde_json::from_slice(payload)?;
            let reload = value.as_str() == Some("reload")
                || value.get("action").and_then(Value::as_str) == Some("announce");
            Ok(reload.then_some(Command::Reload))
        }
        Topic::Device(identifier) => {
            let value: Value = serde_json::from_slice(payload)?;
            if !value.is_object() {
                return Ok(None);
            }
            let payload: DevicePayload = serde_json::from_value(value)?;
            Ok(device_command(identifier, payload, defaults))
        }
        Topic::Other => Ok(None),
    }
}

fn device_command(
    identifier: &str,
    payload: DevicePayload,
    defaults: &CommandDefaults,
) -> Option<Command> {
    let action = payload.action?;
    if action == "announce" {
        return Some(Command::Announce {
            device: identifier.to_string(),
        });
    }

    let direction = Direction::from_action(&action)?;
    let stop_after = payload
        .timeout
        .map(f64::round)
        .filter(|ms| ms.is_finite() && *ms >= 1.0)
        .map(|ms| Duration::from_millis(ms as u64))
        .unwrap_or(defaults.timeout);
    let or_default = |value: Option<String>, default: &str| {
        value
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    };

    Some(Command::Move {
        device: identifier.to_string(),
        direction,
        stop_after,
        credentials: Credentials::new(
            or_default(payload.user, &defaults.user),
            or_default(payload.password, &defaults.password),
        ),
    })
}
