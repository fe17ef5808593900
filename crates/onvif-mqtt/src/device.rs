// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device records.
//!
//! Field names follow the persisted `cams.json` document so existing stores
//! keep loading.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One discovered or persisted camera.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Stable unique key (WS-Addressing endpoint, usually `urn:uuid:...`).
    #[serde(rename = "urn")]
    pub identifier: String,

    /// Last-known responder address.
    #[serde(default)]
    pub address: String,

    /// Name advertised in the discovery scopes.
    #[serde(default)]
    pub name: String,

    /// Hardware model advertised in the discovery scopes.
    #[serde(default)]
    pub hardware: String,

    /// Space-separated control endpoint list.
    #[serde(default)]
    pub xaddrs: String,

    /// Negate the tilt axis.
    #[serde(
        rename = "invertVertical",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub invert_vertical: bool,

    /// Negate the pan axis.
    #[serde(
        rename = "invertHorizontal",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub invert_horizontal: bool,

    /// Operator-assigned display name.
    #[serde(
        rename = "deviceName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub device_name: Option<String>,

    /// Keys this version does not know about, kept so a rewrite never drops them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceRecord {
    /// Create a record with only the identifier set.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    /// Name to show operators: the override if set, else the advertised name.
    pub fn display_name(&self) -> &str {
        self.device_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.name)
    }

    /// Endpoint used to open a control session (first XAddr).
    pub fn control_endpoint(&self) -> Option<&str> {
        self.xaddrs.split_whitespace().next()
    }

    /// Copy the persisted-only fields of `persisted` onto this record.
    pub fn adopt_overrides(&mut self, persisted: &DeviceRecord) {
        self.invert_vertical = persisted.invert_vertical;
        self.invert_horizontal = persisted.invert_horizontal;
        self.device_name = persisted.device_name.clone();
        for (key, value) in &persisted.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}
