// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WS-Discovery `ProbeMatches` parsing.
//!
//! Responses come from whatever cameras answer a multicast probe, so parsing
//! is best effort: anything that does not look like a probe match is dropped
//! without raising an error.

use crate::device::DeviceRecord;
use regex::Regex;
use roxmltree::{Document, Node};
use std::borrow::Cow;
use std::net::IpAddr;
use std::sync::OnceLock;

/// Scope URI prefix carrying the device name.
pub const NAME_SCOPE: &str = "onvif://www.onvif.org/name/";

/// Scope URI prefix carrying the hardware model.
pub const HARDWARE_SCOPE: &str = "onvif://www.onvif.org/hardware/";

fn tag_prefixes() -> &'static Regex {
    static TAG_PREFIXES: OnceLock<Regex> = OnceLock::new();
    TAG_PREFIXES.get_or_init(|| Regex::new(r"<(/?)[A-Za-z_][\w.-]*:").expect("static regex"))
}

/// Remove element-name prefixes so elements match by local name.
///
/// Cameras are sloppy about declaring the prefixes they use on elements;
/// stripping them lets a strict XML parser accept those documents.
/// Declarations, attributes and text content are left untouched.
pub fn strip_namespaces(xml: &str) -> String {
    tag_prefixes().replace_all(xml, "<$1").into_owned()
}

/// Parse one probe response into a device record.
///
/// `source` is the address the response came from. Returns `None` when the
/// document is not a well-formed `Envelope/Body/ProbeMatches/ProbeMatch`.
pub fn parse_probe_match(xml: &str, source: IpAddr) -> Option<DeviceRecord> {
    let stripped = strip_namespaces(xml);
    let doc = match Document::parse(&stripped) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::debug!(%source, "Discarding unparsable probe response: {}", e);
            return None;
        }
    };

    let envelope = doc.root_element();
    if envelope.tag_name().name() != "Envelope" {
        tracing::debug!(%source, "Discarding probe response without Envelope root");
        return None;
    }

    let probe_match = child(envelope, "Body")
        .and_then(|body| child(body, "ProbeMatches"))
        .and_then(|matches| child(matches, "ProbeMatch"));
    let Some(probe_match) = probe_match else {
        tracing::debug!(%source, "Discarding envelope without ProbeMatch");
        return None;
    };

    let identifier = child(probe_match, "EndpointReference")
        .and_then(|epr| child(epr, "Address"))
        .and_then(text)?;
    let xaddrs = child(probe_match, "XAddrs").and_then(text)?;
    let scopes = child(probe_match, "Scopes").and_then(text).unwrap_or("");

    let (name, hardware) = scope_metadata(scopes);

    Some(DeviceRecord {
        identifier: identifier.to_string(),
        address: source.to_string(),
        name,
        hardware,
        xaddrs: xaddrs.to_string(),
        ..Default::default()
    })
}

/// Extract `(name, hardware)` from a space-separated scope list.
///
/// Values are percent-decoded; a missing scope yields an empty string.
pub fn scope_metadata(scopes: &str) -> (String, String) {
    let mut name = String::new();
    let mut hardware = String::new();

    for token in scopes.split_whitespace() {
        if let Some(raw) = token.strip_prefix(NAME_SCOPE) {
            name = decode(raw).into_owned();
        } else if let Some(raw) = token.strip_prefix(HARDWARE_SCOPE) {
            hardware = decode(raw).into_owned();
        }
    }

    (name, hardware)
}

fn decode(raw: &str) -> Cow<'_, str> {
    urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw))
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn text<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    node.text().map(str::trim).filter(|t| !t.is_empty())
}
