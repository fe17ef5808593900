// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WS-Discovery probing.
//!
//! One probe is multicast per interface; responses are collected for a fixed
//! window after the probe went out, then the cycle resolves. Late responses
//! are dropped. Duplicates across interfaces are returned as-is, the
//! registry merge deduplicates them.

use crate::config::DiscoveryConfig;
use crate::device::DeviceRecord;
use crate::envelope::parse_probe_match;
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// WS-Discovery multicast group.
pub const WS_DISCOVERY_ADDR: SocketAddrV4 =
    SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 3702);

const RECV_BUFFER_SIZE: usize = 65_535;

/// Anything that can produce a batch of freshly discovered devices.
pub trait DeviceSource: Send + Sync + 'static {
    /// Run one discovery pass.
    fn discover(&self) -> impl Future<Output = Vec<DeviceRecord>> + Send;
}

/// Build a WS-Discovery `Probe` for network video transmitters.
pub fn probe_message(message_id: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:a="http://schemas.xmlsoap.org/ws/2004/08/addressing"
            xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery"
            xmlns:dn="http://www.onvif.org/ver10/network/wsdl">
  <s:Header>
    <a:MessageID>{}</a:MessageID>
    <a:To s:mustUnderstand="1">urn:schemas-xmlsoap-org:ws:2005:04:discovery</a:To>
    <a:Action s:mustUnderstand="1">http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</a:Action>
  </s:Header>
  <s:Body>
    <d:Probe>
      <d:Types>dn:NetworkVideoTransmitter</d:Types>
    </d:Probe>
  </s:Body>
</s:Envelope>"#,
        message_id
    )
}

/// Pick the IPv4 interfaces to probe.
///
/// `available` is the host's `(name, address)` list. Each requested entry
/// is an interface name or a literal IPv4 address; an empty request selects
/// every interface with an IPv4 address. Unknown entries are logged and
/// skipped.
pub fn select_interfaces(
    available: &[(String, IpAddr)],
    requested: &[String],
) -> Vec<(String, Ipv4Addr)> {
    let ipv4 = |(name, addr): &(String, IpAddr)| match addr {
        IpAddr::V4(v4) => Some((name.clone(), *v4)),
        IpAddr::V6(_) => None,
    };

    if requested.is_empty() {
        return available.iter().filter_map(ipv4).collect();
    }

    let mut selected = Vec::new();
    for wanted in requested {
        let wanted = wanted.trim();
        if wanted.is_empty() {
            continue;
        }

        if let Ok(addr) = wanted.parse::<Ipv4Addr>() {
            selected.push((wanted.to_string(), addr));
            continue;
        }

        let before = selected.len();
        selected.extend(
            available
                .iter()
                .filter(|(name, _)| name == wanted)
                .filter_map(ipv4),
        );
        if selected.len() == before {
            tracing::warn!(interface = %wanted, "Interface has no IPv4 address, skipping");
        }
    }

    selected
}

/// WS-Discovery engine probing a configured set of interfaces.
#[derive(Debug, Clone)]
pub struct DiscoveryEngine {
    interfaces: Vec<String>,
    window: Duration,
}

impl DiscoveryEngine {
    /// Create an engine for the given interfaces (empty = all IPv4 interfaces).
    pub fn new(interfaces: Vec<String>, config: &DiscoveryConfig) -> Self {
        Self {
            interfaces,
            window: config.window(),
        }
    }

    /// Collection window per probe.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Resolve configured interface identifiers against the host's interfaces.
    pub fn resolve_interfaces(&self) -> Vec<(String, Ipv4Addr)> {
        let available = match local_ip_address::list_afinet_netifas() {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!("Failed to list network interfaces: {}", e);
                Vec::new()
            }
        };
        select_interfaces(&available, &self.interfaces)
    }

    /// Probe every resolved interface concurrently and gather the responses.
    pub async fn probe_all(&self) -> Vec<DeviceRecord> {
        let interfaces = self.resolve_interfaces();
        if interfaces.is_empty() {
            tracing::warn!("No IPv4 interfaces to probe");
            return Vec::new();
        }

        let mut probes = JoinSet::new();
        for (name, addr) in interfaces {
            let window = self.window;
            probes.spawn(async move {
                let result = probe_interface(addr, window).await;
                (name, result)
            });
        }

        let mut records = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((name, Ok(found))) => {
                    tracing::debug!(interface = %name, "Probe found {} devices", found.len());
                    records.extend(found);
                }
                Ok((name, Err(e))) => {
                    tracing::warn!(interface = %name, "Probe failed: {}", e);
                }
                Err(e) => {
                    tracing::warn!("Probe task failed: {}", e);
                }
            }
        }

        tracing::info!("Discovery collected {} probe matches", records.len());
        records
    }
}

impl DeviceSource for DiscoveryEngine {
    async fn discover(&self) -> Vec<DeviceRecord> {
        self.probe_all().await
    }
}

fn bind_probe_socket(addr: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(addr, 0)).into())?;
    socket.set_multicast_if_v4(&addr)?;
    socket.set_multicast_ttl_v4(1)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// Send one probe from `addr` and collect matches until `window` elapses.
pub async fn probe_interface(addr: Ipv4Addr, window: Duration) -> io::Result<Vec<DeviceRecord>> {
    let socket = bind_probe_socket(addr)?;
    let message_id = format!("urn:uuid:{}", uuid::Uuid::new_v4());

    socket
        .send_to(probe_message(&message_id).as_bytes(), WS_DISCOVERY_ADDR)
        .await?;
    tracing::debug!(%addr, %message_id, "Probe sent");

    let deadline = Instant::now() + window;
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut records = Vec::new();

    loop {
        match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Ok((len, from))) => {
                let xml = String::from_utf8_lossy(&buf[..len]);
                if let Some(record) = parse_probe_match(&xml, from.ip()) {
                    tracing::debug!(
                        device = %record.identifier,
                        from = %from,
                        "Probe match"
                    );
                    records.push(record);
                }
            }
            Ok(Err(e)) => {
                tracing::debug!(%addr, "Receive error during probe: {}", e);
            }
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn host() -> Vec<(String, IpAddr)> {
        vec![
            ("lo".into(), IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ("eth0".into(), IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))),
            ("eth0".into(), IpAddr::V6(Ipv6Addr::LOCALHOST)),
            ("wlan0".into(), IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
        ]
    }

    #[test]
    fn test_select_all_ipv4() {
        let selected = select_interfaces(&host(), &[]);
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(|(name, _)| name != "wlan0"));
    }

    #[test]
    fn test_select_by_name_and_address() {
        let selected = select_interfaces(
            &host(),
            &["eth0".into(), "10.1.2.3".into(), "wlan0".into(), "".into()],
        );
        assert_eq!(
            selected,
            vec![
                ("eth0".to_string(), Ipv4Addr::new(192, 168, 1, 10)),
                ("10.1.2.3".to_string(), Ipv4Addr::new(10, 1, 2, 3)),
            ]
        );
    }

    #[test]
    fn test_probe_message() {
        let msg = probe_message("urn:uuid:0000");
        assert!(msg.contains("<a:MessageID>urn:uuid:0000</a:MessageID>"));
        assert!(msg.contains("dn:NetworkVideoTransmitter"));
        assert!(roxmltree::Document::parse(&msg).is_ok());
    }

    #[test]
    fn test_engine_window() {
        let engine = DiscoveryEngine::new(
            vec!["eth0".into()],
            &DiscoveryConfig { window_ms: 250 },
        );
        assert_eq!(engine.window(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_probe_interface_times_out_empty() {
        // Loopback has no cameras; the window must still close.
        let result = probe_interface(Ipv4Addr::LOCALHOST, Duration::from_millis(50)).await;
        if let Ok(records) = result {
            assert!(records.is_empty());
        }
    }
}
