// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ONVIF PTZ control sessions over SOAP/HTTP.
//!
//! Opening a session asks the device service for its capabilities, then the
//! media service for a profile token. Move and stop requests go to the PTZ
//! service with that token. Every request carries a WS-Security
//! UsernameToken digest when credentials are set.

use crate::envelope::strip_namespaces;
use crate::session::{ControlSession, Credentials, SessionError, SessionProvider, Velocity};
use base64::Engine;
use reqwest::Client;
use roxmltree::{Document, Node};
use sha1::{Digest, Sha1};
use std::time::Duration;

/// HTTP timeout for every SOAP request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Opens [`OnvifSession`]s.
#[derive(Debug, Clone)]
pub struct OnvifSessionProvider {
    client: Client,
}

impl OnvifSessionProvider {
    pub fn new(timeout: Duration) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Transport(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl SessionProvider for OnvifSessionProvider {
    type Session = OnvifSession;

    async fn open(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<OnvifSession, SessionError> {
        let response = soap_call(
            &self.client,
            endpoint,
            credentials,
            r#"<GetCapabilities xmlns="http://www.onvif.org/ver10/device/wsdl"><Category>All</Category></GetCapabilities>"#,
        )
        .await?;
        let capabilities = parse_capabilities(&response)?;
        let ptz_url = capabilities.ptz.ok_or(SessionError::Unsupported)?;
        let media_url = capabilities.media.unwrap_or_else(|| endpoint.to_string());

        let response = soap_call(
            &self.client,
            &media_url,
            credentials,
            r#"<GetProfiles xmlns="http://www.onvif.org/ver10/media/wsdl"/>"#,
        )
        .await?;
        let profile_token = parse_profile_token(&response)?;

        tracing::debug!(%endpoint, %ptz_url, %profile_token, "ONVIF session opened");

        Ok(OnvifSession {
            client: self.client.clone(),
            endpoint: endpoint.to_string(),
            credentials: credentials.clone(),
            ptz_url,
            profile_token,
        })
    }
}

/// An authenticated PTZ channel to one camera profile.
#[derive(Debug, Clone)]
pub struct OnvifSession {
    client: Client,
    endpoint: String,
    credentials: Credentials,
    ptz_url: String,
    profile_token: String,
}

impl OnvifSession {
    pub fn ptz_url(&self) -> &str {
        &self.ptz_url
    }

    pub fn profile_token(&self) -> &str {
        &self.profile_token
    }
}

impl ControlSession for OnvifSession {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    async fn continuous_move(&self, velocity: Velocity) -> Result<(), SessionError> {
        let body = continuous_move_body(&self.profile_token, velocity);
        soap_call(&self.client, &self.ptz_url, &self.credentials, &body).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), SessionError> {
        let body = stop_body(&self.profile_token);
        soap_call(&self.client, &self.ptz_url, &self.credentials, &body).await?;
        Ok(())
    }
}

fn continuous_move_body(profile_token: &str, velocity: Velocity) -> String {
    format!(
        r#"<ContinuousMove xmlns="http://www.onvif.org/ver20/ptz/wsdl">
      <ProfileToken>{}</ProfileToken>
      <Velocity>
        <PanTilt xmlns="http://www.onvif.org/ver10/schema" x="{:.2}" y="{:.2}"/>
      </Velocity>
    </ContinuousMove>"#,
        xml_escape(profile_token),
        velocity.x,
        velocity.y
    )
}

fn stop_body(profile_token: &str) -> String {
    format!(
        r#"<Stop xmlns="http://www.onvif.org/ver20/ptz/wsdl">
      <ProfileToken>{}</ProfileToken>
      <PanTilt>true</PanTilt>
      <Zoom>false</Zoom>
    </Stop>"#,
        xml_escape(profile_token)
    )
}

/// Wrap `body` in a SOAP 1.2 envelope with an optional security header.
pub fn soap_envelope(credentials: &Credentials, body: &str) -> String {
    let header = if credentials.is_anonymous() {
        String::new()
    } else {
        security_header(credentials)
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Header>{}</s:Header>
  <s:Body>
    {}
  </s:Body>
</s:Envelope>"#,
        header, body
    )
}

/// WS-Security UsernameToken header with a fresh nonce and timestamp.
pub fn security_header(credentials: &Credentials) -> String {
    let nonce: [u8; 16] = rand::random();
    let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let digest = password_digest(&nonce, &created, &credentials.password);
    let nonce = base64::engine::general_purpose::STANDARD.encode(nonce);

    format!(
        r#"
    <wsse:Security s:mustUnderstand="true" xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">
      <wsse:UsernameToken>
        <wsse:Username>{}</wsse:Username>
        <wsse:Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">{}</wsse:Password>
        <wsse:Nonce EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary">{}</wsse:Nonce>
        <wsu:Created>{}</wsu:Created>
      </wsse:UsernameToken>
    </wsse:Security>
  "#,
        xml_escape(&credentials.user),
        digest,
        nonce,
        created
    )
}

/// `Base64(SHA1(nonce + created + password))`.
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

async fn soap_call(
    client: &Client,
    url: &str,
    credentials: &Credentials,
    body: &str,
) -> Result<String, SessionError> {
    let response = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, SOAP_CONTENT_TYPE)
        .body(soap_envelope(credentials, body))
        .send()
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;

    if let Some(reason) = soap_fault(&text) {
        tracing::debug!(%url, %status, %reason, "SOAP fault");
        return Err(SessionError::Rejected(reason));
    }
    if !status.is_success() {
        return Err(SessionError::Rejected(format!("HTTP {}", status)));
    }

    Ok(text)
}

/// Service addresses advertised by `GetCapabilities`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub media: Option<String>,
    pub ptz: Option<String>,
}

pub fn parse_capabilities(xml: &str) -> Result<Capabilities, SessionError> {
    let stripped = strip_namespaces(xml);
    let doc = Document::parse(&stripped).map_err(|e| SessionError::Malformed(e.to_string()))?;

    let Some(capabilities) = find(doc.root(), "Capabilities") else {
        return Err(SessionError::Malformed(
            "GetCapabilities response without Capabilities".into(),
        ));
    };

    let xaddr = |service: &str| {
        child(capabilities, service)
            .and_then(|node| child(node, "XAddr"))
            .and_then(|node| node.text())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    };

    Ok(Capabilities {
        media: xaddr("Media"),
        ptz: xaddr("PTZ"),
    })
}

/// Token of the first profile with a PTZ configuration, else the first profile.
pub fn parse_profile_token(xml: &str) -> Result<String, SessionError> {
    let stripped = strip_namespaces(xml);
    let doc = Document::parse(&stripped).map_err(|e| SessionError::Malformed(e.to_string()))?;

    let profiles: Vec<Node> = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "Profiles")
        .filter(|n| n.attribute("token").is_some())
        .collect();

    profiles
        .iter()
        .find(|p| child(**p, "PTZConfiguration").is_some())
        .or_else(|| profiles.first())
        .and_then(|p| p.attribute("token"))
        .map(str::to_string)
        .ok_or_else(|| SessionError::Malformed("no media profile".into()))
}

/// Reason text of a SOAP fault, if `xml` is one.
pub fn soap_fault(xml: &str) -> Option<String> {
    let stripped = strip_namespaces(xml);
    let doc = Document::parse(&stripped).ok()?;
    let fault = find(doc.root(), "Fault")?;

    let reason = ["Text", "faultstring", "Value"]
        .iter()
        .find_map(|name| find(fault, name).and_then(|n| n.text()))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("SOAP fault");
    Some(reason.to_string())
}

fn find<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}
