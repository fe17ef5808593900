// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message bus (MQTT).

use crate::config::{ConfigError, MqttConfig};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Delay before polling again after a connection error.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const REQUEST_CAPACITY: usize = 64;

/// Bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
}

/// Publish/subscribe side of the bus.
pub trait MessageBus: Send + Sync + 'static {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), BusError>> + Send;

    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<(), BusError>> + Send;
}

/// Something that arrived from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// The connection was (re-)established; subscriptions must be renewed.
    Connected,
    /// An application message.
    Message { topic: String, payload: Vec<u8> },
}

/// Receive side of the bus.
pub trait EventStream: Send + 'static {
    /// Next event, or `None` once the stream is closed.
    fn next(&mut self) -> impl Future<Output = Option<BusEvent>> + Send;
}

/// MQTT publisher/subscriber.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

impl MessageBus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        self.client.subscribe(topic, QoS::AtMostOnce).await?;
        tracing::debug!(%topic, "Subscribed");
        Ok(())
    }
}

/// MQTT event loop.
pub struct MqttEvents {
    eventloop: EventLoop,
}

impl EventStream for MqttEvents {
    async fn next(&mut self) -> Option<BusEvent> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Some(BusEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Reconnected to MQTT broker");
                    return Some(BusEvent::Connected);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        "MQTT connection error: {} (retrying in {:?})",
                        e,
                        RECONNECT_DELAY
                    );
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

/// Build client options from the configuration.
pub fn mqtt_options(config: &MqttConfig) -> Result<MqttOptions, BusError> {
    let (host, port) = config.broker()?;
    let mut options = MqttOptions::new(config.client_id.clone(), host, port);
    options.set_keep_alive(config.keep_alive());
    Ok(options)
}

/// Connect to the broker and wait for the connection to be acknowledged.
pub async fn connect(config: &MqttConfig) -> Result<(MqttBus, MqttEvents), BusError> {
    let options = mqtt_options(config)?;
    let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            break;
        }
    }

    tracing::info!(server = %config.server, "Connected to MQTT broker");
    Ok((MqttBus { client }, MqttEvents { eventloop }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mqtt_options() {
        let config = MqttConfig {
            server: "tcp://broker.local:1884".into(),
            client_id: "cams".into(),
            keep_alive_secs: 15,
            ..Default::default()
        };

        let options = mqtt_options(&config).expect("options");
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.client_id(), "cams");
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
    }

    #[test]
    fn test_mqtt_options_rejects_bad_server() {
        let config = MqttConfig {
            server: "ws://broker.local".into(),
            ..Default::default()
        };
        assert!(matches!(mqtt_options(&config), Err(BusError::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_refused_is_an_error() {
        // Nothing listens on port 1 of the loopback.
        let config = MqttConfig {
            server: "tcp://127.0.0.1:1".into(),
            ..Default::default()
        };
        assert!(connect(&config).await.is_err());
    }
}
