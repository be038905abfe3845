/*
 *  mqtt.rs
 *
 *  inkd - pictures over pub/sub
 *
 *  MQTT transport implementation (rumqttc)
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{BrokerConfig, TransportKind};
use crate::transport::{InboundMessage, Transport, TransportError};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const EVENT_CHANNEL_CAPACITY: usize = 32;
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// MQTT connection. Commands arrive at QoS 1 (a dropped command on a
/// device that refreshes every few minutes is worse than a duplicate);
/// status reports go out at QoS 0 since the next report supersedes.
///
/// The event loop runs in its own task ("pump") once connected: a panel
/// refresh blocks the session for tens of seconds, and keep-alive pings
/// must keep flowing during that window or the broker drops us.
pub struct MqttTransport {
    options: MqttOptions,
    client: Option<AsyncClient>,
    inbound: Option<mpsc::Receiver<Result<InboundMessage, TransportError>>>,
    pump: Option<JoinHandle<()>>,
}

impl MqttTransport {
    pub fn new(broker: &BrokerConfig, device_id: &str) -> Self {
        let client_id = broker
            .client_id
            .clone()
            .unwrap_or_else(|| format!("inkd-{device_id}"));

        let mut options = match broker.transport {
            TransportKind::Tcp => {
                let mut o = MqttOptions::new(client_id, &broker.host, broker.port);
                if broker.tls {
                    o.set_transport(rumqttc::Transport::tls_with_default_config());
                }
                o
            }
            TransportKind::Websocket => {
                // Validation guarantees the path is present here.
                let path = broker.websocket_path.as_deref().unwrap_or("/mqtt");
                let scheme = if broker.tls { "wss" } else { "ws" };
                let url = format!("{scheme}://{}:{}{path}", broker.host, broker.port);
                let mut o = MqttOptions::new(client_id, url, broker.port);
                if broker.tls {
                    o.set_transport(rumqttc::Transport::wss_with_default_config());
                } else {
                    o.set_transport(rumqttc::Transport::ws());
                }
                o
            }
        };

        options.set_keep_alive(KEEP_ALIVE);
        if let Some(user) = broker.username.as_ref() {
            options.set_credentials(
                user.clone(),
                broker.password.clone().unwrap_or_default(),
            );
        }

        Self {
            options,
            client: None,
            inbound: None,
            pump: None,
        }
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.client
            .as_ref()
            .ok_or_else(|| TransportError::Publish("not connected".to_string()))
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        let (client, mut eventloop) =
            AsyncClient::new(self.options.clone(), EVENT_CHANNEL_CAPACITY);

        // Drive the event loop until the broker acknowledges us.
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => break,
                Ok(other) => debug!("pre-ack event: {other:?}"),
                Err(e) => return Err(TransportError::Connect(e.to_string())),
            }
        }

        info!(
            "connected to broker {}:{}",
            self.options.broker_address().0,
            self.options.broker_address().1
        );

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pump = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let msg = InboundMessage {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        if tx.send(Ok(msg)).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = tx
                            .send(Err(TransportError::ConnectionLost(e.to_string())))
                            .await;
                        return;
                    }
                }
            }
        });

        self.client = Some(client);
        self.inbound = Some(rx);
        self.pump = Some(pump);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client()?
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        debug!("subscribed to {topic}");
        Ok(())
    }

    async fn next_message(&mut self) -> Result<InboundMessage, TransportError> {
        let inbound = self
            .inbound
            .as_mut()
            .ok_or_else(|| TransportError::ConnectionLost("not connected".to_string()))?;

        let result = match inbound.recv().await {
            Some(Ok(msg)) => return Ok(msg),
            Some(Err(e)) => Err(e),
            None => Err(TransportError::ConnectionLost(
                "event loop terminated".to_string(),
            )),
        };
        self.client = None;
        self.inbound = None;
        self.pump = None;
        result
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client()?
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                warn!("disconnect failed: {e}");
            }
        }
        // Give the pump a moment to flush the DISCONNECT packet; it
        // exits on its own once the connection closes.
        if let Some(pump) = self.pump.take() {
            let _ = tokio::time::timeout(DISCONNECT_GRACE, pump).await;
        }
        self.inbound = None;
    }
}
