/*
 *  transport.rs
 *
 *  inkd - pictures over pub/sub
 *
 *  Message bus abstraction the session state machine runs against
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

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// A message delivered on a subscribed topic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Broker connection as the session sees it. The production
/// implementation speaks MQTT; tests substitute a scripted fake.
#[async_trait]
pub trait Transport: Send {
    /// Establish the connection. Called again after a connection loss,
    /// so implementations must be restartable.
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Wait for the next inbound message. An error here means the
    /// connection is gone and the session should reconnect.
    async fn next_message(&mut self) -> Result<InboundMessage, TransportError>;

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Best-effort orderly disconnect for shutdown.
    async fn disconnect(&mut self);
}
