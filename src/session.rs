/*
 *  session.rs
 *
 *  inkd - pictures over pub/sub
 *
 *  Broker session lifecycle: connect, dispatch, reconnect with backoff
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

use log::{debug, info, warn};
use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::command::{self, StatusReport};
use crate::config::DeviceConfig;
use crate::coordinator::RenderCoordinator;
use crate::transport::{InboundMessage, Transport, TransportError};

/// Session lifecycle states; also reported on the status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    ShuttingDown,
}

const BACKOFF_INITIAL: Duration = Duration::from_secs(5);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Exponential reconnect backoff with jitter. Jitter keeps a fleet of
/// agents from stampeding the broker when it comes back up.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self::with_bounds(BACKOFF_INITIAL, BACKOFF_MAX)
    }

    pub fn with_bounds(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            initial,
            max,
        }
    }

    /// Next delay to wait, jittered +/-20%. Doubles the base each call
    /// up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let jitter: f64 = rand::rng().random_range(0.8..=1.2);
        let delay = self.current.mul_f64(jitter);
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Topic names this agent speaks on.
#[derive(Debug, Clone)]
pub struct Topics {
    /// Device-scoped command topic.
    pub command: String,
    /// Room-scoped command topic, if the device is assigned a room.
    pub room_command: Option<String>,
    /// Outbound status topic.
    pub status: String,
}

impl Topics {
    pub fn new(prefix: &str, device: &DeviceConfig) -> Self {
        Self {
            command: format!("{prefix}/{}/command", device.id),
            room_command: device
                .room
                .as_ref()
                .map(|room| format!("{prefix}/room/{room}/command")),
            status: format!("{prefix}/{}/status", device.id),
        }
    }

    fn is_command_topic(&self, topic: &str) -> bool {
        topic == self.command || self.room_command.as_deref() == Some(topic)
    }
}

/// Drives one broker session from startup to shutdown. Owns the
/// transport; the coordinator owns the panel.
pub struct Session<T: Transport> {
    transport: T,
    topics: Topics,
    state: SessionState,
    backoff: Backoff,
    shutdown: watch::Receiver<bool>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, topics: Topics, shutdown: watch::Receiver<bool>) -> Self {
        Self::with_backoff(transport, topics, Backoff::new(), shutdown)
    }

    /// Like `new` but with explicit backoff bounds, so tests do not
    /// wait out production reconnect delays.
    pub fn with_backoff(
        transport: T,
        topics: Topics,
        backoff: Backoff,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            topics,
            state: SessionState::Disconnected,
            backoff,
            shutdown,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run until shutdown is signalled. Connection losses are handled
    /// internally; this only returns once the session is torn down.
    pub async fn run(&mut self, coordinator: &mut RenderCoordinator) {
        loop {
            if *self.shutdown.borrow() && self.state != SessionState::ShuttingDown {
                self.state = SessionState::ShuttingDown;
            }

            match self.state {
                SessionState::Disconnected => {
                    self.state = SessionState::Connecting;
                }
                SessionState::Connecting => {
                    // The handshake is a suspension point too; a stalled
                    // connect must not outlive a shutdown request.
                    let result = {
                        let transport = &mut self.transport;
                        let topics = &self.topics;
                        let shutdown = &mut self.shutdown;
                        tokio::select! {
                            r = establish(transport, topics) => Some(r),
                            _ = shutdown.changed() => None,
                        }
                    };
                    match result {
                        Some(Ok(())) => {
                            self.backoff.reset();
                            self.state = SessionState::Connected;
                            info!("session established on {}", self.topics.command);
                        }
                        Some(Err(e)) => {
                            warn!("connection attempt failed: {e}");
                            self.state = SessionState::Reconnecting;
                        }
                        None => self.state = SessionState::ShuttingDown,
                    }
                }
                SessionState::Reconnecting => {
                    let delay = self.backoff.next_delay();
                    info!("reconnecting in {:.1}s", delay.as_secs_f64());
                    let shutdown = tokio::select! {
                        _ = sleep(delay) => false,
                        _ = self.shutdown.changed() => true,
                    };
                    self.state = if shutdown {
                        SessionState::ShuttingDown
                    } else {
                        SessionState::Connecting
                    };
                }
                SessionState::Connected => {
                    let next = {
                        let transport = &mut self.transport;
                        let shutdown = &mut self.shutdown;
                        tokio::select! {
                            msg = transport.next_message() => Some(msg),
                            _ = shutdown.changed() => None,
                        }
                    };
                    match next {
                        None => self.state = SessionState::ShuttingDown,
                        Some(Ok(msg)) => self.dispatch(msg, coordinator).await,
                        Some(Err(e)) => {
                            warn!("connection lost: {e}");
                            self.state = SessionState::Reconnecting;
                        }
                    }
                }
                SessionState::ShuttingDown => {
                    info!("shutting down session");
                    self.transport.disconnect().await;
                    return;
                }
            }
        }
    }

    async fn dispatch(&mut self, msg: InboundMessage, coordinator: &mut RenderCoordinator) {
        if !self.topics.is_command_topic(&msg.topic) {
            debug!("ignoring message on unexpected topic {}", msg.topic);
            return;
        }

        let report = match command::parse(&msg.payload) {
            Ok(Some(cmd)) => coordinator.handle(cmd, self.state).await,
            Ok(None) => return,
            Err(e) => coordinator.rejection(&e, self.state),
        };
        self.publish_status(&report).await;
    }

    async fn publish_status(&mut self, report: &StatusReport) {
        let payload = match serde_json::to_vec(report) {
            Ok(p) => p,
            Err(e) => {
                warn!("could not serialize status report: {e}");
                return;
            }
        };
        // Status is best-effort; a failed publish never takes the
        // session down on its own.
        if let Err(e) = self.transport.publish(&self.topics.status, payload).await {
            warn!("status publish failed: {e}");
        }
    }
}

/// Connect and subscribe to the command topic(s). A free function so
/// the session can race it against the shutdown signal with the same
/// borrow split as the message wait.
async fn establish<T: Transport>(
    transport: &mut T,
    topics: &Topics,
) -> Result<(), TransportError> {
    transport.connect().await?;
    transport.subscribe(&topics.command).await?;
    if let Some(room) = topics.room_command.as_deref() {
        transport.subscribe(room).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_stays_within_jitter_bounds() {
        let mut backoff = Backoff::new();
        let d = backoff.next_delay();
        assert!(d >= Duration::from_secs(4));
        assert!(d <= Duration::from_secs(6));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new();
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.current, BACKOFF_MAX);
        // Jitter may exceed the cap by at most 20%.
        let d = backoff.next_delay();
        assert!(d <= BACKOFF_MAX.mul_f64(1.2));
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.current, BACKOFF_INITIAL);
    }

    #[test]
    fn test_topic_layout() {
        let device = DeviceConfig {
            id: "kitchen-frame".to_string(),
            room: Some("kitchen".to_string()),
        };
        let topics = Topics::new("panel", &device);
        assert_eq!(topics.command, "panel/kitchen-frame/command");
        assert_eq!(
            topics.room_command.as_deref(),
            Some("panel/room/kitchen/command")
        );
        assert_eq!(topics.status, "panel/kitchen-frame/status");
    }

    #[test]
    fn test_no_room_topic_without_room() {
        let device = DeviceConfig {
            id: "dev".to_string(),
            room: None,
        };
        let topics = Topics::new("panel", &device);
        assert!(topics.room_command.is_none());
        assert!(topics.is_command_topic("panel/dev/command"));
        assert!(!topics.is_command_topic("panel/dev/status"));
        assert!(!topics.is_command_topic("panel/room/kitchen/command"));
    }
}
