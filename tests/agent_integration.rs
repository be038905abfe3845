/*
 *  tests/agent_integration.rs
 *
 *  inkd - pictures over pub/sub
 *
 *  End-to-end tests of the session/coordinator stack against a
 *  scripted transport and the mock panel
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

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use image::{ImageFormat, RgbImage};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

use inkd::agent::Agent;
use inkd::config::{Config, Orientation};
use inkd::coordinator::{RenderCoordinator, RetryPolicy};
use inkd::display::drivers::{MockDriver, MockState};
use inkd::session::{Backoff, Session, Topics};
use inkd::transport::{InboundMessage, Transport, TransportError};

const CMD_TOPIC: &str = "panel/it-device/command";
const ROOM_TOPIC: &str = "panel/room/lab/command";
const STATUS_TOPIC: &str = "panel/it-device/status";

/// What the harness feeds the session next.
enum ScriptItem {
    Deliver(InboundMessage),
    /// Simulate a connection loss.
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TransportEvent {
    Connect,
    Subscribe(String),
    Disconnect,
}

/// Scripted in-memory transport. Inbound messages come from the test;
/// everything the session does is recorded for assertions.
struct FakeTransport {
    script: mpsc::UnboundedReceiver<ScriptItem>,
    events: Arc<Mutex<Vec<TransportEvent>>>,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    connect_failures: u32,
    /// Simulate a handshake that never completes.
    hang_connect: bool,
}

struct FakeHandles {
    script: mpsc::UnboundedSender<ScriptItem>,
    events: Arc<Mutex<Vec<TransportEvent>>>,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

fn fake_transport(connect_failures: u32) -> (FakeTransport, FakeHandles) {
    let (tx, rx) = mpsc::unbounded_channel();
    let events = Arc::new(Mutex::new(Vec::new()));
    let published = Arc::new(Mutex::new(Vec::new()));
    let transport = FakeTransport {
        script: rx,
        events: events.clone(),
        published: published.clone(),
        connect_failures,
        hang_connect: false,
    };
    let handles = FakeHandles {
        script: tx,
        events,
        published,
    };
    (transport, handles)
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.events.lock().unwrap().push(TransportEvent::Connect);
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(TransportError::Connect("scripted refusal".to_string()));
        }
        if self.hang_connect {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.events
            .lock()
            .unwrap()
            .push(TransportEvent::Subscribe(topic.to_string()));
        Ok(())
    }

    async fn next_message(&mut self) -> Result<InboundMessage, TransportError> {
        match self.script.recv().await {
            Some(ScriptItem::Deliver(msg)) => Ok(msg),
            Some(ScriptItem::Drop) => {
                Err(TransportError::ConnectionLost("scripted drop".to_string()))
            }
            // Script exhausted; idle until shutdown.
            None => std::future::pending().await,
        }
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.events.lock().unwrap().push(TransportEvent::Disconnect);
    }
}

fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.device.id = "it-device".to_string();
    cfg.device.room = Some("lab".to_string());
    cfg.display.mock = true;
    cfg.display.mock_width = 160;
    cfg.display.mock_height = 120;
    cfg
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        delay: Duration::from_millis(5),
    }
}

fn png_base64() -> String {
    let img = RgbImage::from_fn(160, 120, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 180])
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    BASE64.encode(buf.into_inner())
}

fn deliver(script: &mpsc::UnboundedSender<ScriptItem>, topic: &str, payload: &[u8]) {
    script
        .send(ScriptItem::Deliver(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        }))
        .unwrap();
}

/// Wait until at least `n` status messages were published.
async fn wait_for_publishes(
    published: &Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    n: usize,
) -> Vec<(String, serde_json::Value)> {
    for _ in 0..500 {
        {
            let p = published.lock().unwrap();
            if p.len() >= n {
                return p
                    .iter()
                    .map(|(t, bytes)| (t.clone(), serde_json::from_slice(bytes).unwrap()))
                    .collect();
            }
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {n} status publishes");
}

/// Spawn a session/coordinator pair with a mock panel whose state the
/// test can inspect.
fn spawn_stack(
    transport: FakeTransport,
) -> (
    Arc<Mutex<MockState>>,
    watch::Sender<bool>,
    tokio::task::JoinHandle<()>,
) {
    let cfg = test_config();
    let driver = MockDriver::new(cfg.display.mock_width, cfg.display.mock_height, None);
    let state = driver.state();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut coordinator = RenderCoordinator::new(
        Box::new(driver),
        cfg.device.id.clone(),
        Orientation::Landscape,
        true,
        fast_retry(),
        shutdown_rx.clone(),
    );
    let topics = Topics::new(&cfg.broker.topic_prefix, &cfg.device);
    let backoff = Backoff::with_bounds(Duration::from_millis(10), Duration::from_millis(50));
    let mut session = Session::with_backoff(transport, topics, backoff, shutdown_rx);

    let handle = tokio::spawn(async move {
        session.run(&mut coordinator).await;
    });
    (state, shutdown_tx, handle)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_show_image_end_to_end_via_agent() {
    let (transport, handles) = fake_transport(0);
    let cfg = test_config();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let agent = Agent::with_transport(&cfg, transport, fast_retry(), shutdown_rx).unwrap();
    let task = tokio::spawn(agent.run());

    deliver(
        &handles.script,
        CMD_TOPIC,
        format!(r#"{{"command": "show-image", "payload": "{}"}}"#, png_base64()).as_bytes(),
    );

    let reports = wait_for_publishes(&handles.published, 1).await;
    let (topic, json) = &reports[0];
    assert_eq!(topic, STATUS_TOPIC);
    assert_eq!(json["result"], "ok");
    assert_eq!(json["command"], "show-image");
    assert_eq!(json["device_id"], "it-device");
    assert_eq!(json["session"], "connected");

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();

    let events = handles.events.lock().unwrap();
    assert_eq!(events[0], TransportEvent::Connect);
    assert!(events.contains(&TransportEvent::Subscribe(CMD_TOPIC.to_string())));
    assert!(events.contains(&TransportEvent::Subscribe(ROOM_TOPIC.to_string())));
    assert_eq!(*events.last().unwrap(), TransportEvent::Disconnect);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_corrupt_image_reports_decode_error() {
    let (transport, handles) = fake_transport(0);
    let (state, shutdown_tx, task) = spawn_stack(transport);

    let garbage = BASE64.encode(b"not an image");
    deliver(
        &handles.script,
        CMD_TOPIC,
        format!(r#"{{"command": "show-image", "payload": "{garbage}"}}"#).as_bytes(),
    );

    let reports = wait_for_publishes(&handles.published, 1).await;
    let json = &reports[0].1;
    assert_eq!(json["result"], "error");
    assert_eq!(json["error"]["kind"], "decode");
    assert_eq!(state.lock().unwrap().show_count, 0);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_command_and_foreign_topic_are_ignored() {
    let (transport, handles) = fake_transport(0);
    let (state, shutdown_tx, task) = spawn_stack(transport);

    // Neither of these may produce a status report.
    deliver(
        &handles.script,
        CMD_TOPIC,
        br#"{"command": "firmware-update", "url": "http://x"}"#,
    );
    deliver(
        &handles.script,
        "panel/other-device/command",
        br#"{"command": "clear"}"#,
    );
    // This one does, and must be the first report seen.
    deliver(&handles.script, CMD_TOPIC, br#"{"command": "clear"}"#);

    let reports = wait_for_publishes(&handles.published, 1).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1["command"], "clear");
    assert_eq!(reports[0].1["result"], "ok");
    assert_eq!(state.lock().unwrap().clear_count, 1);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_command_reports_invalid_command() {
    let (transport, handles) = fake_transport(0);
    let (state, shutdown_tx, task) = spawn_stack(transport);

    deliver(&handles.script, CMD_TOPIC, br#"{"command": "show-image"}"#);

    let reports = wait_for_publishes(&handles.published, 1).await;
    let json = &reports[0].1;
    assert_eq!(json["result"], "error");
    assert_eq!(json["error"]["kind"], "invalid-command");
    assert_eq!(json["command"], "show-image");
    assert_eq!(state.lock().unwrap().show_count, 0);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retry_exhaustion_reports_hardware_io() {
    let (transport, handles) = fake_transport(0);
    let (state, shutdown_tx, task) = spawn_stack(transport);
    state.lock().unwrap().simulate_show_failure = true;

    deliver(
        &handles.script,
        CMD_TOPIC,
        format!(r#"{{"command": "show-image", "payload": "{}"}}"#, png_base64()).as_bytes(),
    );

    let reports = wait_for_publishes(&handles.published, 1).await;
    let json = &reports[0].1;
    assert_eq!(json["result"], "error");
    assert_eq!(json["error"]["kind"], "hardware-io");
    assert_eq!(state.lock().unwrap().show_count, 3);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_set_saturation_out_of_range_reports_invalid_config() {
    let (transport, handles) = fake_transport(0);
    let (_state, shutdown_tx, task) = spawn_stack(transport);

    deliver(
        &handles.script,
        CMD_TOPIC,
        br#"{"command": "set-saturation", "value": 1.5}"#,
    );

    let reports = wait_for_publishes(&handles.published, 1).await;
    let json = &reports[0].1;
    assert_eq!(json["result"], "error");
    assert_eq!(json["error"]["kind"], "invalid-config");

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_room_topic_commands_are_dispatched() {
    let (transport, handles) = fake_transport(0);
    let (state, shutdown_tx, task) = spawn_stack(transport);

    deliver(&handles.script, ROOM_TOPIC, br#"{"command": "clear"}"#);

    let reports = wait_for_publishes(&handles.published, 1).await;
    assert_eq!(reports[0].1["result"], "ok");
    assert_eq!(state.lock().unwrap().clear_count, 1);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_interrupts_stalled_handshake() {
    let (mut transport, handles) = fake_transport(0);
    transport.hang_connect = true;
    let (_state, shutdown_tx, task) = spawn_stack(transport);

    // Wait until the session is actually inside the handshake.
    for _ in 0..500 {
        if !handles.events.lock().unwrap().is_empty() {
            break;
        }
        sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(
        handles.events.lock().unwrap()[0],
        TransportEvent::Connect
    );

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("session must observe shutdown during a stalled connect")
        .unwrap();

    let events = handles.events.lock().unwrap();
    assert_eq!(*events.last().unwrap(), TransportEvent::Disconnect);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconnect_resubscribes_and_resumes_dispatch() {
    // First connect attempt is refused, exercising the backoff path on
    // top of the mid-session drop.
    let (transport, handles) = fake_transport(1);
    let (state, shutdown_tx, task) = spawn_stack(transport);

    deliver(&handles.script, CMD_TOPIC, br#"{"command": "clear"}"#);
    handles.script.send(ScriptItem::Drop).unwrap();
    deliver(&handles.script, CMD_TOPIC, br#"{"command": "clear"}"#);

    let reports = wait_for_publishes(&handles.published, 2).await;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|(_, j)| j["result"] == "ok"));
    assert_eq!(state.lock().unwrap().clear_count, 2);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();

    let events = handles.events.lock().unwrap();
    let connects = events
        .iter()
        .filter(|e| **e == TransportEvent::Connect)
        .count();
    // Refused attempt, initial session, post-drop session.
    assert_eq!(connects, 3);
    let command_subs = events
        .iter()
        .filter(|e| **e == TransportEvent::Subscribe(CMD_TOPIC.to_string()))
        .count();
    assert_eq!(command_subs, 2);
}
