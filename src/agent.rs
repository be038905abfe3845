/*
 *  agent.rs
 *
 *  inkd - pictures over pub/sub
 *
 *  Assembles driver, coordinator, and session from configuration
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

use tokio::sync::watch;

use crate::config::Config;
use crate::coordinator::{RenderCoordinator, RetryPolicy};
use crate::display::error::DisplayError;
use crate::display::factory::create_driver;
use crate::mqtt::MqttTransport;
use crate::session::{Session, Topics};
use crate::transport::Transport;

/// The assembled agent: one panel, one broker session.
pub struct Agent<T: Transport> {
    session: Session<T>,
    coordinator: RenderCoordinator,
}

impl Agent<MqttTransport> {
    /// Build the production agent. Fails fast if the panel cannot be
    /// initialized; there is nothing useful to do without one.
    pub fn new(config: &Config, shutdown: watch::Receiver<bool>) -> Result<Self, DisplayError> {
        let transport = MqttTransport::new(&config.broker, &config.device.id);
        Self::with_transport(config, transport, RetryPolicy::default(), shutdown)
    }
}

impl<T: Transport> Agent<T> {
    /// Build the agent around an arbitrary transport. Production uses
    /// MQTT; integration tests inject a scripted one.
    pub fn with_transport(
        config: &Config,
        transport: T,
        retry: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, DisplayError> {
        let driver = create_driver(&config.display)?;
        let topics = Topics::new(&config.broker.topic_prefix, &config.device);
        let coordinator = RenderCoordinator::new(
            driver,
            config.device.id.clone(),
            config.display.orientation,
            config.display.dither,
            retry,
            shutdown.clone(),
        );
        let session = Session::new(transport, topics, shutdown);
        Ok(Self {
            session,
            coordinator,
        })
    }

    /// Run until shutdown is signalled.
    pub async fn run(mut self) {
        self.session.run(&mut self.coordinator).await;
    }
}
