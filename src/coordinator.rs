/*
 *  coordinator.rs
 *
 *  inkd - pictures over pub/sub
 *
 *  Command execution against the panel, with bounded retry
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

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use log::{info, warn};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::command::{
    Command, CommandError, CommandKind, ErrorKind, RenderOutcome, StatusReport,
};
use crate::config::Orientation;
use crate::display::error::DisplayError;
use crate::display::factory::BoxedDriver;
use crate::display::pipeline;
use crate::display::traits::DisplayDriver;
use crate::session::SessionState;

/// Retry behavior for transient panel write failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Executes parsed commands against the panel driver and produces the
/// status report for each one. Commands run strictly one at a time;
/// the session does not pull the next message until this returns.
pub struct RenderCoordinator {
    driver: BoxedDriver,
    device_id: String,
    orientation: Orientation,
    dither: bool,
    retry: RetryPolicy,
    last_render: Option<RenderOutcome>,
    shutdown: watch::Receiver<bool>,
}

impl RenderCoordinator {
    pub fn new(
        driver: BoxedDriver,
        device_id: String,
        orientation: Orientation,
        dither: bool,
        retry: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            driver,
            device_id,
            orientation,
            dither,
            retry,
            last_render: None,
            shutdown,
        }
    }

    /// Execute one command. Never panics and never returns early
    /// without a report; every handled command produces exactly one.
    pub async fn handle(&mut self, cmd: Command, session: SessionState) -> StatusReport {
        let kind = cmd.kind();
        match cmd {
            Command::ShowImage { payload } => self.show_image(&payload, session).await,
            Command::Clear => match self.drive_with_retry(|d| d.clear()).await {
                Ok(attempts) => {
                    self.last_render = Some(RenderOutcome {
                        command: CommandKind::Clear,
                        attempts,
                    });
                    self.ok(kind, session)
                }
                Err(e) => self.panel_error(kind, &e, session),
            },
            Command::SetSaturation { value } => {
                // No retry: an out-of-range value will never improve.
                match self.driver.set_saturation(value) {
                    Ok(()) => {
                        info!("saturation set to {value}");
                        self.ok(kind, session)
                    }
                    Err(e) => self.panel_error(kind, &e, session),
                }
            }
            Command::StatusRequest => self.ok(kind, session),
        }
    }

    /// Status report for a payload that failed to parse.
    pub fn rejection(&self, err: &CommandError, session: SessionState) -> StatusReport {
        warn!("rejecting command: {err}");
        let command = match err {
            CommandError::Unparseable(_) => None,
            CommandError::Malformed { command, .. } => Some(*command),
        };
        StatusReport::error(
            &self.device_id,
            command,
            ErrorKind::InvalidCommand,
            err.to_string(),
            session,
        )
    }

    async fn show_image(&mut self, payload: &str, session: SessionState) -> StatusReport {
        let bytes = match BASE64.decode(payload.trim()) {
            Ok(b) => b,
            Err(e) => {
                return StatusReport::error(
                    &self.device_id,
                    Some(CommandKind::ShowImage),
                    ErrorKind::Decode,
                    format!("invalid base64 payload: {e}"),
                    session,
                );
            }
        };

        let frame = match pipeline::render_frame(
            &bytes,
            self.driver.spec(),
            self.orientation,
            self.driver.saturation(),
            self.dither,
        ) {
            Ok(f) => f,
            Err(e) => return self.panel_error(CommandKind::ShowImage, &e, session),
        };

        match self.drive_with_retry(|d| d.show(&frame)).await {
            Ok(attempts) => {
                self.last_render = Some(RenderOutcome {
                    command: CommandKind::ShowImage,
                    attempts,
                });
                self.ok(CommandKind::ShowImage, session)
            }
            Err(e) => self.panel_error(CommandKind::ShowImage, &e, session),
        }
    }

    /// Run a panel write, retrying transient I/O failures up to the
    /// policy's attempt count. The write itself blocks for the panel
    /// refresh (tens of seconds on real hardware), so it runs via
    /// `block_in_place` to keep the runtime responsive.
    async fn drive_with_retry<F>(&mut self, mut op: F) -> Result<u32, DisplayError>
    where
        F: FnMut(&mut dyn DisplayDriver) -> Result<(), DisplayError> + Send,
    {
        let mut attempt: u32 = 1;
        loop {
            let result = tokio::task::block_in_place(|| op(self.driver.as_mut()));
            match result {
                Ok(()) => return Ok(attempt),
                Err(e) if e.is_retryable() && attempt < self.retry.attempts => {
                    warn!(
                        "panel write failed (attempt {attempt}/{}): {e}",
                        self.retry.attempts
                    );
                    let aborted = tokio::select! {
                        _ = sleep(self.retry.delay) => false,
                        _ = self.shutdown.changed() => true,
                    };
                    if aborted {
                        return Err(e);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn ok(&self, command: CommandKind, session: SessionState) -> StatusReport {
        StatusReport::ok(&self.device_id, command, session, self.last_render)
    }

    fn panel_error(
        &self,
        command: CommandKind,
        err: &DisplayError,
        session: SessionState,
    ) -> StatusReport {
        warn!("{command} failed: {err}");
        StatusReport::error(
            &self.device_id,
            Some(command),
            error_kind(err),
            err.to_string(),
            session,
        )
    }
}

fn error_kind(err: &DisplayError) -> ErrorKind {
    match err {
        DisplayError::Init(_) => ErrorKind::HardwareInit,
        DisplayError::Io(_) => ErrorKind::HardwareIo,
        DisplayError::Decode(_) => ErrorKind::Decode,
        DisplayError::InvalidSaturation(_) => ErrorKind::InvalidConfig,
        DisplayError::FrameSize { .. } => ErrorKind::InvalidConfig,
    }
}
