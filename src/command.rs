/*
 *  command.rs
 *
 *  inkd - pictures over pub/sub
 *
 *  Inbound command model and outbound status reports
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

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionState;

/// Command discriminators as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    ShowImage,
    Clear,
    SetSaturation,
    StatusRequest,
}

impl CommandKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "show-image" => Some(Self::ShowImage),
            "clear" => Some(Self::Clear),
            "set-saturation" => Some(Self::SetSaturation),
            "status-request" => Some(Self::StatusRequest),
            _ => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ShowImage => "show-image",
            Self::Clear => "clear",
            Self::SetSaturation => "set-saturation",
            Self::StatusRequest => "status-request",
        };
        f.write_str(s)
    }
}

/// A fully parsed inbound command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    /// Render and display an image delivered inline as base64.
    ShowImage { payload: String },
    /// Blank the panel to white.
    Clear,
    /// Change the quantizer saturation for subsequent renders.
    SetSaturation { value: f32 },
    /// Report current state without touching the panel.
    StatusRequest,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::ShowImage { .. } => CommandKind::ShowImage,
            Self::Clear => CommandKind::Clear,
            Self::SetSaturation { .. } => CommandKind::SetSaturation,
            Self::StatusRequest => CommandKind::StatusRequest,
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    /// Payload was not a JSON object with a string `command` field.
    #[error("unparseable command payload: {0}")]
    Unparseable(String),
    /// Known command whose arguments failed to deserialize.
    #[error("malformed {command} command: {detail}")]
    Malformed {
        command: CommandKind,
        detail: String,
    },
}

#[derive(Deserialize)]
struct Probe {
    command: Option<String>,
}

/// Parse an inbound payload.
///
/// The discriminator is probed first so commands this build does not
/// know are ignored (`Ok(None)`) rather than rejected; fleets with
/// mixed agent versions share command topics.
pub fn parse(payload: &[u8]) -> Result<Option<Command>, CommandError> {
    let probe: Probe = serde_json::from_slice(payload)
        .map_err(|e| CommandError::Unparseable(e.to_string()))?;
    let name = probe
        .command
        .ok_or_else(|| CommandError::Unparseable("missing 'command' field".to_string()))?;

    let Some(kind) = CommandKind::from_name(&name) else {
        debug!("ignoring unknown command '{name}'");
        return Ok(None);
    };

    let cmd: Command = serde_json::from_slice(payload).map_err(|e| CommandError::Malformed {
        command: kind,
        detail: e.to_string(),
    })?;
    Ok(Some(cmd))
}

/// Error categories reported over the status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    InvalidCommand,
    Decode,
    InvalidConfig,
    HardwareInit,
    HardwareIo,
    /// Reserved in the wire schema. Transport faults are handled by
    /// reconnection and never reach status publication, but consumers
    /// of the status topic treat the kind set as closed.
    Transport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub detail: String,
}

/// Result marker on a status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportResult {
    Ok,
    Error,
}

/// Outcome of the most recent successful panel write.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RenderOutcome {
    pub command: CommandKind,
    /// Panel write attempts the command took (1 on a clean first try).
    pub attempts: u32,
}

/// Status message published after every handled command, and on demand
/// for `status-request`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandKind>,
    pub result: ReportResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    pub session: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_render: Option<RenderOutcome>,
}

impl StatusReport {
    pub fn ok(
        device_id: &str,
        command: CommandKind,
        session: SessionState,
        last_render: Option<RenderOutcome>,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            command: Some(command),
            result: ReportResult::Ok,
            error: None,
            session,
            last_render,
        }
    }

    pub fn error(
        device_id: &str,
        command: Option<CommandKind>,
        kind: ErrorKind,
        detail: String,
        session: SessionState,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            command,
            result: ReportResult::Error,
            error: Some(ErrorReport { kind, detail }),
            session,
            last_render: None,
        }
    }
}
