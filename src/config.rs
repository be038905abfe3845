use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level agent configuration, fully validated before the core is
/// constructed. The core performs no file or environment access itself.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub broker: BrokerConfig,
    pub display: DisplayConfig,
}

/// Device identity; used to build topic names, immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Unique device identifier within the mesh.
    pub id: String,
    /// Room the device is located in; adds a room-scoped command topic.
    pub room: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: "inkd-panel".to_string(),
            room: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Websocket,
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Client id; defaults to "inkd-{device id}" when unset.
    pub client_id: Option<String>,
    pub transport: TransportKind,
    /// WebSocket path (e.g. "/mqtt"); required iff transport=websocket.
    pub websocket_path: Option<String>,
    pub tls: bool,
    /// First segment of every topic this agent speaks on.
    pub topic_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: None,
            transport: TransportKind::Tcp,
            websocket_path: None,
            tls: false,
            topic_prefix: "panel".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Landscape,
    Portrait,
}

/// Panel hardware settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub orientation: Orientation,
    /// Color saturation for the quantizer, 0.0..=1.0.
    pub saturation: f32,
    /// Apply Floyd-Steinberg dithering during quantization.
    pub dither: bool,
    /// Use the mock panel (no hardware required).
    pub mock: bool,
    /// Mock panel dimensions (the real panel reports its own).
    pub mock_width: u32,
    pub mock_height: u32,
    /// Optional PPM file the mock panel writes each frame to.
    pub mock_sink: Option<PathBuf>,
    /// SPI bus number and BCM pin wiring for the real panel.
    pub spi_bus: u8,
    pub dc_pin: u8,
    pub reset_pin: u8,
    pub busy_pin: u8,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            orientation: Orientation::Landscape,
            saturation: 0.5,
            dither: true,
            mock: false,
            mock_width: 1600,
            mock_height: 1200,
            mock_sink: None,
            spi_bus: 0,
            dc_pin: 22,
            reset_pin: 27,
            busy_pin: 17,
        }
    }
}

/// CLI surface. Only overrides that make sense per-invocation are
/// exposed; everything else lives in the YAML file.
#[derive(Debug, Parser, Clone)]
#[command(name = "inkd", about = "MQTT agent for Spectra 6 e-ink panels")]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, short = 'c', value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    /// Device identifier (overrides config file)
    #[arg(long, short = 'd')]
    pub device_id: Option<String>,
    /// Use the mock panel regardless of config
    #[arg(long, action = ArgAction::SetTrue)]
    pub mock: bool,
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short = 'v', action = ArgAction::Count)]
    pub verbose: u8,
    /// Dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Read YAML (explicit path or search), layer CLI overrides, validate.
pub fn load(cli: &Cli) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            cfg = read_yaml(p)?;
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        cfg = read_yaml(&p)?;
    }

    apply_cli_overrides(&mut cfg, cli);
    validate(&cfg)?;
    Ok(cfg)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/inkd/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/inkd/config.yaml");
        if p.exists() {
            return Some(p);
        }
        let p = home.join(".config/inkd.yaml");
        if p.exists() {
            return Some(p);
        }
    }
    // project local
    for candidate in &["inkd.yaml", "config.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if let Some(id) = cli.device_id.as_ref() {
        cfg.device.id = id.clone();
    }
    if cli.mock {
        cfg.display.mock = true;
    }
}

/// Startup invariants. Violations are fatal: the process exits non-zero
/// before any hardware or network access happens.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.device.id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "device.id must not be empty".into(),
        ));
    }
    if !(0.0..=1.0).contains(&cfg.display.saturation) || cfg.display.saturation.is_nan() {
        return Err(ConfigError::Validation(
            "display.saturation must be within 0.0..=1.0".into(),
        ));
    }
    if cfg.display.mock && (cfg.display.mock_width == 0 || cfg.display.mock_height == 0) {
        return Err(ConfigError::Validation(
            "display.mock_width/mock_height must be > 0".into(),
        ));
    }
    if cfg.broker.topic_prefix.trim().is_empty() {
        return Err(ConfigError::Validation(
            "broker.topic_prefix must not be empty".into(),
        ));
    }
    match cfg.broker.transport {
        TransportKind::Websocket if cfg.broker.websocket_path.is_none() => {
            return Err(ConfigError::Validation(
                "broker.websocket_path is required with transport: websocket".into(),
            ));
        }
        TransportKind::Tcp if cfg.broker.websocket_path.is_some() => {
            return Err(ConfigError::Validation(
                "broker.websocket_path is only valid with transport: websocket".into(),
            ));
        }
        _ => {}
    }
    Ok(())
}
