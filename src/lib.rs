//! inkd - an MQTT agent for Spectra 6 color e-ink panels.
//!
//! Listens for commands on a pub/sub bus, transforms inline images to
//! the panel's six-ink palette, and drives the (slow) refresh, with
//! reconnect handling and per-command status reporting.

pub mod agent;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod display;
pub mod mqtt;
pub mod session;
pub mod transport;
