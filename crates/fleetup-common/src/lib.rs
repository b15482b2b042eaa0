//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Shared primitives and utilities for the agent."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
//! Core shared primitives for the fleetup workspace.
//! This crate exposes configuration loading, logging, and version metadata
//! utilities consumed by the update engine and the CLI.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{
    AppConfig, DaemonConfig, DeviceConfig, EventsConfig, LoggingConfig, MetadataMode,
    MetricsConfig, RuntimeConfig, ServerConfig, StorageConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use version::VersionInfo;
