//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Update orchestration engine for fleet devices."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
//! Decides which target a device should run, drives the runtime through
//! `Check, Init, Fetch, Stop, Install, Start`, keeps audit events in a
//! durable outbox and stops retrying targets that never start.

pub mod antiflap;
pub mod context;
pub mod daemon;
pub mod diff;
pub mod error;
pub mod events;
pub mod gateway;
pub mod metadata;
pub mod outbox;
pub mod phases;
pub mod resolver;
pub mod runner;
pub mod runtime;
pub mod status;
pub mod target;

pub use antiflap::{AntiFlapPolicy, UpdateAgent};
pub use context::{
    CancelHandle, CancelSignal, ResolutionMode, Selector, UpdateContext, UpdateEnv,
    UpdateRequest, UpdateSettings,
};
pub use daemon::Daemon;
pub use diff::TargetDiff;
pub use error::UpdateError;
pub use events::{EventType, UpdateEvent};
pub use gateway::{Collector, DeviceGateway, GatewayError, IdentityHandle};
pub use metadata::{DeviceFilter, MetadataError, PlainTargetSource, SignedTargetSource, TargetSource};
pub use outbox::Outbox;
pub use phases::{PhaseName, UpdateCommand};
pub use runner::{Attempt, UpdateRunner};
pub use runtime::{LocalRuntime, Runtime, RuntimeError, RuntimeUpdateState, UpdateStatus};
pub use status::DeviceStatus;
pub use target::{AppRef, Target, TargetSet};
