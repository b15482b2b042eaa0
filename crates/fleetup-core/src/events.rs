//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Audit events and their wire representation."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::target::Target;

/// Audit event kinds emitted at phase boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    UpdateInitStarted,
    UpdateInitCompleted,
    DownloadStarted,
    DownloadCompleted,
    InstallationStarted,
    InstallationApplied,
    InstallationCompleted,
}

impl EventType {
    const ALL: [EventType; 7] = [
        EventType::UpdateInitStarted,
        EventType::UpdateInitCompleted,
        EventType::DownloadStarted,
        EventType::DownloadCompleted,
        EventType::InstallationStarted,
        EventType::InstallationApplied,
        EventType::InstallationCompleted,
    ];

    /// Identifier used on the wire.
    pub fn wire_id(self) -> &'static str {
        match self {
            Self::UpdateInitStarted => "UpdateInitStarted",
            Self::UpdateInitCompleted => "UpdateInitCompleted",
            Self::DownloadStarted => "EcuDownloadStarted",
            Self::DownloadCompleted => "EcuDownloadCompleted",
            Self::InstallationStarted => "EcuInstallationStarted",
            Self::InstallationApplied => "EcuInstallationApplied",
            Self::InstallationCompleted => "EcuInstallationCompleted",
        }
    }

    pub fn from_wire_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_id() == id)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBody {
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    pub target_name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTypeRef {
    pub id: String,
    pub version: u32,
}

/// One audit event in the collector's wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    pub id: String,
    pub device_time: DateTime<Utc>,
    pub event: EventBody,
    pub event_type: EventTypeRef,
}

impl UpdateEvent {
    pub fn new(
        kind: EventType,
        target: &Target,
        correlation_id: &str,
        success: Option<bool>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            device_time: Utc::now(),
            event: EventBody {
                correlation_id: correlation_id.to_string(),
                success,
                target_name: target.id.clone(),
                version: target.version.to_string(),
                details: String::new(),
            },
            event_type: EventTypeRef {
                id: kind.wire_id().to_string(),
                version: 0,
            },
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.event.details = details.into();
        self
    }

    /// The event kind, when the wire id is recognised.
    pub fn kind(&self) -> Option<EventType> {
        EventType::from_wire_id(&self.event_type.id)
    }
}
