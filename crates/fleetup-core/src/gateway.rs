//! ---
//! fu_section: "05-networking-external-interfaces"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "HTTP gateway to the device server and collector."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetup_common::config::directory_url;
use parking_lot::RwLock;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use tracing::debug;
use url::Url;

use crate::status::AppsStatesReport;
use crate::target::Target;

pub const HEADER_TARGET: &str = "x-ats-target";
pub const HEADER_APPS: &str = "x-ats-dockerapps";
pub const HEADER_TAGS: &str = "x-ats-tags";

/// Errors raised while talking to the server.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
    #[error("{path} returned unexpected status {status}")]
    UnexpectedStatus { path: String, status: u16 },
    #[error("collector unavailable: {0}")]
    Unavailable(String),
}

/// What the device advertises as currently running.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub target_id: String,
    pub app_names: Vec<String>,
}

/// Shared handle to the advertised identity.
///
/// Only [`IdentityHandle::set_current`] mutates it; the Start phase calls it
/// after a successful start.
#[derive(Debug, Clone, Default)]
pub struct IdentityHandle {
    inner: Arc<RwLock<DeviceIdentity>>,
}

impl IdentityHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current(&self, target: &Target) {
        let mut identity = self.inner.write();
        identity.target_id = target.id.clone();
        identity.app_names = target.app_names();
    }

    pub fn current(&self) -> DeviceIdentity {
        self.inner.read().clone()
    }
}

/// Receiver of audit events and app status reports.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn post_events(&self, events: &[serde_json::Value]) -> Result<(), GatewayError>;

    async fn post_apps_states(&self, report: &AppsStatesReport) -> Result<(), GatewayError>;
}

/// reqwest-backed client for the device server.
#[derive(Debug, Clone)]
pub struct DeviceGateway {
    client: Client,
    base_url: Url,
    identity: IdentityHandle,
}

impl DeviceGateway {
    pub fn new(
        base_url: Url,
        timeout: Duration,
        user_agent: &str,
        identity: IdentityHandle,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            client,
            base_url: directory_url(base_url),
            identity,
        })
    }

    pub fn identity(&self) -> &IdentityHandle {
        &self.identity
    }

    /// Download the raw targets document for the given channel tags.
    pub async fn fetch_targets(&self, tags: &[String]) -> Result<Vec<u8>, GatewayError> {
        let path = "repo/targets.json";
        let mut request = self.request(Method::GET, path)?;
        if !tags.is_empty() {
            request = request.header(HEADER_TAGS, tags.join(","));
        }
        let response = request.send().await?;
        check_status(path, response.status())?;
        Ok(response.bytes().await?.to_vec())
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, GatewayError> {
        let url = self.base_url.join(path)?;
        let identity = self.identity.current();
        Ok(self
            .client
            .request(method, url)
            .header(HEADER_TARGET, identity.target_id)
            .header(HEADER_APPS, identity.app_names.join(",")))
    }
}

#[async_trait]
impl Collector for DeviceGateway {
    async fn post_events(&self, events: &[serde_json::Value]) -> Result<(), GatewayError> {
        let path = "events";
        let response = self.request(Method::POST, path)?.json(events).send().await?;
        check_status(path, response.status())?;
        debug!(count = events.len(), "events accepted by collector");
        Ok(())
    }

    async fn post_apps_states(&self, report: &AppsStatesReport) -> Result<(), GatewayError> {
        let path = "apps-states";
        let response = self.request(Method::POST, path)?.json(report).send().await?;
        check_status(path, response.status())
    }
}

// The collector acknowledges with any status from 200 through 204.
fn check_status(path: &str, status: StatusCode) -> Result<(), GatewayError> {
    if (200..=204).contains(&status.as_u16()) {
        Ok(())
    } else {
        Err(GatewayError::UnexpectedStatus {
            path: path.to_string(),
            status: status.as_u16(),
        })
    }
}
