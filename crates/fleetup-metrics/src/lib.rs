//! ---
//! fu_section: "03-persistence-logging"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Metrics collection and export utilities."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder, TEXT_FORMAT,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the agent.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the update engine.
#[derive(Clone)]
pub struct AgentMetrics {
    registry: SharedRegistry,
    update_attempts: IntCounterVec,
    start_failures: IntCounterVec,
    events_flushed: IntCounter,
    outbox_pending: IntGauge,
    known_bad_targets: IntGauge,
    build_info: GaugeVec,
}

impl AgentMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let update_attempts = IntCounterVec::new(
            Opts::new(
                "fleetup_update_attempts_total",
                "Update attempts grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(update_attempts.clone()))?;

        let start_failures = IntCounterVec::new(
            Opts::new(
                "fleetup_start_failures_total",
                "Start phase failures per target",
            ),
            &["target"],
        )?;
        registry.register(Box::new(start_failures.clone()))?;

        let events_flushed = IntCounter::with_opts(Opts::new(
            "fleetup_events_flushed_total",
            "Audit events confirmed by the collector",
        ))?;
        registry.register(Box::new(events_flushed.clone()))?;

        let outbox_pending = IntGauge::with_opts(Opts::new(
            "fleetup_outbox_pending",
            "Audit events queued locally after the latest flush",
        ))?;
        registry.register(Box::new(outbox_pending.clone()))?;

        let known_bad_targets = IntGauge::with_opts(Opts::new(
            "fleetup_known_bad_targets",
            "Targets excluded from automatic selection by the anti-flap policy",
        ))?;
        registry.register(Box::new(known_bad_targets.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new("fleetup_build_info", "Build metadata for the running agent"),
            &["version", "git_sha", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            update_attempts,
            start_failures,
            events_flushed,
            outbox_pending,
            known_bad_targets,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_attempt(&self, outcome: &str) {
        self.update_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn record_start_failure(&self, target: &str) {
        self.start_failures.with_label_values(&[target]).inc();
    }

    pub fn record_flushed(&self, count: usize) {
        self.events_flushed.inc_by(count as u64);
    }

    pub fn set_outbox_pending(&self, pending: usize) {
        self.outbox_pending.set(pending as i64);
    }

    pub fn set_known_bad(&self, count: usize) {
        self.known_bad_targets.set(count as i64);
    }

    pub fn set_build_info(&self, version: &str, git_sha: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, git_sha, profile])
            .set(1.0);
    }
}

impl std::fmt::Debug for AgentMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentMetrics").finish_non_exhaustive()
    }
}

pub use prometheus;
