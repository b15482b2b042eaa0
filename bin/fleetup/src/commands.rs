//! ---
//! fu_section: "05-networking-external-interfaces"
//! fu_subsection: "binary"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "CLI command handlers and console rendering."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use anyhow::{anyhow, Context, Result};
use fleetup_common::{AppConfig, VersionInfo};
use fleetup_core::status::current_target;
use fleetup_core::{
    Attempt, CancelHandle, CancelSignal, Daemon, DeviceStatus, Selector, Target, TargetDiff,
    TargetSet, UpdateAgent, UpdateCommand, UpdateEnv, UpdateRequest, UpdateRunner,
};
use fleetup_metrics::{new_registry, spawn_http_server, AgentMetrics};
use tracing::{info, warn};

use crate::wiring::{build_env, RuntimeAccess};
use crate::Commands;

pub async fn dispatch(config: AppConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Daemon { run_once } => return run_daemon(config, run_once).await,
        Commands::Diff { to, from } => {
            let env = build_env(&config, RuntimeAccess::ReadOnly, None).await?;
            return diff(&env, to.as_deref(), from.as_deref()).await;
        }
        Commands::Status => {
            let env = build_env(&config, RuntimeAccess::ReadOnly, None).await?;
            let agent = UpdateAgent::new(UpdateRunner::new(env.clone()))?;
            let status = DeviceStatus::gather(&env, agent.known_bad()).await?;
            print!("{status}");
            return Ok(());
        }
        Commands::Cancel => {
            let env = build_env(&config, RuntimeAccess::Exclusive, None).await?;
            let cancelled = UpdateRunner::new(env).cancel_update().await?;
            println!("Cancelled update {}", cancelled.client_ref);
            return Ok(());
        }
        _ => {}
    }

    let (update_command, request) = match command {
        Commands::Check => (UpdateCommand::Check, UpdateRequest::default().refreshed()),
        Commands::Fetch { target } => (UpdateCommand::Fetch, selected(target).refreshed()),
        Commands::Install => (UpdateCommand::Install, UpdateRequest::default()),
        Commands::Start => (UpdateCommand::Start, UpdateRequest::default()),
        Commands::Update { target } => (UpdateCommand::Update, selected(target).refreshed()),
        other => return Err(anyhow!("unsupported command {other:?}")),
    };
    let env = build_env(&config, RuntimeAccess::Exclusive, None).await?;
    let (handle, signal) = CancelSignal::pair();
    let interrupt = cancel_on_ctrl_c(handle);
    let attempt = UpdateRunner::new(env)
        .run(update_command, request, &signal)
        .await;
    interrupt.abort();
    render(update_command, attempt)
}

fn selected(target: Option<String>) -> UpdateRequest {
    let selector = target.as_deref().map(Selector::parse).unwrap_or_default();
    UpdateRequest::new(selector)
}

fn render(command: UpdateCommand, attempt: Attempt) -> Result<()> {
    let Attempt { context, result } = attempt;
    if command == UpdateCommand::Check {
        print_targets(&context.targets, &context.from);
    }
    result?;
    match command {
        UpdateCommand::Check => println!("Update available: {} -> {}", context.from, context.to),
        UpdateCommand::Fetch => println!("Fetched {}", context.to),
        UpdateCommand::Install => println!("Installed {}", context.to),
        UpdateCommand::Start | UpdateCommand::Update => println!("Running {}", context.to),
    }
    Ok(())
}

fn print_targets(targets: &TargetSet, current: &Target) {
    println!("Available targets ({}):", targets.len());
    for target in targets.sorted() {
        let marker = if target.id == current.id { "*" } else { " " };
        println!("{marker} {target}");
        for app in &target.apps {
            println!("      {}: {}", app.name, app.uri);
        }
    }
}

async fn diff(env: &UpdateEnv, to: Option<&str>, from: Option<&str>) -> Result<()> {
    let targets = env.source.load_targets(false).await?;
    let to = match to {
        Some(raw) => lookup(&targets, raw)?,
        None => targets.latest().cloned().context("no targets available")?,
    };
    let from = match from {
        Some(raw) => lookup(&targets, raw)?,
        None => current_target(env)
            .await?
            .context("no current target recorded; pass FROM explicitly")?,
    };
    print!("{}", TargetDiff::between(&from, &to));
    Ok(())
}

fn lookup(targets: &TargetSet, raw: &str) -> Result<Target> {
    let found = match Selector::parse(raw) {
        Selector::Version(version) => targets.by_version(version),
        Selector::Name(name) => targets.by_id(&name),
        Selector::Latest => targets.latest(),
    };
    found
        .cloned()
        .with_context(|| format!("no target matches {raw}"))
}

async fn run_daemon(config: AppConfig, run_once: bool) -> Result<()> {
    let version = VersionInfo::current();
    let registry = new_registry();
    let metrics = AgentMetrics::new(registry.clone())?;
    metrics.set_build_info(&version.semver, &version.git_sha, &version.profile);

    let metrics_server = if config.metrics.enabled && !run_once {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        None
    };

    let env = build_env(&config, RuntimeAccess::Exclusive, Some(metrics)).await?;
    let agent = UpdateAgent::new(UpdateRunner::new(env))?;
    let daemon = Daemon::new(agent, config.daemon.effective_interval());
    let (handle, signal) = CancelSignal::pair();
    let interrupt = cancel_on_ctrl_c(handle);
    info!(version = %version.banner(), "fleetup daemon running");
    let outcome = daemon.run(&signal, run_once).await;
    interrupt.abort();

    if let Some(server) = metrics_server {
        if let Err(err) = server.shutdown().await {
            warn!(error = %err, "metrics exporter shutdown failed");
        }
    }
    outcome?;
    Ok(())
}

fn cancel_on_ctrl_c(handle: CancelHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; cancelling");
            handle.cancel();
        }
    })
}

