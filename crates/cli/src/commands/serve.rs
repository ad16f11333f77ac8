use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use mindctrl::{BrowserInfo, BrowserName, InfoHost, PlatformInfo, ProcedureOptions, SimOptions, SimulatedHost};
use mindctrl_runtime::{
	FileConfig, MqttConnector, Phase, Registry, Server, ServerConfig, ServerEvent, ServerOptions, StaticConfig,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::stored;
use crate::cli::ServeArgs;

const STOP_GRACE: Duration = Duration::from_secs(5);
const SIMULATED_DELAY: Duration = Duration::from_millis(250);

/// Describes the process itself when no browser-like host is attached.
struct LocalInfo;

#[async_trait]
impl InfoHost for LocalInfo {
	async fn platform(&self) -> mindctrl::Result<PlatformInfo> {
		Ok(PlatformInfo::current())
	}

	async fn browser(&self) -> mindctrl::Result<BrowserInfo> {
		Ok(BrowserInfo {
			name: BrowserName::Unknown,
			version: None,
		})
	}
}

/// Stored configuration with command line overrides applied.
fn effective_config(args: &ServeArgs, stored: Option<ServerConfig>) -> Option<ServerConfig> {
	let url = args.bus.url.clone().or_else(|| stored.as_ref().map(|c| c.url.clone()))?;
	let name = args.name.clone().or_else(|| stored.as_ref().map(|c| c.name.clone()))?;
	let mut config = ServerConfig::new(url, name);
	config.username = args.bus.username.clone().or_else(|| stored.as_ref().and_then(|c| c.username.clone()));
	config.password = args.bus.password.clone().or_else(|| stored.as_ref().and_then(|c| c.password.clone()));
	Some(config)
}

fn registry(simulate: bool) -> Registry {
	let mut registry = Registry::new();
	if simulate {
		let host = SimulatedHost::new(SimOptions::automatic(SIMULATED_DELAY));
		mindctrl::register_all(&mut registry, Arc::new(host), ProcedureOptions::default());
	} else {
		mindctrl::procedures::register_info(&mut registry, Arc::new(LocalInfo));
	}
	registry
}

/// Why the serve loop ended on its own.
enum Exit {
	Failed(&'static str),
	Finished,
}

pub(super) async fn run(file: &FileConfig, args: ServeArgs) -> Result<ExitCode> {
	let config = effective_config(&args, stored(file)?);
	let dispatcher = registry(args.simulate).build();
	info!(
		target = "mindctrl.serve",
		methods = dispatcher.methods().count(),
		simulate = args.simulate,
		"procedures registered"
	);

	let options = ServerOptions {
		namespace: args.bus.namespace.clone(),
		liveness_interval: Duration::from_secs(args.liveness_interval.max(1)),
		connect_timeout: Duration::from_secs(args.connect_timeout.max(1)),
	};
	let server = Server::spawn(
		Arc::new(MqttConnector::default()),
		Arc::new(StaticConfig(config)),
		Arc::new(dispatcher),
		options,
	);

	let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
	let _events = server.events().subscribe(move |event: &ServerEvent| {
		let exit = match event {
			ServerEvent::Serving => {
				info!(target = "mindctrl.serve", "serving");
				None
			}
			ServerEvent::Unconfigured => Some(Exit::Failed(
				"no usable configuration; pass --url and --name or run `mindctrl config set`",
			)),
			ServerEvent::Unreachable => Some(Exit::Failed("broker unreachable")),
			ServerEvent::Disconnected => Some(Exit::Failed("connection to the broker was lost")),
			ServerEvent::Stopped => Some(Exit::Finished),
			ServerEvent::Garbage { topic, reason } => {
				warn!(target = "mindctrl.serve", %topic, %reason, "dropped malformed request");
				None
			}
			ServerEvent::Request(request) => {
				debug!(target = "mindctrl.serve", id = %request.id, method = %request.method, client = %request.client, "request");
				None
			}
			other => {
				debug!(target = "mindctrl.serve", event = other.name(), "server event");
				None
			}
		};
		if let Some(exit) = exit {
			let _ = exit_tx.send(exit);
		}
	});

	server.start().await.context("server actor is gone")?;

	let outcome = tokio::select! {
		exit = exit_rx.recv() => exit,
		() = shutdown_signal() => {
			info!(target = "mindctrl.serve", "shutting down");
			server.stop().await.context("server actor is gone")?;
			if let Err(err) = server.wait_for(Phase::Idle, STOP_GRACE).await {
				warn!(target = "mindctrl.serve", error = %err, "graceful stop did not finish");
			}
			Some(Exit::Finished)
		}
	};

	match outcome {
		Some(Exit::Failed(reason)) => bail!("{reason}"),
		Some(Exit::Finished) | None => Ok(ExitCode::SUCCESS),
	}
}

#[cfg(unix)]
async fn shutdown_signal() {
	use tokio::signal::unix::{SignalKind, signal};

	let (Ok(mut sigterm), Ok(mut sigint)) = (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) else {
		warn!(target = "mindctrl.serve", "failed to install signal handlers; falling back to Ctrl+C");
		let _ = tokio::signal::ctrl_c().await;
		return;
	};
	tokio::select! {
		_ = sigterm.recv() => info!(target = "mindctrl.serve", "received SIGTERM"),
		_ = sigint.recv() => info!(target = "mindctrl.serve", "received SIGINT"),
	}
}

#[cfg(not(unix))]
async fn shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
	info!(target = "mindctrl.serve", "received Ctrl+C");
}
