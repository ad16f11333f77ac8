//! The procedure catalogue: remote methods over the host capability traits.
//!
//! Each family registers its methods into a [`Registry`]. Host failures are
//! reported as execution errors carrying the host's message; results carry
//! the host object under `result`.

mod downloads;
mod info;
mod ping;
mod tabs;
mod windows;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mindctrl_protocol::{Output, RpcError};
use mindctrl_runtime::{Registry, SettleError};
use serde::Serialize;

use crate::error::HostError;
use crate::host::{Host, InfoHost};

/// Tunables for procedures that wait on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcedureOptions {
	/// Upper bound on waiting for a tab to finish loading; `None` waits forever.
	pub settle_timeout: Option<Duration>,
	/// Upper bound on waiting for a download to finish; `None` waits forever.
	pub download_timeout: Option<Duration>,
	/// Pause after starting a navigation before watching for completion.
	pub load_grace: Duration,
}

impl Default for ProcedureOptions {
	fn default() -> Self {
		Self {
			settle_timeout: Some(Duration::from_secs(60)),
			download_timeout: None,
			load_grace: Duration::from_secs(1),
		}
	}
}

/// Registers every procedure against `host`.
pub fn register_all<H: Host + 'static>(registry: &mut Registry, host: Arc<H>, options: ProcedureOptions) {
	ping::register(registry);
	info::register(registry, &host);
	tabs::register(registry, &host, options);
	windows::register(registry, &host);
	downloads::register(registry, &host, options);
}

/// Registers `ping` and the `info.*` procedures only.
pub fn register_info<H: InfoHost + 'static>(registry: &mut Registry, host: Arc<H>) {
	ping::register(registry);
	info::register(registry, &host);
}

/// Adapts `run(host, input)` to a registry executor holding its own handle.
fn bind<H, I, F, Fut>(host: &Arc<H>, run: F) -> impl Fn(I) -> Fut + Send + Sync + 'static
where
	H: ?Sized + Send + Sync + 'static,
	F: Fn(Arc<H>, I) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = anyhow::Result<Output>> + Send + 'static,
{
	let host = Arc::clone(host);
	move |input| run(Arc::clone(&host), input)
}

/// `{success: true, result}` or an execution error.
fn reply<T: Serialize>(outcome: Result<T, HostError>) -> anyhow::Result<Output> {
	Ok(Output::from_outcome(outcome)?)
}

/// Bare `{success: true}` or an execution error.
fn done(outcome: Result<(), HostError>) -> anyhow::Result<Output> {
	Ok(match outcome {
		Ok(()) => Output::success(),
		Err(err) => RpcError::execution(err).into(),
	})
}

/// Maps a failed wait to the message a caller sees.
fn settle_failure(err: SettleError<HostError>, removed: impl FnOnce() -> String) -> HostError {
	match err {
		SettleError::Lookup(err) => err,
		SettleError::Removed => HostError::NotFound(removed()),
		SettleError::Timeout(limit) => HostError::Rejected(format!("gave up waiting after {}ms", limit.as_millis())),
		SettleError::Closed => HostError::Closed,
	}
}
