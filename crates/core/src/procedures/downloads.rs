//! `downloads.*` procedures.

use std::sync::Arc;
use std::time::Duration;

use mindctrl_protocol::{Output, Params};
use mindctrl_runtime::{Registry, Waiter};
use tracing::info;

use super::{ProcedureOptions, bind, done, reply, settle_failure};
use crate::error::HostError;
use crate::host::{Download, DownloadHost, DownloadId, DownloadQuery, NewDownload};
use crate::validate::{boolean, download_state, filename, id, match_pattern, optional, required, url};

struct CreateDownload {
	download: NewDownload,
	no_wait: bool,
}

impl CreateDownload {
	fn parse(params: &Params) -> Option<Self> {
		Some(Self {
			download: NewDownload {
				url: required(params, "url", url)?,
				filename: required(params, "filename", filename)?,
				referrer: optional(params, "referrer", url)?,
			},
			no_wait: optional(params, "noWait", boolean)?.unwrap_or(false),
		})
	}
}

fn find_query(params: &Params) -> Option<DownloadQuery> {
	Some(DownloadQuery {
		id: None,
		url: optional(params, "url", match_pattern)?,
		state: optional(params, "state", download_state)?,
	})
}

fn download_id(params: &Params) -> Option<DownloadId> {
	required(params, "downloadId", id)
}

fn resume_input(params: &Params) -> Option<(DownloadId, bool)> {
	Some((download_id(params)?, optional(params, "noWait", boolean)?.unwrap_or(false)))
}

pub(super) fn register<H: DownloadHost + 'static>(registry: &mut Registry, host: &Arc<H>, options: ProcedureOptions) {
	registry
		.register(
			"downloads.find",
			find_query,
			bind(host, |host, query: DownloadQuery| async move {
				reply(host.search_downloads(&query).await)
			}),
		)
		.register(
			"downloads.get",
			download_id,
			bind(host, |host, id: DownloadId| async move { reply(lookup(&*host, id).await) }),
		)
		.register(
			"downloads.create",
			CreateDownload::parse,
			bind(host, move |host, input| create(host, input, options)),
		)
		.register(
			"downloads.pause",
			download_id,
			bind(host, |host, id: DownloadId| async move {
				let outcome = async {
					host.pause_download(id).await?;
					info!(target = "mindctrl.downloads", "download {id} paused");
					lookup(&*host, id).await
				}
				.await;
				reply(outcome)
			}),
		)
		.register(
			"downloads.resume",
			resume_input,
			bind(host, move |host, (id, no_wait): (DownloadId, bool)| async move {
				let outcome = async {
					host.resume_download(id).await?;
					info!(target = "mindctrl.downloads", "download {id} resumed");
					wait_finished(&*host, id, no_wait, options.download_timeout).await
				}
				.await;
				reply(outcome)
			}),
		)
		.register(
			"downloads.cancel",
			download_id,
			bind(host, |host, id: DownloadId| async move {
				let outcome = async {
					host.cancel_download(id).await?;
					info!(target = "mindctrl.downloads", "download {id} cancelled");
					lookup(&*host, id).await
				}
				.await;
				reply(outcome)
			}),
		)
		.register(
			"downloads.remove",
			download_id,
			bind(host, |host, id: DownloadId| async move {
				let outcome = host.erase_download(id).await;
				if outcome.is_ok() {
					info!(target = "mindctrl.downloads", "download {id} removed");
				}
				done(outcome)
			}),
		);
}

async fn create<H: DownloadHost>(host: Arc<H>, input: CreateDownload, options: ProcedureOptions) -> anyhow::Result<Output> {
	let filename = input.download.filename.clone();
	let outcome = async {
		let id = host.start_download(input.download).await?;
		info!(target = "mindctrl.downloads", "download {id} created to save to file {filename}");
		wait_finished(&*host, id, input.no_wait, options.download_timeout).await
	}
	.await;
	reply(outcome)
}

async fn lookup<H: DownloadHost + ?Sized>(host: &H, id: DownloadId) -> Result<Download, HostError> {
	host.search_downloads(&DownloadQuery::by_id(id))
		.await?
		.into_iter()
		.next()
		.ok_or_else(|| HostError::unknown_download(id))
}

async fn wait_finished<H: DownloadHost + ?Sized>(
	host: &H,
	id: DownloadId,
	no_wait: bool,
	timeout: Option<Duration>,
) -> Result<Download, HostError> {
	Waiter::new(host.download_events(), id)
		.no_wait(no_wait)
		.timeout(timeout)
		.settle(|| lookup(host, id), Download::is_finished)
		.await
		.map_err(|err| settle_failure(err, || format!("unknown download id {id}")))
}
