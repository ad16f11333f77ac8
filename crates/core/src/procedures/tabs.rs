//! `tabs.*` procedures.

use std::sync::Arc;
use std::time::Duration;

use mindctrl_protocol::{Output, Params};
use mindctrl_runtime::{Registry, Waiter};
use tracing::info;

use super::{ProcedureOptions, bind, done, reply, settle_failure};
use crate::error::HostError;
use crate::host::{NewTab, Tab, TabHost, TabId, TabQuery, TabUpdate, WindowHost, WindowId};
use crate::validate::{boolean, id, integer, match_pattern, optional, required, tab_status, url};

const BLANK: &str = "about:blank";

struct CreateTab {
	window_id: Option<WindowId>,
	url: Option<String>,
	active: bool,
	no_wait: bool,
}

impl CreateTab {
	fn parse(params: &Params) -> Option<Self> {
		Some(Self {
			window_id: optional(params, "windowId", id)?,
			url: optional(params, "url", url)?,
			active: optional(params, "active", boolean)?.unwrap_or(false),
			no_wait: optional(params, "noWait", boolean)?.unwrap_or(false),
		})
	}
}

struct LoadTab {
	tab_id: TabId,
	url: String,
	replace: Option<bool>,
	no_wait: bool,
}

impl LoadTab {
	fn parse(params: &Params) -> Option<Self> {
		Some(Self {
			tab_id: required(params, "tabId", id)?,
			url: required(params, "url", url)?,
			replace: optional(params, "replace", boolean)?,
			no_wait: optional(params, "noWait", boolean)?.unwrap_or(false),
		})
	}
}

struct ReloadTab {
	tab_id: TabId,
	bypass_cache: bool,
	no_wait: bool,
}

impl ReloadTab {
	fn parse(params: &Params) -> Option<Self> {
		Some(Self {
			tab_id: required(params, "tabId", id)?,
			bypass_cache: optional(params, "bypassCache", boolean)?.unwrap_or(false),
			no_wait: optional(params, "noWait", boolean)?.unwrap_or(false),
		})
	}
}

struct MoveTab {
	tab_id: TabId,
	index: i64,
	window_id: Option<WindowId>,
}

impl MoveTab {
	fn parse(params: &Params) -> Option<Self> {
		Some(Self {
			tab_id: required(params, "tabId", id)?,
			index: required(params, "index", integer)?,
			window_id: optional(params, "windowId", id)?,
		})
	}
}

fn find_query(params: &Params) -> Option<TabQuery> {
	Some(TabQuery {
		window_id: optional(params, "windowId", id)?,
		url: optional(params, "url", match_pattern)?,
		status: optional(params, "status", tab_status)?,
		active: optional(params, "active", boolean)?,
		audible: optional(params, "audible", boolean)?,
		discarded: optional(params, "discarded", boolean)?,
		muted: optional(params, "muted", boolean)?,
		pinned: optional(params, "pinned", boolean)?,
	})
}

fn tab_id(params: &Params) -> Option<TabId> {
	required(params, "tabId", id)
}

pub(super) fn register<H>(registry: &mut Registry, host: &Arc<H>, options: ProcedureOptions)
where
	H: TabHost + WindowHost + 'static,
{
	registry
		.register(
			"tabs.find",
			find_query,
			bind(host, |host, query: TabQuery| async move { reply(host.query_tabs(&query).await) }),
		)
		.register(
			"tabs.get",
			tab_id,
			bind(host, |host, id: TabId| async move { reply(host.tab(id).await) }),
		)
		.register(
			"tabs.get_current",
			|_| Some(()),
			bind(host, |host, ()| async move { reply(current_tab(&*host).await) }),
		)
		.register(
			"tabs.create",
			CreateTab::parse,
			bind(host, move |host, input| create(host, input, options)),
		)
		.register(
			"tabs.load",
			LoadTab::parse,
			bind(host, move |host, input| load(host, input, options)),
		)
		.register(
			"tabs.reload",
			ReloadTab::parse,
			bind(host, move |host, input| reload(host, input, options)),
		)
		.register(
			"tabs.move",
			MoveTab::parse,
			bind(host, |host, input: MoveTab| async move {
				let outcome = host.move_tab(input.tab_id, input.window_id, input.index).await;
				if let Ok(tab) = &outcome {
					info!(target = "mindctrl.tabs", "tab {} moved to window {} index {}", tab.id, tab.window_id, tab.index);
				}
				reply(outcome)
			}),
		)
		.register(
			"tabs.discard",
			tab_id,
			bind(host, |host, id: TabId| async move {
				let outcome = host.discard_tab(id).await;
				if outcome.is_ok() {
					info!(target = "mindctrl.tabs", "tab {id} discarded");
				}
				done(outcome)
			}),
		)
		.register(
			"tabs.remove",
			tab_id,
			bind(host, |host, id: TabId| async move {
				let outcome = host.remove_tab(id).await;
				if outcome.is_ok() {
					info!(target = "mindctrl.tabs", "tab {id} removed");
				}
				done(outcome)
			}),
		);

	let toggles: [(&str, fn() -> TabUpdate, &'static str); 6] = [
		("tabs.activate", || TabUpdate { active: Some(true), ..TabUpdate::default() }, "activated"),
		("tabs.deactivate", || TabUpdate { active: Some(false), ..TabUpdate::default() }, "deactivated"),
		("tabs.mute", || TabUpdate { muted: Some(true), ..TabUpdate::default() }, "muted"),
		("tabs.unmute", || TabUpdate { muted: Some(false), ..TabUpdate::default() }, "unmuted"),
		("tabs.pin", || TabUpdate { pinned: Some(true), ..TabUpdate::default() }, "pinned"),
		("tabs.unpin", || TabUpdate { pinned: Some(false), ..TabUpdate::default() }, "unpinned"),
	];
	for (method, update, verb) in toggles {
		registry.register(
			method,
			tab_id,
			bind(host, move |host, id: TabId| async move {
				let outcome = host.update_tab(id, update()).await;
				if outcome.is_ok() {
					info!(target = "mindctrl.tabs", "tab {id} {verb}");
				}
				reply(outcome)
			}),
		);
	}
}

async fn current_tab<H: TabHost + WindowHost + ?Sized>(host: &H) -> Result<Tab, HostError> {
	let window = host.last_focused_window().await?;
	let query = TabQuery {
		window_id: Some(window.id),
		active: Some(true),
		..TabQuery::default()
	};
	host.query_tabs(&query)
		.await?
		.into_iter()
		.next()
		.ok_or_else(|| HostError::NotFound("current tab cannot be found".to_string()))
}

async fn create<H: TabHost + WindowHost>(host: Arc<H>, input: CreateTab, options: ProcedureOptions) -> anyhow::Result<Output> {
	let outcome = async {
		let window_id = match input.window_id {
			Some(id) => id,
			None => host.last_focused_window().await?.id,
		};
		let tab = host
			.create_tab(NewTab {
				window_id,
				url: input.url.unwrap_or_else(|| BLANK.to_string()),
				active: input.active,
			})
			.await?;
		info!(target = "mindctrl.tabs", "tab {} created", tab.id);
		wait_loaded(&*host, tab.id, input.no_wait, options.settle_timeout, "loaded").await
	}
	.await;
	reply(outcome)
}

async fn load<H: TabHost>(host: Arc<H>, input: LoadTab, options: ProcedureOptions) -> anyhow::Result<Output> {
	let id = input.tab_id;
	let outcome = async {
		let update = TabUpdate {
			url: Some(input.url.clone()),
			load_replace: input.replace,
			..TabUpdate::default()
		};
		host.update_tab(id, update).await?;
		info!(target = "mindctrl.tabs", "tab {id} loading {}", input.url);
		// the host may report the previous page as complete right after the update
		tokio::time::sleep(options.load_grace).await;
		wait_loaded(&*host, id, input.no_wait, options.settle_timeout, "loaded").await
	}
	.await;
	reply(outcome)
}

async fn reload<H: TabHost>(host: Arc<H>, input: ReloadTab, options: ProcedureOptions) -> anyhow::Result<Output> {
	let id = input.tab_id;
	let outcome = async {
		host.reload_tab(id, input.bypass_cache).await?;
		info!(target = "mindctrl.tabs", "tab {id} reloaded");
		tokio::time::sleep(options.load_grace).await;
		wait_loaded(&*host, id, input.no_wait, options.settle_timeout, "reloaded").await
	}
	.await;
	reply(outcome)
}

async fn wait_loaded<H: TabHost + ?Sized>(
	host: &H,
	id: TabId,
	no_wait: bool,
	timeout: Option<Duration>,
	phase: &str,
) -> Result<Tab, HostError> {
	Waiter::new(host.tab_events(), id)
		.no_wait(no_wait)
		.timeout(timeout)
		.settle(|| host.tab(id), Tab::is_loaded)
		.await
		.map_err(|err| settle_failure(err, || format!("tab {id} closed before fully {phase}")))
}
