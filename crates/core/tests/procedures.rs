//! The procedure catalogue driven through a dispatcher over the simulated host.

use std::sync::Arc;
use std::time::Duration;

use mindctrl::{ProcedureOptions, SimOptions, SimulatedHost, register_all};
use mindctrl_protocol::{ErrorCategory, Output, Params};
use mindctrl_runtime::{Dispatcher, Registry};
use serde_json::{Value, json};

struct Fixture {
	host: SimulatedHost,
	dispatcher: Arc<Dispatcher>,
}

impl Fixture {
	fn new(sim: SimOptions) -> Self {
		Self::with_options(
			sim,
			ProcedureOptions {
				settle_timeout: Some(Duration::from_secs(5)),
				download_timeout: Some(Duration::from_secs(5)),
				load_grace: Duration::from_millis(5),
			},
		)
	}

	fn with_options(sim: SimOptions, options: ProcedureOptions) -> Self {
		let host = SimulatedHost::new(sim);
		let mut registry = Registry::new();
		register_all(&mut registry, Arc::new(host.clone()), options);
		Self {
			host,
			dispatcher: Arc::new(registry.build()),
		}
	}

	fn manual() -> Self {
		Self::new(SimOptions::default())
	}

	fn automatic() -> Self {
		Self::new(SimOptions::automatic(Duration::from_millis(10)))
	}

	async fn call(&self, method: &str, input: Value) -> Output {
		self.dispatcher.dispatch(method, params(input)).await
	}

	/// Starts a call in the background so the test can drive the host meanwhile.
	fn spawn(&self, method: &'static str, input: Value) -> tokio::task::JoinHandle<Output> {
		let dispatcher = Arc::clone(&self.dispatcher);
		tokio::spawn(async move { dispatcher.dispatch(method, params(input)).await })
	}

	async fn until(&self, condition: impl Fn(&SimulatedHost) -> bool) {
		tokio::time::timeout(Duration::from_secs(2), async {
			while !condition(&self.host) {
				tokio::time::sleep(Duration::from_millis(2)).await;
			}
		})
		.await
		.expect("condition never held");
	}
}

fn params(value: Value) -> Params {
	match value {
		Value::Object(map) => map,
		_ => Params::new(),
	}
}

fn result(output: &Output) -> &Value {
	output
		.result_value()
		.unwrap_or_else(|| panic!("expected a result, got {}", output.to_value()))
}

fn execution_message(output: &Output) -> &str {
	assert_eq!(output.category(), Some(ErrorCategory::Execution), "{}", output.to_value());
	&output.error().unwrap().message
}

#[tokio::test]
async fn ping_and_info() {
	let fx = Fixture::manual();
	assert_eq!(fx.call("ping", json!({})).await.to_value(), json!({"success": true}));

	let platform = fx.call("info.get_platform", json!({})).await;
	assert_eq!(result(&platform)["os"], json!(std::env::consts::OS));

	let browser = fx.call("info.get_browser", json!({})).await;
	assert_eq!(result(&browser)["name"], json!("unknown"));
}

#[tokio::test]
async fn find_filters_and_validates() {
	let fx = Fixture::automatic();
	let created = fx
		.call("tabs.create", json!({"url": "https://docs.example.org/guide", "active": true}))
		.await;
	assert_eq!(result(&created)["status"], json!("complete"));

	let found = fx.call("tabs.find", json!({"url": "https://*.example.org/*"})).await;
	let tabs = result(&found).as_array().unwrap();
	assert_eq!(tabs.len(), 1);
	assert_eq!(tabs[0]["url"], json!("https://docs.example.org/guide"));

	let all = fx.call("tabs.find", json!({"windowId": 1})).await;
	assert_eq!(result(&all).as_array().unwrap().len(), 2);

	for bad in [
		json!({"url": "https://example.org"}),
		json!({"status": "done"}),
		json!({"active": null}),
		json!({"windowId": "1"}),
	] {
		let output = fx.call("tabs.find", bad.clone()).await;
		assert_eq!(output.category(), Some(ErrorCategory::Validation), "{bad}");
		assert_eq!(output.error().unwrap().message, "invalid input for method tabs.find");
	}
}

#[tokio::test]
async fn create_waits_for_load() {
	let fx = Fixture::manual();
	let pending = fx.spawn("tabs.create", json!({"url": "https://example.org/"}));
	fx.until(|host| host.tab_count() == 2).await;
	assert!(!pending.is_finished());

	fx.host.finish_load(2).unwrap();
	let output = pending.await.unwrap();
	let tab = result(&output);
	assert_eq!(tab["id"], json!(2));
	assert_eq!(tab["status"], json!("complete"));
	assert_eq!(tab["active"], json!(false));
}

#[tokio::test]
async fn create_no_wait_returns_loading_tab() {
	let fx = Fixture::manual();
	let output = fx.call("tabs.create", json!({"noWait": true})).await;
	let tab = result(&output);
	assert_eq!(tab["url"], json!("about:blank"));
	assert_eq!(tab["status"], json!("loading"));
	assert_eq!(tab["windowId"], json!(1));
}

#[tokio::test]
async fn closing_a_loading_tab_fails_the_wait() {
	let fx = Fixture::manual();
	let pending = fx.spawn("tabs.create", json!({"url": "https://example.org/"}));
	fx.until(|host| host.tab_count() == 2).await;
	fx.host.close_tab(2).unwrap();
	let output = pending.await.unwrap();
	assert_eq!(execution_message(&output), "tab 2 closed before fully loaded");

	let pending = fx.spawn("tabs.reload", json!({"tabId": 1}));
	tokio::time::sleep(Duration::from_millis(20)).await;
	fx.host.close_tab(1).unwrap();
	let output = pending.await.unwrap();
	assert_eq!(execution_message(&output), "tab 1 closed before fully reloaded");
}

#[tokio::test]
async fn load_navigates_and_settles() {
	let fx = Fixture::automatic();
	let output = fx
		.call("tabs.load", json!({"tabId": 1, "url": "https://example.org/next", "replace": true}))
		.await;
	let tab = result(&output);
	assert_eq!(tab["url"], json!("https://example.org/next"));
	assert_eq!(tab["status"], json!("complete"));

	let output = fx.call("tabs.load", json!({"tabId": 1, "url": "  "})).await;
	assert_eq!(output.category(), Some(ErrorCategory::Validation));
}

#[tokio::test]
async fn settle_timeout_is_an_execution_error() {
	let fx = Fixture::with_options(
		SimOptions::default(),
		ProcedureOptions {
			settle_timeout: Some(Duration::from_millis(30)),
			download_timeout: None,
			load_grace: Duration::ZERO,
		},
	);
	let output = fx.call("tabs.create", json!({})).await;
	assert!(execution_message(&output).starts_with("gave up waiting"));
	// the tab itself stays open
	assert_eq!(fx.host.tab_count(), 2);
}

#[tokio::test]
async fn tab_toggles_and_removal() {
	let fx = Fixture::automatic();
	fx.call("tabs.create", json!({"url": "https://example.org/"})).await;

	let current = fx.call("tabs.get_current", json!({})).await;
	assert_eq!(result(&current)["id"], json!(1));

	let activated = fx.call("tabs.activate", json!({"tabId": 2})).await;
	assert_eq!(result(&activated)["active"], json!(true));
	let current = fx.call("tabs.get_current", json!({})).await;
	assert_eq!(result(&current)["id"], json!(2));

	for (method, field, expected) in [
		("tabs.mute", "muted", true),
		("tabs.unmute", "muted", false),
		("tabs.pin", "pinned", true),
		("tabs.unpin", "pinned", false),
	] {
		let output = fx.call(method, json!({"tabId": 2})).await;
		assert_eq!(result(&output)[field], json!(expected), "{method}");
	}

	let moved = fx.call("tabs.move", json!({"tabId": 2, "index": 0})).await;
	assert_eq!(result(&moved)["index"], json!(0));

	let discarded = fx.call("tabs.discard", json!({"tabId": 1})).await;
	assert_eq!(discarded.to_value(), json!({"success": true}));
	let discard_active = fx.call("tabs.discard", json!({"tabId": 2})).await;
	assert_eq!(execution_message(&discard_active), "cannot discard active tab 2");

	let removed = fx.call("tabs.remove", json!({"tabId": 1})).await;
	assert_eq!(removed.to_value(), json!({"success": true}));
	let missing = fx.call("tabs.get", json!({"tabId": 1})).await;
	assert_eq!(execution_message(&missing), "unknown tab id 1");
}

#[tokio::test]
async fn current_tab_without_windows() {
	let fx = Fixture::manual();
	fx.host.close_tab(1).unwrap();
	let output = fx.call("tabs.get_current", json!({})).await;
	assert_eq!(output.category(), Some(ErrorCategory::Execution));
}

#[tokio::test]
async fn windows_lifecycle() {
	let fx = Fixture::automatic();
	let created = fx
		.call("windows.create", json!({"url": "https://example.org/", "state": "maximized", "width": 640}))
		.await;
	let window = result(&created).clone();
	let id = window["id"].as_u64().unwrap();
	assert_eq!(window["state"], json!("maximized"));
	assert_eq!(window["width"], json!(1280));
	assert_eq!(window["tabs"].as_array().unwrap().len(), 1);

	let maximized = fx.call("windows.find", json!({"state": "maximized"})).await;
	assert_eq!(result(&maximized).as_array().unwrap().len(), 1);
	let all = fx.call("windows.find", json!({})).await;
	assert_eq!(result(&all).as_array().unwrap().len(), 2);

	let restored = fx.call("windows.restore", json!({"windowId": id})).await;
	assert_eq!(result(&restored)["state"], json!("normal"));
	let moved = fx.call("windows.move", json!({"windowId": id, "top": 20, "left": -5})).await;
	assert_eq!(result(&moved)["left"], json!(-5));
	let resized = fx
		.call("windows.resize", json!({"windowId": id, "width": 800, "height": 600}))
		.await;
	assert_eq!(result(&resized)["height"], json!(600));

	let focused = fx.call("windows.focus", json!({"windowId": id})).await;
	assert_eq!(result(&focused)["focused"], json!(true));
	let current = fx.call("windows.get_current", json!({})).await;
	assert_eq!(result(&current)["id"], json!(id));

	let removed = fx.call("windows.remove", json!({"windowId": id})).await;
	assert_eq!(removed.to_value(), json!({"success": true}));
	let missing = fx.call("windows.get", json!({"windowId": id})).await;
	assert_eq!(execution_message(&missing), format!("unknown window id {id}"));

	let output = fx.call("windows.resize", json!({"windowId": 1, "width": -1, "height": 10})).await;
	assert_eq!(output.category(), Some(ErrorCategory::Validation));
}

#[tokio::test]
async fn downloads_settle_on_completion() {
	let fx = Fixture::automatic();
	let output = fx
		.call("downloads.create", json!({"url": "https://example.org/a.zip", "filename": "a.zip"}))
		.await;
	let download = result(&output);
	assert_eq!(download["state"], json!("complete"));
	assert_eq!(download["filename"], json!("a.zip"));

	let again = fx
		.call("downloads.create", json!({"url": "https://example.org/a.zip", "filename": "a.zip", "noWait": true}))
		.await;
	assert_eq!(result(&again)["state"], json!("in_progress"));
	assert_eq!(result(&again)["filename"], json!("a (1).zip"));

	let found = fx.call("downloads.find", json!({"url": "https://example.org/*", "state": "complete"})).await;
	assert!(!result(&found).as_array().unwrap().is_empty());

	let bad = fx.call("downloads.create", json!({"url": "https://example.org/a.zip", "filename": ""})).await;
	assert_eq!(bad.category(), Some(ErrorCategory::Validation));
}

#[tokio::test]
async fn download_controls() {
	let fx = Fixture::manual();
	let started = fx
		.call("downloads.create", json!({"url": "https://example.org/b", "filename": "b", "noWait": true}))
		.await;
	let id = result(&started)["id"].as_u64().unwrap();

	let paused = fx.call("downloads.pause", json!({"downloadId": id})).await;
	assert_eq!(result(&paused)["paused"], json!(true));

	let pending = fx.spawn("downloads.resume", json!({"downloadId": id}));
	fx.until(|host| host.download(id).is_some_and(|download| !download.paused))
		.await;
	fx.host.interrupt_download(id, "NETWORK_FAILED").unwrap();
	let resumed = pending.await.unwrap();
	assert_eq!(result(&resumed)["state"], json!("interrupted"));
	assert_eq!(result(&resumed)["error"], json!("NETWORK_FAILED"));

	let cancelled = fx.call("downloads.cancel", json!({"downloadId": id})).await;
	assert_eq!(result(&cancelled)["state"], json!("interrupted"));

	let removed = fx.call("downloads.remove", json!({"downloadId": id})).await;
	assert_eq!(removed.to_value(), json!({"success": true}));
	let missing = fx.call("downloads.get", json!({"downloadId": id})).await;
	assert_eq!(execution_message(&missing), format!("unknown download id {id}"));
}

#[tokio::test]
async fn erasing_while_waiting_reports_unknown_download() {
	let fx = Fixture::manual();
	let pending = fx.spawn("downloads.create", json!({"url": "https://example.org/c", "filename": "c"}));
	fx.until(|host| host.download_count() == 1).await;
	tokio::time::sleep(Duration::from_millis(10)).await;

	let removed = fx.call("downloads.remove", json!({"downloadId": 1})).await;
	assert!(removed.is_success());
	let output = pending.await.unwrap();
	assert_eq!(execution_message(&output), "unknown download id 1");
}
