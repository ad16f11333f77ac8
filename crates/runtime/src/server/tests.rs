use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mindctrl_protocol::{Output, RpcError};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::*;
use crate::bus::{BusConnection, MemoryBroker};
use crate::config::StaticConfig;
use crate::event::Subscription;
use crate::rpc::Registry;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
	broker: MemoryBroker,
	server: Server,
	log: Arc<Mutex<Vec<ServerEvent>>>,
	_subscription: Subscription,
}

impl Harness {
	fn new(config: Option<ServerConfig>) -> Self {
		Self::with_options(config, ServerOptions::default())
	}

	fn with_options(config: Option<ServerConfig>, options: ServerOptions) -> Self {
		let broker = MemoryBroker::new();
		let server = Server::spawn(
			Arc::new(broker.clone()),
			Arc::new(StaticConfig(config)),
			Arc::new(registry().build()),
			options,
		);
		let log = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&log);
		let subscription = server.events().subscribe(move |event: &ServerEvent| sink.lock().push(event.clone()));
		Self {
			broker,
			server,
			log,
			_subscription: subscription,
		}
	}

	/// Lifecycle event names seen so far, excluding request/response traffic.
	fn lifecycle(&self) -> Vec<&'static str> {
		self.log
			.lock()
			.iter()
			.filter(|event| !matches!(event, ServerEvent::Request(_) | ServerEvent::Response(_)))
			.map(ServerEvent::name)
			.collect()
	}

	async fn wait_for_event(&self, name: &str) {
		let deadline = tokio::time::Instant::now() + WAIT;
		while !self.log.lock().iter().any(|event| event.name() == name) {
			assert!(tokio::time::Instant::now() < deadline, "no {name} event; saw {:?}", self.lifecycle());
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	}

	async fn serve(&self) {
		self.server.start().await.unwrap();
		self.server.wait_for(Phase::Serving, WAIT).await.unwrap();
	}

	/// Connects a plain bus client listening on its reply topic.
	async fn client(&self, id: &str) -> BusConnection {
		let mut connection = self
			.broker
			.connect(ConnectOptions::new("mqtt://memory:1883", id))
			.await
			.unwrap();
		assert_eq!(connection.events.recv().await, Some(BusEvent::Connected));
		connection
			.client
			.subscribe(&format!("mindctrl/clients/{id}"))
			.await
			.unwrap();
		connection
	}
}

fn registry() -> Registry {
	let mut registry = Registry::new();
	registry
		.register("ping", |_| Some(()), |()| async { anyhow::Ok(Output::success()) })
		.register(
			"sleep",
			|params| params.get("ms")?.as_u64(),
			|ms| async move {
				tokio::time::sleep(Duration::from_millis(ms)).await;
				anyhow::Ok(Output::result(&ms)?)
			},
		)
		.register("fail", |_| Some(()), |()| async {
			anyhow::Ok(Output::from(RpcError::execution("it broke")))
		});
	registry
}

fn config() -> ServerConfig {
	ServerConfig::new("mqtt://memory:1883", "s1")
}

fn request(id: &str, method: &str, params: Value) -> Vec<u8> {
	serde_json::to_vec(&json!({
		"type": "request",
		"id": id,
		"method": method,
		"params": params,
		"client": "c1",
		"server": "s1",
	}))
	.unwrap()
}

async fn next_message(connection: &mut BusConnection) -> Value {
	match tokio::time::timeout(WAIT, connection.events.recv()).await {
		Ok(Some(BusEvent::Message { payload, .. })) => serde_json::from_slice(&payload).unwrap(),
		other => panic!("expected a message, got {other:?}"),
	}
}

#[tokio::test]
async fn test_stop_while_idle_is_noop() {
	let harness = Harness::new(Some(config()));
	harness.server.stop().await.unwrap();
	assert_eq!(harness.server.phase(), Phase::Idle);
	assert!(harness.lifecycle().is_empty());
}

#[tokio::test]
async fn test_start_without_config_is_unconfigured() {
	let harness = Harness::new(None);
	harness.server.start().await.unwrap();
	assert_eq!(harness.lifecycle(), vec!["unconfigured"]);
	assert_eq!(harness.server.phase(), Phase::Idle);
	assert_eq!(harness.broker.connect_count(), 0);
}

#[tokio::test]
async fn test_start_with_invalid_config_is_unconfigured() {
	let harness = Harness::new(Some(ServerConfig::new("http://memory", "s1")));
	harness.server.start().await.unwrap();
	assert_eq!(harness.lifecycle(), vec!["unconfigured"]);
	assert_eq!(harness.broker.connect_count(), 0);
}

#[tokio::test]
async fn test_full_lifecycle() {
	let harness = Harness::new(Some(config()));
	harness.serve().await;
	assert_eq!(harness.broker.retained("mindctrl/statuses/s1"), Some(b"alive".to_vec()));

	harness.server.stop().await.unwrap();
	harness.server.wait_for(Phase::Idle, WAIT).await.unwrap();
	harness.wait_for_event("stopped").await;

	assert_eq!(harness.lifecycle(), vec!["starting", "serving", "stopping", "stopped"]);
	assert_eq!(harness.broker.retained("mindctrl/statuses/s1"), Some(b"dead".to_vec()));
	assert!(harness.broker.client_ids().is_empty());
}

#[tokio::test]
async fn test_second_start_is_noop() {
	let harness = Harness::new(Some(config()));
	harness.serve().await;
	harness.server.start().await.unwrap();

	assert_eq!(harness.server.phase(), Phase::Serving);
	assert_eq!(harness.broker.connect_count(), 1);
	assert_eq!(harness.lifecycle(), vec!["starting", "serving"]);
}

#[tokio::test]
async fn test_refused_connection_is_unreachable() {
	let harness = Harness::new(Some(config()));
	harness.broker.set_refusing(true);
	harness.server.start().await.unwrap();
	harness.wait_for_event("unreachable").await;

	assert_eq!(harness.lifecycle(), vec!["starting", "unreachable"]);
	assert_eq!(harness.server.phase(), Phase::Idle);

	// no retry loop: nothing else happens on its own
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert_eq!(harness.lifecycle(), vec!["starting", "unreachable"]);
}

#[tokio::test]
async fn test_lost_connection_is_disconnected() {
	let harness = Harness::new(Some(config()));
	harness.serve().await;

	let ids = harness.broker.client_ids();
	assert_eq!(ids.len(), 1);
	assert!(ids[0].starts_with("mindctrl-s1-"));
	assert!(harness.broker.drop_connection(&ids[0]));

	harness.wait_for_event("disconnected").await;
	assert_eq!(harness.server.phase(), Phase::Idle);
	assert_eq!(harness.broker.retained("mindctrl/statuses/s1"), Some(b"dead".to_vec()));

	// a fresh start works after an unexpected loss
	harness.serve().await;
	assert_eq!(harness.broker.connect_count(), 2);
	assert_eq!(harness.broker.retained("mindctrl/statuses/s1"), Some(b"alive".to_vec()));
}

#[tokio::test]
async fn test_ping_round_trip() {
	let harness = Harness::new(Some(config()));
	harness.serve().await;
	let mut client = harness.client("c1").await;

	client
		.client
		.publish("mindctrl/servers/s1", request("1", "ping", json!({})), false)
		.await
		.unwrap();

	assert_eq!(
		next_message(&mut client).await,
		json!({
			"type": "response",
			"id": "1",
			"method": "ping",
			"result": { "success": true },
			"client": "c1",
			"server": "s1",
		})
	);
	harness.wait_for_event("response").await;
}

#[tokio::test]
async fn test_unknown_method_round_trip() {
	let harness = Harness::new(Some(config()));
	harness.serve().await;
	let mut client = harness.client("c1").await;

	client
		.client
		.publish("mindctrl/servers/s1", request("2", "no.such.method", json!({})), false)
		.await
		.unwrap();

	let response = next_message(&mut client).await;
	assert_eq!(
		response["result"],
		json!({
			"success": false,
			"category": "dispatch",
			"message": "unknown method no.such.method",
		})
	);
}

#[tokio::test]
async fn test_execution_error_round_trip() {
	let harness = Harness::new(Some(config()));
	harness.serve().await;
	let mut client = harness.client("c1").await;

	client
		.client
		.publish("mindctrl/servers/s1", request("3", "fail", json!({})), false)
		.await
		.unwrap();

	let response = next_message(&mut client).await;
	assert_eq!(response["result"]["category"], "execution");
	assert_eq!(response["result"]["message"], "it broke");
}

#[tokio::test]
async fn test_garbage_is_dropped() {
	let harness = Harness::new(Some(config()));
	harness.serve().await;
	let mut client = harness.client("c1").await;

	for payload in [
		b"not json".to_vec(),
		serde_json::to_vec(&json!({ "type": "response", "id": "1" })).unwrap(),
		serde_json::to_vec(&json!({
			"type": "request", "id": "", "method": "ping", "params": {}, "client": "c1", "server": "s1"
		}))
		.unwrap(),
	] {
		client.client.publish("mindctrl/servers/s1", payload, false).await.unwrap();
	}
	client
		.client
		.publish("mindctrl/servers/s1", request("4", "ping", json!({})), false)
		.await
		.unwrap();

	// the only reply is to the valid request
	let response = next_message(&mut client).await;
	assert_eq!(response["id"], "4");

	let garbage = harness
		.log
		.lock()
		.iter()
		.filter(|event| matches!(event, ServerEvent::Garbage { .. }))
		.count();
	assert_eq!(garbage, 3);
	assert_eq!(harness.server.phase(), Phase::Serving);
}

#[tokio::test]
async fn test_responses_complete_independently() {
	let harness = Harness::new(Some(config()));
	harness.serve().await;
	let mut client = harness.client("c1").await;

	client
		.client
		.publish("mindctrl/servers/s1", request("slow", "sleep", json!({ "ms": 300 })), false)
		.await
		.unwrap();
	client
		.client
		.publish("mindctrl/servers/s1", request("fast", "sleep", json!({ "ms": 1 })), false)
		.await
		.unwrap();

	assert_eq!(next_message(&mut client).await["id"], "fast");
	let slow = next_message(&mut client).await;
	assert_eq!(slow["id"], "slow");
	assert_eq!(slow["result"], json!({ "success": true, "result": 300 }));
}

#[tokio::test]
async fn test_liveness_is_republished() {
	let options = ServerOptions {
		liveness_interval: Duration::from_millis(20),
		..ServerOptions::default()
	};
	let harness = Harness::with_options(Some(config()), options);

	let mut watcher = harness
		.broker
		.connect(ConnectOptions::new("mqtt://memory:1883", "watcher"))
		.await
		.unwrap();
	assert_eq!(watcher.events.recv().await, Some(BusEvent::Connected));
	watcher.client.subscribe("mindctrl/statuses/s1").await.unwrap();

	harness.serve().await;
	for _ in 0..3 {
		match tokio::time::timeout(WAIT, watcher.events.recv()).await {
			Ok(Some(BusEvent::Message { payload, .. })) => assert_eq!(payload, b"alive"),
			other => panic!("expected alive, got {other:?}"),
		}
	}

	harness.server.stop().await.unwrap();
	harness.server.wait_for(Phase::Idle, WAIT).await.unwrap();
	// drain until the final dead marker; no alive may follow it
	let mut last = None;
	while let Ok(Some(BusEvent::Message { payload, .. })) =
		tokio::time::timeout(Duration::from_millis(100), watcher.events.recv()).await
	{
		last = Some(payload);
	}
	assert_eq!(last, Some(b"dead".to_vec()));
}

/// Accepts connections but never reports them as established.
#[derive(Default)]
struct SilentConnector {
	held: Mutex<Vec<mpsc::UnboundedSender<BusEvent>>>,
}

struct NullClient;

#[async_trait]
impl BusClient for NullClient {
	async fn subscribe(&self, _topic: &str) -> Result<()> {
		Ok(())
	}

	async fn publish(&self, _topic: &str, _payload: Vec<u8>, _retain: bool) -> Result<()> {
		Ok(())
	}

	async fn disconnect(&self) -> Result<()> {
		Ok(())
	}
}

#[async_trait]
impl BusConnector for SilentConnector {
	async fn connect(&self, _options: ConnectOptions) -> Result<BusConnection> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.held.lock().push(tx);
		Ok(BusConnection {
			client: Arc::new(NullClient),
			events: rx,
		})
	}
}

#[tokio::test]
async fn test_connect_timeout_is_unreachable() {
	let options = ServerOptions {
		connect_timeout: Duration::from_millis(30),
		..ServerOptions::default()
	};
	let server = Server::spawn(
		Arc::new(SilentConnector::default()),
		Arc::new(StaticConfig::new(config())),
		Arc::new(Registry::new().build()),
		options,
	);
	let log = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&log);
	let _subscription = server.events().subscribe(move |event: &ServerEvent| sink.lock().push(event.name()));

	server.start().await.unwrap();
	assert_eq!(server.phase(), Phase::Starting);
	server.wait_for(Phase::Idle, WAIT).await.unwrap();
	assert_eq!(*log.lock(), vec!["starting", "unreachable"]);
}

#[tokio::test]
async fn test_dropping_handle_stops_server() {
	let harness = Harness::new(Some(config()));
	harness.serve().await;
	let broker = harness.broker.clone();
	drop(harness);

	let deadline = tokio::time::Instant::now() + WAIT;
	while broker.retained("mindctrl/statuses/s1") != Some(b"dead".to_vec()) {
		assert!(tokio::time::Instant::now() < deadline, "server never announced dead");
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
}
