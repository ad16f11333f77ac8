//! Calling procedures on a remote server over the bus.
//!
//! An [`RpcClient`] connects under a random client id, listens on its own
//! reply topic and correlates responses to calls by request id. Calls that
//! time out or are dropped remove their pending entry, so late responses are
//! discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use mindctrl_protocol::{DEFAULT_NAMESPACE, Output, Params, Request, Response, Status, Topics};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::{BusClient, BusConnector, BusEvent, ConnectOptions};
use crate::error::{Error, Result};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Response>>>>;

/// How to reach the bus as a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
	pub url: String,
	pub username: Option<String>,
	pub password: Option<String>,
	pub namespace: String,
	pub connect_timeout: Duration,
}

impl ClientOptions {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			username: None,
			password: None,
			namespace: DEFAULT_NAMESPACE.to_string(),
			connect_timeout: Duration::from_secs(10),
		}
	}

	pub fn credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
		self.username = username;
		self.password = password;
		self
	}

	pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = namespace.into();
		self
	}
}

/// Removes a pending call unless it completed.
struct PendingGuard {
	id: String,
	pending: PendingMap,
	completed: bool,
}

impl Drop for PendingGuard {
	fn drop(&mut self) {
		if !self.completed && self.pending.lock().remove(&self.id).is_some() {
			debug!(target = "mindctrl.client", id = %self.id, "dropped pending call");
		}
	}
}

/// Bus client for invoking remote procedures.
pub struct RpcClient {
	bus: Arc<dyn BusClient>,
	client_id: String,
	topics: Topics,
	pending: PendingMap,
	next_id: AtomicU64,
	statuses: watch::Receiver<HashMap<String, Status>>,
	watched: Mutex<Vec<String>>,
	reader: JoinHandle<()>,
}

impl std::fmt::Debug for RpcClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RpcClient")
			.field("client_id", &self.client_id)
			.field("pending", &self.pending.lock().len())
			.finish()
	}
}

impl RpcClient {
	/// Connects and subscribes to the reply topic.
	pub async fn connect(connector: &dyn BusConnector, options: ClientOptions) -> Result<Self> {
		let client_id = format!("mindctrl-client-{}", uuid::Uuid::new_v4().simple());
		let topics = Topics::new(options.namespace.clone());
		let connect = ConnectOptions::new(options.url.as_str(), client_id.as_str())
			.credentials(options.username.as_deref(), options.password.as_deref())
			.connect_timeout(options.connect_timeout);

		let mut connection = connector.connect(connect).await?;
		let established = tokio::time::timeout(options.connect_timeout, async {
			match connection.events.recv().await {
				Some(BusEvent::Connected) => Ok(()),
				Some(BusEvent::Closed { reason }) => Err(Error::Bus(
					reason.unwrap_or_else(|| "connection closed".to_string()),
				)),
				Some(BusEvent::Message { .. }) | None => Err(Error::Closed),
			}
		})
		.await;
		match established {
			Ok(result) => result?,
			Err(_) => {
				let _ = connection.client.disconnect().await;
				return Err(Error::Timeout(format!(
					"broker at {} did not accept the connection",
					options.url
				)));
			}
		}

		let reply_topic = topics.client(&client_id);
		connection.client.subscribe(&reply_topic).await?;

		let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
		let (status_tx, status_rx) = watch::channel(HashMap::new());
		let reader = tokio::spawn(read_events(
			connection.events,
			reply_topic,
			topics.clone(),
			Arc::clone(&pending),
			status_tx,
		));

		Ok(Self {
			bus: connection.client,
			client_id,
			topics,
			pending,
			next_id: AtomicU64::new(1),
			statuses: status_rx,
			watched: Mutex::new(Vec::new()),
			reader,
		})
	}

	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	/// Invokes `method` on `server` and waits up to `timeout` for its output.
	pub async fn call(&self, server: &str, method: &str, params: Params, timeout: Duration) -> Result<Output> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
		let request = Request::new(id.as_str(), method, params, self.client_id.as_str(), server);
		let payload = request.encode()?;

		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(id.clone(), tx);
		let mut guard = PendingGuard {
			id: id.clone(),
			pending: Arc::clone(&self.pending),
			completed: false,
		};

		self.bus.publish(&self.topics.server(server), payload, false).await?;
		debug!(target = "mindctrl.client", id = %id, method, server, "request sent");

		match tokio::time::timeout(timeout, rx).await {
			Ok(Ok(response)) => {
				guard.completed = true;
				Ok(response.result)
			}
			Ok(Err(_)) => Err(Error::Closed),
			Err(_) => Err(Error::Timeout(format!(
				"no response to {method} from {server} within {}ms",
				timeout.as_millis()
			))),
		}
	}

	/// Reads the retained liveness marker of `server`, waiting up to `wait`
	/// for the broker to deliver it. `None` means no marker was seen.
	pub async fn server_status(&self, server: &str, wait: Duration) -> Result<Option<Status>> {
		let topic = self.topics.status(server);
		let subscribe = {
			let mut watched = self.watched.lock();
			if watched.contains(&topic) {
				false
			} else {
				watched.push(topic.clone());
				true
			}
		};
		if subscribe {
			self.bus.subscribe(&topic).await?;
		}

		let mut statuses = self.statuses.clone();
		let seen = tokio::time::timeout(wait, statuses.wait_for(|known| known.contains_key(server))).await;
		match seen {
			Ok(Ok(known)) => Ok(known.get(server).copied()),
			Ok(Err(_)) => Err(Error::Closed),
			Err(_) => Ok(None),
		}
	}

	/// Disconnects cleanly. Pending calls fail with [`Error::Closed`].
	pub async fn close(self) -> Result<()> {
		self.bus.disconnect().await?;
		self.reader.abort();
		self.pending.lock().clear();
		Ok(())
	}
}

impl Drop for RpcClient {
	fn drop(&mut self) {
		self.reader.abort();
	}
}

async fn read_events(
	mut events: mpsc::UnboundedReceiver<BusEvent>,
	reply_topic: String,
	topics: Topics,
	pending: PendingMap,
	statuses: watch::Sender<HashMap<String, Status>>,
) {
	while let Some(event) = events.recv().await {
		match event {
			BusEvent::Message { topic, payload } if topic == reply_topic => match Response::decode(&payload) {
				Ok(response) => match pending.lock().remove(&response.id) {
					Some(tx) => {
						let _ = tx.send(response);
					}
					None => debug!(target = "mindctrl.client", id = %response.id, "unsolicited response"),
				},
				Err(err) => warn!(target = "mindctrl.client", error = %err, "malformed response"),
			},
			BusEvent::Message { topic, payload } => {
				let Some(server) = topics.status_server(&topic) else {
					continue;
				};
				match Status::from_payload(&payload) {
					Some(status) => {
						let server = server.to_string();
						statuses.send_modify(|known| {
							known.insert(server, status);
						});
					}
					None => debug!(target = "mindctrl.client", topic = %topic, "unrecognised status payload"),
				}
			}
			BusEvent::Closed { reason } => {
				debug!(target = "mindctrl.client", ?reason, "connection closed");
				break;
			}
			BusEvent::Connected => {}
		}
	}
	pending.lock().clear();
}
