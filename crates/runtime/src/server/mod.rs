//! Connection lifecycle of an RPC server.
//!
//! A single actor task owns the connection [`State`] and processes commands
//! and bus events one at a time, in arrival order:
//!
//! ```text
//! Idle --start--> Starting --connected--> Serving --stop--> Stopping --closed--> Idle
//!                    |                       |
//!                    +--closed--> Idle       +--closed--> Idle
//!                  (unreachable)           (disconnected)
//! ```
//!
//! While serving, every well-formed request is dispatched on its own task
//! and its response published to the requesting client once that dispatch
//! completes. Malformed payloads are reported as [`ServerEvent::Garbage`]
//! and otherwise dropped.

use std::fmt;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use mindctrl_protocol::{Request, Response, Status, Topics};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bus::{BusClient, BusConnector, BusEvent, ConnectOptions, Will};
use crate::config::{ConfigProvider, ServerConfig, ServerOptions};
use crate::error::{Error, Result};
use crate::event::EventChannel;
use crate::rpc::Dispatcher;

#[cfg(test)]
mod tests;

/// Observable progress of a server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
	/// Connecting to the bus.
	Starting,
	/// Connected, subscribed and announced alive.
	Serving,
	/// Graceful shutdown requested.
	Stopping,
	/// Graceful shutdown finished.
	Stopped,
	/// `start` found no usable configuration.
	Unconfigured,
	/// The bus could not be reached.
	Unreachable,
	/// The bus connection was lost while serving.
	Disconnected,
	/// An inbound payload was not a valid request.
	Garbage { topic: String, reason: String },
	/// A request is about to be dispatched.
	Request(Request),
	/// A response was published.
	Response(Response),
}

impl ServerEvent {
	pub fn name(&self) -> &'static str {
		match self {
			ServerEvent::Starting => "starting",
			ServerEvent::Serving => "serving",
			ServerEvent::Stopping => "stopping",
			ServerEvent::Stopped => "stopped",
			ServerEvent::Unconfigured => "unconfigured",
			ServerEvent::Unreachable => "unreachable",
			ServerEvent::Disconnected => "disconnected",
			ServerEvent::Garbage { .. } => "garbage",
			ServerEvent::Request(_) => "request",
			ServerEvent::Response(_) => "response",
		}
	}
}

/// Coarse connection phase, mirroring the [`State`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Idle,
	Starting,
	Serving,
	Stopping,
}

impl Phase {
	pub fn as_str(self) -> &'static str {
		match self {
			Phase::Idle => "idle",
			Phase::Starting => "starting",
			Phase::Serving => "serving",
			Phase::Stopping => "stopping",
		}
	}
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Connection state; only the actor task ever holds it.
enum State {
	Idle,
	Starting {
		config: ServerConfig,
		bus: Arc<dyn BusClient>,
	},
	Serving {
		config: ServerConfig,
		bus: Arc<dyn BusClient>,
		liveness: JoinHandle<()>,
	},
	Stopping {
		config: ServerConfig,
		// held until the broker confirms the close
		_bus: Arc<dyn BusClient>,
	},
}

impl State {
	fn phase(&self) -> Phase {
		match self {
			State::Idle => Phase::Idle,
			State::Starting { .. } => Phase::Starting,
			State::Serving { .. } => Phase::Serving,
			State::Stopping { .. } => Phase::Stopping,
		}
	}
}

enum Command {
	Start(oneshot::Sender<()>),
	Stop(oneshot::Sender<()>),
}

/// Handle to a server actor. Dropping every handle shuts the actor down.
pub struct Server {
	commands: mpsc::UnboundedSender<Command>,
	phase: watch::Receiver<Phase>,
	events: EventChannel<ServerEvent>,
}

impl fmt::Debug for Server {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Server").field("phase", &*self.phase.borrow()).finish()
	}
}

impl Server {
	/// Spawns the actor in the idle phase. Must be called inside a Tokio runtime.
	pub fn spawn(
		connector: Arc<dyn BusConnector>,
		config: Arc<dyn ConfigProvider>,
		dispatcher: Arc<Dispatcher>,
		options: ServerOptions,
	) -> Self {
		let (commands_tx, commands_rx) = mpsc::unbounded_channel();
		let (phase_tx, phase_rx) = watch::channel(Phase::Idle);
		let events = EventChannel::new();

		let actor = Actor {
			connector,
			provider: config,
			dispatcher,
			topics: Topics::new(options.namespace.clone()),
			options,
			events: events.clone(),
			phase: phase_tx,
			state: State::Idle,
			bus_events: None,
			connect_deadline: None,
		};
		tokio::spawn(actor.run(commands_rx));

		Self {
			commands: commands_tx,
			phase: phase_rx,
			events,
		}
	}

	/// Requests a start. No-op unless idle. Returns once the actor has acted
	/// on the request, not once serving.
	pub async fn start(&self) -> Result<()> {
		self.send(Command::Start).await
	}

	/// Requests a graceful stop. No-op unless serving. Returns once the actor
	/// has entered the stopping phase (or ignored the request).
	pub async fn stop(&self) -> Result<()> {
		self.send(Command::Stop).await
	}

	async fn send(&self, command: fn(oneshot::Sender<()>) -> Command) -> Result<()> {
		let (tx, rx) = oneshot::channel();
		self.commands.send(command(tx)).map_err(|_| Error::ServerGone)?;
		rx.await.map_err(|_| Error::ServerGone)
	}

	pub fn phase(&self) -> Phase {
		*self.phase.borrow()
	}

	/// Waits until the server reaches `phase`.
	pub async fn wait_for(&self, phase: Phase, timeout: Duration) -> Result<()> {
		let mut rx = self.phase.clone();
		match tokio::time::timeout(timeout, rx.wait_for(|current| *current == phase)).await {
			Ok(Ok(_)) => Ok(()),
			Ok(Err(_)) => Err(Error::ServerGone),
			Err(_) => Err(Error::Timeout(format!(
				"server did not reach {phase} within {}ms",
				timeout.as_millis()
			))),
		}
	}

	/// Lifecycle, request and response events.
	pub fn events(&self) -> &EventChannel<ServerEvent> {
		&self.events
	}
}

enum Step {
	Command(Option<Command>),
	Bus(BusEvent),
	ConnectTimeout,
}

struct Actor {
	connector: Arc<dyn BusConnector>,
	provider: Arc<dyn ConfigProvider>,
	dispatcher: Arc<Dispatcher>,
	topics: Topics,
	options: ServerOptions,
	events: EventChannel<ServerEvent>,
	phase: watch::Sender<Phase>,
	state: State,
	/// Event stream of the live connection; `None` exactly when idle.
	bus_events: Option<mpsc::UnboundedReceiver<BusEvent>>,
	/// Deadline for the broker to accept the connection while starting.
	connect_deadline: Option<Instant>,
}

async fn next_bus_event(events: &mut Option<mpsc::UnboundedReceiver<BusEvent>>) -> BusEvent {
	match events {
		Some(rx) => rx.recv().await.unwrap_or(BusEvent::Closed {
			reason: Some("bus event stream ended".to_string()),
		}),
		None => pending().await,
	}
}

async fn deadline(at: Option<Instant>) {
	match at {
		Some(at) => tokio::time::sleep_until(at).await,
		None => pending().await,
	}
}

impl Actor {
	async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
		loop {
			let step = tokio::select! {
				command = commands.recv() => Step::Command(command),
				event = next_bus_event(&mut self.bus_events) => Step::Bus(event),
				_ = deadline(self.connect_deadline) => Step::ConnectTimeout,
			};

			match step {
				Step::Command(Some(Command::Start(ack))) => {
					self.start().await;
					let _ = ack.send(());
				}
				Step::Command(Some(Command::Stop(ack))) => {
					self.stop().await;
					let _ = ack.send(());
				}
				Step::Command(None) => break,
				Step::Bus(BusEvent::Connected) => self.on_connected().await,
				Step::Bus(BusEvent::Message { topic, payload }) => self.on_message(topic, payload),
				Step::Bus(BusEvent::Closed { reason }) => self.on_closed(reason),
				Step::ConnectTimeout => self.on_connect_timeout().await,
			}
		}

		debug!(target = "mindctrl.server", "all handles dropped; shutting down");
		self.stop().await;
	}

	fn emit(&self, event: ServerEvent) {
		match &event {
			ServerEvent::Unconfigured | ServerEvent::Unreachable | ServerEvent::Disconnected => {
				warn!(target = "mindctrl.server", event = event.name(), "server event");
			}
			ServerEvent::Garbage { topic, reason } => {
				debug!(target = "mindctrl.server", topic = %topic, reason = %reason, "dropped malformed payload");
			}
			ServerEvent::Request(request) => {
				debug!(target = "mindctrl.server", id = %request.id, method = %request.method, client = %request.client, "request");
			}
			_ => info!(target = "mindctrl.server", event = event.name(), "server event"),
		}
		self.events.emit(&event);
	}

	fn set_state(&mut self, state: State) {
		let phase = state.phase();
		self.state = state;
		self.phase.send_replace(phase);
	}

	async fn start(&mut self) {
		if !matches!(self.state, State::Idle) {
			debug!(target = "mindctrl.server", phase = %self.state.phase(), "start ignored");
			return;
		}

		let config = match self.provider.load().await {
			Ok(Some(config)) => config,
			Ok(None) => {
				self.emit(ServerEvent::Unconfigured);
				return;
			}
			Err(err) => {
				warn!(target = "mindctrl.server", error = %err, "failed to load configuration");
				self.emit(ServerEvent::Unconfigured);
				return;
			}
		};
		if let Err(err) = config.validate() {
			warn!(target = "mindctrl.server", error = %err, "configuration rejected");
			self.emit(ServerEvent::Unconfigured);
			return;
		}

		let options = ConnectOptions::new(config.url.as_str(), client_id(&config.name))
			.credentials(config.username.as_deref(), config.password.as_deref())
			.connect_timeout(self.options.connect_timeout)
			.will(Will {
				topic: self.topics.status(&config.name),
				payload: Status::Dead.payload().to_vec(),
				retain: true,
			});

		match self.connector.connect(options).await {
			Ok(connection) => {
				info!(target = "mindctrl.server", url = %config.url, name = %config.name, "connecting to bus");
				self.bus_events = Some(connection.events);
				self.connect_deadline = Some(Instant::now() + self.options.connect_timeout);
				self.set_state(State::Starting {
					config,
					bus: connection.client,
				});
				self.emit(ServerEvent::Starting);
			}
			Err(err) => {
				warn!(target = "mindctrl.server", error = %err, "bus connect failed");
				self.emit(ServerEvent::Unreachable);
			}
		}
	}

	async fn on_connected(&mut self) {
		let (config, bus) = match std::mem::replace(&mut self.state, State::Idle) {
			State::Starting { config, bus } => (config, bus),
			other => {
				self.state = other;
				debug!(target = "mindctrl.server", "unexpected connected event ignored");
				return;
			}
		};
		self.connect_deadline = None;

		let status_topic = self.topics.status(&config.name);
		let announced = async {
			bus.subscribe(&self.topics.server(&config.name)).await?;
			bus.publish(&status_topic, Status::Alive.payload().to_vec(), true).await
		};
		if let Err(err) = announced.await {
			warn!(target = "mindctrl.server", error = %err, "failed to announce server");
			let _ = bus.disconnect().await;
			self.bus_events = None;
			self.set_state(State::Idle);
			self.emit(ServerEvent::Unreachable);
			return;
		}

		let liveness = tokio::spawn(republish_alive(
			Arc::clone(&bus),
			status_topic,
			self.options.liveness_interval,
		));
		self.set_state(State::Serving { config, bus, liveness });
		self.emit(ServerEvent::Serving);
	}

	fn on_message(&self, topic: String, payload: Vec<u8>) {
		let (config, bus) = match &self.state {
			State::Serving { config, bus, .. } => (config, bus),
			_ => {
				debug!(target = "mindctrl.server", topic = %topic, "message outside serving ignored");
				return;
			}
		};

		let request = match Request::decode(&payload) {
			Ok(request) => request,
			Err(err) => {
				self.emit(ServerEvent::Garbage {
					topic,
					reason: err.to_string(),
				});
				return;
			}
		};

		if request.server != config.name {
			debug!(
				target = "mindctrl.server",
				addressed = %request.server,
				name = %config.name,
				"request addressed to another name"
			);
		}

		let reply_topic = self.topics.client(&request.client);
		let bus = Arc::clone(bus);
		let dispatcher = Arc::clone(&self.dispatcher);
		let events = self.events.clone();
		self.emit(ServerEvent::Request(request.clone()));

		tokio::spawn(async move {
			let output = dispatcher.dispatch(&request.method, request.params.clone()).await;
			let response = request.respond(output);
			match response.encode() {
				Ok(bytes) => {
					if let Err(err) = bus.publish(&reply_topic, bytes, false).await {
						warn!(target = "mindctrl.server", id = %response.id, error = %err, "failed to publish response");
					}
				}
				Err(err) => {
					warn!(target = "mindctrl.server", id = %response.id, error = %err, "failed to encode response");
				}
			}
			debug!(
				target = "mindctrl.server",
				id = %response.id,
				method = %response.method,
				success = response.result.is_success(),
				"response"
			);
			events.emit(&ServerEvent::Response(response));
		});
	}

	async fn stop(&mut self) {
		let (config, bus, liveness) = match std::mem::replace(&mut self.state, State::Idle) {
			State::Serving { config, bus, liveness } => (config, bus, liveness),
			other => {
				debug!(target = "mindctrl.server", phase = %other.phase(), "stop ignored");
				self.state = other;
				return;
			}
		};
		liveness.abort();

		let status_topic = self.topics.status(&config.name);
		if let Err(err) = bus.publish(&status_topic, Status::Dead.payload().to_vec(), true).await {
			warn!(target = "mindctrl.server", error = %err, "failed to publish dead status");
		}
		if let Err(err) = bus.disconnect().await {
			warn!(target = "mindctrl.server", error = %err, "failed to disconnect");
		}

		self.set_state(State::Stopping { config, _bus: bus });
		self.emit(ServerEvent::Stopping);
	}

	fn on_closed(&mut self, reason: Option<String>) {
		self.bus_events = None;
		self.connect_deadline = None;
		if let Some(reason) = &reason {
			debug!(target = "mindctrl.server", reason = %reason, "bus closed");
		}

		let event = match std::mem::replace(&mut self.state, State::Idle) {
			State::Idle => return,
			State::Starting { .. } => ServerEvent::Unreachable,
			State::Serving { liveness, .. } => {
				liveness.abort();
				ServerEvent::Disconnected
			}
			State::Stopping { config, .. } => {
				debug!(target = "mindctrl.server", name = %config.name, "close confirmed");
				ServerEvent::Stopped
			}
		};
		self.set_state(State::Idle);
		self.emit(event);
	}

	async fn on_connect_timeout(&mut self) {
		self.connect_deadline = None;
		let bus = match std::mem::replace(&mut self.state, State::Idle) {
			State::Starting { bus, .. } => bus,
			other => {
				self.state = other;
				return;
			}
		};
		warn!(
			target = "mindctrl.server",
			timeout_ms = self.options.connect_timeout.as_millis() as u64,
			"broker did not accept the connection in time"
		);
		let _ = bus.disconnect().await;
		self.bus_events = None;
		self.set_state(State::Idle);
		self.emit(ServerEvent::Unreachable);
	}
}

/// Bus client id for a server: the name plus a random suffix.
fn client_id(name: &str) -> String {
	format!("mindctrl-{name}-{}", uuid::Uuid::new_v4().simple())
}

/// Re-announces `alive` every `interval` until aborted.
async fn republish_alive(bus: Arc<dyn BusClient>, topic: String, interval: Duration) {
	let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
	loop {
		ticker.tick().await;
		if let Err(err) = bus.publish(&topic, Status::Alive.payload().to_vec(), true).await {
			debug!(target = "mindctrl.server", error = %err, "liveness publish failed");
		}
	}
}
