//! In-process broker for tests and offline runs.
//!
//! Implements the subset of broker behaviour the server relies on: topic
//! filters with `+`/`#`, retained messages (an empty retained payload clears
//! the topic), last-will delivery when a connection is dropped without a
//! clean disconnect, and refusal of new connections.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{BusClient, BusConnection, BusConnector, BusEvent, ConnectOptions, Will, topic_matches};
use crate::error::{Error, Result};

struct Session {
	client_id: String,
	filters: Vec<String>,
	events: mpsc::UnboundedSender<BusEvent>,
	will: Option<Will>,
}

#[derive(Default)]
struct BrokerState {
	sessions: HashMap<u64, Session>,
	retained: BTreeMap<String, Vec<u8>>,
	next_session: u64,
	refusing: bool,
	connects: usize,
}

impl BrokerState {
	fn route(&mut self, topic: &str, payload: &[u8], retain: bool) {
		if retain {
			if payload.is_empty() {
				self.retained.remove(topic);
			} else {
				self.retained.insert(topic.to_string(), payload.to_vec());
			}
		}
		for session in self.sessions.values() {
			if session.filters.iter().any(|filter| topic_matches(filter, topic)) {
				let _ = session.events.send(BusEvent::Message {
					topic: topic.to_string(),
					payload: payload.to_vec(),
				});
			}
		}
	}

	fn end_session(&mut self, id: u64, publish_will: bool, reason: Option<String>) -> bool {
		let Some(session) = self.sessions.remove(&id) else {
			return false;
		};
		let _ = session.events.send(BusEvent::Closed { reason });
		if publish_will {
			if let Some(will) = session.will {
				self.route(&will.topic, &will.payload, will.retain);
			}
		}
		true
	}
}

/// Shared in-memory broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
	state: Arc<Mutex<BrokerState>>,
}

impl std::fmt::Debug for MemoryBroker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("MemoryBroker")
			.field("sessions", &state.sessions.len())
			.field("retained", &state.retained.len())
			.finish()
	}
}

impl MemoryBroker {
	pub fn new() -> Self {
		Self::default()
	}

	/// While refusing, every new connection is closed before it is accepted.
	pub fn set_refusing(&self, refusing: bool) {
		self.state.lock().refusing = refusing;
	}

	/// Current retained payload of `topic`.
	pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
		self.state.lock().retained.get(topic).cloned()
	}

	/// Number of accepted connections so far.
	pub fn connect_count(&self) -> usize {
		self.state.lock().connects
	}

	/// Whether a live session exists for `client_id`.
	pub fn is_connected(&self, client_id: &str) -> bool {
		self.state
			.lock()
			.sessions
			.values()
			.any(|session| session.client_id == client_id)
	}

	/// Client ids of every live session.
	pub fn client_ids(&self) -> Vec<String> {
		let mut ids: Vec<String> = self
			.state
			.lock()
			.sessions
			.values()
			.map(|session| session.client_id.clone())
			.collect();
		ids.sort();
		ids
	}

	/// Publishes as the broker itself.
	pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>, retain: bool) {
		let payload = payload.into();
		self.state.lock().route(topic, &payload, retain);
	}

	/// Severs every session of `client_id` as if the network failed, publishing
	/// last wills. Returns `true` if a session was found.
	pub fn drop_connection(&self, client_id: &str) -> bool {
		let mut state = self.state.lock();
		let ids: Vec<u64> = state
			.sessions
			.iter()
			.filter(|(_, session)| session.client_id == client_id)
			.map(|(id, _)| *id)
			.collect();
		let mut found = false;
		for id in ids {
			found |= state.end_session(id, true, Some("connection lost".to_string()));
		}
		found
	}
}

#[async_trait]
impl BusConnector for MemoryBroker {
	async fn connect(&self, options: ConnectOptions) -> Result<BusConnection> {
		let (tx, rx) = mpsc::unbounded_channel();
		let mut state = self.state.lock();

		if state.refusing {
			debug!(target = "mindctrl.bus", client_id = %options.client_id, "memory broker refused connection");
			let _ = tx.send(BusEvent::Closed {
				reason: Some("connection refused".to_string()),
			});
			return Ok(BusConnection {
				client: Arc::new(MemoryClient {
					broker: self.clone(),
					session: None,
				}),
				events: rx,
			});
		}

		let id = state.next_session;
		state.next_session += 1;
		state.connects += 1;
		let _ = tx.send(BusEvent::Connected);
		state.sessions.insert(
			id,
			Session {
				client_id: options.client_id,
				filters: Vec::new(),
				events: tx,
				will: options.will,
			},
		);

		Ok(BusConnection {
			client: Arc::new(MemoryClient {
				broker: self.clone(),
				session: Some(id),
			}),
			events: rx,
		})
	}
}

struct MemoryClient {
	broker: MemoryBroker,
	/// `None` for connections the broker refused.
	session: Option<u64>,
}

impl MemoryClient {
	fn session(&self) -> Result<u64> {
		self.session.ok_or(Error::Closed)
	}
}

#[async_trait]
impl BusClient for MemoryClient {
	async fn subscribe(&self, topic: &str) -> Result<()> {
		let id = self.session()?;
		let mut state = self.broker.state.lock();
		let retained: Vec<(String, Vec<u8>)> = state
			.retained
			.iter()
			.filter(|(name, _)| topic_matches(topic, name))
			.map(|(name, payload)| (name.clone(), payload.clone()))
			.collect();

		let session = state.sessions.get_mut(&id).ok_or(Error::Closed)?;
		if !session.filters.iter().any(|filter| filter == topic) {
			session.filters.push(topic.to_string());
		}
		for (name, payload) in retained {
			let _ = session.events.send(BusEvent::Message { topic: name, payload });
		}
		Ok(())
	}

	async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
		let id = self.session()?;
		let mut state = self.broker.state.lock();
		if !state.sessions.contains_key(&id) {
			return Err(Error::Closed);
		}
		state.route(topic, &payload, retain);
		Ok(())
	}

	async fn disconnect(&self) -> Result<()> {
		let id = self.session()?;
		let mut state = self.broker.state.lock();
		if state.end_session(id, false, None) {
			Ok(())
		} else {
			Err(Error::Closed)
		}
	}
}
