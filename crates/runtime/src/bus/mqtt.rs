//! MQTT transport backed by `rumqttc`.
//!
//! `rumqttc` reconnects whenever its event loop is polled after a failure.
//! The poll task here stops at the first error instead, so every connection
//! is single-shot and ends with exactly one [`BusEvent::Closed`].

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
	AsyncClient, Event, EventLoop, LastWill, MqttOptions, NetworkOptions, Outgoing, Packet, QoS,
	Transport,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use super::{BusClient, BusConnection, BusConnector, BusEvent, ConnectOptions};
use crate::config::explicit_port;
use crate::error::{Error, Result};

/// Largest packet accepted or sent, in bytes.
const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Connects to a real broker. Supports `mqtt`, `tcp`, `mqtts`, `ssl`, `ws`
/// and `wss` URLs.
#[derive(Debug, Clone)]
pub struct MqttConnector {
	/// Capacity of the client request queue.
	capacity: usize,
}

impl Default for MqttConnector {
	fn default() -> Self {
		Self { capacity: 64 }
	}
}

impl MqttConnector {
	pub fn new() -> Self {
		Self::default()
	}
}

/// Translates connect options into `rumqttc` options.
fn mqtt_options(options: &ConnectOptions) -> Result<MqttOptions> {
	if options.client_id.trim().is_empty() {
		return Err(Error::InvalidConfig("client id must not be empty".into()));
	}

	let url = Url::parse(&options.url)
		.map_err(|err| Error::InvalidConfig(format!("invalid bus url {:?}: {err}", options.url)))?;
	let host = url
		.host_str()
		.filter(|host| !host.is_empty())
		.ok_or_else(|| Error::InvalidConfig(format!("bus url {:?} has no host", options.url)))?;
	let port = explicit_port(&options.url, &url)
		.ok_or_else(|| Error::InvalidConfig(format!("bus url {:?} has no port", options.url)))?;

	let id = options.client_id.as_str();
	let mut mqtt = match url.scheme() {
		"mqtt" | "tcp" => MqttOptions::new(id, host, port),
		"mqtts" | "ssl" => {
			let mut mqtt = MqttOptions::new(id, host, port);
			mqtt.set_transport(Transport::tls_with_default_config());
			mqtt
		}
		"ws" => {
			let mut mqtt = MqttOptions::new(id, options.url.as_str(), port);
			mqtt.set_transport(Transport::Ws);
			mqtt
		}
		"wss" => {
			let mut mqtt = MqttOptions::new(id, options.url.as_str(), port);
			mqtt.set_transport(Transport::wss_with_default_config());
			mqtt
		}
		other => {
			return Err(Error::InvalidConfig(format!("unsupported bus scheme {other:?}")));
		}
	};

	// rumqttc rejects sub-second keep-alives other than zero
	let keep_alive = if options.keep_alive.is_zero() {
		Duration::ZERO
	} else {
		options.keep_alive.max(Duration::from_secs(1))
	};

	mqtt.set_keep_alive(keep_alive)
		.set_clean_session(options.clean_session)
		.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

	if let Some(username) = &options.username {
		mqtt.set_credentials(username.as_str(), options.password.as_deref().unwrap_or_default());
	}
	if let Some(will) = &options.will {
		mqtt.set_last_will(LastWill::new(
			will.topic.as_str(),
			will.payload.clone(),
			QoS::AtMostOnce,
			will.retain,
		));
	}

	Ok(mqtt)
}

#[async_trait]
impl BusConnector for MqttConnector {
	async fn connect(&self, options: ConnectOptions) -> Result<BusConnection> {
		let mqtt = mqtt_options(&options)?;
		let (client, mut eventloop) = AsyncClient::new(mqtt, self.capacity);

		let mut network = NetworkOptions::new();
		network.set_connection_timeout(options.connect_timeout.as_secs().max(1));
		eventloop.set_network_options(network);

		let (tx, rx) = mpsc::unbounded_channel();
		info!(target = "mindctrl.bus", url = %options.url, client_id = %options.client_id, "connecting");
		tokio::spawn(poll(eventloop, tx));

		Ok(BusConnection {
			client: std::sync::Arc::new(MqttClient { client }),
			events: rx,
		})
	}
}

/// Drives the event loop until the connection ends, then drops it.
async fn poll(mut eventloop: EventLoop, events: mpsc::UnboundedSender<BusEvent>) {
	let reason = loop {
		let event = match eventloop.poll().await {
			Ok(Event::Incoming(Packet::ConnAck(_))) => BusEvent::Connected,
			Ok(Event::Incoming(Packet::Publish(publish))) => BusEvent::Message {
				topic: publish.topic,
				payload: publish.payload.to_vec(),
			},
			Ok(Event::Outgoing(Outgoing::Disconnect)) => break None,
			Ok(_) => continue,
			Err(err) => {
				warn!(target = "mindctrl.bus", error = %err, "connection ended");
				break Some(err.to_string());
			}
		};
		if events.send(event).is_err() {
			debug!(target = "mindctrl.bus", "event receiver dropped; stopping");
			return;
		}
	};
	let _ = events.send(BusEvent::Closed { reason });
}

struct MqttClient {
	client: AsyncClient,
}

#[async_trait]
impl BusClient for MqttClient {
	async fn subscribe(&self, topic: &str) -> Result<()> {
		self.client.subscribe(topic, QoS::AtMostOnce).await?;
		Ok(())
	}

	async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
		self.client.publish(topic, QoS::AtMostOnce, retain, payload).await?;
		Ok(())
	}

	async fn disconnect(&self) -> Result<()> {
		self.client.disconnect().await?;
		Ok(())
	}
}
