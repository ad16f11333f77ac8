//! Request and response envelopes.
//!
//! Both envelopes carry a `type` discriminator on the wire (`"request"` or
//! `"response"`) that is implied by the Rust type, so it never appears as a
//! field here.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::output::{Output, Params};

/// Instruction from a client to execute a method.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
	pub id: String,
	pub method: String,
	pub params: Params,
	/// Requester identity; responses go to `<ns>/clients/<client>`.
	pub client: String,
	/// Responder identity.
	pub server: String,
}

/// Reply from the server carrying the method's [`Output`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
	pub id: String,
	pub method: String,
	pub result: Output,
	pub client: String,
	pub server: String,
}

/// Reason an inbound payload was not accepted as a [`Request`].
#[derive(Debug)]
pub enum DecodeError {
	/// Payload is not a JSON document of the expected shape.
	Json(serde_json::Error),
	/// `type` was present but not `"request"`.
	WrongType(String),
	/// A required string field was empty.
	EmptyField(&'static str),
	/// `params` was not a JSON object.
	ParamsNotObject,
}

impl fmt::Display for DecodeError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DecodeError::Json(err) => write!(f, "malformed envelope: {err}"),
			DecodeError::WrongType(kind) => write!(f, "unexpected packet type {kind:?}"),
			DecodeError::EmptyField(field) => write!(f, "empty {field} field"),
			DecodeError::ParamsNotObject => f.write_str("params is not an object"),
		}
	}
}

impl std::error::Error for DecodeError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			DecodeError::Json(err) => Some(err),
			_ => None,
		}
	}
}

impl From<serde_json::Error> for DecodeError {
	fn from(err: serde_json::Error) -> Self {
		DecodeError::Json(err)
	}
}

#[derive(Serialize, Deserialize)]
struct RequestPacket {
	#[serde(rename = "type")]
	kind: String,
	id: String,
	method: String,
	params: Value,
	client: String,
	server: String,
}

#[derive(Serialize)]
struct ResponsePacketRef<'a> {
	#[serde(rename = "type")]
	kind: &'static str,
	id: &'a str,
	method: &'a str,
	result: &'a Output,
	client: &'a str,
	server: &'a str,
}

#[derive(Deserialize)]
struct ResponsePacket {
	#[serde(rename = "type")]
	kind: String,
	id: String,
	method: String,
	result: Output,
	client: String,
	server: String,
}

impl Request {
	pub fn new(
		id: impl Into<String>,
		method: impl Into<String>,
		params: Params,
		client: impl Into<String>,
		server: impl Into<String>,
	) -> Self {
		Self {
			id: id.into(),
			method: method.into(),
			params,
			client: client.into(),
			server: server.into(),
		}
	}

	/// Parses and validates an inbound payload.
	///
	/// `id`, `method`, `client` and `server` must be non-empty strings, `type`
	/// must be `"request"` and `params` must be an object.
	pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
		let packet: RequestPacket = serde_json::from_slice(payload)?;

		if packet.kind != "request" {
			return Err(DecodeError::WrongType(packet.kind));
		}
		for (field, value) in [
			("id", &packet.id),
			("method", &packet.method),
			("client", &packet.client),
			("server", &packet.server),
		] {
			if value.is_empty() {
				return Err(DecodeError::EmptyField(field));
			}
		}
		let Value::Object(params) = packet.params else {
			return Err(DecodeError::ParamsNotObject);
		};

		Ok(Self {
			id: packet.id,
			method: packet.method,
			params,
			client: packet.client,
			server: packet.server,
		})
	}

	pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
		serde_json::to_vec(&RequestPacket {
			kind: "request".to_string(),
			id: self.id.clone(),
			method: self.method.clone(),
			params: Value::Object(self.params.clone()),
			client: self.client.clone(),
			server: self.server.clone(),
		})
	}

	/// Builds the response to this request.
	pub fn respond(&self, result: Output) -> Response {
		Response {
			id: self.id.clone(),
			method: self.method.clone(),
			result,
			client: self.client.clone(),
			server: self.server.clone(),
		}
	}
}

impl Response {
	pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
		serde_json::to_vec(&ResponsePacketRef {
			kind: "response",
			id: &self.id,
			method: &self.method,
			result: &self.result,
			client: &self.client,
			server: &self.server,
		})
	}

	pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
		let packet: ResponsePacket = serde_json::from_slice(payload)?;
		if packet.kind != "response" {
			return Err(DecodeError::WrongType(packet.kind));
		}
		if packet.id.is_empty() {
			return Err(DecodeError::EmptyField("id"));
		}
		Ok(Self {
			id: packet.id,
			method: packet.method,
			result: packet.result,
			client: packet.client,
			server: packet.server,
		})
	}
}
