//! Procedure output and the closed error taxonomy.
//!
//! Every registered procedure returns an [`Output`]. On the wire a success is
//! `{"success": true, ...fields}` and a failure is
//! `{"success": false, "category": "<kind>", "message": "..."}`.

use std::fmt;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Untyped procedure input, the `params` object of a request.
pub type Params = Map<String, Value>;

/// Kind of failure reported to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
	/// No procedure is registered under the requested method.
	Dispatch,
	/// The procedure's validator rejected the input.
	Validation,
	/// The executor failed unexpectedly; indicates a defect.
	Internal,
	/// The executor ran but the underlying operation failed for a known reason.
	Execution,
}

impl ErrorCategory {
	pub const ALL: [ErrorCategory; 4] = [
		ErrorCategory::Dispatch,
		ErrorCategory::Validation,
		ErrorCategory::Internal,
		ErrorCategory::Execution,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			ErrorCategory::Dispatch => "dispatch",
			ErrorCategory::Validation => "validation",
			ErrorCategory::Internal => "internal",
			ErrorCategory::Execution => "execution",
		}
	}

	pub fn from_name(name: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|category| category.as_str() == name)
	}
}

impl fmt::Display for ErrorCategory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Structured failure carried inside an [`Output`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
	pub category: ErrorCategory,
	pub message: String,
}

impl RpcError {
	pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
		Self {
			category,
			message: message.into(),
		}
	}

	pub fn dispatch(message: impl Into<String>) -> Self {
		Self::new(ErrorCategory::Dispatch, message)
	}

	pub fn validation(message: impl Into<String>) -> Self {
		Self::new(ErrorCategory::Validation, message)
	}

	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(ErrorCategory::Internal, message)
	}

	/// Builds an execution error from anything displayable, typically a host error.
	pub fn execution(cause: impl fmt::Display) -> Self {
		Self::new(ErrorCategory::Execution, cause.to_string())
	}

	/// Reads an error back from a generic JSON value.
	///
	/// Returns `None` unless `success` is `false`, `category` names a known kind
	/// and `message` is a string.
	pub fn from_value(value: &Value) -> Option<Self> {
		let object = value.as_object()?;
		if object.get("success")?.as_bool()? {
			return None;
		}
		let category = ErrorCategory::from_name(object.get("category")?.as_str()?)?;
		let message = object.get("message")?.as_str()?;
		Some(Self::new(category, message))
	}

	pub fn to_value(&self) -> Value {
		serde_json::json!({
			"success": false,
			"category": self.category.as_str(),
			"message": self.message,
		})
	}
}

impl fmt::Display for RpcError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} error: {}", self.category, self.message)
	}
}

impl std::error::Error for RpcError {}

/// Returns `true` if `value` is structurally an error of the given category.
pub fn is_error_of(value: &Value, category: ErrorCategory) -> bool {
	RpcError::from_value(value).is_some_and(|error| error.category == category)
}

/// Result of invoking a procedure.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
	/// Method-specific fields; serialized next to `"success": true`.
	Result(Params),
	Error(RpcError),
}

impl Output {
	/// A bare `{"success": true}`.
	pub fn success() -> Self {
		Output::Result(Params::new())
	}

	/// `{"success": true, "result": <value>}`, the shape used by host procedures.
	pub fn result<T: Serialize>(value: &T) -> serde_json::Result<Self> {
		let mut fields = Params::new();
		fields.insert("result".to_string(), serde_json::to_value(value)?);
		Ok(Output::Result(fields))
	}

	/// Converts a host call outcome: `Ok` becomes a result, `Err` an execution error.
	pub fn from_outcome<T, E>(outcome: Result<T, E>) -> serde_json::Result<Self>
	where
		T: Serialize,
		E: fmt::Display,
	{
		match outcome {
			Ok(value) => Self::result(&value),
			Err(err) => Ok(Output::Error(RpcError::execution(err))),
		}
	}

	pub fn is_success(&self) -> bool {
		matches!(self, Output::Result(_))
	}

	pub fn error(&self) -> Option<&RpcError> {
		match self {
			Output::Error(error) => Some(error),
			Output::Result(_) => None,
		}
	}

	pub fn category(&self) -> Option<ErrorCategory> {
		self.error().map(|error| error.category)
	}

	/// Returns the `result` field of a successful output.
	pub fn result_value(&self) -> Option<&Value> {
		match self {
			Output::Result(fields) => fields.get("result"),
			Output::Error(_) => None,
		}
	}

	pub fn to_value(&self) -> Value {
		match self {
			Output::Result(fields) => {
				let mut object = Map::with_capacity(fields.len() + 1);
				object.insert("success".to_string(), Value::Bool(true));
				for (key, value) in fields {
					if key != "success" {
						object.insert(key.clone(), value.clone());
					}
				}
				Value::Object(object)
			}
			Output::Error(error) => error.to_value(),
		}
	}

	/// Parses an output from a generic JSON value.
	pub fn from_value(value: Value) -> Option<Self> {
		match value {
			Value::Object(mut object) => match object.get("success").and_then(Value::as_bool) {
				Some(true) => {
					object.remove("success");
					Some(Output::Result(object))
				}
				Some(false) => RpcError::from_value(&Value::Object(object)).map(Output::Error),
				None => None,
			},
			_ => None,
		}
	}
}

impl From<RpcError> for Output {
	fn from(error: RpcError) -> Self {
		Output::Error(error)
	}
}

impl Serialize for Output {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self {
			Output::Result(fields) => {
				let extra = fields.keys().filter(|key| *key != "success").count();
				let mut map = serializer.serialize_map(Some(extra + 1))?;
				map.serialize_entry("success", &true)?;
				for (key, value) in fields {
					if key != "success" {
						map.serialize_entry(key, value)?;
					}
				}
				map.end()
			}
			Output::Error(error) => {
				let mut map = serializer.serialize_map(Some(3))?;
				map.serialize_entry("success", &false)?;
				map.serialize_entry("category", error.category.as_str())?;
				map.serialize_entry("message", &error.message)?;
				map.end()
			}
		}
	}
}

impl<'de> Deserialize<'de> for Output {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let value = Value::deserialize(deserializer)?;
		Output::from_value(value).ok_or_else(|| D::Error::custom("malformed procedure output"))
	}
}
