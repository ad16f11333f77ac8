//! Procedure registry and dispatcher.
//!
//! A procedure is a method name paired with a validator that turns untrusted
//! [`Params`] into a typed input and an executor that runs on that input.
//! The [`Registry`] is filled during start-up and frozen into a read-only
//! [`Dispatcher`]; dispatching never fails, every outcome is an [`Output`].

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use mindctrl_protocol::{Output, Params, RpcError};
use tracing::{debug, warn};

use crate::event::EventChannel;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

type Procedure = Arc<dyn Fn(Params) -> BoxFuture<Output> + Send + Sync>;

/// Emitted before a method is looked up.
#[derive(Debug, Clone)]
pub struct RequestObserved {
	pub method: String,
	pub params: Params,
}

/// Emitted after a method produced its output.
#[derive(Debug, Clone)]
pub struct ResponseObserved {
	pub method: String,
	pub params: Params,
	pub output: Output,
}

/// Mutable collection of procedures, used during initialisation only.
#[derive(Default)]
pub struct Registry {
	procedures: HashMap<String, Procedure>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a procedure, replacing any earlier one under the same name.
	///
	/// `validate` returns `None` to reject the input. `execute` reports
	/// anticipated failures as `Ok(Output::Error(..))` with an execution
	/// category; an `Err` or a panic becomes a generic internal error.
	pub fn register<I, V, X, Fut>(&mut self, method: &str, validate: V, execute: X) -> &mut Self
	where
		I: Send + 'static,
		V: Fn(&Params) -> Option<I> + Send + Sync + 'static,
		X: Fn(I) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<Output>> + Send + 'static,
	{
		let name = method.to_string();
		let validate = Arc::new(validate);
		let execute = Arc::new(execute);

		let procedure: Procedure = Arc::new(move |params: Params| {
			let method = name.clone();
			let validate = Arc::clone(&validate);
			let execute = Arc::clone(&execute);
			Box::pin(async move {
				let input = match std::panic::catch_unwind(AssertUnwindSafe(|| validate(&params))) {
					Ok(Some(input)) => input,
					Ok(None) => {
						return RpcError::validation(format!("invalid input for method {method}")).into();
					}
					Err(_) => {
						warn!(target = "mindctrl.rpc", method = %method, "validator panicked");
						return unexpected(&method);
					}
				};

				match AssertUnwindSafe(async { execute(input).await }).catch_unwind().await {
					Ok(Ok(output)) => output,
					Ok(Err(err)) => {
						warn!(target = "mindctrl.rpc", method = %method, error = %err, "executor failed");
						unexpected(&method)
					}
					Err(_) => {
						warn!(target = "mindctrl.rpc", method = %method, "executor panicked");
						unexpected(&method)
					}
				}
			})
		});

		self.procedures.insert(method.to_string(), procedure);
		self
	}

	pub fn contains(&self, method: &str) -> bool {
		self.procedures.contains_key(method)
	}

	pub fn len(&self) -> usize {
		self.procedures.len()
	}

	pub fn is_empty(&self) -> bool {
		self.procedures.is_empty()
	}

	/// Freezes the registry.
	pub fn build(self) -> Dispatcher {
		Dispatcher {
			procedures: self.procedures,
			requests: EventChannel::new(),
			responses: EventChannel::new(),
		}
	}
}

fn unexpected(method: &str) -> Output {
	RpcError::internal(format!("unexpected exception thrown when calling method {method}")).into()
}

/// Read-only procedure table.
pub struct Dispatcher {
	procedures: HashMap<String, Procedure>,
	requests: EventChannel<RequestObserved>,
	responses: EventChannel<ResponseObserved>,
}

impl std::fmt::Debug for Dispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut methods: Vec<&str> = self.procedures.keys().map(String::as_str).collect();
		methods.sort_unstable();
		f.debug_struct("Dispatcher").field("methods", &methods).finish()
	}
}

impl Dispatcher {
	/// Runs `method` on `params`. Never fails: unknown methods, rejected input
	/// and broken executors all come back as error outputs.
	pub async fn dispatch(&self, method: &str, params: Params) -> Output {
		self.requests.emit(&RequestObserved {
			method: method.to_string(),
			params: params.clone(),
		});

		let output = match self.procedures.get(method) {
			Some(procedure) => procedure(params.clone()).await,
			None => RpcError::dispatch(format!("unknown method {method}")).into(),
		};

		debug!(
			target = "mindctrl.rpc",
			method,
			success = output.is_success(),
			"dispatched"
		);

		self.responses.emit(&ResponseObserved {
			method: method.to_string(),
			params,
			output: output.clone(),
		});
		output
	}

	pub fn methods(&self) -> impl Iterator<Item = &str> {
		self.procedures.keys().map(String::as_str)
	}

	pub fn on_request(&self) -> &EventChannel<RequestObserved> {
		&self.requests
	}

	pub fn on_response(&self) -> &EventChannel<ResponseObserved> {
		&self.responses
	}
}
