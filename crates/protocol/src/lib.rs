//! Wire types for the mindctrl bus protocol.
//!
//! Everything that crosses the message bus lives here: request and response
//! envelopes, the [`Output`] union every procedure returns, the closed error
//! taxonomy, topic naming and the liveness markers.
//!
//! # Main Types
//!
//! - [`Request`] / [`Response`] - JSON envelopes exchanged over the bus
//! - [`Output`] - success fields or an [`RpcError`]
//! - [`ErrorCategory`] - dispatch, validation, internal, execution
//! - [`Topics`] - `<ns>/servers/<name>`, `<ns>/statuses/<name>`, `<ns>/clients/<client>`
//! - [`Status`] - retained `alive` / `dead` markers

mod envelope;
mod output;
mod topic;

pub use envelope::{DecodeError, Request, Response};
pub use output::{ErrorCategory, Output, Params, RpcError, is_error_of};
pub use topic::{DEFAULT_NAMESPACE, Status, Topics};
