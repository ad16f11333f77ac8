//! mindctrl runtime - bus lifecycle, dispatch and completion correlation
//!
//! This crate provides the machinery that turns a publish/subscribe bus into
//! a request/response channel:
//!
//! - **Event channels**: synchronous typed listeners with RAII subscriptions
//! - **Correlator**: awaiting host actions that settle via later notifications
//! - **Registry and dispatcher**: validated, panic-safe procedure invocation
//! - **Bus**: MQTT transport plus an in-memory broker for tests
//! - **Server**: the connection state machine serving one named endpoint
//! - **Client**: calling procedures and reading liveness from the other side
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐
//! │ ConfigProvider │  url, name, credentials
//! └──────┬─────────┘
//!        │ start()
//! ┌──────▼───────┐   request    ┌────────────┐
//! │    Server    │─────────────▶│ Dispatcher │──▶ procedures ──▶ host
//! │ (state actor)│◀─────────────│            │
//! └──────┬───────┘   Output     └────────────┘
//!        │ BusClient / BusEvent
//! ┌──────▼───────┐
//! │     Bus      │  MQTT or in-memory
//! └──────────────┘
//! ```

pub mod bus;
pub mod client;
pub mod config;
pub mod correlator;
pub mod error;
pub mod event;
pub mod rpc;
pub mod server;

pub use bus::{BusClient, BusConnection, BusConnector, BusEvent, ConnectOptions, MemoryBroker, MqttConnector, Will};
pub use client::{ClientOptions, RpcClient};
pub use config::{ConfigProvider, FileConfig, ServerConfig, ServerOptions, StaticConfig};
pub use correlator::{Notification, SettleError, Waiter};
pub use error::{Error, Result};
pub use event::{EventChannel, Listener, Subscription};
pub use rpc::{Dispatcher, Registry, RequestObserved, ResponseObserved};
pub use server::{Phase, Server, ServerEvent};
