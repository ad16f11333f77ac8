//! mindctrl - remote control procedures for a browser-like host
//!
//! This crate defines what a host can do and exposes it as named procedures
//! on a [`mindctrl_runtime::Registry`]:
//!
//! - **Host model**: tabs, windows and downloads behind capability traits
//! - **Match patterns**: web-extension URL patterns compiled to regexes
//! - **Procedures**: `ping`, `info.*`, `tabs.*`, `windows.*`, `downloads.*`
//! - **Simulated host**: an in-memory host for demos and tests
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use mindctrl::{ProcedureOptions, SimulatedHost, register_all};
//! use mindctrl_runtime::Registry;
//!
//! let mut registry = Registry::new();
//! register_all(&mut registry, Arc::new(SimulatedHost::default()), ProcedureOptions::default());
//! let dispatcher = registry.build();
//! ```

pub mod error;
pub mod host;
pub mod pattern;
pub mod procedures;
pub mod sim;
pub mod validate;

pub use error::{HostError, Result};
pub use host::{
	BrowserInfo, BrowserName, Download, DownloadHost, DownloadId, DownloadQuery, DownloadState, Host, InfoHost,
	NewDownload, NewTab, NewWindow, PlatformInfo, Tab, TabHost, TabId, TabQuery, TabStatus, TabUpdate, Window,
	WindowHost, WindowId, WindowState, WindowUpdate,
};
pub use pattern::{MatchPattern, PatternError};
pub use procedures::{ProcedureOptions, register_all, register_info};
pub use sim::{SimOptions, SimulatedHost};
