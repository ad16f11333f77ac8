//! Host capability model.
//!
//! A host is whatever actually owns tabs, windows and downloads: a browser
//! bridge in production, [`SimulatedHost`](crate::SimulatedHost) in tests and
//! demos. Procedures only talk to the traits here.
//!
//! Actions that settle later (page loads, downloads) return as soon as the
//! host accepts them; progress is reported through the notification channels
//! exposed by [`TabHost::tab_events`] and [`DownloadHost::download_events`].

use async_trait::async_trait;
use mindctrl_runtime::{EventChannel, Notification};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pattern::MatchPattern;

pub type TabId = u64;
pub type WindowId = u64;
pub type DownloadId = u64;

pub type TabNotification = Notification<TabId, Tab>;
pub type DownloadNotification = Notification<DownloadId, Download>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
	pub os: String,
	pub arch: String,
}

impl PlatformInfo {
	/// Platform of the running process.
	pub fn current() -> Self {
		Self {
			os: std::env::consts::OS.to_string(),
			arch: std::env::consts::ARCH.to_string(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BrowserName {
	Chrome,
	Edge,
	EdgeLegacy,
	Firefox,
	Opera,
	Safari,
	Vivaldi,
	Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserInfo {
	pub name: BrowserName,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
	Loading,
	Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
	pub id: TabId,
	pub window_id: WindowId,
	pub index: u32,
	pub url: String,
	pub title: String,
	pub status: TabStatus,
	pub active: bool,
	pub audible: bool,
	pub discarded: bool,
	pub muted: bool,
	pub pinned: bool,
}

impl Tab {
	pub fn is_loaded(&self) -> bool {
		self.status == TabStatus::Complete
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowState {
	#[default]
	Normal,
	Minimized,
	Maximized,
	Fullscreen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
	pub id: WindowId,
	pub state: WindowState,
	pub focused: bool,
	pub top: i32,
	pub left: i32,
	pub width: u32,
	pub height: u32,
	pub tabs: Vec<Tab>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
	InProgress,
	Interrupted,
	Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Download {
	pub id: DownloadId,
	pub url: String,
	pub filename: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub referrer: Option<String>,
	pub state: DownloadState,
	pub paused: bool,
	pub bytes_received: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub total_bytes: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl Download {
	/// Complete or interrupted; no further progress will be reported.
	pub fn is_finished(&self) -> bool {
		matches!(self.state, DownloadState::Complete | DownloadState::Interrupted)
	}
}

/// Tab filter. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabQuery {
	pub window_id: Option<WindowId>,
	pub url: Option<MatchPattern>,
	pub status: Option<TabStatus>,
	pub active: Option<bool>,
	pub audible: Option<bool>,
	pub discarded: Option<bool>,
	pub muted: Option<bool>,
	pub pinned: Option<bool>,
}

impl TabQuery {
	pub fn matches(&self, tab: &Tab) -> bool {
		self.window_id.is_none_or(|id| id == tab.window_id)
			&& self.url.as_ref().is_none_or(|pattern| pattern.is_match(&tab.url))
			&& self.status.is_none_or(|status| status == tab.status)
			&& self.active.is_none_or(|flag| flag == tab.active)
			&& self.audible.is_none_or(|flag| flag == tab.audible)
			&& self.discarded.is_none_or(|flag| flag == tab.discarded)
			&& self.muted.is_none_or(|flag| flag == tab.muted)
			&& self.pinned.is_none_or(|flag| flag == tab.pinned)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTab {
	pub window_id: WindowId,
	pub url: String,
	pub active: bool,
}

/// Changes applied to a tab. Setting `url` starts a navigation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabUpdate {
	pub url: Option<String>,
	/// Replace the current history entry instead of pushing one.
	pub load_replace: Option<bool>,
	pub active: Option<bool>,
	pub muted: Option<bool>,
	pub pinned: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewWindow {
	pub url: String,
	pub state: WindowState,
	pub focused: bool,
	pub top: Option<i32>,
	pub left: Option<i32>,
	pub width: Option<u32>,
	pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowUpdate {
	pub state: Option<WindowState>,
	pub focused: Option<bool>,
	pub top: Option<i32>,
	pub left: Option<i32>,
	pub width: Option<u32>,
	pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadQuery {
	pub id: Option<DownloadId>,
	pub url: Option<MatchPattern>,
	pub state: Option<DownloadState>,
}

impl DownloadQuery {
	pub fn by_id(id: DownloadId) -> Self {
		Self {
			id: Some(id),
			..Self::default()
		}
	}

	pub fn matches(&self, download: &Download) -> bool {
		self.id.is_none_or(|id| id == download.id)
			&& self.url.as_ref().is_none_or(|pattern| pattern.is_match(&download.url))
			&& self.state.is_none_or(|state| state == download.state)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDownload {
	pub url: String,
	pub filename: String,
	pub referrer: Option<String>,
}

#[async_trait]
pub trait InfoHost: Send + Sync {
	async fn platform(&self) -> Result<PlatformInfo>;
	async fn browser(&self) -> Result<BrowserInfo>;
}

#[async_trait]
pub trait TabHost: Send + Sync {
	/// Tabs of normal windows matching `query`.
	async fn query_tabs(&self, query: &TabQuery) -> Result<Vec<Tab>>;
	async fn tab(&self, id: TabId) -> Result<Tab>;
	async fn create_tab(&self, tab: NewTab) -> Result<Tab>;
	async fn update_tab(&self, id: TabId, update: TabUpdate) -> Result<Tab>;
	async fn reload_tab(&self, id: TabId, bypass_cache: bool) -> Result<()>;
	/// Moves a tab to `index` (`-1` for the end), optionally into another window.
	async fn move_tab(&self, id: TabId, window_id: Option<WindowId>, index: i64) -> Result<Tab>;
	async fn discard_tab(&self, id: TabId) -> Result<()>;
	async fn remove_tab(&self, id: TabId) -> Result<()>;
	fn tab_events(&self) -> &EventChannel<TabNotification>;
}

#[async_trait]
pub trait WindowHost: Send + Sync {
	/// Normal windows, populated with their tabs.
	async fn windows(&self) -> Result<Vec<Window>>;
	async fn window(&self, id: WindowId) -> Result<Window>;
	async fn last_focused_window(&self) -> Result<Window>;
	async fn create_window(&self, window: NewWindow) -> Result<Window>;
	async fn update_window(&self, id: WindowId, update: WindowUpdate) -> Result<Window>;
	async fn remove_window(&self, id: WindowId) -> Result<()>;
}

#[async_trait]
pub trait DownloadHost: Send + Sync {
	async fn search_downloads(&self, query: &DownloadQuery) -> Result<Vec<Download>>;
	/// Starts a download, choosing a unique filename on conflict.
	async fn start_download(&self, download: NewDownload) -> Result<DownloadId>;
	async fn pause_download(&self, id: DownloadId) -> Result<()>;
	async fn resume_download(&self, id: DownloadId) -> Result<()>;
	async fn cancel_download(&self, id: DownloadId) -> Result<()>;
	/// Forgets a download; the file on disk is left alone.
	async fn erase_download(&self, id: DownloadId) -> Result<()>;
	fn download_events(&self) -> &EventChannel<DownloadNotification>;
}

/// Everything the procedure catalogue needs.
pub trait Host: InfoHost + TabHost + WindowHost + DownloadHost {}

impl<T: InfoHost + TabHost + WindowHost + DownloadHost> Host for T {}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn tab() -> Tab {
		Tab {
			id: 4,
			window_id: 1,
			index: 0,
			url: "https://example.org/".into(),
			title: "Example".into(),
			status: TabStatus::Complete,
			active: true,
			audible: false,
			discarded: false,
			muted: false,
			pinned: false,
		}
	}

	#[test]
	fn wire_names() {
		let value = serde_json::to_value(tab()).unwrap();
		assert_eq!(value["windowId"], json!(1));
		assert_eq!(value["status"], json!("complete"));

		assert_eq!(serde_json::to_value(DownloadState::InProgress).unwrap(), json!("in_progress"));
		assert_eq!(serde_json::to_value(BrowserName::EdgeLegacy).unwrap(), json!("edge-legacy"));
		assert_eq!(serde_json::to_value(WindowState::Fullscreen).unwrap(), json!("fullscreen"));
	}

	#[test]
	fn tab_query_filters() {
		let tab = tab();
		assert!(TabQuery::default().matches(&tab));
		assert!(
			TabQuery {
				url: Some(MatchPattern::parse("https://*.org/*").unwrap()),
				active: Some(true),
				..TabQuery::default()
			}
			.matches(&tab)
		);
		assert!(
			!TabQuery {
				window_id: Some(2),
				..TabQuery::default()
			}
			.matches(&tab)
		);
		assert!(
			!TabQuery {
				pinned: Some(true),
				..TabQuery::default()
			}
			.matches(&tab)
		);
	}
}
