//! In-memory host for demos and tests.
//!
//! [`SimulatedHost`] keeps windows, tabs and downloads in a single locked
//! state and emits the same notifications a browser bridge would. Loads and
//! downloads stay in progress until finished, either by the test through
//! [`SimulatedHost::finish_load`] / [`SimulatedHost::finish_download`] or
//! automatically after the delays in [`SimOptions`].
//!
//! Notifications are always emitted after the state lock is released, so
//! listeners may call back into the host.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mindctrl_runtime::{EventChannel, Notification};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{HostError, Result};
use crate::host::{
	BrowserInfo, BrowserName, Download, DownloadHost, DownloadId, DownloadNotification, DownloadQuery, DownloadState,
	InfoHost, NewDownload, NewTab, NewWindow, PlatformInfo, Tab, TabHost, TabId, TabNotification, TabQuery, TabStatus,
	TabUpdate, Window, WindowHost, WindowId, WindowState, WindowUpdate,
};

const BLANK: &str = "about:blank";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 800;
const SIMULATED_SIZE: u64 = 1024;

#[derive(Debug, Clone)]
pub struct SimOptions {
	/// Finish page loads automatically after this long; `None` leaves them loading.
	pub load_delay: Option<Duration>,
	/// Finish downloads automatically after this long; `None` leaves them running.
	pub download_delay: Option<Duration>,
	pub browser: BrowserInfo,
	pub platform: PlatformInfo,
}

impl Default for SimOptions {
	fn default() -> Self {
		Self {
			load_delay: None,
			download_delay: None,
			browser: BrowserInfo {
				name: BrowserName::Unknown,
				version: Some(env!("CARGO_PKG_VERSION").to_string()),
			},
			platform: PlatformInfo::current(),
		}
	}
}

impl SimOptions {
	/// Loads and downloads finish on their own after `delay`.
	pub fn automatic(delay: Duration) -> Self {
		Self {
			load_delay: Some(delay),
			download_delay: Some(delay),
			..Self::default()
		}
	}
}

struct WindowSlot {
	window: Window,
	tabs: Vec<TabId>,
}

#[derive(Default)]
struct State {
	next_window: WindowId,
	next_tab: TabId,
	next_download: DownloadId,
	windows: BTreeMap<WindowId, WindowSlot>,
	tabs: HashMap<TabId, Tab>,
	/// Bumped on every navigation so stale auto-completions are ignored.
	loads: HashMap<TabId, u64>,
	downloads: BTreeMap<DownloadId, Download>,
	focused: Option<WindowId>,
}

impl State {
	fn tab(&self, id: TabId) -> Result<&Tab> {
		self.tabs.get(&id).ok_or_else(|| HostError::unknown_tab(id))
	}

	fn tab_mut(&mut self, id: TabId) -> Result<&mut Tab> {
		self.tabs.get_mut(&id).ok_or_else(|| HostError::unknown_tab(id))
	}

	fn slot(&self, id: WindowId) -> Result<&WindowSlot> {
		self.windows.get(&id).ok_or_else(|| HostError::unknown_window(id))
	}

	fn download_mut(&mut self, id: DownloadId) -> Result<&mut Download> {
		self.downloads.get_mut(&id).ok_or_else(|| HostError::unknown_download(id))
	}

	fn populated(&self, id: WindowId) -> Result<Window> {
		let slot = self.slot(id)?;
		let mut window = slot.window.clone();
		window.tabs = slot.tabs.iter().filter_map(|tab| self.tabs.get(tab).cloned()).collect();
		Ok(window)
	}

	fn add_window(&mut self, new: &NewWindow) -> WindowId {
		self.next_window += 1;
		let id = self.next_window;
		self.windows.insert(
			id,
			WindowSlot {
				window: Window {
					id,
					state: new.state,
					focused: false,
					top: new.top.unwrap_or(0),
					left: new.left.unwrap_or(0),
					width: new.width.unwrap_or(DEFAULT_WIDTH),
					height: new.height.unwrap_or(DEFAULT_HEIGHT),
					tabs: Vec::new(),
				},
				tabs: Vec::new(),
			},
		);
		if new.focused || self.focused.is_none() {
			self.focus(id);
		}
		id
	}

	fn focus(&mut self, id: WindowId) {
		for (window_id, slot) in &mut self.windows {
			slot.window.focused = *window_id == id;
		}
		self.focused = Some(id);
	}

	/// Inserts a new loading tab and returns its id plus every tab that changed.
	fn add_tab(&mut self, new: &NewTab) -> Result<(TabId, Vec<TabId>)> {
		self.slot(new.window_id)?;
		self.next_tab += 1;
		let id = self.next_tab;
		self.tabs.insert(
			id,
			Tab {
				id,
				window_id: new.window_id,
				index: 0,
				url: new.url.clone(),
				title: new.url.clone(),
				status: TabStatus::Loading,
				active: false,
				audible: false,
				discarded: false,
				muted: false,
				pinned: false,
			},
		);
		if let Some(slot) = self.windows.get_mut(&new.window_id) {
			slot.tabs.push(id);
		}
		let mut changed = self.reindex(new.window_id);
		let has_active = self.tabs.values().any(|tab| tab.window_id == new.window_id && tab.active);
		if new.active || !has_active {
			changed.extend(self.activate(id));
		}
		changed.push(id);
		Ok((id, changed))
	}

	/// Makes `id` the only active tab of its window.
	fn activate(&mut self, id: TabId) -> Vec<TabId> {
		let Some(window_id) = self.tabs.get(&id).map(|tab| tab.window_id) else {
			return Vec::new();
		};
		let mut changed = Vec::new();
		for tab in self.tabs.values_mut().filter(|tab| tab.window_id == window_id) {
			let active = tab.id == id;
			if tab.active != active {
				tab.active = active;
				changed.push(tab.id);
			}
		}
		changed
	}

	fn reindex(&mut self, window_id: WindowId) -> Vec<TabId> {
		let Some(slot) = self.windows.get(&window_id) else {
			return Vec::new();
		};
		let mut changed = Vec::new();
		for (index, id) in slot.tabs.iter().enumerate() {
			if let Some(tab) = self.tabs.get_mut(id) {
				let index = index as u32;
				if tab.index != index || tab.window_id != window_id {
					tab.index = index;
					tab.window_id = window_id;
					changed.push(*id);
				}
			}
		}
		changed
	}

	fn navigate(&mut self, id: TabId, url: Option<String>) -> Result<u64> {
		let tab = self.tab_mut(id)?;
		if let Some(url) = url {
			tab.title = url.clone();
			tab.url = url;
		}
		tab.status = TabStatus::Loading;
		tab.discarded = false;
		let generation = self.loads.entry(id).or_default();
		*generation += 1;
		Ok(*generation)
	}

	/// Detaches a tab from its window, closing the window when it empties.
	fn detach(&mut self, id: TabId) -> Vec<TabId> {
		let Some(window_id) = self.tabs.get(&id).map(|tab| tab.window_id) else {
			return Vec::new();
		};
		let was_active = self.tabs.get(&id).is_some_and(|tab| tab.active);
		let mut emptied = false;
		if let Some(slot) = self.windows.get_mut(&window_id) {
			slot.tabs.retain(|tab| *tab != id);
			emptied = slot.tabs.is_empty();
		}
		if emptied {
			self.drop_window(window_id);
			return Vec::new();
		}
		let mut changed = self.reindex(window_id);
		if was_active {
			let next = self.windows.get(&window_id).and_then(|slot| slot.tabs.last().copied());
			if let Some(next) = next {
				changed.extend(self.activate(next));
			}
		}
		changed
	}

	fn drop_window(&mut self, id: WindowId) {
		self.windows.remove(&id);
		if self.focused == Some(id) {
			self.focused = None;
			if let Some(next) = self.windows.keys().next_back().copied() {
				self.focus(next);
			}
		}
	}

	fn unique_filename(&self, filename: &str) -> String {
		let taken = |name: &str| self.downloads.values().any(|download| download.filename == name);
		if !taken(filename) {
			return filename.to_string();
		}
		let (stem, ext) = match filename.rfind('.') {
			Some(dot) if dot > 0 => filename.split_at(dot),
			_ => (filename, ""),
		};
		(1..)
			.map(|n| format!("{stem} ({n}){ext}"))
			.find(|candidate| !taken(candidate))
			.unwrap_or_else(|| filename.to_string())
	}
}

struct Inner {
	state: Mutex<State>,
	tab_events: EventChannel<TabNotification>,
	download_events: EventChannel<DownloadNotification>,
	options: SimOptions,
}

/// Host backed by in-memory state.
#[derive(Clone)]
pub struct SimulatedHost {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for SimulatedHost {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("SimulatedHost")
			.field("windows", &state.windows.len())
			.field("tabs", &state.tabs.len())
			.field("downloads", &state.downloads.len())
			.finish()
	}
}

impl Default for SimulatedHost {
	fn default() -> Self {
		Self::new(SimOptions::default())
	}
}

impl SimulatedHost {
	/// Starts with one focused normal window holding a loaded blank tab.
	pub fn new(options: SimOptions) -> Self {
		let mut state = State::default();
		let window_id = state.add_window(&NewWindow {
			url: BLANK.to_string(),
			focused: true,
			..NewWindow::default()
		});
		let new_tab = NewTab {
			window_id,
			url: BLANK.to_string(),
			active: true,
		};
		if let Ok((tab_id, _)) = state.add_tab(&new_tab) {
			if let Some(tab) = state.tabs.get_mut(&tab_id) {
				tab.status = TabStatus::Complete;
			}
		}
		Self {
			inner: Arc::new(Inner {
				state: Mutex::new(state),
				tab_events: EventChannel::new(),
				download_events: EventChannel::new(),
				options,
			}),
		}
	}

	fn emit_tabs(&self, ids: &[TabId]) {
		let notifications: Vec<TabNotification> = {
			let state = self.inner.state.lock();
			let mut seen = Vec::with_capacity(ids.len());
			ids.iter()
				.filter(|id| {
					let fresh = !seen.contains(*id);
					seen.push(**id);
					fresh
				})
				.map(|id| match state.tabs.get(id) {
					Some(tab) => Notification::Updated {
						id: *id,
						snapshot: tab.clone(),
					},
					None => Notification::Removed { id: *id },
				})
				.collect()
		};
		for notification in &notifications {
			self.inner.tab_events.emit(notification);
		}
	}

	fn emit_download(&self, id: DownloadId) {
		let notification = match self.inner.state.lock().downloads.get(&id) {
			Some(download) => Notification::Updated {
				id,
				snapshot: download.clone(),
			},
			None => Notification::Removed { id },
		};
		self.inner.download_events.emit(&notification);
	}

	fn schedule_load(&self, id: TabId, generation: u64) {
		let Some(delay) = self.inner.options.load_delay else {
			return;
		};
		let host = self.clone();
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			let current = host.inner.state.lock().loads.get(&id).copied();
			if current == Some(generation) {
				let _ = host.finish_load(id);
			}
		});
	}

	fn schedule_download(&self, id: DownloadId) {
		let Some(delay) = self.inner.options.download_delay else {
			return;
		};
		let host = self.clone();
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			let running = host
				.inner
				.state
				.lock()
				.downloads
				.get(&id)
				.is_some_and(|download| download.state == DownloadState::InProgress && !download.paused);
			if running {
				let _ = host.finish_download(id, SIMULATED_SIZE);
			}
		});
	}

	/// Marks a tab's page as fully loaded.
	pub fn finish_load(&self, id: TabId) -> Result<Tab> {
		let tab = {
			let mut state = self.inner.state.lock();
			let tab = state.tab_mut(id)?;
			tab.status = TabStatus::Complete;
			tab.clone()
		};
		debug!(target = "mindctrl.sim", tab = id, "load finished");
		self.emit_tabs(&[id]);
		Ok(tab)
	}

	/// Closes a tab as if the user did.
	pub fn close_tab(&self, id: TabId) -> Result<()> {
		let changed = {
			let mut state = self.inner.state.lock();
			state.tab(id)?;
			let changed = state.detach(id);
			state.tabs.remove(&id);
			state.loads.remove(&id);
			changed
		};
		let mut ids = vec![id];
		ids.extend(changed);
		self.emit_tabs(&ids);
		Ok(())
	}

	/// Completes a running download with `bytes` received.
	pub fn finish_download(&self, id: DownloadId, bytes: u64) -> Result<Download> {
		let download = {
			let mut state = self.inner.state.lock();
			let download = state.download_mut(id)?;
			download.state = DownloadState::Complete;
			download.paused = false;
			download.bytes_received = bytes;
			download.total_bytes = Some(bytes);
			download.clone()
		};
		debug!(target = "mindctrl.sim", download = id, "download finished");
		self.emit_download(id);
		Ok(download)
	}

	/// Fails a running download with `reason`.
	pub fn interrupt_download(&self, id: DownloadId, reason: &str) -> Result<Download> {
		let download = {
			let mut state = self.inner.state.lock();
			let download = state.download_mut(id)?;
			download.state = DownloadState::Interrupted;
			download.error = Some(reason.to_string());
			download.clone()
		};
		self.emit_download(id);
		Ok(download)
	}

	pub fn tab_count(&self) -> usize {
		self.inner.state.lock().tabs.len()
	}

	pub fn window_count(&self) -> usize {
		self.inner.state.lock().windows.len()
	}

	pub fn download_count(&self) -> usize {
		self.inner.state.lock().downloads.len()
	}

	pub fn download(&self, id: DownloadId) -> Option<Download> {
		self.inner.state.lock().downloads.get(&id).cloned()
	}
}

#[async_trait]
impl InfoHost for SimulatedHost {
	async fn platform(&self) -> Result<PlatformInfo> {
		Ok(self.inner.options.platform.clone())
	}

	async fn browser(&self) -> Result<BrowserInfo> {
		Ok(self.inner.options.browser.clone())
	}
}

#[async_trait]
impl TabHost for SimulatedHost {
	async fn query_tabs(&self, query: &TabQuery) -> Result<Vec<Tab>> {
		let state = self.inner.state.lock();
		let tabs = state
			.windows
			.values()
			.flat_map(|slot| slot.tabs.iter())
			.filter_map(|id| state.tabs.get(id))
			.filter(|tab| query.matches(tab))
			.cloned()
			.collect();
		Ok(tabs)
	}

	async fn tab(&self, id: TabId) -> Result<Tab> {
		self.inner.state.lock().tab(id).cloned()
	}

	async fn create_tab(&self, tab: NewTab) -> Result<Tab> {
		let (id, changed, generation, snapshot) = {
			let mut state = self.inner.state.lock();
			let (id, changed) = state.add_tab(&tab)?;
			let generation = state.navigate(id, None)?;
			let snapshot = state.tab(id)?.clone();
			(id, changed, generation, snapshot)
		};
		self.emit_tabs(&changed);
		self.schedule_load(id, generation);
		Ok(snapshot)
	}

	async fn update_tab(&self, id: TabId, update: TabUpdate) -> Result<Tab> {
		let (changed, generation, snapshot) = {
			let mut state = self.inner.state.lock();
			state.tab(id)?;
			let mut changed = vec![id];
			let generation = match update.url {
				Some(url) => Some(state.navigate(id, Some(url))?),
				None => None,
			};
			match update.active {
				Some(true) => changed.extend(state.activate(id)),
				Some(false) => state.tab_mut(id)?.active = false,
				None => {}
			}
			let tab = state.tab_mut(id)?;
			if let Some(muted) = update.muted {
				tab.muted = muted;
			}
			if let Some(pinned) = update.pinned {
				tab.pinned = pinned;
			}
			(changed, generation, tab.clone())
		};
		self.emit_tabs(&changed);
		if let Some(generation) = generation {
			self.schedule_load(id, generation);
		}
		Ok(snapshot)
	}

	async fn reload_tab(&self, id: TabId, _bypass_cache: bool) -> Result<()> {
		let generation = self.inner.state.lock().navigate(id, None)?;
		self.emit_tabs(&[id]);
		self.schedule_load(id, generation);
		Ok(())
	}

	async fn move_tab(&self, id: TabId, window_id: Option<WindowId>, index: i64) -> Result<Tab> {
		let (changed, snapshot) = {
			let mut state = self.inner.state.lock();
			let source = state.tab(id)?.window_id;
			let target = window_id.unwrap_or(source);
			state.slot(target)?;

			let mut changed = vec![id];
			if let Some(slot) = state.windows.get_mut(&source) {
				slot.tabs.retain(|tab| *tab != id);
			}
			if let Some(slot) = state.windows.get_mut(&target) {
				let at = usize::try_from(index).map_or(slot.tabs.len(), |at| at.min(slot.tabs.len()));
				slot.tabs.insert(at, id);
			}
			if source != target {
				let tab = state.tab_mut(id)?;
				tab.window_id = target;
				tab.active = false;
				let emptied = state.windows.get(&source).is_some_and(|slot| slot.tabs.is_empty());
				if emptied {
					state.drop_window(source);
				} else {
					changed.extend(state.reindex(source));
				}
			}
			changed.extend(state.reindex(target));
			(changed, state.tab(id)?.clone())
		};
		self.emit_tabs(&changed);
		Ok(snapshot)
	}

	async fn discard_tab(&self, id: TabId) -> Result<()> {
		{
			let mut state = self.inner.state.lock();
			let tab = state.tab_mut(id)?;
			if tab.active {
				return Err(HostError::Rejected(format!("cannot discard active tab {id}")));
			}
			tab.discarded = true;
		}
		self.emit_tabs(&[id]);
		Ok(())
	}

	async fn remove_tab(&self, id: TabId) -> Result<()> {
		self.close_tab(id)
	}

	fn tab_events(&self) -> &EventChannel<TabNotification> {
		&self.inner.tab_events
	}
}

#[async_trait]
impl WindowHost for SimulatedHost {
	async fn windows(&self) -> Result<Vec<Window>> {
		let state = self.inner.state.lock();
		state.windows.keys().map(|id| state.populated(*id)).collect()
	}

	async fn window(&self, id: WindowId) -> Result<Window> {
		self.inner.state.lock().populated(id)
	}

	async fn last_focused_window(&self) -> Result<Window> {
		let state = self.inner.state.lock();
		let id = state
			.focused
			.ok_or_else(|| HostError::NotFound("no window has focus".to_string()))?;
		state.populated(id)
	}

	async fn create_window(&self, window: NewWindow) -> Result<Window> {
		let (tab_id, changed, generation, snapshot) = {
			let mut state = self.inner.state.lock();
			let window_id = state.add_window(&window);
			let new_tab = NewTab {
				window_id,
				url: window.url.clone(),
				active: true,
			};
			let (tab_id, changed) = state.add_tab(&new_tab)?;
			let generation = state.navigate(tab_id, None)?;
			(tab_id, changed, generation, state.populated(window_id)?)
		};
		self.emit_tabs(&changed);
		self.schedule_load(tab_id, generation);
		Ok(snapshot)
	}

	async fn update_window(&self, id: WindowId, update: WindowUpdate) -> Result<Window> {
		let mut state = self.inner.state.lock();
		state.slot(id)?;
		match update.focused {
			Some(true) => state.focus(id),
			Some(false) => {
				if let Some(slot) = state.windows.get_mut(&id) {
					slot.window.focused = false;
				}
				if state.focused == Some(id) {
					let other = state.windows.keys().copied().find(|other| *other != id);
					match other {
						Some(other) => state.focus(other),
						None => state.focused = None,
					}
				}
			}
			None => {}
		}
		if let Some(slot) = state.windows.get_mut(&id) {
			let window = &mut slot.window;
			if let Some(window_state) = update.state {
				window.state = window_state;
			}
			if let Some(top) = update.top {
				window.top = top;
			}
			if let Some(left) = update.left {
				window.left = left;
			}
			if let Some(width) = update.width {
				window.width = width;
			}
			if let Some(height) = update.height {
				window.height = height;
			}
			if window.state == WindowState::Minimized {
				window.focused = false;
			}
		}
		state.populated(id)
	}

	async fn remove_window(&self, id: WindowId) -> Result<()> {
		let removed = {
			let mut state = self.inner.state.lock();
			let tabs = state.slot(id)?.tabs.clone();
			for tab in &tabs {
				state.tabs.remove(tab);
				state.loads.remove(tab);
			}
			state.drop_window(id);
			tabs
		};
		self.emit_tabs(&removed);
		Ok(())
	}
}

#[async_trait]
impl DownloadHost for SimulatedHost {
	async fn search_downloads(&self, query: &DownloadQuery) -> Result<Vec<Download>> {
		let state = self.inner.state.lock();
		Ok(state
			.downloads
			.values()
			.filter(|download| query.matches(download))
			.cloned()
			.collect())
	}

	async fn start_download(&self, download: NewDownload) -> Result<DownloadId> {
		let id = {
			let mut state = self.inner.state.lock();
			state.next_download += 1;
			let id = state.next_download;
			let filename = state.unique_filename(&download.filename);
			state.downloads.insert(
				id,
				Download {
					id,
					url: download.url,
					filename,
					referrer: download.referrer,
					state: DownloadState::InProgress,
					paused: false,
					bytes_received: 0,
					total_bytes: None,
					error: None,
				},
			);
			id
		};
		self.emit_download(id);
		self.schedule_download(id);
		Ok(id)
	}

	async fn pause_download(&self, id: DownloadId) -> Result<()> {
		{
			let mut state = self.inner.state.lock();
			let download = state.download_mut(id)?;
			if download.state != DownloadState::InProgress {
				return Err(HostError::Rejected(format!("download {id} is not in progress")));
			}
			download.paused = true;
		}
		self.emit_download(id);
		Ok(())
	}

	async fn resume_download(&self, id: DownloadId) -> Result<()> {
		{
			let mut state = self.inner.state.lock();
			let download = state.download_mut(id)?;
			if download.state != DownloadState::InProgress || !download.paused {
				return Err(HostError::Rejected(format!("download {id} is not paused")));
			}
			download.paused = false;
		}
		self.emit_download(id);
		self.schedule_download(id);
		Ok(())
	}

	async fn cancel_download(&self, id: DownloadId) -> Result<()> {
		{
			let mut state = self.inner.state.lock();
			let download = state.download_mut(id)?;
			if download.state != DownloadState::InProgress {
				return Ok(());
			}
			download.state = DownloadState::Interrupted;
			download.paused = false;
			download.error = Some("USER_CANCELED".to_string());
		}
		self.emit_download(id);
		Ok(())
	}

	async fn erase_download(&self, id: DownloadId) -> Result<()> {
		self.inner
			.state
			.lock()
			.downloads
			.remove(&id)
			.ok_or_else(|| HostError::unknown_download(id))?;
		self.emit_download(id);
		Ok(())
	}

	fn download_events(&self) -> &EventChannel<DownloadNotification> {
		&self.inner.download_events
	}
}

#[cfg(test)]
mod tests;
