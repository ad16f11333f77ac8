//! `windows.*` procedures.

use std::sync::Arc;

use mindctrl_protocol::Params;
use mindctrl_runtime::Registry;
use tracing::info;

use super::{bind, done, reply};
use crate::host::{NewWindow, WindowHost, WindowId, WindowState, WindowUpdate};
use crate::validate::{boolean, coordinate, dimension, id, optional, required, url, window_state};

struct CreateWindow {
	url: Option<String>,
	state: Option<WindowState>,
	focused: Option<bool>,
	top: Option<i32>,
	left: Option<i32>,
	width: Option<u32>,
	height: Option<u32>,
}

impl CreateWindow {
	fn parse(params: &Params) -> Option<Self> {
		Some(Self {
			url: optional(params, "url", url)?,
			state: optional(params, "state", window_state)?,
			focused: optional(params, "focused", boolean)?,
			top: optional(params, "top", coordinate)?,
			left: optional(params, "left", coordinate)?,
			width: optional(params, "width", dimension)?,
			height: optional(params, "height", dimension)?,
		})
	}

	/// Focus and geometry only apply to normal windows.
	fn into_new_window(self) -> NewWindow {
		let state = self.state.unwrap_or_default();
		let url = self.url.unwrap_or_else(|| "about:blank".to_string());
		if state == WindowState::Normal {
			NewWindow {
				url,
				state,
				focused: self.focused.unwrap_or(false),
				top: self.top,
				left: self.left,
				width: self.width,
				height: self.height,
			}
		} else {
			NewWindow {
				url,
				state,
				..NewWindow::default()
			}
		}
	}
}

fn find_state(params: &Params) -> Option<Option<WindowState>> {
	optional(params, "state", window_state)
}

fn window_id(params: &Params) -> Option<WindowId> {
	required(params, "windowId", id)
}

fn position(params: &Params) -> Option<(WindowId, i32, i32)> {
	Some((
		window_id(params)?,
		required(params, "top", coordinate)?,
		required(params, "left", coordinate)?,
	))
}

fn size(params: &Params) -> Option<(WindowId, u32, u32)> {
	Some((
		window_id(params)?,
		required(params, "width", dimension)?,
		required(params, "height", dimension)?,
	))
}

pub(super) fn register<H: WindowHost + 'static>(registry: &mut Registry, host: &Arc<H>) {
	registry
		.register(
			"windows.find",
			find_state,
			bind(host, |host, state: Option<WindowState>| async move {
				let outcome = host.windows().await.map(|windows| {
					windows
						.into_iter()
						.filter(|window| state.is_none_or(|state| state == window.state))
						.collect::<Vec<_>>()
				});
				reply(outcome)
			}),
		)
		.register(
			"windows.get",
			window_id,
			bind(host, |host, id: WindowId| async move { reply(host.window(id).await) }),
		)
		.register(
			"windows.get_current",
			|_| Some(()),
			bind(host, |host, ()| async move { reply(host.last_focused_window().await) }),
		)
		.register(
			"windows.create",
			CreateWindow::parse,
			bind(host, |host, input: CreateWindow| async move {
				let outcome = host.create_window(input.into_new_window()).await;
				if let Ok(window) = &outcome {
					info!(target = "mindctrl.windows", "window {} created", window.id);
				}
				reply(outcome)
			}),
		)
		.register(
			"windows.move",
			position,
			bind(host, |host, (id, top, left): (WindowId, i32, i32)| async move {
				let update = WindowUpdate {
					top: Some(top),
					left: Some(left),
					..WindowUpdate::default()
				};
				let outcome = host.update_window(id, update).await;
				if outcome.is_ok() {
					info!(target = "mindctrl.windows", "window {id} moved to ({left}, {top})");
				}
				reply(outcome)
			}),
		)
		.register(
			"windows.resize",
			size,
			bind(host, |host, (id, width, height): (WindowId, u32, u32)| async move {
				let update = WindowUpdate {
					width: Some(width),
					height: Some(height),
					..WindowUpdate::default()
				};
				let outcome = host.update_window(id, update).await;
				if outcome.is_ok() {
					info!(target = "mindctrl.windows", "window {id} resized to {width}x{height}");
				}
				reply(outcome)
			}),
		)
		.register(
			"windows.remove",
			window_id,
			bind(host, |host, id: WindowId| async move {
				let outcome = host.remove_window(id).await;
				if outcome.is_ok() {
					info!(target = "mindctrl.windows", "window {id} removed");
				}
				done(outcome)
			}),
		);

	let changes: [(&str, fn() -> WindowUpdate, &'static str); 6] = [
		("windows.minimize", || state_change(WindowState::Minimized), "minimized"),
		("windows.maximize", || state_change(WindowState::Maximized), "maximized"),
		("windows.fullscreen", || state_change(WindowState::Fullscreen), "fullscreened"),
		("windows.restore", || state_change(WindowState::Normal), "restored"),
		("windows.focus", || WindowUpdate { focused: Some(true), ..WindowUpdate::default() }, "focused"),
		("windows.unfocus", || WindowUpdate { focused: Some(false), ..WindowUpdate::default() }, "unfocused"),
	];
	for (method, update, verb) in changes {
		registry.register(
			method,
			window_id,
			bind(host, move |host, id: WindowId| async move {
				let outcome = host.update_window(id, update()).await;
				if outcome.is_ok() {
					info!(target = "mindctrl.windows", "window {id} {verb}");
				}
				reply(outcome)
			}),
		);
	}
}

fn state_change(state: WindowState) -> WindowUpdate {
	WindowUpdate {
		state: Some(state),
		..WindowUpdate::default()
	}
}
