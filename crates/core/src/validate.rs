//! Input field validators for procedure parameters.
//!
//! Required fields use [`required`]; optional fields use [`optional`], which
//! yields `Some(None)` when the key is absent and `None` when it is present
//! but malformed. An explicit `null` is malformed.

use mindctrl_protocol::Params;
use serde_json::Value;

use crate::host::{DownloadState, TabStatus, WindowState};
use crate::pattern::MatchPattern;

pub fn required<T>(params: &Params, key: &str, parse: impl Fn(&Value) -> Option<T>) -> Option<T> {
	params.get(key).and_then(parse)
}

pub fn optional<T>(params: &Params, key: &str, parse: impl Fn(&Value) -> Option<T>) -> Option<Option<T>> {
	match params.get(key) {
		None => Some(None),
		Some(value) => parse(value).map(Some),
	}
}

/// Tab, window and download ids.
pub fn id(value: &Value) -> Option<u64> {
	value.as_u64()
}

pub fn integer(value: &Value) -> Option<i64> {
	value.as_i64()
}

pub fn coordinate(value: &Value) -> Option<i32> {
	value.as_i64().and_then(|n| i32::try_from(n).ok())
}

pub fn dimension(value: &Value) -> Option<u32> {
	value.as_u64().and_then(|n| u32::try_from(n).ok())
}

pub fn boolean(value: &Value) -> Option<bool> {
	value.as_bool()
}

/// Non-blank string.
pub fn url(value: &Value) -> Option<String> {
	value.as_str().filter(|s| !s.trim().is_empty()).map(str::to_owned)
}

/// Non-blank string.
pub fn filename(value: &Value) -> Option<String> {
	url(value)
}

pub fn match_pattern(value: &Value) -> Option<MatchPattern> {
	value.as_str().and_then(|s| MatchPattern::parse(s).ok())
}

pub fn tab_status(value: &Value) -> Option<TabStatus> {
	match value.as_str()? {
		"loading" => Some(TabStatus::Loading),
		"complete" => Some(TabStatus::Complete),
		_ => None,
	}
}

pub fn download_state(value: &Value) -> Option<DownloadState> {
	match value.as_str()? {
		"in_progress" => Some(DownloadState::InProgress),
		"interrupted" => Some(DownloadState::Interrupted),
		"complete" => Some(DownloadState::Complete),
		_ => None,
	}
}

pub fn window_state(value: &Value) -> Option<WindowState> {
	match value.as_str()? {
		"normal" => Some(WindowState::Normal),
		"minimized" => Some(WindowState::Minimized),
		"maximized" => Some(WindowState::Maximized),
		"fullscreen" => Some(WindowState::Fullscreen),
		_ => None,
	}
}
