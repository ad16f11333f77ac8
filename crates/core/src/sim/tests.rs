use std::sync::Arc;

use parking_lot::Mutex;

use super::*;

fn record_tabs(host: &SimulatedHost) -> (Arc<Mutex<Vec<TabNotification>>>, mindctrl_runtime::Subscription) {
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	let subscription = host.tab_events().subscribe(move |n: &TabNotification| sink.lock().push(n.clone()));
	(seen, subscription)
}

#[tokio::test]
async fn starts_with_one_loaded_tab() {
	let host = SimulatedHost::default();
	let window = host.last_focused_window().await.unwrap();
	assert!(window.focused);
	assert_eq!(window.tabs.len(), 1);
	assert_eq!(window.tabs[0].url, "about:blank");
	assert!(window.tabs[0].active);
	assert!(window.tabs[0].is_loaded());
}

#[tokio::test]
async fn created_tabs_load_until_finished() {
	let host = SimulatedHost::default();
	let (seen, _subscription) = record_tabs(&host);

	let tab = host
		.create_tab(NewTab {
			window_id: 1,
			url: "https://example.org/".into(),
			active: true,
		})
		.await
		.unwrap();
	assert_eq!(tab.status, TabStatus::Loading);
	assert_eq!(tab.index, 1);
	assert!(tab.active);
	assert!(!host.tab(1).await.unwrap().active);

	host.finish_load(tab.id).unwrap();
	assert!(host.tab(tab.id).await.unwrap().is_loaded());

	let last = seen.lock().last().cloned().unwrap();
	assert!(matches!(last, Notification::Updated { id, ref snapshot } if id == tab.id && snapshot.is_loaded()));
}

#[tokio::test]
async fn closing_the_last_tab_closes_the_window() {
	let host = SimulatedHost::default();
	let (seen, _subscription) = record_tabs(&host);

	host.close_tab(1).unwrap();
	assert_eq!(host.tab_count(), 0);
	assert_eq!(host.window_count(), 0);
	assert_eq!(seen.lock().as_slice(), [Notification::Removed { id: 1 }]);
	assert!(matches!(host.last_focused_window().await, Err(HostError::NotFound(_))));
	assert_eq!(host.tab(1).await.unwrap_err().to_string(), "unknown tab id 1");
}

#[tokio::test]
async fn move_between_windows_reindexes_both() {
	let host = SimulatedHost::default();
	let second = host
		.create_tab(NewTab {
			window_id: 1,
			url: "https://a.example/".into(),
			active: false,
		})
		.await
		.unwrap();
	let window = host
		.create_window(NewWindow {
			url: "https://b.example/".into(),
			..NewWindow::default()
		})
		.await
		.unwrap();

	let moved = host.move_tab(1, Some(window.id), 0).await.unwrap();
	assert_eq!(moved.window_id, window.id);
	assert_eq!(moved.index, 0);
	assert_eq!(host.tab(second.id).await.unwrap().index, 0);
	assert_eq!(host.window(window.id).await.unwrap().tabs.len(), 2);

	let at_end = host.move_tab(1, None, -1).await.unwrap();
	assert_eq!(at_end.index, 1);
}

#[tokio::test]
async fn window_focus_and_state() {
	let host = SimulatedHost::default();
	let created = host
		.create_window(NewWindow {
			url: "about:blank".into(),
			focused: true,
			..NewWindow::default()
		})
		.await
		.unwrap();
	assert_eq!(host.last_focused_window().await.unwrap().id, created.id);
	assert!(!host.window(1).await.unwrap().focused);

	let minimized = host
		.update_window(
			created.id,
			WindowUpdate {
				state: Some(WindowState::Minimized),
				..WindowUpdate::default()
			},
		)
		.await
		.unwrap();
	assert_eq!(minimized.state, WindowState::Minimized);
	assert!(!minimized.focused);

	host.remove_window(created.id).await.unwrap();
	assert_eq!(host.last_focused_window().await.unwrap().id, 1);
}

#[tokio::test]
async fn downloads_pause_resume_and_uniquify() {
	let host = SimulatedHost::default();
	let new = || NewDownload {
		url: "https://example.org/file.zip".into(),
		filename: "file.zip".into(),
		referrer: None,
	};
	let first = host.start_download(new()).await.unwrap();
	let second = host.start_download(new()).await.unwrap();
	let all = host.search_downloads(&DownloadQuery::default()).await.unwrap();
	assert_eq!(all[0].filename, "file.zip");
	assert_eq!(all[1].filename, "file (1).zip");

	host.pause_download(first).await.unwrap();
	assert!(host.resume_download(second).await.is_err());
	host.resume_download(first).await.unwrap();

	host.finish_download(first, 10).unwrap();
	host.cancel_download(second).await.unwrap();
	let finished = host
		.search_downloads(&DownloadQuery {
			state: Some(DownloadState::Interrupted),
			..DownloadQuery::default()
		})
		.await
		.unwrap();
	assert_eq!(finished.len(), 1);
	assert_eq!(finished[0].error.as_deref(), Some("USER_CANCELED"));

	host.erase_download(first).await.unwrap();
	assert_eq!(
		host.erase_download(first).await.unwrap_err().to_string(),
		"unknown download id 1"
	);
}

#[tokio::test(start_paused = true)]
async fn automatic_mode_finishes_on_its_own() {
	let host = SimulatedHost::new(SimOptions::automatic(Duration::from_millis(100)));
	let tab = host
		.create_tab(NewTab {
			window_id: 1,
			url: "https://example.org/".into(),
			active: false,
		})
		.await
		.unwrap();
	let id = host
		.start_download(NewDownload {
			url: "https://example.org/a".into(),
			filename: "a".into(),
			referrer: None,
		})
		.await
		.unwrap();

	tokio::time::sleep(Duration::from_millis(150)).await;
	assert!(host.tab(tab.id).await.unwrap().is_loaded());
	let download = host.search_downloads(&DownloadQuery::by_id(id)).await.unwrap();
	assert_eq!(download[0].state, DownloadState::Complete);
}

#[tokio::test(start_paused = true)]
async fn stale_auto_completion_is_ignored() {
	let host = SimulatedHost::new(SimOptions::automatic(Duration::from_millis(100)));
	host.update_tab(
		1,
		TabUpdate {
			url: Some("https://first.example/".into()),
			..TabUpdate::default()
		},
	)
	.await
	.unwrap();
	tokio::time::sleep(Duration::from_millis(60)).await;
	host.reload_tab(1, false).await.unwrap();

	// first navigation's timer fires here but the reload superseded it
	tokio::time::sleep(Duration::from_millis(60)).await;
	assert!(!host.tab(1).await.unwrap().is_loaded());

	tokio::time::sleep(Duration::from_millis(60)).await;
	assert!(host.tab(1).await.unwrap().is_loaded());
}
