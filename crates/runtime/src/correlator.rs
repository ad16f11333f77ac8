//! Completion correlation for host actions that settle later.
//!
//! Host actions such as "open a tab" or "start a download" return as soon as
//! the host accepts them; the settled state arrives later through a separate
//! notification stream keyed by identity. A [`Waiter`] turns that into a
//! single awaitable outcome:
//!
//! 1. subscribe to the notification source
//! 2. look up the current state of the target
//! 3. resolve with the first snapshot (looked up or notified) that satisfies
//!    the terminal predicate, or fail if a removal for the target arrives first
//!
//! The listener is held by an RAII [`Subscription`], so it is released on
//! every exit path, including when the future is dropped by a wrapping
//! timeout. Abandoning a wait never aborts the host action itself.
//!
//! [`Subscription`]: crate::event::Subscription

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::event::EventChannel;

/// Notification about an object tracked by identity.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification<K, S> {
	/// The object changed; `snapshot` is its full current state.
	Updated { id: K, snapshot: S },
	/// The object no longer exists.
	Removed { id: K },
}

impl<K, S> Notification<K, S> {
	pub fn id(&self) -> &K {
		match self {
			Notification::Updated { id, .. } | Notification::Removed { id } => id,
		}
	}
}

/// Why a wait did not produce a settled snapshot.
#[derive(Debug, Error)]
pub enum SettleError<E> {
	/// The initial state lookup failed.
	#[error("{0}")]
	Lookup(E),
	/// The target was removed before it settled.
	#[error("target removed before it settled")]
	Removed,
	/// No terminal notification arrived within the deadline.
	#[error("timed out after {}ms", .0.as_millis())]
	Timeout(Duration),
	/// The notification source went away while waiting.
	#[error("notification source closed")]
	Closed,
}

/// Single-use wait for one target to reach a terminal condition.
pub struct Waiter<'a, K, S> {
	source: &'a EventChannel<Notification<K, S>>,
	target: K,
	no_wait: bool,
	timeout: Option<Duration>,
}

impl<'a, K, S> Waiter<'a, K, S>
where
	K: PartialEq + Send + Sync + 'static,
	S: Clone + Send + Sync + 'static,
{
	pub fn new(source: &'a EventChannel<Notification<K, S>>, target: K) -> Self {
		Self {
			source,
			target,
			no_wait: false,
			timeout: None,
		}
	}

	/// Skip correlation and resolve with the initial lookup.
	pub fn no_wait(mut self, no_wait: bool) -> Self {
		self.no_wait = no_wait;
		self
	}

	/// Bound the wait; `None` waits indefinitely.
	pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
		self.timeout = timeout;
		self
	}

	/// Resolves once the target satisfies `is_settled`.
	///
	/// `lookup` fetches the current state; it runs after the listener is armed
	/// so a notification racing the lookup is never missed.
	pub async fn settle<L, Fut, E, P>(self, lookup: L, is_settled: P) -> Result<S, SettleError<E>>
	where
		L: FnOnce() -> Fut,
		Fut: Future<Output = Result<S, E>>,
		P: Fn(&S) -> bool + Send + Sync + 'static,
	{
		if self.no_wait {
			return lookup().await.map_err(SettleError::Lookup);
		}

		match self.timeout {
			Some(limit) => tokio::time::timeout(limit, correlate(self.source, self.target, lookup, is_settled))
				.await
				.map_err(|_| SettleError::Timeout(limit))?,
			None => correlate(self.source, self.target, lookup, is_settled).await,
		}
	}
}

async fn correlate<K, S, L, Fut, E, P>(
	source: &EventChannel<Notification<K, S>>,
	target: K,
	lookup: L,
	is_settled: P,
) -> Result<S, SettleError<E>>
where
	K: PartialEq + Send + Sync + 'static,
	S: Clone + Send + Sync + 'static,
	L: FnOnce() -> Fut,
	Fut: Future<Output = Result<S, E>>,
	P: Fn(&S) -> bool + Send + Sync + 'static,
{
	let (tx, rx) = oneshot::channel::<Option<S>>();
	let slot = Mutex::new(Some(tx));
	let is_settled = Arc::new(is_settled);
	let predicate = Arc::clone(&is_settled);

	// Fires at most once: the sender is taken by whichever notification wins.
	let _subscription = source.subscribe(move |notification: &Notification<K, S>| {
		let outcome = match notification {
			Notification::Updated { id, snapshot } if *id == target && predicate(snapshot) => {
				Some(snapshot.clone())
			}
			Notification::Removed { id } if *id == target => None,
			_ => return,
		};
		if let Some(tx) = slot.lock().take() {
			let _ = tx.send(outcome);
		}
	});

	match lookup().await {
		Err(err) => return Err(SettleError::Lookup(err)),
		Ok(snapshot) if is_settled(&snapshot) => return Ok(snapshot),
		Ok(_) => {}
	}

	match rx.await {
		Ok(Some(snapshot)) => Ok(snapshot),
		Ok(None) => Err(SettleError::Removed),
		Err(_) => Err(SettleError::Closed),
	}
}
