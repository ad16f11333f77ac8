//! Fire-and-forget typed event channels.
//!
//! An [`EventChannel`] calls every registered listener synchronously, in
//! registration order, each time [`emit`](EventChannel::emit) runs. Nothing is
//! buffered: an event emitted while nobody listens is lost. Channels are only
//! used for observability and for feeding notifications into waiters, never
//! for control flow that must not drop events.
//!
//! Listeners are identified by their [`Arc`], so adding the same listener
//! twice or removing one that was never added is a no-op.
//! [`subscribe`](EventChannel::subscribe) returns an RAII [`Subscription`]
//! that removes the listener when dropped.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Shared listener callback.
pub type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

type ListenerList<A> = Mutex<Vec<Listener<A>>>;

/// Typed publish/subscribe primitive. Clones share the same listener list.
pub struct EventChannel<A> {
	listeners: Arc<ListenerList<A>>,
}

impl<A> Clone for EventChannel<A> {
	fn clone(&self) -> Self {
		Self {
			listeners: Arc::clone(&self.listeners),
		}
	}
}

impl<A> Default for EventChannel<A> {
	fn default() -> Self {
		Self {
			listeners: Arc::new(Mutex::new(Vec::new())),
		}
	}
}

impl<A> std::fmt::Debug for EventChannel<A> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventChannel")
			.field("listeners", &self.listeners.lock().len())
			.finish()
	}
}

impl<A> EventChannel<A> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Invokes every listener registered at the time of the call.
	///
	/// The list is snapshotted first, so listeners may add or remove
	/// listeners (including themselves) without deadlocking. Panics raised by
	/// a listener propagate to the caller.
	pub fn emit(&self, args: &A) {
		let snapshot: Vec<Listener<A>> = self.listeners.lock().clone();
		for listener in snapshot {
			listener(args);
		}
	}

	pub fn has_listener(&self, listener: &Listener<A>) -> bool {
		self.listeners
			.lock()
			.iter()
			.any(|existing| Arc::ptr_eq(existing, listener))
	}

	pub fn add_listener(&self, listener: &Listener<A>) {
		let mut listeners = self.listeners.lock();
		if !listeners.iter().any(|existing| Arc::ptr_eq(existing, listener)) {
			listeners.push(Arc::clone(listener));
		}
	}

	pub fn remove_listener(&self, listener: &Listener<A>) {
		self.listeners
			.lock()
			.retain(|existing| !Arc::ptr_eq(existing, listener));
	}

	pub fn listener_count(&self) -> usize {
		self.listeners.lock().len()
	}
}

impl<A: 'static> EventChannel<A> {
	/// Registers `callback` and returns a guard that removes it on drop.
	pub fn subscribe<F>(&self, callback: F) -> Subscription
	where
		F: Fn(&A) + Send + Sync + 'static,
	{
		let listener: Listener<A> = Arc::new(callback);
		self.add_listener(&listener);

		let weak: Weak<ListenerList<A>> = Arc::downgrade(&self.listeners);
		Subscription::new(move || {
			if let Some(listeners) = weak.upgrade() {
				listeners
					.lock()
					.retain(|existing| !Arc::ptr_eq(existing, &listener));
			}
		})
	}
}

/// RAII handle that removes a listener on drop.
///
/// Holds a weak reference to the channel, so dropping it after the channel is
/// gone is a no-op.
#[must_use = "dropping a Subscription immediately removes its listener"]
pub struct Subscription {
	dropper: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
	/// Creates a subscription with a custom dropper function.
	pub fn new(dropper: impl FnOnce() + Send + Sync + 'static) -> Self {
		Self {
			dropper: Some(Box::new(dropper)),
		}
	}

	/// Explicitly unsubscribes. Equivalent to dropping.
	pub fn unsubscribe(mut self) {
		if let Some(dropper) = self.dropper.take() {
			dropper();
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(dropper) = self.dropper.take() {
			dropper();
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("active", &self.dropper.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Listener<u32> {
		let log = Arc::clone(log);
		Arc::new(move |value: &u32| log.lock().push(format!("{tag}{value}")))
	}

	#[test]
	fn test_emit_in_registration_order() {
		let channel = EventChannel::new();
		let log = Arc::new(Mutex::new(Vec::new()));
		channel.add_listener(&recorder(&log, "a"));
		channel.add_listener(&recorder(&log, "b"));

		channel.emit(&1);
		channel.emit(&2);

		assert_eq!(*log.lock(), vec!["a1", "b1", "a2", "b2"]);
	}

	#[test]
	fn test_add_and_remove_are_idempotent() {
		let channel = EventChannel::new();
		let log = Arc::new(Mutex::new(Vec::new()));
		let listener = recorder(&log, "x");

		channel.add_listener(&listener);
		channel.add_listener(&listener);
		assert_eq!(channel.listener_count(), 1);
		assert!(channel.has_listener(&listener));

		channel.emit(&5);
		assert_eq!(*log.lock(), vec!["x5"]);

		channel.remove_listener(&listener);
		channel.remove_listener(&listener);
		assert_eq!(channel.listener_count(), 0);

		channel.emit(&6);
		assert_eq!(log.lock().len(), 1);
	}

	#[test]
	fn test_emit_without_listeners_is_lost() {
		let channel: EventChannel<u32> = EventChannel::new();
		channel.emit(&1);

		let count = Arc::new(AtomicUsize::new(0));
		let seen = Arc::clone(&count);
		let _sub = channel.subscribe(move |_| {
			seen.fetch_add(1, Ordering::SeqCst);
		});
		assert_eq!(count.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn test_subscription_drop_removes_listener() {
		let channel: EventChannel<u32> = EventChannel::new();
		let count = Arc::new(AtomicUsize::new(0));
		let seen = Arc::clone(&count);

		{
			let _sub = channel.subscribe(move |_| {
				seen.fetch_add(1, Ordering::SeqCst);
			});
			channel.emit(&1);
			assert_eq!(channel.listener_count(), 1);
		}

		channel.emit(&2);
		assert_eq!(count.load(Ordering::SeqCst), 1);
		assert_eq!(channel.listener_count(), 0);
	}

	#[test]
	fn test_subscription_outlives_channel() {
		let channel: EventChannel<u32> = EventChannel::new();
		let sub = channel.subscribe(|_| {});
		drop(channel);
		sub.unsubscribe();
	}

	#[test]
	fn test_listener_may_remove_itself_during_emit() {
		let channel: EventChannel<u32> = EventChannel::new();
		let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
		let inner = Arc::clone(&slot);
		let sub = channel.subscribe(move |_| {
			inner.lock().take();
		});
		*slot.lock() = Some(sub);

		channel.emit(&1);
		assert_eq!(channel.listener_count(), 0);
	}
}
