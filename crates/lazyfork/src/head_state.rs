// SPDX-License-Identifier: GPL-3.0

//! Head and storage subscription hub.
//!
//! [`HeadState`] tracks subscribers interested in head changes and in specific
//! storage keys. The blockchain registry notifies it on every `set_head`;
//! storage subscribers only hear about keys whose value changed in the adopted
//! block's diff.
//!
//! Cross-chain relayers are the main consumer: they watch one chain's head and
//! message-queue keys and feed the peer chain's message submission entry
//! points.

use std::{
	collections::HashMap,
	sync::{
		Mutex,
		atomic::{AtomicU64, Ordering},
	},
};
use subxt::config::substrate::H256;
use tokio::sync::mpsc;

/// A head-changed notification.
#[derive(Debug, Clone)]
pub struct HeadEvent {
	/// The new head's hash.
	pub hash: H256,
	/// The new head's number.
	pub number: u32,
	/// The parent block's hash.
	pub parent_hash: H256,
	/// The SCALE-encoded header of the new head.
	pub header: Vec<u8>,
}

/// A storage-key-changed notification.
#[derive(Debug, Clone)]
pub struct StorageChange {
	/// The block whose diff changed the key.
	pub block_hash: H256,
	/// The storage key.
	pub key: Vec<u8>,
	/// The new value, or `None` when the key was deleted.
	pub value: Option<Vec<u8>>,
}

/// Subscription id handed back on subscribe, used to unsubscribe.
pub type SubscriptionId = u64;

struct StorageSubscription {
	keys: Vec<Vec<u8>>,
	tx: mpsc::UnboundedSender<StorageChange>,
}

/// Pub/sub table for head-changed and storage-key-changed notifications.
#[derive(Default)]
pub struct HeadState {
	next_id: AtomicU64,
	head_subs: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<HeadEvent>>>,
	storage_subs: Mutex<HashMap<SubscriptionId, StorageSubscription>>,
}

impl HeadState {
	/// Create an empty hub.
	pub fn new() -> Self {
		Self::default()
	}

	/// Subscribe to head changes.
	pub fn subscribe_head(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<HeadEvent>) {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = mpsc::unbounded_channel();
		if let Ok(mut subs) = self.head_subs.lock() {
			subs.insert(id, tx);
		}
		(id, rx)
	}

	/// Subscribe to changes of specific storage keys.
	pub fn subscribe_storage(
		&self,
		keys: Vec<Vec<u8>>,
	) -> (SubscriptionId, mpsc::UnboundedReceiver<StorageChange>) {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = mpsc::unbounded_channel();
		if let Ok(mut subs) = self.storage_subs.lock() {
			subs.insert(id, StorageSubscription { keys, tx });
		}
		(id, rx)
	}

	/// Remove a subscription of either kind.
	pub fn unsubscribe(&self, id: SubscriptionId) {
		if let Ok(mut subs) = self.head_subs.lock() {
			subs.remove(&id);
		}
		if let Ok(mut subs) = self.storage_subs.lock() {
			subs.remove(&id);
		}
	}

	/// Notify subscribers of a new head and of any subscribed storage key the
	/// block's diff touched. Closed receivers are pruned as they are found.
	pub fn notify(&self, event: HeadEvent, diff: &[(Vec<u8>, Option<Vec<u8>>)]) {
		if let Ok(mut subs) = self.head_subs.lock() {
			subs.retain(|_, tx| tx.send(event.clone()).is_ok());
		}

		if diff.is_empty() {
			return;
		}

		if let Ok(mut subs) = self.storage_subs.lock() {
			subs.retain(|_, sub| {
				for (key, value) in diff {
					if sub.keys.iter().any(|k| k == key) {
						let change = StorageChange {
							block_hash: event.hash,
							key: key.clone(),
							value: value.clone(),
						};
						if sub.tx.send(change).is_err() {
							return false;
						}
					}
				}
				true
			});
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn head_event(n: u32) -> HeadEvent {
		HeadEvent {
			hash: H256::from([n as u8; 32]),
			number: n,
			parent_hash: H256::from([(n - 1) as u8; 32]),
			header: vec![n as u8],
		}
	}

	#[test]
	fn head_subscribers_receive_every_head() {
		let hub = HeadState::new();
		let (_id, mut rx) = hub.subscribe_head();

		hub.notify(head_event(1), &[]);
		hub.notify(head_event(2), &[]);

		assert_eq!(rx.try_recv().unwrap().number, 1);
		assert_eq!(rx.try_recv().unwrap().number, 2);
		assert!(rx.try_recv().is_err());
	}

	#[test]
	fn storage_subscribers_only_hear_their_keys() {
		let hub = HeadState::new();
		let (_id, mut rx) = hub.subscribe_storage(vec![b"watched".to_vec()]);

		let diff = vec![
			(b"watched".to_vec(), Some(b"new".to_vec())),
			(b"other".to_vec(), Some(b"x".to_vec())),
		];
		hub.notify(head_event(1), &diff);

		let change = rx.try_recv().unwrap();
		assert_eq!(change.key, b"watched".to_vec());
		assert_eq!(change.value, Some(b"new".to_vec()));
		assert!(rx.try_recv().is_err());
	}

	#[test]
	fn storage_subscribers_hear_deletions() {
		let hub = HeadState::new();
		let (_id, mut rx) = hub.subscribe_storage(vec![b"gone".to_vec()]);

		hub.notify(head_event(1), &[(b"gone".to_vec(), None)]);

		let change = rx.try_recv().unwrap();
		assert_eq!(change.value, None);
	}

	#[test]
	fn unsubscribe_stops_notifications() {
		let hub = HeadState::new();
		let (id, mut rx) = hub.subscribe_head();

		hub.notify(head_event(1), &[]);
		hub.unsubscribe(id);
		hub.notify(head_event(2), &[]);

		assert_eq!(rx.try_recv().unwrap().number, 1);
		// The sender side is gone, so only the pre-unsubscribe event arrived.
		assert!(rx.try_recv().is_err());
	}

	#[test]
	fn dropped_receivers_are_pruned() {
		let hub = HeadState::new();
		let (_id, rx) = hub.subscribe_head();
		drop(rx);

		hub.notify(head_event(1), &[]);
		assert!(hub.head_subs.lock().unwrap().is_empty());
	}
}
