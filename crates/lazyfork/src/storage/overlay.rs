// SPDX-License-Identifier: GPL-3.0

//! Copy-on-write overlay layer.
//!
//! A [`StorageLayer`] shadows its parent provider: all modifications are stored
//! in the layer, leaving the parent unchanged. Each runtime-call phase during
//! block building pushes one overlay; sealing folds them into a flat diff.

use crate::{
	error::StorageError,
	storage::{LocalLookup, SharedValue, StorageLayerProvider, StorageValue},
};
use std::{
	collections::HashMap,
	mem,
	sync::RwLock,
};

/// Copy-on-write overlay over a parent storage provider.
///
/// Owns three pieces of local knowledge:
/// - an override map (`key -> value or tombstone`),
/// - a sorted list of locally-live keys (exactly the keys with a literal
///   override; kept sorted on every mutation),
/// - a list of deleted prefixes.
///
/// A fourth map memoizes parent lookups on request so repeated reads of the
/// same key do not traverse to the remote leaf again; memoized entries are a
/// cache, never part of the layer's net effect.
#[derive(Debug)]
pub struct StorageLayer {
	/// Local overrides: literal values and per-key tombstones.
	overrides: HashMap<Vec<u8>, StorageValue>,
	/// Keys with a literal override, kept sorted.
	live_keys: Vec<Vec<u8>>,
	/// Prefixes under which all keys (local or remote) read as deleted.
	deleted_prefixes: Vec<Vec<u8>>,
	/// Memoized parent lookups; interior mutability so `get` can record them.
	memoized: RwLock<HashMap<Vec<u8>, Option<SharedValue>>>,
	/// The owned parent slot. Swapped out by fold operations.
	parent: StorageLayerProvider,
}

impl StorageLayer {
	/// Create a new empty layer over a parent.
	pub fn new(parent: StorageLayerProvider) -> Self {
		Self {
			overrides: HashMap::new(),
			live_keys: Vec::new(),
			deleted_prefixes: Vec::new(),
			memoized: RwLock::new(HashMap::new()),
			parent,
		}
	}

	/// Borrow the parent provider.
	pub fn parent(&self) -> &StorageLayerProvider {
		&self.parent
	}

	/// Consume the layer, discarding its local state and returning the parent.
	pub fn into_parent(self) -> StorageLayerProvider {
		self.parent
	}

	/// Set a storage entry, dispatching on the value kind:
	///
	/// - `Some(Value(_))` stores the literal value and inserts the key into the
	///   sorted live-key list.
	/// - `Some(Deleted)` removes the key from the live list but keeps an
	///   explicit tombstone.
	/// - `Some(DeletedPrefix)` records the key as a deleted prefix and
	///   immediately tombstones every currently-known live key under it.
	/// - `None` clears any override so the key falls through to the parent
	///   (an existing deleted prefix still applies).
	pub fn set(&mut self, key: Vec<u8>, value: Option<StorageValue>) {
		match value {
			Some(StorageValue::Value(bytes)) => {
				if let Err(pos) = self.live_keys.binary_search(&key) {
					self.live_keys.insert(pos, key.clone());
				}
				self.forget_memoized(&key);
				self.overrides.insert(key, StorageValue::Value(bytes));
			},
			Some(StorageValue::Deleted) => {
				if let Ok(pos) = self.live_keys.binary_search(&key) {
					self.live_keys.remove(pos);
				}
				self.forget_memoized(&key);
				self.overrides.insert(key, StorageValue::Deleted);
			},
			Some(StorageValue::DeletedPrefix) => {
				// Tombstone every currently-known live key under the prefix;
				// the explicit tombstones keep the deletions visible in diffs.
				self.live_keys.retain(|k| !k.starts_with(&key));
				for (k, v) in self.overrides.iter_mut() {
					if k.starts_with(&key) && matches!(v, StorageValue::Value(_)) {
						*v = StorageValue::Deleted;
					}
				}
				if let Ok(mut memoized) = self.memoized.write() {
					memoized.retain(|k, _| !k.starts_with(&key));
				}
				if !self.deleted_prefixes.contains(&key) {
					self.deleted_prefixes.push(key);
				}
			},
			None => {
				if let Ok(pos) = self.live_keys.binary_search(&key) {
					self.live_keys.remove(pos);
				}
				self.forget_memoized(&key);
				self.overrides.remove(&key);
			},
		}
	}

	/// Apply a batch of entries through [`StorageLayer::set`].
	pub fn set_all(&mut self, entries: impl IntoIterator<Item = (Vec<u8>, Option<StorageValue>)>) {
		for (key, value) in entries {
			self.set(key, value);
		}
	}

	/// The layer's net effect: literal overrides, per-key tombstones and
	/// deleted prefixes, sorted by key with prefix tombstones ordered before
	/// any key they cover (a prefix sorts before every key that extends it, and
	/// before a same-key override so replays preserve mutation-order
	/// semantics).
	pub fn diff(&self) -> Vec<(Vec<u8>, StorageValue)> {
		let mut entries: Vec<(Vec<u8>, StorageValue)> = self
			.deleted_prefixes
			.iter()
			.map(|p| (p.clone(), StorageValue::DeletedPrefix))
			.chain(self.overrides.iter().map(|(k, v)| (k.clone(), v.clone())))
			.collect();

		entries.sort_by(|(ka, va), (kb, vb)| {
			ka.cmp(kb).then_with(|| {
				let rank = |v: &StorageValue| !matches!(v, StorageValue::DeletedPrefix);
				rank(va).cmp(&rank(vb))
			})
		});
		entries
	}

	/// Whether the layer has any net effect at all.
	pub fn is_empty(&self) -> bool {
		self.overrides.is_empty() && self.deleted_prefixes.is_empty()
	}

	/// Fold this layer's net effect into `target`, deepest ancestor first, and
	/// return the provider remaining below the folded segment.
	pub fn fold_into(self: Box<Self>, target: &mut StorageLayer) -> StorageLayerProvider {
		let layer = *self;
		let remaining = layer.parent.fold_into(target);

		// Replay in mutation-order-preserving form: prefixes first, then
		// overrides, so an override recorded after a covering prefix survives.
		for prefix in layer.deleted_prefixes {
			target.set(prefix, Some(StorageValue::DeletedPrefix));
		}
		for (key, value) in layer.overrides {
			target.set(key, Some(value));
		}

		remaining
	}

	/// Replay this layer's net effect into `target` without consuming it.
	pub(crate) fn replay_into(&self, target: &mut StorageLayer) {
		for (key, value) in self.diff() {
			target.set(key, Some(value));
		}
	}

	/// Collapse this layer's parent overlay chain into a single flattened layer
	/// spliced underneath this one, bounding chain depth after many builds.
	///
	/// This layer's own overrides keep precedence over everything folded up
	/// from below.
	pub fn fold(&mut self) {
		let parent = mem::replace(&mut self.parent, StorageLayerProvider::empty());

		match parent {
			StorageLayerProvider::Overlay(chain) => {
				let mut flat = StorageLayer::new(StorageLayerProvider::empty());
				let leaf = chain.fold_into(&mut flat);

				// Merge the flattened chain *under* this layer: keep our own
				// overrides, skip anything our deleted prefixes shadow, carry
				// the rest.
				for (key, value) in mem::take(&mut flat.overrides) {
					if self.overrides.contains_key(&key) {
						continue;
					}
					if self.deleted_prefixes.iter().any(|p| key.starts_with(p)) {
						continue;
					}
					if matches!(value, StorageValue::Value(_)) &&
						let Err(pos) = self.live_keys.binary_search(&key)
					{
						self.live_keys.insert(pos, key.clone());
					}
					self.overrides.insert(key, value);
				}
				self.deleted_prefixes.extend(mem::take(&mut flat.deleted_prefixes));

				self.parent = leaf;
			},
			leaf => self.parent = leaf,
		}
	}

	/// Resolve a key against this layer's local knowledge only.
	pub(crate) fn local_resolve(&self, key: &[u8]) -> Result<LocalLookup, StorageError> {
		if let Some(value) = self.overrides.get(key) {
			return Ok(match value {
				StorageValue::Value(bytes) => LocalLookup::Hit(Some(bytes.clone())),
				StorageValue::Deleted | StorageValue::DeletedPrefix => LocalLookup::Hit(None),
			});
		}

		if self.deleted_prefixes.iter().any(|p| key.starts_with(p)) {
			return Ok(LocalLookup::Hit(None));
		}

		let memoized =
			self.memoized.read().map_err(|e| StorageError::Lock(e.to_string()))?;
		if let Some(value) = memoized.get(key) {
			return Ok(LocalLookup::Hit(value.clone()));
		}

		Ok(LocalLookup::Miss)
	}

	/// Whether this layer supersedes a parent's key for paging purposes:
	/// any override (the live list already contributes literal overrides) or a
	/// deleted-prefix match.
	pub(crate) fn shadows(&self, key: &[u8]) -> bool {
		self.overrides.contains_key(key) ||
			self.deleted_prefixes.iter().any(|p| key.starts_with(p))
	}

	/// The first locally-live key under `prefix` strictly greater than `after`.
	pub(crate) fn next_live_key(&self, prefix: &[u8], after: &[u8]) -> Option<Vec<u8>> {
		let start = match self.live_keys.binary_search_by(|k| k.as_slice().cmp(after)) {
			Ok(i) => i + 1,
			Err(i) => i,
		};

		for key in &self.live_keys[start..] {
			if key.as_slice() < prefix {
				continue;
			}
			if !key.starts_with(prefix) {
				return None;
			}
			return Some(key.clone());
		}
		None
	}

	/// Record a parent lookup result for later reads.
	pub(crate) fn memoize_parent_lookup(
		&self,
		key: &[u8],
		value: Option<SharedValue>,
	) -> Result<(), StorageError> {
		self.memoized
			.write()
			.map_err(|e| StorageError::Lock(e.to_string()))?
			.insert(key.to_vec(), value);
		Ok(())
	}

	#[cfg(test)]
	pub(crate) fn has_memoized(&self, key: &[u8]) -> bool {
		self.memoized.read().map(|m| m.contains_key(key)).unwrap_or(false)
	}

	fn forget_memoized(&mut self, key: &[u8]) {
		if let Ok(mut memoized) = self.memoized.write() {
			memoized.remove(key);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::SnapshotStorage;

	fn base(entries: &[(&[u8], &[u8])]) -> StorageLayerProvider {
		StorageLayerProvider::Snapshot(
			entries.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect::<SnapshotStorage>(),
		)
	}

	#[test]
	fn live_keys_stay_sorted_on_every_mutation() {
		let mut layer = StorageLayer::new(StorageLayerProvider::empty());

		for key in [&b"d"[..], b"a", b"c", b"b"] {
			layer.set(key.to_vec(), Some(StorageValue::value(b"v".to_vec())));
		}
		assert_eq!(layer.live_keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);

		layer.set(b"b".to_vec(), Some(StorageValue::Deleted));
		assert_eq!(layer.live_keys, vec![b"a".to_vec(), b"c".to_vec(), b"d".to_vec()]);

		layer.set(b"c".to_vec(), None);
		assert_eq!(layer.live_keys, vec![b"a".to_vec(), b"d".to_vec()]);
	}

	#[test]
	fn deleted_prefix_tombstones_known_live_keys() {
		let mut layer = StorageLayer::new(StorageLayerProvider::empty());
		layer.set(b"aa1".to_vec(), Some(StorageValue::value(b"1".to_vec())));
		layer.set(b"aa2".to_vec(), Some(StorageValue::value(b"2".to_vec())));
		layer.set(b"bb1".to_vec(), Some(StorageValue::value(b"3".to_vec())));

		layer.set(b"aa".to_vec(), Some(StorageValue::DeletedPrefix));

		assert_eq!(layer.live_keys, vec![b"bb1".to_vec()]);
		assert!(matches!(layer.local_resolve(b"aa1").unwrap(), LocalLookup::Hit(None)));
		assert!(matches!(layer.local_resolve(b"aa9").unwrap(), LocalLookup::Hit(None)));
	}

	#[test]
	fn clearing_an_override_falls_through_again() {
		let mut layer = StorageLayer::new(StorageLayerProvider::empty());
		layer.set(b"key".to_vec(), Some(StorageValue::value(b"v".to_vec())));
		layer.set(b"key".to_vec(), None);

		assert!(matches!(layer.local_resolve(b"key").unwrap(), LocalLookup::Miss));
		assert!(layer.is_empty());
	}

	#[test]
	fn diff_orders_prefix_tombstones_before_covered_keys() {
		let mut layer = StorageLayer::new(StorageLayerProvider::empty());
		layer.set(b"aa".to_vec(), Some(StorageValue::DeletedPrefix));
		layer.set(b"aa1".to_vec(), Some(StorageValue::value(b"kept".to_vec())));
		layer.set(b"ab".to_vec(), Some(StorageValue::Deleted));

		let diff = layer.diff();
		assert_eq!(diff.len(), 3);
		assert_eq!(diff[0], (b"aa".to_vec(), StorageValue::DeletedPrefix));
		assert_eq!(diff[1].0, b"aa1".to_vec());
		assert_eq!(diff[2], (b"ab".to_vec(), StorageValue::Deleted));
	}

	#[tokio::test]
	async fn fold_into_flattens_a_chain_with_upper_layers_winning() {
		let base = base(&[(b"A", b"base_a"), (b"B", b"base_b")]);

		let mut lower = StorageLayer::new(base);
		lower.set(b"A".to_vec(), Some(StorageValue::value(b"lower_a".to_vec())));
		lower.set(b"C".to_vec(), Some(StorageValue::value(b"lower_c".to_vec())));

		let mut upper = StorageLayer::new(StorageLayerProvider::Overlay(Box::new(lower)));
		upper.set(b"A".to_vec(), Some(StorageValue::value(b"upper_a".to_vec())));
		upper.set(b"C".to_vec(), Some(StorageValue::Deleted));

		let mut flat = StorageLayer::new(StorageLayerProvider::empty());
		let remaining = StorageLayerProvider::Overlay(Box::new(upper)).fold_into(&mut flat);
		// Splice the flattened layer over whatever remained below.
		flat.parent = remaining;

		let provider = StorageLayerProvider::Overlay(Box::new(flat));
		assert_eq!(provider.get(b"A", false).await.unwrap().unwrap().as_ref(), b"upper_a");
		assert_eq!(provider.get(b"B", false).await.unwrap().unwrap().as_ref(), b"base_b");
		assert!(provider.get(b"C", false).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn fold_preserves_observable_state() {
		// Fold idempotence: every key reads the same before and after fold().
		let base = base(&[(b"k1", b"v1"), (b"k2", b"v2"), (b"pfx_1", b"p1")]);

		let mut l1 = StorageLayer::new(base);
		l1.set(b"k2".to_vec(), Some(StorageValue::value(b"l1_k2".to_vec())));
		l1.set(b"k3".to_vec(), Some(StorageValue::value(b"l1_k3".to_vec())));

		let mut l2 = StorageLayer::new(StorageLayerProvider::Overlay(Box::new(l1)));
		l2.set(b"pfx".to_vec(), Some(StorageValue::DeletedPrefix));
		l2.set(b"k3".to_vec(), Some(StorageValue::Deleted));

		let mut top = StorageLayer::new(StorageLayerProvider::Overlay(Box::new(l2)));
		top.set(b"k4".to_vec(), Some(StorageValue::value(b"top_k4".to_vec())));

		let keys: &[&[u8]] = &[b"k1", b"k2", b"k3", b"k4", b"pfx_1", b"missing"];

		let before_provider = StorageLayerProvider::Overlay(Box::new(top));
		let mut before = Vec::new();
		for key in keys {
			before.push(before_provider.get(key, false).await.unwrap());
		}

		let StorageLayerProvider::Overlay(mut top) = before_provider else { unreachable!() };
		top.fold();
		// The parent chain is now a single flattened overlay over the leaf.
		assert!(matches!(top.parent(), StorageLayerProvider::Snapshot(_)));

		let after_provider = StorageLayerProvider::Overlay(top);
		for (key, expected) in keys.iter().zip(before) {
			assert_eq!(after_provider.get(key, false).await.unwrap(), expected, "key {key:?}");
		}
	}

	#[tokio::test]
	async fn fold_keeps_own_overrides_over_folded_chain() {
		let base = base(&[(b"k", b"base")]);

		let mut lower = StorageLayer::new(base);
		lower.set(b"k".to_vec(), Some(StorageValue::value(b"lower".to_vec())));

		let mut top = StorageLayer::new(StorageLayerProvider::Overlay(Box::new(lower)));
		top.set(b"k".to_vec(), Some(StorageValue::value(b"top".to_vec())));

		top.fold();

		let provider = StorageLayerProvider::Overlay(Box::new(top));
		assert_eq!(provider.get(b"k", false).await.unwrap().unwrap().as_ref(), b"top");
	}
}
