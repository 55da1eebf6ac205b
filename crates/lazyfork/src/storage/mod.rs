// SPDX-License-Identifier: GPL-3.0

//! Layered storage stack for forked chains.
//!
//! Storage is resolved through a chain of providers: copy-on-write overlays on
//! top, bottoming out in either a remote layer (lazy fetch from the live chain)
//! or an in-memory snapshot. Sealed blocks freeze their diff chain behind a
//! shared node so children can stack on top without aliasing mutable state.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     StorageLayerProvider                        │
//! │                                                                 │
//! │   Overlay ──► Overlay ──► Shared(frozen) ──► Remote (live RPC)  │
//! │  (pending)   (pending)   (sealed blocks)     or Snapshot (map)  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Resolution order for `get` within each overlay: local override (including
//! tombstones) → deleted-prefix match → memoized parent lookup → parent.

pub mod overlay;
pub mod remote;

pub use overlay::StorageLayer;
pub use remote::{KeyCache, RemoteStorageLayer};

use crate::error::StorageError;
use futures::future::BoxFuture;
use std::{
	collections::{BTreeMap, VecDeque},
	ops::Bound::{Excluded, Unbounded},
	sync::Arc,
};

/// A storage value shared between layers without copying.
pub type SharedValue = Arc<Vec<u8>>;

/// One entry in a storage layer.
///
/// Absence of an entry ("no override, defer to the parent") is modeled as
/// `Option::None` at the mutation API, not as a variant here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageValue {
	/// A literal value.
	Value(SharedValue),
	/// Tombstone: the key is deleted in this layer.
	Deleted,
	/// Tombstone: every key under this prefix (the entry's key) is deleted,
	/// local or remote, until a layer overrides a specific key under it again.
	DeletedPrefix,
}

impl StorageValue {
	/// Convenience constructor for a literal value.
	pub fn value(bytes: impl Into<Vec<u8>>) -> Self {
		Self::Value(Arc::new(bytes.into()))
	}
}

/// An in-memory leaf provider backed by a fixed sorted key/value map.
///
/// Used as the base of offline forks and as the scratch parent when flattening
/// layer chains into diffs.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStorage {
	entries: BTreeMap<Vec<u8>, SharedValue>,
}

impl SnapshotStorage {
	/// Create an empty snapshot.
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert an entry.
	pub fn insert(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
		self.entries.insert(key.into(), Arc::new(value.into()));
	}

	/// Get a value by key.
	pub fn get(&self, key: &[u8]) -> Option<SharedValue> {
		self.entries.get(key).cloned()
	}

	/// Keys under `prefix`, strictly greater than `start_key`, at most `page_size`.
	pub fn keys_paged(&self, prefix: &[u8], page_size: u32, start_key: &[u8]) -> Vec<Vec<u8>> {
		self.entries
			.range::<[u8], _>((Excluded(start_key), Unbounded))
			.map(|(k, _)| k)
			.skip_while(|k| k.as_slice() < prefix && !k.starts_with(prefix))
			.take_while(|k| k.starts_with(prefix))
			.take(page_size as usize)
			.cloned()
			.collect()
	}
}

impl FromIterator<(Vec<u8>, Vec<u8>)> for SnapshotStorage {
	fn from_iter<I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>>(iter: I) -> Self {
		Self { entries: iter.into_iter().map(|(k, v)| (k, Arc::new(v))).collect() }
	}
}

/// A node in the layered storage chain.
///
/// The chain is an owned tree: each overlay holds its parent in a single owned
/// slot, so fold operations are tree rewrites that return the replacement node
/// instead of mutating shared state. [`StorageLayerProvider::Shared`] marks the
/// frozen base of a sealed block; fold operations treat it as a leaf boundary,
/// exactly like the remote layer.
#[derive(Debug)]
pub enum StorageLayerProvider {
	/// Remote leaf bound to one historical block hash of a live chain.
	Remote(RemoteStorageLayer),
	/// In-memory leaf over a fixed sorted map.
	Snapshot(SnapshotStorage),
	/// Copy-on-write overlay over an owned parent.
	Overlay(Box<StorageLayer>),
	/// Frozen base of a sealed block, shared between that block and its children.
	Shared(Arc<StorageLayerProvider>),
}

/// Outcome of resolving a key locally within one overlay.
pub(crate) enum LocalLookup {
	/// The layer answers the lookup: a value, or a known-absent/tombstoned key.
	Hit(Option<SharedValue>),
	/// No local knowledge; defer to the parent.
	Miss,
}

impl StorageLayerProvider {
	/// An empty in-memory provider. Cheap placeholder and scratch-diff parent.
	pub fn empty() -> Self {
		Self::Snapshot(SnapshotStorage::new())
	}

	/// Resolve a key through the layer chain.
	///
	/// When `cache` is set, a value resolved from a leaf is memoized in the
	/// topmost overlay so concurrent and repeated lookups for the same key do
	/// not hit the remote again.
	pub async fn get(
		&self,
		key: &[u8],
		cache: bool,
	) -> Result<Option<SharedValue>, StorageError> {
		let mut provider = self;
		// First overlay walked through; leaf results are memoized there.
		let mut cache_target: Option<&StorageLayer> = None;

		loop {
			match provider {
				Self::Overlay(layer) => match layer.local_resolve(key)? {
					LocalLookup::Hit(value) => return Ok(value),
					LocalLookup::Miss => {
						if cache_target.is_none() {
							cache_target = Some(layer);
						}
						provider = layer.parent();
					},
				},
				Self::Shared(inner) => provider = inner.as_ref(),
				Self::Remote(remote) => {
					let value = remote.get(key).await?.map(Arc::new);
					if cache && let Some(layer) = cache_target {
						layer.memoize_parent_lookup(key, value.clone())?;
					}
					return Ok(value);
				},
				Self::Snapshot(snapshot) => {
					let value = snapshot.get(key);
					if cache && let Some(layer) = cache_target {
						layer.memoize_parent_lookup(key, value.clone())?;
					}
					return Ok(value);
				},
			}
		}
	}

	/// Keys under `prefix`, strictly greater than `start_key`, merged across the
	/// whole layer chain in global sorted order.
	///
	/// Locally deleted and overridden keys never appear twice and tombstoned
	/// keys never appear. Returns at most `page_size` keys; a shorter page means
	/// the chain is exhausted under `prefix`.
	pub fn keys_paged<'a>(
		&'a self,
		prefix: &'a [u8],
		page_size: u32,
		start_key: &'a [u8],
	) -> BoxFuture<'a, Result<Vec<Vec<u8>>, StorageError>> {
		Box::pin(async move {
			match self {
				Self::Remote(remote) => remote.keys_paged(prefix, page_size, start_key).await,
				Self::Snapshot(snapshot) => Ok(snapshot.keys_paged(prefix, page_size, start_key)),
				Self::Shared(inner) => inner.keys_paged(prefix, page_size, start_key).await,
				Self::Overlay(layer) => {
					merge_paged_keys(layer, prefix, page_size, start_key).await
				},
			}
		})
	}

	/// Fold this provider's net effect into `target`, returning the provider
	/// that remains below the folded segment.
	///
	/// Leaf nodes (remote, snapshot, shared) are fold boundaries and return
	/// themselves untouched; overlays replay their content into `target`
	/// deepest-first so upper layers win, then dissolve.
	pub fn fold_into(self, target: &mut StorageLayer) -> StorageLayerProvider {
		match self {
			Self::Overlay(layer) => layer.fold_into(target),
			leaf => leaf,
		}
	}
}

/// Merge one overlay's local keys with its parent's pages.
///
/// The parent is re-queried in batches as its candidates are consumed, so a key
/// reintroduced locally after a remote-only key cannot invert sort order.
async fn merge_paged_keys(
	layer: &StorageLayer,
	prefix: &[u8],
	page_size: u32,
	start_key: &[u8],
) -> Result<Vec<Vec<u8>>, StorageError> {
	let mut out: Vec<Vec<u8>> = Vec::new();
	let mut local_cursor = start_key.to_vec();

	let mut pending_local: Option<Vec<u8>> = None;
	let mut pending_parent: Option<Vec<u8>> = None;
	let mut parent_buf: VecDeque<Vec<u8>> = VecDeque::new();
	let mut parent_cursor = start_key.to_vec();
	let mut parent_exhausted = false;

	while out.len() < page_size as usize {
		if pending_local.is_none() {
			pending_local = layer.next_live_key(prefix, &local_cursor);
		}

		// Refill the parent candidate, skipping keys this layer supersedes.
		while pending_parent.is_none() {
			if let Some(candidate) = parent_buf.pop_front() {
				if !layer.shadows(&candidate) {
					pending_parent = Some(candidate);
				}
				continue;
			}
			if parent_exhausted {
				break;
			}
			let batch = layer.parent().keys_paged(prefix, page_size, &parent_cursor).await?;
			if (batch.len() as u32) < page_size {
				parent_exhausted = true;
			}
			match batch.last() {
				Some(last) => parent_cursor = last.clone(),
				None => parent_exhausted = true,
			}
			parent_buf.extend(batch);
		}

		match (pending_local.take(), pending_parent.take()) {
			(Some(local), Some(parent)) => {
				// Equal keys are impossible: a parent key overridden locally is
				// filtered by `shadows`.
				if local < parent {
					local_cursor = local.clone();
					out.push(local);
					pending_parent = Some(parent);
				} else {
					out.push(parent);
					pending_local = Some(local);
				}
			},
			(Some(local), None) => {
				local_cursor = local.clone();
				out.push(local);
			},
			(None, Some(parent)) => out.push(parent),
			(None, None) => break,
		}
	}

	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn snapshot(entries: &[(&[u8], &[u8])]) -> StorageLayerProvider {
		StorageLayerProvider::Snapshot(
			entries.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect(),
		)
	}

	#[tokio::test]
	async fn snapshot_get_and_paging() {
		let provider = snapshot(&[(b"aa1", b"1"), (b"aa2", b"2"), (b"bb1", b"3")]);

		assert_eq!(provider.get(b"aa1", false).await.unwrap().unwrap().as_ref(), b"1");
		assert!(provider.get(b"cc", false).await.unwrap().is_none());

		let keys = provider.keys_paged(b"aa", 10, b"aa").await.unwrap();
		assert_eq!(keys, vec![b"aa1".to_vec(), b"aa2".to_vec()]);
	}

	#[tokio::test]
	async fn overlay_chain_resolution() {
		// O2 over O1 over base {A: 0x01}; O1 sets B; O2 deletes A and sets C.
		let base = snapshot(&[(b"A", &[0x01])]);

		let mut o1 = StorageLayer::new(base);
		o1.set(b"B".to_vec(), Some(StorageValue::value(vec![0x02u8])));
		let o1 = StorageLayerProvider::Overlay(Box::new(o1));

		// O1 sees the base value and its own override.
		assert_eq!(o1.get(b"A", false).await.unwrap().unwrap().as_ref(), &[0x01]);
		assert_eq!(o1.get(b"B", false).await.unwrap().unwrap().as_ref(), &[0x02]);

		let mut o2 = StorageLayer::new(o1);
		o2.set(b"A".to_vec(), Some(StorageValue::Deleted));
		o2.set(b"C".to_vec(), Some(StorageValue::value(vec![0x03u8])));
		let o2 = StorageLayerProvider::Overlay(Box::new(o2));

		assert!(o2.get(b"A", false).await.unwrap().is_none());
		assert_eq!(o2.get(b"B", false).await.unwrap().unwrap().as_ref(), &[0x02]);
		assert_eq!(o2.get(b"C", false).await.unwrap().unwrap().as_ref(), &[0x03]);

		// O1 is unaffected by O2's delete.
		let StorageLayerProvider::Overlay(o2_layer) = o2 else { unreachable!() };
		let o1 = o2_layer.into_parent();
		assert_eq!(o1.get(b"A", false).await.unwrap().unwrap().as_ref(), &[0x01]);
	}

	#[tokio::test]
	async fn deleted_prefix_shadows_parent_keys() {
		let base = snapshot(&[(b"aa1", b"1"), (b"aa2", b"2"), (b"bb1", b"3")]);

		let mut layer = StorageLayer::new(base);
		layer.set(b"aa".to_vec(), Some(StorageValue::DeletedPrefix));
		let provider = StorageLayerProvider::Overlay(Box::new(layer));

		assert!(provider.get(b"aa1", false).await.unwrap().is_none());
		assert!(provider.get(b"aa2", false).await.unwrap().is_none());
		assert_eq!(provider.get(b"bb1", false).await.unwrap().unwrap().as_ref(), b"3");

		// A later override under the prefix is visible again.
		let StorageLayerProvider::Overlay(mut layer) = provider else { unreachable!() };
		layer.set(b"aa1".to_vec(), Some(StorageValue::value(b"new".to_vec())));
		let provider = StorageLayerProvider::Overlay(layer);

		assert_eq!(provider.get(b"aa1", false).await.unwrap().unwrap().as_ref(), b"new");
		assert!(provider.get(b"aa2", false).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn paging_merges_local_and_parent_in_order() {
		let base = snapshot(&[(b"aa1", b"1"), (b"aa3", b"3"), (b"aa5", b"5")]);

		let mut layer = StorageLayer::new(base);
		layer.set(b"aa2".to_vec(), Some(StorageValue::value(b"2".to_vec())));
		layer.set(b"aa4".to_vec(), Some(StorageValue::value(b"4".to_vec())));
		layer.set(b"aa5".to_vec(), Some(StorageValue::Deleted));
		let provider = StorageLayerProvider::Overlay(Box::new(layer));

		let keys = provider.keys_paged(b"aa", 10, b"aa").await.unwrap();
		assert_eq!(
			keys,
			vec![b"aa1".to_vec(), b"aa2".to_vec(), b"aa3".to_vec(), b"aa4".to_vec()]
		);
	}

	#[tokio::test]
	async fn paging_respects_page_size_and_start_key() {
		let base = snapshot(&[]);
		let mut layer = StorageLayer::new(base);
		for key in [&b"\x11\x01"[..], b"\x11\x02", b"\x11\x03"] {
			layer.set(key.to_vec(), Some(StorageValue::value(b"v".to_vec())));
		}
		let provider = StorageLayerProvider::Overlay(Box::new(layer));

		let page = provider.keys_paged(b"\x11", 2, b"\x11").await.unwrap();
		assert_eq!(page, vec![b"\x11\x01".to_vec(), b"\x11\x02".to_vec()]);

		let page = provider.keys_paged(b"\x11", 2, b"\x11\x02").await.unwrap();
		assert_eq!(page, vec![b"\x11\x03".to_vec()]);
	}

	#[tokio::test]
	async fn paging_chained_pages_cover_full_key_set() {
		// Chained pageSize=1 calls must enumerate the same set as one big page,
		// independent of where keys live in the layer chain.
		let base = snapshot(&[(b"p_a", b"1"), (b"p_c", b"3"), (b"p_e", b"5")]);
		let mut lower = StorageLayer::new(base);
		lower.set(b"p_b".to_vec(), Some(StorageValue::value(b"2".to_vec())));
		let mut upper = StorageLayer::new(StorageLayerProvider::Overlay(Box::new(lower)));
		upper.set(b"p_d".to_vec(), Some(StorageValue::value(b"4".to_vec())));
		upper.set(b"p_c".to_vec(), Some(StorageValue::Deleted));
		let provider = StorageLayerProvider::Overlay(Box::new(upper));

		let mut collected = Vec::new();
		let mut cursor = b"p".to_vec();
		loop {
			let page = provider.keys_paged(b"p", 1, &cursor).await.unwrap();
			match page.first() {
				Some(key) => {
					cursor = key.clone();
					collected.push(key.clone());
				},
				None => break,
			}
		}

		let all_at_once = provider.keys_paged(b"p", 100, b"p").await.unwrap();
		assert_eq!(collected, all_at_once);
		assert_eq!(
			collected,
			vec![b"p_a".to_vec(), b"p_b".to_vec(), b"p_d".to_vec(), b"p_e".to_vec()]
		);
	}

	#[tokio::test]
	async fn get_memoizes_leaf_lookups_on_request() {
		let base = snapshot(&[(b"key", b"value")]);
		let layer = StorageLayer::new(base);
		let provider = StorageLayerProvider::Overlay(Box::new(layer));

		assert_eq!(provider.get(b"key", true).await.unwrap().unwrap().as_ref(), b"value");

		let StorageLayerProvider::Overlay(layer) = &provider else { unreachable!() };
		assert!(layer.has_memoized(b"key"));
	}
}
