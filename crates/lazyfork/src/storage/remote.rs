// SPDX-License-Identifier: GPL-3.0

//! Remote storage layer for lazy-loading state from live chains.
//!
//! [`RemoteStorageLayer`] transparently fetches storage from a live chain via
//! RPC when values aren't in the local cache, enabling "lazy forking" where
//! state is fetched on demand rather than requiring a full sync.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    RemoteStorageLayer                           │
//! │                                                                 │
//! │   get(key) ─────► Persistent cache hit? ── Yes ──► Return       │
//! │                        │                                        │
//! │                        No                                       │
//! │                        ▼                                        │
//! │              In-flight fetch for key? ── Yes ──► Await it       │
//! │                        │                                        │
//! │                        No                                       │
//! │                        ▼                                        │
//! │              Fetch via RPC, write back to cache                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Key walks are served by a per-prefix range cache: remote paging is expensive
//! and re-walked repeatedly during one block build (every `next_key` host call
//! pages the same prefixes), so each fetched batch extends a contiguous known
//! range and subsequent pages are answered locally.

use crate::{ForkRpcClient, StorageCache, error::StorageError};
use std::{
	collections::{BTreeSet, HashMap},
	ops::Bound::{Excluded, Unbounded},
	sync::{Arc, Mutex, RwLock},
};
use subxt::config::substrate::H256;
use tokio::sync::OnceCell;

/// Number of keys fetched per RPC call while extending a prefix range.
///
/// Balances RPC overhead (fewer calls is better) against response latency.
/// 1000 keys fits comfortably within usual RPC response limits.
const KEY_FETCH_BATCH: u32 = 1000;

/// Per-prefix record of the contiguous key range fetched so far.
#[derive(Debug, Default)]
struct PrefixRange {
	/// Every key fetched under the prefix, covering the range from the start
	/// of the prefix up to `scanned_to`.
	keys: BTreeSet<Vec<u8>>,
	/// Upper bound of the contiguous scanned range (the last fetched key).
	scanned_to: Option<Vec<u8>>,
	/// The remote reported fewer keys than requested: the prefix is exhausted.
	complete: bool,
}

/// Cache of contiguous fetched key ranges, per key prefix.
///
/// Purely additive: a range, once fetched at the layer's fixed block hash, is
/// immutable. Shared by every overlay chained onto the same remote layer.
#[derive(Debug, Default)]
pub struct KeyCache {
	prefixes: RwLock<HashMap<Vec<u8>, PrefixRange>>,
}

impl KeyCache {
	/// Serve keys under `prefix` strictly greater than `start_key` from the
	/// known range. Returns the served keys plus whether the range is complete.
	fn serve(
		&self,
		prefix: &[u8],
		start_key: &[u8],
		limit: usize,
	) -> Result<(Vec<Vec<u8>>, bool), StorageError> {
		let prefixes = self.prefixes.read().map_err(|e| StorageError::Lock(e.to_string()))?;
		match prefixes.get(prefix) {
			Some(range) => {
				let keys = range
					.keys
					.range::<[u8], _>((Excluded(start_key), Unbounded))
					.take(limit)
					.cloned()
					.collect();
				Ok((keys, range.complete))
			},
			None => Ok((Vec::new(), false)),
		}
	}

	/// The resume point for extending the scanned range of `prefix`.
	fn scanned_to(&self, prefix: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
		let prefixes = self.prefixes.read().map_err(|e| StorageError::Lock(e.to_string()))?;
		Ok(prefixes.get(prefix).and_then(|r| r.scanned_to.clone()))
	}

	/// Feed a freshly fetched batch into the range for `prefix`.
	fn extend(
		&self,
		prefix: &[u8],
		batch: &[Vec<u8>],
		complete: bool,
	) -> Result<(), StorageError> {
		let mut prefixes = self.prefixes.write().map_err(|e| StorageError::Lock(e.to_string()))?;
		let range = prefixes.entry(prefix.to_vec()).or_default();
		range.keys.extend(batch.iter().cloned());
		if let Some(last) = batch.last() {
			range.scanned_to = Some(last.clone());
		}
		range.complete = range.complete || complete;
		Ok(())
	}

	/// Seed a range from persisted scan state.
	fn seed(
		&self,
		prefix: &[u8],
		keys: Vec<Vec<u8>>,
		scanned_to: Option<Vec<u8>>,
		complete: bool,
	) -> Result<(), StorageError> {
		let mut prefixes = self.prefixes.write().map_err(|e| StorageError::Lock(e.to_string()))?;
		prefixes.entry(prefix.to_vec()).or_insert(PrefixRange {
			keys: keys.into_iter().collect(),
			scanned_to,
			complete,
		});
		Ok(())
	}

	/// Whether the range for `prefix` has been touched at all.
	fn is_known(&self, prefix: &[u8]) -> Result<bool, StorageError> {
		let prefixes = self.prefixes.read().map_err(|e| StorageError::Lock(e.to_string()))?;
		Ok(prefixes.contains_key(prefix))
	}
}

/// Remote storage layer that lazily fetches state from a live chain.
///
/// Provides a cache-through abstraction: reads check the persistent cache
/// first and only fetch from the remote RPC on a miss. Fetched values are
/// written back for subsequent reads and future runs.
///
/// # Cloning
///
/// `RemoteStorageLayer` is cheap to clone; the RPC client, cache, key-range
/// cache and in-flight map are all reference counted, so every clone observes
/// (and feeds) the same caches.
#[derive(Clone, Debug)]
pub struct RemoteStorageLayer {
	rpc: ForkRpcClient,
	cache: Option<StorageCache>,
	block_hash: H256,
	key_cache: Arc<KeyCache>,
	/// One cell per key currently being fetched, so concurrent reads of the
	/// same uncached key share a single remote request.
	in_flight: Arc<Mutex<HashMap<Vec<u8>, Arc<OnceCell<Option<Vec<u8>>>>>>>,
}

impl RemoteStorageLayer {
	/// Create a new remote storage layer.
	///
	/// # Arguments
	/// * `rpc` - RPC client connected to the live chain
	/// * `cache` - Optional persistent cache for fetched values
	/// * `block_hash` - Block hash to query state at (typically the fork point)
	pub fn new(rpc: ForkRpcClient, cache: Option<StorageCache>, block_hash: H256) -> Self {
		Self {
			rpc,
			cache,
			block_hash,
			key_cache: Arc::new(KeyCache::default()),
			in_flight: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// The block hash this layer is bound to.
	pub fn block_hash(&self) -> H256 {
		self.block_hash
	}

	/// The underlying RPC client.
	pub fn rpc(&self) -> &ForkRpcClient {
		&self.rpc
	}

	/// The underlying persistent cache, if any.
	pub fn cache(&self) -> Option<&StorageCache> {
		self.cache.as_ref()
	}

	/// Get a storage value, fetching from RPC if not cached.
	///
	/// # Returns
	/// * `Ok(Some(value))` - Storage exists with value
	/// * `Ok(None)` - Storage key doesn't exist (empty)
	/// * `Err(_)` - RPC or cache error
	///
	/// Empty storage is cached as empty, so known-absent keys don't re-fetch.
	/// Concurrent calls for the same uncached key share one remote request.
	pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
		if let Some(cache) = &self.cache &&
			let Some(cached) = cache.get_storage(self.block_hash, key).await?
		{
			return Ok(cached);
		}

		let cell = {
			let mut in_flight =
				self.in_flight.lock().map_err(|e| StorageError::Lock(e.to_string()))?;
			in_flight.entry(key.to_vec()).or_insert_with(|| Arc::new(OnceCell::new())).clone()
		};

		let value = cell
			.get_or_try_init(|| async {
				let fetched = self.rpc.storage(key, self.block_hash).await?;
				if let Some(cache) = &self.cache {
					cache.set_storage(self.block_hash, key, fetched.as_deref()).await?;
				}
				Ok::<_, StorageError>(fetched)
			})
			.await?
			.clone();

		// The value is now in the persistent cache (when one is configured);
		// drop the cell so the map doesn't grow without bound.
		if let Ok(mut in_flight) = self.in_flight.lock() {
			in_flight.remove(key);
		}

		Ok(value)
	}

	/// Get multiple storage values, fetching uncached keys from RPC in one batch.
	///
	/// Returns values in the same order as the input keys.
	pub async fn get_batch(
		&self,
		keys: &[&[u8]],
	) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
		if keys.is_empty() {
			return Ok(vec![]);
		}

		let cached_results = match &self.cache {
			Some(cache) => cache.get_storage_batch(self.block_hash, keys).await?,
			None => vec![None; keys.len()],
		};

		let mut uncached_indices: Vec<usize> = Vec::new();
		let mut uncached_keys: Vec<&[u8]> = Vec::new();
		for (i, cached) in cached_results.iter().enumerate() {
			if cached.is_none() {
				uncached_indices.push(i);
				uncached_keys.push(keys[i]);
			}
		}

		if uncached_keys.is_empty() {
			return Ok(cached_results.into_iter().map(|c| c.flatten()).collect());
		}

		let fetched = self.rpc.storage_batch(&uncached_keys, self.block_hash).await?;

		if let Some(cache) = &self.cache {
			let entries: Vec<(&[u8], Option<&[u8]>)> =
				uncached_keys.iter().zip(fetched.iter()).map(|(k, v)| (*k, v.as_deref())).collect();
			cache.set_storage_batch(self.block_hash, &entries).await?;
		}

		let mut results: Vec<Option<Vec<u8>>> =
			cached_results.into_iter().map(|c| c.flatten()).collect();
		for (i, idx) in uncached_indices.into_iter().enumerate() {
			results[idx] = fetched[i].clone();
		}

		Ok(results)
	}

	/// Keys under `prefix`, strictly greater than `start_key`, at most
	/// `page_size`, served from the range cache and extended from the remote
	/// as needed.
	///
	/// Each extension fetches one batch of at most [`KEY_FETCH_BATCH`] keys and
	/// feeds it into the cache; the loop repeats until the page fills or the
	/// remote signals exhaustion. After the first walk, repeated paging over
	/// the same prefix is O(1) amortized per key.
	pub async fn keys_paged(
		&self,
		prefix: &[u8],
		page_size: u32,
		start_key: &[u8],
	) -> Result<Vec<Vec<u8>>, StorageError> {
		self.warm_from_persisted(prefix).await?;

		let mut out: Vec<Vec<u8>> = Vec::new();
		let mut cursor = start_key.to_vec();

		loop {
			let remaining = page_size as usize - out.len();
			let (served, complete) = self.key_cache.serve(prefix, &cursor, remaining)?;
			if let Some(last) = served.last() {
				cursor = last.clone();
			}
			out.extend(served);

			if out.len() >= page_size as usize || complete {
				return Ok(out);
			}

			// Extend the contiguous range by one batch. Always resume from the
			// end of the known range so the cache never has gaps.
			let resume = self.key_cache.scanned_to(prefix)?;
			let batch = self
				.rpc
				.storage_keys_paged(prefix, KEY_FETCH_BATCH, resume.as_deref(), self.block_hash)
				.await?;
			let exhausted = (batch.len() as u32) < KEY_FETCH_BATCH;

			// Prefetch the batch's values while we're here; a key walk is
			// almost always followed by reads of the same keys.
			if let Some(cache) = &self.cache && !batch.is_empty() {
				let key_refs: Vec<&[u8]> = batch.iter().map(|k| k.as_slice()).collect();
				let values = self.rpc.storage_batch(&key_refs, self.block_hash).await?;
				let entries: Vec<(&[u8], Option<&[u8]>)> =
					key_refs.iter().zip(values.iter()).map(|(k, v)| (*k, v.as_deref())).collect();
				cache.set_storage_batch(self.block_hash, &entries).await?;
			}

			self.key_cache.extend(prefix, &batch, exhausted)?;

			if let Some(cache) = &self.cache {
				let marker = batch.last().map(|k| k.as_slice()).unwrap_or(prefix);
				cache.update_prefix_scan(self.block_hash, prefix, marker, exhausted).await?;
			}
		}
	}

	/// Seed the in-memory range cache from a previous run's persisted scan.
	async fn warm_from_persisted(&self, prefix: &[u8]) -> Result<(), StorageError> {
		if self.key_cache.is_known(prefix)? {
			return Ok(());
		}
		let Some(cache) = &self.cache else { return Ok(()) };
		let Some(progress) = cache.get_prefix_scan_progress(self.block_hash, prefix).await? else {
			return Ok(());
		};

		let keys = cache.get_keys_by_prefix(self.block_hash, prefix).await?;
		// Persisted key rows can extend past the recorded scan point (e.g.
		// individual gets); only the contiguous part is trustworthy as a range.
		let scanned_to = progress.last_scanned_key.clone();
		let contiguous: Vec<Vec<u8>> = match &scanned_to {
			Some(bound) => keys.into_iter().filter(|k| k.as_slice() <= bound.as_slice()).collect(),
			None => Vec::new(),
		};
		self.key_cache.seed(prefix, contiguous, scanned_to, progress.is_complete)?;
		Ok(())
	}
}
