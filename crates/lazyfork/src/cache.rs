// SPDX-License-Identifier: GPL-3.0

//! SQLite-based storage cache for fork operations.
//!
//! Provides persistent caching of storage values fetched from live chains, records
//! of locally built blocks, and prefix-scan progress so repeated key walks do not
//! re-fetch from the remote endpoint. Enables fast restarts and reduces load on
//! public RPC endpoints.
//!
//! Within one fork session the cache is purely additive: every remote layer is
//! bound to a single historical block hash, so a `(block_hash, key)` pair never
//! changes once written.

use crate::error::cache::CacheError;
use scale::{Decode, Encode};
use sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;
use subxt::config::substrate::H256;

/// Maximum number of connections in the SQLite connection pool.
///
/// The fork process is the only writer, so this only serves internal async task
/// concurrency. 5 provides headroom for parallel reads while staying lightweight.
const MAX_POOL_CONNECTIONS: u32 = 5;

/// SQLite connection string for in-memory databases.
const SQLITE_MEMORY_URL: &str = "sqlite::memory:";

/// Connection pool size for in-memory databases.
///
/// Must be 1 because SQLite in-memory databases are connection-specific:
/// each connection creates a separate, isolated database instance.
const MEMORY_POOL_CONNECTIONS: u32 = 1;

/// A locally built (or cached remote) block record.
///
/// # Block Number Type
///
/// Block numbers are stored as `u32` to match Polkadot SDK's `BlockNumber` type.
/// SQLite stores all integers as `i64`, so we convert when reading from the
/// database. Invalid values indicate corruption and surface as
/// [`CacheError::DataCorruption`].
#[derive(Debug, Clone)]
pub struct BlockRecord {
	/// Block hash.
	pub hash: H256,
	/// Block number.
	pub number: u32,
	/// Parent block hash.
	pub parent_hash: H256,
	/// SCALE-encoded block header.
	pub header: Vec<u8>,
	/// The block's extrinsics.
	pub extrinsics: Vec<Vec<u8>>,
	/// Flat storage diff of this block relative to its parent.
	pub storage_diff: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

/// Progress of a resumable prefix scan against the remote chain.
#[derive(Debug, Clone)]
pub struct PrefixScanProgress {
	/// The last key fetched so far, if any.
	pub last_scanned_key: Option<Vec<u8>>,
	/// Whether the remote reported exhaustion for this prefix.
	pub is_complete: bool,
}

/// SQLite-backed persistent cache for storage values and block records.
///
/// Enables fast restarts without re-fetching all data from live chains
/// and reduces load on public RPC endpoints.
#[derive(Clone, Debug)]
pub struct StorageCache {
	pool: SqlitePool,
}

impl StorageCache {
	/// Open a cache: on disk when a path is given, in memory otherwise.
	pub async fn open(path: Option<&Path>) -> Result<Self, CacheError> {
		match path {
			Some(path) => Self::open_at(path).await,
			None => Self::in_memory().await,
		}
	}

	/// Open or create a cache database at the specified path.
	///
	/// Creates the parent directory if it doesn't exist.
	pub async fn open_at(path: &Path) -> Result<Self, CacheError> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}

		let url = format!("sqlite:{}?mode=rwc", path.display());
		let pool =
			SqlitePoolOptions::new().max_connections(MAX_POOL_CONNECTIONS).connect(&url).await?;

		sqlx::query(CREATE_TABLES_SQL).execute(&pool).await?;

		Ok(Self { pool })
	}

	/// Open an in-memory cache.
	pub async fn in_memory() -> Result<Self, CacheError> {
		let pool = SqlitePoolOptions::new()
			.max_connections(MEMORY_POOL_CONNECTIONS)
			.connect(SQLITE_MEMORY_URL)
			.await?;

		sqlx::query(CREATE_TABLES_SQL).execute(&pool).await?;

		Ok(Self { pool })
	}

	/// Get a cached storage value.
	///
	/// # Returns
	/// * `Ok(Some(Some(value)))` - Cached with a value
	/// * `Ok(Some(None))` - Cached as empty (storage key exists but has no value)
	/// * `Ok(None)` - Not in cache (unknown)
	pub async fn get_storage(
		&self,
		block_hash: H256,
		key: &[u8],
	) -> Result<Option<Option<Vec<u8>>>, CacheError> {
		// `value` and `is_empty` together distinguish "not cached" (no row),
		// "cached as empty" (is_empty) and "cached with value".
		let row =
			sqlx::query("SELECT value, is_empty FROM storage WHERE block_hash = ? AND key = ?")
				.bind(block_hash.as_bytes())
				.bind(key)
				.fetch_optional(&self.pool)
				.await?;

		Ok(row.map(|r| {
			let is_empty: bool = r.get("is_empty");
			if is_empty { None } else { Some(r.get("value")) }
		}))
	}

	/// Cache a storage value.
	///
	/// # Arguments
	/// * `block_hash` - The block hash this storage is from
	/// * `key` - The storage key
	/// * `value` - The storage value, or None if the key has no value (empty)
	pub async fn set_storage(
		&self,
		block_hash: H256,
		key: &[u8],
		value: Option<&[u8]>,
	) -> Result<(), CacheError> {
		sqlx::query(
			"INSERT OR REPLACE INTO storage (block_hash, key, value, is_empty) VALUES (?, ?, ?, ?)",
		)
		.bind(block_hash.as_bytes())
		.bind(key)
		.bind(value)
		.bind(value.is_none())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	/// Get multiple cached storage values in a batch.
	///
	/// Returns results in the same order as the input keys.
	pub async fn get_storage_batch(
		&self,
		block_hash: H256,
		keys: &[&[u8]],
	) -> Result<Vec<Option<Option<Vec<u8>>>>, CacheError> {
		if keys.is_empty() {
			return Ok(vec![]);
		}

		// Single round-trip with a dynamic IN clause.
		let placeholders: Vec<_> = keys.iter().map(|_| "?").collect();
		let query = format!(
			"SELECT key, value, is_empty FROM storage WHERE block_hash = ? AND key IN ({})",
			placeholders.join(", ")
		);

		let mut query_builder = sqlx::query(&query).bind(block_hash.as_bytes());
		for key in keys {
			query_builder = query_builder.bind(*key);
		}

		let rows = query_builder.fetch_all(&self.pool).await?;

		// SQLite doesn't guarantee result order matches the IN clause order.
		let mut cache_map: std::collections::HashMap<Vec<u8>, Option<Vec<u8>>> =
			std::collections::HashMap::new();
		for row in rows {
			let key: Vec<u8> = row.get("key");
			let is_empty: bool = row.get("is_empty");
			let value = if is_empty { None } else { Some(row.get("value")) };
			cache_map.insert(key, value);
		}

		Ok(keys.iter().map(|key| cache_map.get(*key).cloned()).collect())
	}

	/// Cache multiple storage values in a single transaction.
	pub async fn set_storage_batch(
		&self,
		block_hash: H256,
		entries: &[(&[u8], Option<&[u8]>)],
	) -> Result<(), CacheError> {
		if entries.is_empty() {
			return Ok(());
		}

		// A transaction groups all inserts into one commit; individual SQLite
		// commits fsync to disk and dominate the cost otherwise.
		let mut tx = self.pool.begin().await?;

		for (key, value) in entries {
			sqlx::query(
				"INSERT OR REPLACE INTO storage (block_hash, key, value, is_empty) VALUES (?, ?, ?, ?)",
			)
			.bind(block_hash.as_bytes())
			.bind(*key)
			.bind(value.as_deref())
			.bind(value.is_none())
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await?;
		Ok(())
	}

	/// Persist a block record.
	pub async fn save_block(&self, record: &BlockRecord) -> Result<(), CacheError> {
		sqlx::query(
			"INSERT OR REPLACE INTO blocks (hash, number, parent_hash, header, extrinsics, storage_diff) \
			 VALUES (?, ?, ?, ?, ?, ?)",
		)
		.bind(record.hash.as_bytes())
		.bind(record.number as i64)
		.bind(record.parent_hash.as_bytes())
		.bind(&record.header)
		.bind(record.extrinsics.encode())
		.bind(record.storage_diff.encode())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	/// Get a persisted block record by hash.
	pub async fn get_block(&self, hash: H256) -> Result<Option<BlockRecord>, CacheError> {
		let row = sqlx::query(
			"SELECT hash, number, parent_hash, header, extrinsics, storage_diff FROM blocks WHERE hash = ?",
		)
		.bind(hash.as_bytes())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| Self::decode_block_row(&r)).transpose()
	}

	/// Get a persisted block record by number.
	pub async fn get_block_at(&self, number: u32) -> Result<Option<BlockRecord>, CacheError> {
		let row = sqlx::query(
			"SELECT hash, number, parent_hash, header, extrinsics, storage_diff FROM blocks WHERE number = ?",
		)
		.bind(number as i64)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| Self::decode_block_row(&r)).transpose()
	}

	/// Delete a block record and all storage cached under its hash.
	pub async fn delete_block(&self, hash: H256) -> Result<(), CacheError> {
		// Both deletes succeed or fail together so no orphaned storage rows remain.
		let mut tx = self.pool.begin().await?;

		sqlx::query("DELETE FROM storage WHERE block_hash = ?")
			.bind(hash.as_bytes())
			.execute(&mut *tx)
			.await?;

		sqlx::query("DELETE FROM blocks WHERE hash = ?")
			.bind(hash.as_bytes())
			.execute(&mut *tx)
			.await?;

		tx.commit().await?;
		Ok(())
	}

	/// Get the recorded progress of a prefix scan.
	pub async fn get_prefix_scan_progress(
		&self,
		block_hash: H256,
		prefix: &[u8],
	) -> Result<Option<PrefixScanProgress>, CacheError> {
		let row = sqlx::query(
			"SELECT last_scanned_key, is_complete FROM prefix_scans WHERE block_hash = ? AND prefix = ?",
		)
		.bind(block_hash.as_bytes())
		.bind(prefix)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|r| PrefixScanProgress {
			last_scanned_key: r.get("last_scanned_key"),
			is_complete: r.get("is_complete"),
		}))
	}

	/// Record prefix-scan progress.
	pub async fn update_prefix_scan(
		&self,
		block_hash: H256,
		prefix: &[u8],
		last_scanned_key: &[u8],
		is_complete: bool,
	) -> Result<(), CacheError> {
		sqlx::query(
			"INSERT OR REPLACE INTO prefix_scans (block_hash, prefix, last_scanned_key, is_complete) \
			 VALUES (?, ?, ?, ?)",
		)
		.bind(block_hash.as_bytes())
		.bind(prefix)
		.bind(last_scanned_key)
		.bind(is_complete)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	/// All cached keys under `prefix` at `block_hash`, in sorted order.
	pub async fn get_keys_by_prefix(
		&self,
		block_hash: H256,
		prefix: &[u8],
	) -> Result<Vec<Vec<u8>>, CacheError> {
		let rows = match prefix_upper_bound(prefix) {
			Some(upper) => {
				sqlx::query(
					"SELECT key FROM storage WHERE block_hash = ? AND key >= ? AND key < ? ORDER BY key",
				)
				.bind(block_hash.as_bytes())
				.bind(prefix)
				.bind(upper)
				.fetch_all(&self.pool)
				.await?
			},
			None => {
				sqlx::query(
					"SELECT key FROM storage WHERE block_hash = ? AND key >= ? ORDER BY key",
				)
				.bind(block_hash.as_bytes())
				.bind(prefix)
				.fetch_all(&self.pool)
				.await?
			},
		};

		Ok(rows.into_iter().map(|r| r.get("key")).collect())
	}

	fn decode_block_row(r: &sqlx::sqlite::SqliteRow) -> Result<BlockRecord, CacheError> {
		let hash_bytes: Vec<u8> = r.get("hash");
		let parent_bytes: Vec<u8> = r.get("parent_hash");
		let number: u32 = r
			.get::<i64, _>("number")
			.try_into()
			.map_err(|_| CacheError::DataCorruption("block number out of u32 range".into()))?;

		let extrinsics_bytes: Vec<u8> = r.get("extrinsics");
		let extrinsics = Vec::<Vec<u8>>::decode(&mut extrinsics_bytes.as_slice())
			.map_err(|e| CacheError::DataCorruption(format!("extrinsics column: {e}")))?;

		let diff_bytes: Vec<u8> = r.get("storage_diff");
		let storage_diff = Vec::<(Vec<u8>, Option<Vec<u8>>)>::decode(&mut diff_bytes.as_slice())
			.map_err(|e| CacheError::DataCorruption(format!("storage_diff column: {e}")))?;

		if hash_bytes.len() != 32 || parent_bytes.len() != 32 {
			return Err(CacheError::DataCorruption("hash column is not 32 bytes".into()));
		}

		Ok(BlockRecord {
			hash: H256::from_slice(&hash_bytes),
			number,
			parent_hash: H256::from_slice(&parent_bytes),
			header: r.get("header"),
			extrinsics,
			storage_diff,
		})
	}
}

/// Smallest byte string greater than every key starting with `prefix`, or
/// `None` when no such bound exists (all-0xff prefixes).
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
	let mut bound = prefix.to_vec();
	while let Some(last) = bound.last_mut() {
		if *last < 0xff {
			*last += 1;
			return Some(bound);
		}
		bound.pop();
	}
	None
}

/// SQL to create the cache tables.
///
/// Schema design:
/// - `storage`: storage key-value pairs per block, composite primary key
///   `(block_hash, key)`. The `is_empty` flag distinguishes "cached as empty"
///   from "not cached".
/// - `blocks`: block records (header, extrinsics, flat storage diff).
/// - `prefix_scans`: resumable paging progress per `(block_hash, prefix)`.
///
/// All hashes/keys are BLOBs since they're arbitrary byte sequences. `IF NOT
/// EXISTS` keeps initialization idempotent.
const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS storage (
    block_hash BLOB NOT NULL,
    key BLOB NOT NULL,
    value BLOB,
    is_empty BOOLEAN NOT NULL DEFAULT FALSE,
    PRIMARY KEY (block_hash, key)
);

CREATE INDEX IF NOT EXISTS idx_storage_block ON storage(block_hash);

CREATE TABLE IF NOT EXISTS blocks (
    hash BLOB PRIMARY KEY,
    number INTEGER NOT NULL,
    parent_hash BLOB NOT NULL,
    header BLOB NOT NULL,
    extrinsics BLOB NOT NULL,
    storage_diff BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_blocks_number ON blocks(number);

CREATE TABLE IF NOT EXISTS prefix_scans (
    block_hash BLOB NOT NULL,
    prefix BLOB NOT NULL,
    last_scanned_key BLOB,
    is_complete BOOLEAN NOT NULL DEFAULT FALSE,
    PRIMARY KEY (block_hash, prefix)
);
"#;

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn in_memory_cache_works() {
		let cache = StorageCache::in_memory().await.unwrap();

		let block_hash = H256::from([1u8; 32]);
		let key = b"test_key";
		let value = b"test_value";

		// Initially not cached
		assert!(cache.get_storage(block_hash, key).await.unwrap().is_none());

		cache.set_storage(block_hash, key, Some(value)).await.unwrap();

		let cached = cache.get_storage(block_hash, key).await.unwrap();
		assert_eq!(cached, Some(Some(value.to_vec())));
	}

	#[tokio::test]
	async fn cache_empty_value() {
		let cache = StorageCache::in_memory().await.unwrap();

		let block_hash = H256::from([2u8; 32]);
		let key = b"empty_key";

		// Set as empty (key exists but no value)
		cache.set_storage(block_hash, key, None).await.unwrap();

		let cached = cache.get_storage(block_hash, key).await.unwrap();
		assert_eq!(cached, Some(None));
	}

	#[tokio::test]
	async fn batch_operations() {
		let cache = StorageCache::in_memory().await.unwrap();

		let block_hash = H256::from([3u8; 32]);
		let entries: Vec<(&[u8], Option<&[u8]>)> = vec![
			(b"key1", Some(b"value1")),
			(b"key2", Some(b"value2")),
			(b"key3", None), // empty
		];

		cache.set_storage_batch(block_hash, &entries).await.unwrap();

		let keys: Vec<&[u8]> = vec![b"key1", b"key2", b"key3", b"key4"];
		let results = cache.get_storage_batch(block_hash, &keys).await.unwrap();

		assert_eq!(results.len(), 4);
		assert_eq!(results[0], Some(Some(b"value1".to_vec())));
		assert_eq!(results[1], Some(Some(b"value2".to_vec())));
		assert_eq!(results[2], Some(None)); // empty
		assert_eq!(results[3], None); // not cached
	}

	#[tokio::test]
	async fn block_record_roundtrip() {
		let cache = StorageCache::in_memory().await.unwrap();

		let record = BlockRecord {
			hash: H256::from([4u8; 32]),
			number: 100,
			parent_hash: H256::from([3u8; 32]),
			header: b"mock_header_data".to_vec(),
			extrinsics: vec![vec![1, 2, 3], vec![4, 5]],
			storage_diff: vec![(b"k".to_vec(), Some(b"v".to_vec())), (b"gone".to_vec(), None)],
		};

		cache.save_block(&record).await.unwrap();

		let loaded = cache.get_block(record.hash).await.unwrap().unwrap();
		assert_eq!(loaded.hash, record.hash);
		assert_eq!(loaded.number, 100);
		assert_eq!(loaded.parent_hash, record.parent_hash);
		assert_eq!(loaded.header, record.header);
		assert_eq!(loaded.extrinsics, record.extrinsics);
		assert_eq!(loaded.storage_diff, record.storage_diff);

		let by_number = cache.get_block_at(100).await.unwrap().unwrap();
		assert_eq!(by_number.hash, record.hash);
	}

	#[tokio::test]
	async fn different_blocks_have_separate_storage() {
		let cache = StorageCache::in_memory().await.unwrap();

		let block1 = H256::from([5u8; 32]);
		let block2 = H256::from([6u8; 32]);
		let key = b"same_key";

		cache.set_storage(block1, key, Some(b"value1")).await.unwrap();
		cache.set_storage(block2, key, Some(b"value2")).await.unwrap();

		assert_eq!(cache.get_storage(block1, key).await.unwrap(), Some(Some(b"value1".to_vec())));
		assert_eq!(cache.get_storage(block2, key).await.unwrap(), Some(Some(b"value2".to_vec())));
	}

	#[tokio::test]
	async fn delete_block_removes_data() {
		let cache = StorageCache::in_memory().await.unwrap();

		let record = BlockRecord {
			hash: H256::from([7u8; 32]),
			number: 50,
			parent_hash: H256::from([6u8; 32]),
			header: b"header".to_vec(),
			extrinsics: vec![],
			storage_diff: vec![],
		};

		cache.set_storage(record.hash, b"test_key", Some(b"value")).await.unwrap();
		cache.save_block(&record).await.unwrap();

		assert!(cache.get_storage(record.hash, b"test_key").await.unwrap().is_some());
		assert!(cache.get_block(record.hash).await.unwrap().is_some());

		cache.delete_block(record.hash).await.unwrap();

		assert!(cache.get_storage(record.hash, b"test_key").await.unwrap().is_none());
		assert!(cache.get_block(record.hash).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn prefix_scan_progress_roundtrip() {
		let cache = StorageCache::in_memory().await.unwrap();

		let block_hash = H256::from([8u8; 32]);
		let prefix = b"prefix";

		assert!(cache.get_prefix_scan_progress(block_hash, prefix).await.unwrap().is_none());

		cache.update_prefix_scan(block_hash, prefix, b"prefix_key_5", false).await.unwrap();

		let progress = cache.get_prefix_scan_progress(block_hash, prefix).await.unwrap().unwrap();
		assert_eq!(progress.last_scanned_key, Some(b"prefix_key_5".to_vec()));
		assert!(!progress.is_complete);

		cache.update_prefix_scan(block_hash, prefix, b"prefix_key_9", true).await.unwrap();

		let progress = cache.get_prefix_scan_progress(block_hash, prefix).await.unwrap().unwrap();
		assert!(progress.is_complete);
	}

	#[test]
	fn prefix_upper_bound_increments_last_byte() {
		assert_eq!(prefix_upper_bound(b"ab"), Some(b"ac".to_vec()));
		assert_eq!(prefix_upper_bound(&[0x11, 0xff]), Some(vec![0x12]));
		assert_eq!(prefix_upper_bound(&[0xff, 0xff]), None);
	}

	#[tokio::test]
	async fn keys_by_prefix_returns_sorted_range() {
		let cache = StorageCache::in_memory().await.unwrap();
		let block_hash = H256::from([10u8; 32]);

		cache.set_storage(block_hash, b"aa_2", Some(b"v")).await.unwrap();
		cache.set_storage(block_hash, b"aa_1", Some(b"v")).await.unwrap();
		cache.set_storage(block_hash, b"ab_1", Some(b"v")).await.unwrap();
		cache.set_storage(block_hash, b"aa_3", None).await.unwrap();

		let keys = cache.get_keys_by_prefix(block_hash, b"aa").await.unwrap();
		assert_eq!(keys, vec![b"aa_1".to_vec(), b"aa_2".to_vec(), b"aa_3".to_vec()]);
	}

	#[tokio::test]
	async fn file_persistence() {
		let temp_dir = tempfile::tempdir().unwrap();
		let db_path = temp_dir.path().join("test_cache.db");

		let block_hash = H256::from([9u8; 32]);
		let key = b"persistent_key";
		let value = b"persistent_value";

		// Write and close
		{
			let cache = StorageCache::open_at(&db_path).await.unwrap();
			cache.set_storage(block_hash, key, Some(value)).await.unwrap();
		}

		// Reopen and verify
		{
			let cache = StorageCache::open_at(&db_path).await.unwrap();
			let cached = cache.get_storage(block_hash, key).await.unwrap();
			assert_eq!(cached, Some(Some(value.to_vec())));
		}
	}
}
