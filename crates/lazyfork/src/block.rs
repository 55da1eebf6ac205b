// SPDX-License-Identifier: GPL-3.0

//! Block structure for forked blockchain state.
//!
//! A [`Block`] identifies one block by `(number, hash)` and owns everything
//! needed to read and speculate on its state: a frozen storage base, a stack of
//! transient overlay layers used during block construction, and a lazily
//! resolved runtime bundle (WASM code, decoded metadata, executor).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Block                                 │
//! │                                                                 │
//! │   ┌──────────────────────────────────────────────────────────┐  │
//! │   │ Identity: number, hash; lazy header, extrinsics, runtime │  │
//! │   └──────────────────────────────────────────────────────────┘  │
//! │                              │                                  │
//! │                              ▼                                  │
//! │   ┌──────────────────────────────────────────────────────────┐  │
//! │   │ Transient overlays (one per execution phase)             │  │
//! │   │        over the frozen base of this block                │  │
//! │   └──────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Blocks are immutable apart from the transient overlay stack, which only the
//! block builder touches, one build at a time. A sealed block's storage diff is
//! frozen behind [`StorageLayerProvider::Shared`] so children can stack on it.

use crate::{
	ExecutorConfig, ForkRpcClient, RuntimeCallResult, RuntimeExecutor, StorageCache,
	error::{BlockError, StorageError},
	executor::RuntimeStorage,
	storage::{
		RemoteStorageLayer, SharedValue, SnapshotStorage, StorageLayer, StorageLayerProvider,
		StorageValue,
	},
	strings::builder::runtime_api,
};
use async_trait::async_trait;
use scale::Decode;
use std::sync::Arc;
use subxt::{Metadata, config::substrate::H256, ext::codec::Encode};
use tokio::sync::{OnceCell, RwLock};

/// Handy type to allow specifying both number and hash as the fork point.
pub enum BlockForkPoint {
	Number(u32),
	Hash(H256),
}

impl From<u32> for BlockForkPoint {
	fn from(number: u32) -> Self {
		Self::Number(number)
	}
}

impl From<H256> for BlockForkPoint {
	fn from(hash: H256) -> Self {
		Self::Hash(hash)
	}
}

/// The runtime of a block: WASM code, decoded metadata, and a ready executor.
///
/// Shared between a block and its children until a block's diff overrides the
/// `:code` well-known key, which resets the bundle for re-derivation.
pub struct RuntimeBundle {
	/// The runtime WASM blob.
	pub code: Arc<[u8]>,
	/// Decoded runtime metadata.
	pub metadata: Metadata,
	/// Executor instantiated over `code`.
	pub executor: RuntimeExecutor,
}

/// Transient storage state of a block: the live chain top plus how many
/// speculative overlays are currently stacked on the frozen base.
struct BlockStorage {
	top: StorageLayerProvider,
	pushed: usize,
}

/// A block in a forked blockchain.
///
/// Created either bare (by hash/number, resolving header, extrinsics and
/// runtime lazily from the remote chain), as a fork point (eager header), or
/// fully materialized by the block builder with header, extrinsics and storage
/// diff supplied up front. Destroyed only by eviction from the blockchain's
/// bounded registry.
pub struct Block {
	/// The block number (height).
	number: u32,
	/// The block hash.
	hash: H256,
	/// The parent block hash; derived from the header when not known up front.
	parent_hash: OnceCell<H256>,
	/// The SCALE-encoded block header; fetched from the remote when absent.
	header: OnceCell<Vec<u8>>,
	/// The block's extrinsics; fetched from the remote when absent.
	extrinsics: OnceCell<Vec<Vec<u8>>>,
	/// Frozen storage base representing this block's state.
	base: Arc<StorageLayerProvider>,
	/// Transient overlay stack used during block construction and dry runs.
	storage: RwLock<BlockStorage>,
	/// Runtime bundle; inherited from the parent unless `:code` was overridden.
	runtime: OnceCell<Arc<RuntimeBundle>>,
	/// RPC client for lazy remote resolution, when the fork has one.
	rpc: Option<ForkRpcClient>,
	/// Executor configuration used for runtime calls on this block.
	executor_config: ExecutorConfig,
	/// Flat diff this block was sealed with, relative to its parent.
	///
	/// `None` for fork-point and remotely resolved blocks, whose diff against
	/// the parent is unknown.
	sealed_diff: Option<Vec<(Vec<u8>, Option<Vec<u8>>)>>,
}

impl Block {
	/// Create a block at a fork point of a live chain.
	///
	/// Fetches the header from the remote chain (resolving a number to a hash
	/// when needed) and binds a remote storage leaf to the block's hash.
	pub async fn fork_point(
		rpc: ForkRpcClient,
		cache: Option<StorageCache>,
		fork_point: BlockForkPoint,
		executor_config: ExecutorConfig,
	) -> Result<Self, BlockError> {
		let (hash, header) = match fork_point {
			BlockForkPoint::Number(number) => {
				let block = rpc
					.block_by_number(number)
					.await?
					.ok_or(BlockError::BlockNumberNotFound(number))?;
				(block.hash, block.header)
			},
			BlockForkPoint::Hash(hash) => (
				hash,
				rpc.header(hash).await.map_err(|_| BlockError::BlockHashNotFound(hash))?,
			),
		};

		let number = header.number;
		let parent_hash = header.parent_hash;
		let base = Arc::new(StorageLayerProvider::Remote(RemoteStorageLayer::new(
			rpc.clone(),
			cache,
			hash,
		)));

		Ok(Self {
			number,
			hash,
			parent_hash: OnceCell::new_with(Some(parent_hash)),
			header: OnceCell::new_with(Some(header.encode())),
			extrinsics: OnceCell::new(),
			storage: RwLock::new(BlockStorage {
				top: StorageLayerProvider::Shared(base.clone()),
				pushed: 0,
			}),
			base,
			runtime: OnceCell::new(),
			rpc: Some(rpc),
			executor_config,
			sealed_diff: None,
		})
	}

	/// Create a bare block known only by number and hash.
	///
	/// Everything else resolves lazily from the remote chain on demand.
	pub(crate) fn bare(
		number: u32,
		hash: H256,
		rpc: ForkRpcClient,
		cache: Option<StorageCache>,
		executor_config: ExecutorConfig,
	) -> Self {
		let base = Arc::new(StorageLayerProvider::Remote(RemoteStorageLayer::new(
			rpc.clone(),
			cache,
			hash,
		)));
		Self {
			number,
			hash,
			parent_hash: OnceCell::new(),
			header: OnceCell::new(),
			extrinsics: OnceCell::new(),
			storage: RwLock::new(BlockStorage {
				top: StorageLayerProvider::Shared(base.clone()),
				pushed: 0,
			}),
			base,
			runtime: OnceCell::new(),
			rpc: Some(rpc),
			executor_config,
			sealed_diff: None,
		}
	}

	/// Create a block over an in-memory snapshot, with no remote endpoint.
	///
	/// Used for offline forks and dry runs against exported state.
	pub fn from_snapshot(
		number: u32,
		hash: H256,
		snapshot: SnapshotStorage,
		executor_config: ExecutorConfig,
	) -> Self {
		let base = Arc::new(StorageLayerProvider::Snapshot(snapshot));
		Self {
			number,
			hash,
			parent_hash: OnceCell::new_with(Some(H256::zero())),
			header: OnceCell::new_with(Some(Vec::new())),
			extrinsics: OnceCell::new_with(Some(Vec::new())),
			storage: RwLock::new(BlockStorage {
				top: StorageLayerProvider::Shared(base.clone()),
				pushed: 0,
			}),
			base,
			runtime: OnceCell::new(),
			rpc: None,
			executor_config,
			sealed_diff: None,
		}
	}

	/// Create a fully materialized block from a sealed build.
	///
	/// The diff becomes a frozen overlay over the parent's base; the runtime
	/// bundle is inherited unless the diff overrode the runtime code, in which
	/// case it is left unset for lazy re-derivation.
	pub(crate) fn sealed(
		number: u32,
		hash: H256,
		header: Vec<u8>,
		extrinsics: Vec<Vec<u8>>,
		diff: Vec<(Vec<u8>, StorageValue)>,
		parent: &Block,
		inherited_runtime: Option<Arc<RuntimeBundle>>,
	) -> Self {
		let flat = flatten_diff(diff.clone());

		let mut diff_layer =
			StorageLayer::new(StorageLayerProvider::Shared(parent.base.clone()));
		diff_layer.set_all(diff.into_iter().map(|(k, v)| (k, Some(v))));

		let base = Arc::new(StorageLayerProvider::Overlay(Box::new(diff_layer)));
		let parent_hash = parent.hash;

		Self {
			number,
			hash,
			parent_hash: OnceCell::new_with(Some(parent_hash)),
			header: OnceCell::new_with(Some(header)),
			extrinsics: OnceCell::new_with(Some(extrinsics)),
			storage: RwLock::new(BlockStorage {
				top: StorageLayerProvider::Shared(base.clone()),
				pushed: 0,
			}),
			base,
			runtime: OnceCell::new_with(inherited_runtime),
			rpc: parent.rpc.clone(),
			executor_config: parent.executor_config.clone(),
			sealed_diff: Some(flat),
		}
	}

	/// Create a materialized block from explicit parts, stacking `diff` over
	/// the parent's state.
	///
	/// The runtime bundle is not inherited; it re-derives lazily from the
	/// block's own state. Useful for assembling chains over snapshot state.
	pub fn materialized(
		number: u32,
		hash: H256,
		header: Vec<u8>,
		extrinsics: Vec<Vec<u8>>,
		diff: Vec<(Vec<u8>, StorageValue)>,
		parent: &Block,
	) -> Self {
		Self::sealed(number, hash, header, extrinsics, diff, parent, None)
	}

	/// Recreate a block from a persisted record, stacking its diff over an
	/// already-resolved parent.
	pub(crate) fn from_record(
		number: u32,
		hash: H256,
		header: Vec<u8>,
		extrinsics: Vec<Vec<u8>>,
		flat_diff: Vec<(Vec<u8>, Option<Vec<u8>>)>,
		parent: &Block,
	) -> Self {
		let diff = flat_diff
			.iter()
			.cloned()
			.map(|(k, v)| {
				let value = match v {
					Some(bytes) => StorageValue::value(bytes),
					None => StorageValue::Deleted,
				};
				(k, value)
			})
			.collect();
		let mut block = Self::sealed(number, hash, header, extrinsics, diff, parent, None);
		block.sealed_diff = Some(flat_diff);
		block
	}

	/// Create a block for a remotely resolved hash with header and extrinsics
	/// already known.
	pub(crate) fn from_remote_parts(
		number: u32,
		hash: H256,
		header: Vec<u8>,
		extrinsics: Vec<Vec<u8>>,
		rpc: ForkRpcClient,
		cache: Option<StorageCache>,
		executor_config: ExecutorConfig,
	) -> Self {
		let mut block = Self::bare(number, hash, rpc, cache, executor_config);
		block.header = OnceCell::new_with(Some(header));
		block.extrinsics = OnceCell::new_with(Some(extrinsics));
		block
	}

	/// The flat diff this block was sealed with, when known.
	pub fn sealed_diff(&self) -> Option<&[(Vec<u8>, Option<Vec<u8>>)]> {
		self.sealed_diff.as_deref()
	}

	/// The block number.
	pub fn number(&self) -> u32 {
		self.number
	}

	/// The block hash.
	pub fn hash(&self) -> H256 {
		self.hash
	}

	/// The executor configuration of this block.
	pub fn executor_config(&self) -> &ExecutorConfig {
		&self.executor_config
	}

	/// The parent block hash, decoding the header if necessary.
	pub async fn parent_hash(&self) -> Result<H256, BlockError> {
		self.parent_hash
			.get_or_try_init(|| async {
				let header = self.header().await?;
				if header.len() < 32 {
					return Err(BlockError::MetadataDecode(
						"header too short for a parent hash".into(),
					));
				}
				Ok(H256::from_slice(&header[..32]))
			})
			.await
			.copied()
	}

	/// The SCALE-encoded header, fetched from the remote chain if necessary.
	pub async fn header(&self) -> Result<&Vec<u8>, BlockError> {
		self.header
			.get_or_try_init(|| async {
				let rpc = self.rpc.as_ref().ok_or(BlockError::NoRemote("header"))?;
				let header =
					rpc.header(self.hash).await.map_err(|_| BlockError::BlockHashNotFound(self.hash))?;
				Ok(header.encode())
			})
			.await
	}

	/// The block's extrinsics, fetched from the remote chain if necessary.
	pub async fn extrinsics(&self) -> Result<&Vec<Vec<u8>>, BlockError> {
		self.extrinsics
			.get_or_try_init(|| async {
				let rpc = self.rpc.as_ref().ok_or(BlockError::NoRemote("extrinsics"))?;
				let block = rpc
					.block_by_hash(self.hash)
					.await?
					.ok_or(BlockError::BlockHashNotFound(self.hash))?;
				Ok(block.extrinsics)
			})
			.await
	}

	/// Read a storage value through the active layer stack.
	///
	/// Tombstoned keys read as absent.
	pub async fn get(&self, key: &[u8]) -> Result<Option<SharedValue>, BlockError> {
		let storage = self.storage.read().await;
		Ok(storage.top.get(key, true).await?)
	}

	/// Keys under `prefix`, strictly greater than `start_key`, merged across
	/// the whole layer stack in sorted order.
	pub async fn keys_paged(
		&self,
		prefix: &[u8],
		page_size: u32,
		start_key: &[u8],
	) -> Result<Vec<Vec<u8>>, BlockError> {
		let storage = self.storage.read().await;
		Ok(storage.top.keys_paged(prefix, page_size, start_key).await?)
	}

	/// The first key under `prefix` strictly greater than `key`.
	pub async fn next_storage_key(
		&self,
		prefix: &[u8],
		key: &[u8],
	) -> Result<Option<Vec<u8>>, BlockError> {
		Ok(self.keys_paged(prefix, 1, key).await?.into_iter().next())
	}

	/// Push a fresh transient overlay onto the stack.
	///
	/// One layer is pushed per execution phase: initialize, each inherent, each
	/// extrinsic, finalize.
	pub async fn push_storage_layer(&self) {
		let mut storage = self.storage.write().await;
		let parent = std::mem::replace(
			&mut storage.top,
			StorageLayerProvider::Shared(self.base.clone()),
		);
		storage.top = StorageLayerProvider::Overlay(Box::new(StorageLayer::new(parent)));
		storage.pushed += 1;
	}

	/// Pop and discard the topmost transient overlay.
	pub async fn pop_storage_layer(&self) -> Result<(), BlockError> {
		let mut storage = self.storage.write().await;
		if storage.pushed == 0 {
			return Err(BlockError::NoTransientLayer);
		}
		let top = std::mem::replace(
			&mut storage.top,
			StorageLayerProvider::Shared(self.base.clone()),
		);
		match top {
			StorageLayerProvider::Overlay(layer) => {
				storage.top = layer.into_parent();
				storage.pushed -= 1;
				Ok(())
			},
			// pushed > 0 guarantees the top is an overlay
			other => {
				storage.top = other;
				Err(BlockError::NoTransientLayer)
			},
		}
	}

	/// Apply entries to the topmost transient overlay.
	pub async fn set_storage(
		&self,
		entries: impl IntoIterator<Item = (Vec<u8>, Option<StorageValue>)>,
	) -> Result<(), BlockError> {
		let mut storage = self.storage.write().await;
		if storage.pushed == 0 {
			return Err(BlockError::NoTransientLayer);
		}
		match &mut storage.top {
			StorageLayerProvider::Overlay(layer) => {
				layer.set_all(entries);
				Ok(())
			},
			_ => Err(BlockError::NoTransientLayer),
		}
	}

	/// Number of transient overlays currently pushed.
	pub async fn pushed_layers(&self) -> usize {
		self.storage.read().await.pushed
	}

	/// Fold every pushed-and-not-yet-merged overlay into a flat diff
	/// representing the stack's total effect relative to this block's base.
	pub async fn storage_diff(&self) -> Result<Vec<(Vec<u8>, StorageValue)>, BlockError> {
		let storage = self.storage.read().await;

		let mut layers: Vec<&StorageLayer> = Vec::with_capacity(storage.pushed);
		let mut current = &storage.top;
		for _ in 0..storage.pushed {
			match current {
				StorageLayerProvider::Overlay(layer) => {
					layers.push(layer.as_ref());
					current = layer.parent();
				},
				_ => break,
			}
		}

		let mut scratch = StorageLayer::new(StorageLayerProvider::empty());
		for layer in layers.into_iter().rev() {
			layer.replay_into(&mut scratch);
		}
		Ok(scratch.diff())
	}

	/// The stack's total effect as flat `(key, value-or-deleted)` pairs.
	///
	/// Prefix tombstones are dropped from this view; keys they tombstoned at
	/// mutation time are already present as deletions.
	pub async fn flat_storage_diff(
		&self,
	) -> Result<Vec<(Vec<u8>, Option<Vec<u8>>)>, BlockError> {
		Ok(flatten_diff(self.storage_diff().await?))
	}

	/// The runtime bundle of this block, deriving it from storage on first use.
	pub async fn runtime(&self) -> Result<&Arc<RuntimeBundle>, BlockError> {
		self.runtime
			.get_or_try_init(|| async {
				let code = self
					.get(sp_core::storage::well_known_keys::CODE)
					.await?
					.ok_or(BlockError::RuntimeCodeNotFound)?;
				let code: Arc<[u8]> = Arc::from(code.as_ref().clone());

				let executor = RuntimeExecutor::with_config(
					code.clone(),
					None,
					self.executor_config.clone(),
				)?;

				let result = executor.call(runtime_api::METADATA_METADATA, &[], self).await?;
				let opaque: Vec<u8> = Decode::decode(&mut result.output.as_slice())
					.map_err(|e| BlockError::MetadataDecode(e.to_string()))?;
				let metadata = Metadata::decode(&mut opaque.as_slice())
					.map_err(|e| BlockError::MetadataDecode(e.to_string()))?;

				Ok(Arc::new(RuntimeBundle { code, metadata, executor }))
			})
			.await
	}

	/// The decoded runtime metadata of this block.
	pub async fn metadata(&self) -> Result<Metadata, BlockError> {
		Ok(self.runtime().await?.metadata.clone())
	}

	/// Execute a runtime entry point against this block's state.
	///
	/// The single boundary to the WASM execution service: supplies the current
	/// runtime code, the requested entry point and arguments, and this block as
	/// the storage-access capability. A structured runtime error surfaces as a
	/// typed failure; this method does not recover a call that never resolves.
	pub async fn call(
		&self,
		method: &str,
		args: &[u8],
	) -> Result<RuntimeCallResult, BlockError> {
		let runtime = self.runtime().await?;
		Ok(runtime.executor.call(method, args, self).await?)
	}
}

#[async_trait]
impl RuntimeStorage for Block {
	async fn storage(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
		match self.get(key).await {
			Ok(value) => Ok(value.map(|v| v.as_ref().clone())),
			Err(BlockError::Storage(e)) => Err(e),
			Err(e) => Err(StorageError::Lock(e.to_string())),
		}
	}

	async fn next_key(
		&self,
		prefix: &[u8],
		key: &[u8],
	) -> Result<Option<Vec<u8>>, StorageError> {
		match self.next_storage_key(prefix, key).await {
			Ok(value) => Ok(value),
			Err(BlockError::Storage(e)) => Err(e),
			Err(e) => Err(StorageError::Lock(e.to_string())),
		}
	}
}

/// Drop prefix tombstones and unwrap values from a layered diff.
pub(crate) fn flatten_diff(
	diff: Vec<(Vec<u8>, StorageValue)>,
) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
	diff.into_iter()
		.filter_map(|(key, value)| match value {
			StorageValue::Value(bytes) => Some((key, Some(bytes.as_ref().clone()))),
			StorageValue::Deleted => Some((key, None)),
			StorageValue::DeletedPrefix => None,
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn snapshot_block(entries: &[(&[u8], &[u8])]) -> Block {
		let snapshot: SnapshotStorage =
			entries.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
		Block::from_snapshot(1, H256::from([1u8; 32]), snapshot, ExecutorConfig::default())
	}

	#[test]
	fn from_u32_creates_number_variant() {
		let fork_point: BlockForkPoint = 42u32.into();
		assert!(matches!(fork_point, BlockForkPoint::Number(42)));
	}

	#[test]
	fn from_h256_creates_hash_variant() {
		let hash = H256::from([0xab; 32]);
		let fork_point: BlockForkPoint = hash.into();
		assert!(matches!(fork_point, BlockForkPoint::Hash(h) if h == hash));
	}

	#[tokio::test]
	async fn get_reads_through_the_base() {
		let block = snapshot_block(&[(b"key", b"value")]);

		assert_eq!(block.get(b"key").await.unwrap().unwrap().as_ref(), b"value");
		assert!(block.get(b"missing").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn pushed_layers_shadow_the_base_until_popped() {
		let block = snapshot_block(&[(b"key", b"base")]);

		block.push_storage_layer().await;
		block
			.set_storage(vec![(b"key".to_vec(), Some(StorageValue::value(b"layered".to_vec())))])
			.await
			.unwrap();

		assert_eq!(block.get(b"key").await.unwrap().unwrap().as_ref(), b"layered");
		assert_eq!(block.pushed_layers().await, 1);

		block.pop_storage_layer().await.unwrap();
		assert_eq!(block.get(b"key").await.unwrap().unwrap().as_ref(), b"base");
		assert_eq!(block.pushed_layers().await, 0);
	}

	#[tokio::test]
	async fn pop_without_push_fails() {
		let block = snapshot_block(&[]);
		assert!(matches!(
			block.pop_storage_layer().await,
			Err(BlockError::NoTransientLayer)
		));
	}

	#[tokio::test]
	async fn set_storage_without_layer_fails() {
		let block = snapshot_block(&[]);
		let result = block
			.set_storage(vec![(b"k".to_vec(), Some(StorageValue::value(b"v".to_vec())))])
			.await;
		assert!(matches!(result, Err(BlockError::NoTransientLayer)));
	}

	#[tokio::test]
	async fn storage_diff_folds_pushed_layers_with_upper_winning() {
		let block = snapshot_block(&[(b"a", b"base")]);

		block.push_storage_layer().await;
		block
			.set_storage(vec![
				(b"a".to_vec(), Some(StorageValue::value(b"first".to_vec()))),
				(b"b".to_vec(), Some(StorageValue::value(b"b1".to_vec()))),
			])
			.await
			.unwrap();

		block.push_storage_layer().await;
		block
			.set_storage(vec![
				(b"a".to_vec(), Some(StorageValue::value(b"second".to_vec()))),
				(b"c".to_vec(), Some(StorageValue::Deleted)),
			])
			.await
			.unwrap();

		let diff = block.storage_diff().await.unwrap();
		assert_eq!(
			diff,
			vec![
				(b"a".to_vec(), StorageValue::value(b"second".to_vec())),
				(b"b".to_vec(), StorageValue::value(b"b1".to_vec())),
				(b"c".to_vec(), StorageValue::Deleted),
			]
		);

		let flat = block.flat_storage_diff().await.unwrap();
		assert_eq!(
			flat,
			vec![
				(b"a".to_vec(), Some(b"second".to_vec())),
				(b"b".to_vec(), Some(b"b1".to_vec())),
				(b"c".to_vec(), None),
			]
		);
	}

	#[tokio::test]
	async fn sealed_block_reads_diff_over_parent_base() {
		let parent = snapshot_block(&[(b"a", b"parent_a"), (b"b", b"parent_b")]);

		let child = Block::sealed(
			parent.number() + 1,
			H256::from([2u8; 32]),
			vec![9, 9, 9],
			vec![],
			vec![
				(b"a".to_vec(), StorageValue::value(b"child_a".to_vec())),
				(b"b".to_vec(), StorageValue::Deleted),
			],
			&parent,
			None,
		);

		assert_eq!(child.number(), 2);
		assert_eq!(child.parent_hash().await.unwrap(), parent.hash());
		assert_eq!(child.get(b"a").await.unwrap().unwrap().as_ref(), b"child_a");
		assert!(child.get(b"b").await.unwrap().is_none());

		// The parent is unaffected.
		assert_eq!(parent.get(b"a").await.unwrap().unwrap().as_ref(), b"parent_a");
		assert_eq!(parent.get(b"b").await.unwrap().unwrap().as_ref(), b"parent_b");
	}

	#[tokio::test]
	async fn bare_block_without_remote_cannot_resolve_header() {
		let block = Block {
			number: 5,
			hash: H256::from([5u8; 32]),
			parent_hash: OnceCell::new(),
			header: OnceCell::new(),
			extrinsics: OnceCell::new(),
			base: Arc::new(StorageLayerProvider::empty()),
			storage: RwLock::new(BlockStorage {
				top: StorageLayerProvider::empty(),
				pushed: 0,
			}),
			runtime: OnceCell::new(),
			rpc: None,
			executor_config: ExecutorConfig::default(),
			sealed_diff: None,
		};

		assert!(matches!(block.header().await, Err(BlockError::NoRemote("header"))));
	}
}
