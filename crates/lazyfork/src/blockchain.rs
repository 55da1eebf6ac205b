// SPDX-License-Identifier: GPL-3.0

//! Blockchain registry for forked chains.
//!
//! [`Blockchain`] is the top-level entry point: it creates the fork, owns the
//! current head, keeps a bounded in-memory registry of blocks (backed by the
//! optional persistent store and the remote chain), and notifies head/storage
//! subscribers when a new block is adopted.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Blockchain                               │
//! │                                                                 │
//! │   fork() ──────► Connect to live chain                          │
//! │                        │                                        │
//! │                        ▼                                        │
//! │              Create fork point Block                            │
//! │                        │                                        │
//! │                        ▼                                        │
//! │              Detect chain type (relay/para)                     │
//! │                        │                                        │
//! │                        ▼                                        │
//! │              Ready for block building                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Block resolution order is memory → persistent store → remote chain, with
//! concurrent loads of the same hash deduplicated to a single in-flight fetch.

use crate::{
	Block, BlockForkPoint, ExecutorConfig, ForkRpcClient, StorageCache,
	builder::{
		ApplyExtrinsicResult, BlockBuilder, DryRunResult, DryRunTarget, dry_run_extrinsic,
		dry_run_inherents,
	},
	error::{BlockError, BlockchainError},
	executor::RuntimeVersion,
	head_state::{HeadEvent, HeadState},
	inherent::{InherentProvider, default_providers},
	strings::txpool::{runtime_api, transaction_source},
	txpool::{
		BuildBlockParams, TransactionValidity, TransactionValidityError, UnknownTransaction,
		ValidTransaction,
	},
};
use scale::Decode;
use std::{
	collections::{HashMap, VecDeque},
	path::Path,
	sync::{Arc, Mutex},
};
use subxt::config::substrate::H256;
use tokio::sync::{OnceCell, RwLock};
use url::Url;

/// Maximum number of blocks kept in the in-memory registry.
///
/// Past this, the oldest-inserted entry is evicted (never the head); evicted
/// blocks remain reachable through the persistent store or the remote chain.
const MAX_CACHED_BLOCKS: usize = 500;

/// Type of chain being forked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainType {
	/// A relay chain (Polkadot, Kusama, etc.).
	RelayChain,
	/// A parachain with a specific para ID.
	Parachain {
		/// The parachain ID.
		para_id: u32,
	},
}

/// An extrinsic dropped during block building.
#[derive(Debug, Clone)]
pub struct FailedExtrinsic {
	/// The raw extrinsic bytes.
	pub extrinsic: Vec<u8>,
	/// Why the runtime rejected it.
	pub reason: String,
}

/// Result of building one block.
#[derive(Clone)]
pub struct BuildBlockResult {
	/// The newly built block, already adopted as head.
	pub block: Arc<Block>,
	/// Extrinsics included in the block.
	pub included: Vec<Vec<u8>>,
	/// Extrinsics rejected with validity errors (dropped, not retried).
	pub failed: Vec<FailedExtrinsic>,
	/// Extrinsics whose execution faulted (candidates for retry).
	pub retry: Vec<Vec<u8>>,
}

/// Bounded registry of blocks, indexed by hash and number.
///
/// Eviction is insertion-ordered: once the capacity is exceeded the oldest
/// registered entry goes first, skipping the current head.
struct BlockRegistry {
	by_hash: HashMap<H256, Arc<Block>>,
	by_number: HashMap<u32, Arc<Block>>,
	insertion: VecDeque<H256>,
	capacity: usize,
}

impl BlockRegistry {
	fn new(capacity: usize) -> Self {
		Self {
			by_hash: HashMap::new(),
			by_number: HashMap::new(),
			insertion: VecDeque::new(),
			capacity,
		}
	}

	fn get(&self, hash: H256) -> Option<Arc<Block>> {
		self.by_hash.get(&hash).cloned()
	}

	fn get_at(&self, number: u32) -> Option<Arc<Block>> {
		self.by_number.get(&number).cloned()
	}

	fn insert(&mut self, block: Arc<Block>, head_hash: H256) {
		let hash = block.hash();
		if self.by_hash.insert(hash, block.clone()).is_none() {
			self.insertion.push_back(hash);
		}
		self.by_number.insert(block.number(), block);

		while self.insertion.len() > self.capacity {
			let Some(candidate) = self.insertion.pop_front() else { break };
			if candidate == head_hash {
				// The head is never evicted; it cycles to the back and the
				// next-oldest entry goes instead.
				self.insertion.push_back(candidate);
				if self.insertion.len() <= 1 {
					break;
				}
				continue;
			}
			self.remove(candidate);
		}
	}

	fn remove(&mut self, hash: H256) -> Option<Arc<Block>> {
		let block = self.by_hash.remove(&hash)?;
		if self.by_number.get(&block.number()).map(|b| b.hash()) == Some(hash) {
			self.by_number.remove(&block.number());
		}
		self.insertion.retain(|h| *h != hash);
		Some(block)
	}

	fn len(&self) -> usize {
		self.by_hash.len()
	}
}

/// The blockchain manager for one forked chain.
///
/// `Blockchain` is `Send + Sync`; reads may interleave freely, while the
/// single-writer discipline for block building is enforced by the transaction
/// pool's build queue on top of an optimistic parent check here.
pub struct Blockchain {
	/// RPC client connected to the source chain.
	rpc: ForkRpcClient,
	/// Persistent store for fetched state and locally built blocks.
	cache: Option<StorageCache>,
	/// Current head block.
	head: RwLock<Arc<Block>>,
	/// Bounded in-memory block registry.
	registry: Mutex<BlockRegistry>,
	/// In-flight remote loads, one cell per hash, deduplicating concurrent
	/// requests for a block that is not yet registered.
	loading: Mutex<HashMap<H256, Arc<OnceCell<Option<Arc<Block>>>>>>,
	/// Head and storage subscription hub.
	head_state: HeadState,
	/// Inherent providers for block building, in application order.
	inherent_providers: Vec<Box<dyn InherentProvider>>,
	/// Chain name reported by the source node.
	chain_name: String,
	/// Relay chain or parachain.
	chain_type: ChainType,
	/// Fork point block hash.
	fork_point_hash: H256,
	/// Fork point block number.
	fork_point_number: u32,
	/// Executor configuration for runtime calls.
	executor_config: ExecutorConfig,
}

impl Blockchain {
	/// Fork a live chain at its latest finalized block.
	///
	/// # Arguments
	///
	/// * `endpoint` - RPC endpoint URL of the live chain
	/// * `cache_path` - Optional path for the persistent SQLite cache; an
	///   in-memory cache is used when absent.
	pub async fn fork(
		endpoint: &Url,
		cache_path: Option<&Path>,
	) -> Result<Arc<Self>, BlockchainError> {
		Self::fork_with_config(endpoint, cache_path, None, ExecutorConfig::default()).await
	}

	/// Fork a live chain at a specific block.
	pub async fn fork_at(
		endpoint: &Url,
		cache_path: Option<&Path>,
		fork_point: Option<BlockForkPoint>,
	) -> Result<Arc<Self>, BlockchainError> {
		Self::fork_with_config(endpoint, cache_path, fork_point, ExecutorConfig::default()).await
	}

	/// Fork a live chain with full control over fork point and executor
	/// configuration.
	///
	/// ```ignore
	/// use lazyfork::{Blockchain, ExecutorConfig, SignatureMockMode};
	///
	/// let config = ExecutorConfig {
	///     signature_mock: SignatureMockMode::MagicSignature,
	///     ..Default::default()
	/// };
	/// let chain = Blockchain::fork_with_config(&endpoint, None, None, config).await?;
	/// ```
	pub async fn fork_with_config(
		endpoint: &Url,
		cache_path: Option<&Path>,
		fork_point: Option<BlockForkPoint>,
		executor_config: ExecutorConfig,
	) -> Result<Arc<Self>, BlockchainError> {
		let rpc = ForkRpcClient::connect(endpoint).await?;
		let cache = Some(StorageCache::open(cache_path).await?);

		let fork_point = match fork_point {
			Some(fp) => fp,
			None => BlockForkPoint::Hash(rpc.finalized_head().await?),
		};

		let fork_block = Arc::new(
			Block::fork_point(rpc.clone(), cache.clone(), fork_point, executor_config.clone())
				.await?,
		);
		let fork_point_hash = fork_block.hash();
		let fork_point_number = fork_block.number();

		let chain_type = Self::detect_chain_type(&fork_block).await?;
		let chain_name = rpc.system_chain().await?;
		let is_parachain = matches!(chain_type, ChainType::Parachain { .. });

		log::info!(
			target: "lazyfork::blockchain",
			"forked {chain_name} at block {fork_point_number} ({fork_point_hash:?})"
		);

		let chain = Arc::new(Self {
			rpc,
			cache,
			head: RwLock::new(fork_block.clone()),
			registry: Mutex::new(BlockRegistry::new(MAX_CACHED_BLOCKS)),
			loading: Mutex::new(HashMap::new()),
			head_state: HeadState::new(),
			inherent_providers: default_providers(is_parachain),
			chain_name,
			chain_type,
			fork_point_hash,
			fork_point_number,
			executor_config,
		});

		chain.register_block(fork_block).await;
		Ok(chain)
	}

	/// The chain name reported by the source node.
	pub fn chain_name(&self) -> &str {
		&self.chain_name
	}

	/// Relay chain or parachain.
	pub fn chain_type(&self) -> &ChainType {
		&self.chain_type
	}

	/// The fork point block hash.
	pub fn fork_point(&self) -> H256 {
		self.fork_point_hash
	}

	/// The fork point block number.
	pub fn fork_point_number(&self) -> u32 {
		self.fork_point_number
	}

	/// The head/storage subscription hub.
	pub fn head_state(&self) -> &HeadState {
		&self.head_state
	}

	/// The current head block.
	pub async fn head(&self) -> Arc<Block> {
		self.head.read().await.clone()
	}

	/// The current head block number.
	pub async fn head_number(&self) -> u32 {
		self.head.read().await.number()
	}

	/// The current head block hash.
	pub async fn head_hash(&self) -> H256 {
		self.head.read().await.hash()
	}

	/// The runtime version at the current head.
	pub async fn runtime_version(&self) -> Result<RuntimeVersion, BlockchainError> {
		let head = self.head().await;
		let runtime = head.runtime().await?;
		Ok(runtime.executor.runtime_version().map_err(BlockError::from)?)
	}

	/// Resolve a block by hash: memory, then persistent store, then remote.
	///
	/// Concurrent requests for the same not-yet-loaded hash share one in-flight
	/// load. Returns `None` when the block exists nowhere.
	pub async fn get_block(&self, hash: H256) -> Result<Option<Arc<Block>>, BlockchainError> {
		if let Some(block) = self.lookup_registered(hash) {
			return Ok(Some(block));
		}

		let cell = {
			let mut loading = self.loading.lock().expect("loading mutex never poisoned; qed");
			loading.entry(hash).or_default().clone()
		};

		let result = cell
			.get_or_try_init(|| async { self.load_block(hash).await })
			.await
			.cloned();

		{
			let mut loading = self.loading.lock().expect("loading mutex never poisoned; qed");
			loading.remove(&hash);
		}

		result
	}

	/// Resolve a block by number: memory, then persistent store, then remote.
	pub async fn get_block_at(&self, number: u32) -> Result<Option<Arc<Block>>, BlockchainError> {
		{
			let registry = self.registry.lock().expect("registry mutex never poisoned; qed");
			if let Some(block) = registry.get_at(number) {
				return Ok(Some(block));
			}
		}

		if let Some(cache) = &self.cache &&
			let Some(record) = cache.get_block_at(number).await?
		{
			return self.get_block(record.hash).await;
		}

		match self.rpc.block_hash_at(number).await? {
			Some(hash) => self.get_block(hash).await,
			None => Ok(None),
		}
	}

	/// Install a block as the current head, registering it, persisting it, and
	/// notifying head and storage subscribers.
	pub async fn set_head(&self, block: Arc<Block>) -> Result<(), BlockchainError> {
		self.adopt_head(block, None).await
	}

	/// Evict a non-head block from memory and the persistent store.
	pub async fn unregister_block(&self, hash: H256) -> Result<(), BlockchainError> {
		if self.head_hash().await == hash {
			log::warn!(
				target: "lazyfork::blockchain",
				"refusing to unregister the current head {hash:?}"
			);
			return Ok(());
		}

		{
			let mut registry = self.registry.lock().expect("registry mutex never poisoned; qed");
			registry.remove(hash);
		}
		if let Some(cache) = &self.cache {
			cache.delete_block(hash).await?;
		}
		Ok(())
	}

	/// Build one block from explicit parameters and adopt it as head.
	///
	/// This is the single writer path: callers serialize through the
	/// transaction pool's build queue, and an optimistic parent check rejects
	/// the build if the head moved underneath it.
	pub async fn build_block_with_params(
		&self,
		params: BuildBlockParams,
	) -> Result<BuildBlockResult, BlockchainError> {
		let parent = self.head().await;

		let mut builder = BlockBuilder::new(&parent, &self.inherent_providers, &params).await?;
		builder.initialize().await?;
		builder.apply_inherents().await?;

		let mut included = Vec::new();
		let mut failed = Vec::new();
		let mut retry = Vec::new();

		for extrinsic in &params.transactions {
			match builder.apply_extrinsic(extrinsic.clone()).await? {
				ApplyExtrinsicResult::Success { storage_changes } => {
					log::debug!(
						target: "lazyfork::blockchain",
						"included extrinsic with {storage_changes} storage changes"
					);
					included.push(extrinsic.clone());
				},
				ApplyExtrinsicResult::ValidityError { error } => {
					log::debug!(
						target: "lazyfork::blockchain",
						"dropped invalid extrinsic: {error}"
					);
					failed.push(FailedExtrinsic { extrinsic: extrinsic.clone(), reason: error });
				},
				ApplyExtrinsicResult::ExecutionFault { message } => {
					log::warn!(
						target: "lazyfork::blockchain",
						"extrinsic execution faulted, queueing for retry: {message}"
					);
					retry.push(extrinsic.clone());
				},
			}
		}

		let block = Arc::new(builder.finalize().await?);
		self.adopt_head(block.clone(), Some(parent.hash())).await?;

		Ok(BuildBlockResult { block, included, failed, retry })
	}

	/// Build an empty block (inherents only), advancing the chain.
	pub async fn build_empty_block(&self) -> Result<Arc<Block>, BlockchainError> {
		Ok(self.build_block_with_params(BuildBlockParams::default()).await?.block)
	}

	/// Preview a single extrinsic against the current head without advancing it.
	pub async fn dry_run_extrinsic(
		&self,
		target: DryRunTarget,
	) -> Result<DryRunResult, BlockchainError> {
		let head = self.head().await;
		Ok(dry_run_extrinsic(
			&head,
			&self.inherent_providers,
			&BuildBlockParams::default(),
			target,
		)
		.await?)
	}

	/// Preview the inherents of the next block without advancing the head.
	pub async fn dry_run_inherents(&self) -> Result<DryRunResult, BlockchainError> {
		let head = self.head().await;
		Ok(dry_run_inherents(&head, &self.inherent_providers, &BuildBlockParams::default())
			.await?)
	}

	/// Get a storage value at the current head.
	pub async fn storage(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BlockchainError> {
		let head = self.head().await;
		Ok(head.get(key).await.map(|v| v.map(|v| v.as_ref().clone()))?)
	}

	/// Get a storage value at a specific block number.
	pub async fn storage_at(
		&self,
		number: u32,
		key: &[u8],
	) -> Result<Option<Vec<u8>>, BlockchainError> {
		match self.get_block_at(number).await? {
			Some(block) => Ok(block.get(key).await.map(|v| v.map(|v| v.as_ref().clone()))?),
			None => Err(BlockchainError::Block(BlockError::BlockNumberNotFound(number))),
		}
	}

	/// Execute a runtime call at the current head.
	pub async fn call(&self, method: &str, args: &[u8]) -> Result<Vec<u8>, BlockchainError> {
		let head = self.head().await;
		Ok(head.call(method, args).await.map(|result| result.output)?)
	}

	/// Execute a runtime call at a specific block hash.
	///
	/// Returns `Ok(None)` when the block is unknown everywhere.
	pub async fn call_at_block(
		&self,
		hash: H256,
		method: &str,
		args: &[u8],
	) -> Result<Option<Vec<u8>>, BlockchainError> {
		match self.get_block(hash).await? {
			Some(block) => Ok(Some(block.call(method, args).await.map(|r| r.output)?)),
			None => Ok(None),
		}
	}

	/// Validate an extrinsic against the current head via
	/// `TaggedTransactionQueue_validate_transaction`.
	pub async fn validate_extrinsic(
		&self,
		extrinsic: &[u8],
	) -> Result<ValidTransaction, TransactionValidityError> {
		let head = self.head().await;

		// Args are raw-concatenated: (source, extrinsic, block_hash). The
		// extrinsic already carries its own SCALE framing.
		let mut args = Vec::with_capacity(1 + extrinsic.len() + 32);
		args.push(transaction_source::EXTERNAL);
		args.extend(extrinsic);
		args.extend(head.hash().as_bytes());

		let result = head
			.call(runtime_api::TAGGED_TRANSACTION_QUEUE_VALIDATE, &args)
			.await
			.map_err(|_| TransactionValidityError::Unknown(UnknownTransaction::CannotLookup))?;

		let validity = TransactionValidity::decode(&mut result.output.as_slice())
			.map_err(|_| TransactionValidityError::Unknown(UnknownTransaction::CannotLookup))?;

		match validity {
			TransactionValidity::Ok(valid) => Ok(valid),
			TransactionValidity::Err(err) => Err(err),
		}
	}

	/// Detect relay chain vs parachain from the runtime metadata, extracting
	/// the para id from `ParachainInfo::ParachainId`.
	async fn detect_chain_type(block: &Block) -> Result<ChainType, BlockchainError> {
		let metadata = block.metadata().await?;

		if metadata.pallet_by_name("ParachainSystem").is_none() {
			return Ok(ChainType::RelayChain);
		}

		let pallet_hash = sp_core::twox_128(b"ParachainInfo");
		let storage_hash = sp_core::twox_128(b"ParachainId");
		let key: Vec<u8> = [pallet_hash.as_slice(), storage_hash.as_slice()].concat();

		let para_id = match block.get(&key).await? {
			Some(value) => u32::decode(&mut value.as_ref().as_slice()).unwrap_or(0),
			None => 0,
		};

		Ok(ChainType::Parachain { para_id })
	}

	fn lookup_registered(&self, hash: H256) -> Option<Arc<Block>> {
		let registry = self.registry.lock().expect("registry mutex never poisoned; qed");
		registry.get(hash)
	}

	async fn register_block(&self, block: Arc<Block>) {
		let head_hash = self.head.read().await.hash();
		let mut registry = self.registry.lock().expect("registry mutex never poisoned; qed");
		registry.insert(block, head_hash);
	}

	/// Register, persist and publish a new head. When `expected_parent` is
	/// given, the install is rejected if the head moved in the meantime.
	async fn adopt_head(
		&self,
		block: Arc<Block>,
		expected_parent: Option<H256>,
	) -> Result<(), BlockchainError> {
		{
			let mut head = self.head.write().await;
			if let Some(expected) = expected_parent &&
				head.hash() != expected
			{
				return Err(BlockchainError::ConcurrentBlockBuild);
			}
			*head = block.clone();
		}

		self.register_block(block.clone()).await;

		if let Some(cache) = &self.cache &&
			let Some(diff) = block.sealed_diff()
		{
			let record = crate::cache::BlockRecord {
				hash: block.hash(),
				number: block.number(),
				parent_hash: block.parent_hash().await?,
				header: block.header().await?.clone(),
				extrinsics: block.extrinsics().await?.clone(),
				storage_diff: diff.to_vec(),
			};
			cache.save_block(&record).await?;
		}

		let event = HeadEvent {
			hash: block.hash(),
			number: block.number(),
			parent_hash: block.parent_hash().await?,
			header: block.header().await?.clone(),
		};
		self.head_state.notify(event, block.sealed_diff().unwrap_or(&[]));

		Ok(())
	}

	/// Load a block that is not in memory: persistent store first, remote last.
	async fn load_block(&self, hash: H256) -> Result<Option<Arc<Block>>, BlockchainError> {
		if let Some(cache) = &self.cache &&
			let Some(record) = cache.get_block(hash).await?
		{
			// A locally built block: its state is a diff over its parent, so
			// the parent must resolve first.
			let parent = Box::pin(self.get_block(record.parent_hash)).await?;
			match parent {
				Some(parent) => {
					let block = Arc::new(Block::from_record(
						record.number,
						record.hash,
						record.header,
						record.extrinsics,
						record.storage_diff,
						&parent,
					));
					self.register_block(block.clone()).await;
					return Ok(Some(block));
				},
				None => {
					log::warn!(
						target: "lazyfork::blockchain",
						"stored block {hash:?} has unresolvable parent {:?}",
						record.parent_hash
					);
				},
			}
		}

		match self.rpc.block_by_hash(hash).await? {
			Some(remote) => {
				let block = Arc::new(Block::from_remote_parts(
					remote.header.number,
					hash,
					remote.encoded_header(),
					remote.extrinsics.clone(),
					self.rpc.clone(),
					self.cache.clone(),
					self.executor_config.clone(),
				));
				self.register_block(block.clone()).await;
				Ok(Some(block))
			},
			None => Ok(None),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::SnapshotStorage;

	fn snapshot_block(number: u32, tag: u8) -> Arc<Block> {
		Arc::new(Block::from_snapshot(
			number,
			H256::from([tag; 32]),
			SnapshotStorage::new(),
			ExecutorConfig::default(),
		))
	}

	#[test]
	fn registry_serves_by_hash_and_number() {
		let mut registry = BlockRegistry::new(10);
		let head = snapshot_block(1, 1);
		registry.insert(head.clone(), head.hash());

		assert_eq!(registry.get(head.hash()).unwrap().number(), 1);
		assert_eq!(registry.get_at(1).unwrap().hash(), head.hash());
		assert!(registry.get(H256::from([9u8; 32])).is_none());
	}

	#[test]
	fn registry_evicts_oldest_inserted_past_capacity() {
		let mut registry = BlockRegistry::new(3);
		let head = snapshot_block(10, 10);

		for (number, tag) in [(1u32, 1u8), (2, 2), (3, 3)] {
			registry.insert(snapshot_block(number, tag), head.hash());
		}
		assert_eq!(registry.len(), 3);

		registry.insert(snapshot_block(4, 4), head.hash());

		assert_eq!(registry.len(), 3);
		// Oldest-inserted entry went first.
		assert!(registry.get(H256::from([1u8; 32])).is_none());
		assert!(registry.get(H256::from([2u8; 32])).is_some());
		assert!(registry.get(H256::from([4u8; 32])).is_some());
	}

	#[test]
	fn registry_never_evicts_the_head() {
		let mut registry = BlockRegistry::new(2);
		let head = snapshot_block(1, 1);
		registry.insert(head.clone(), head.hash());
		registry.insert(snapshot_block(2, 2), head.hash());
		registry.insert(snapshot_block(3, 3), head.hash());

		// The head was oldest-inserted but survives; block 2 went instead.
		assert!(registry.get(head.hash()).is_some());
		assert!(registry.get(H256::from([2u8; 32])).is_none());
		assert!(registry.get(H256::from([3u8; 32])).is_some());
	}

	#[test]
	fn registry_remove_clears_all_indexes() {
		let mut registry = BlockRegistry::new(10);
		let head = snapshot_block(1, 1);
		let other = snapshot_block(2, 2);
		registry.insert(head.clone(), head.hash());
		registry.insert(other.clone(), head.hash());

		registry.remove(other.hash());

		assert!(registry.get(other.hash()).is_none());
		assert!(registry.get_at(2).is_none());
		assert_eq!(registry.len(), 1);
	}

	#[test]
	fn registry_reinsert_does_not_duplicate_insertion_order() {
		let mut registry = BlockRegistry::new(10);
		let head = snapshot_block(1, 1);
		registry.insert(head.clone(), head.hash());
		registry.insert(head.clone(), head.hash());

		assert_eq!(registry.insertion.len(), 1);
	}
}
