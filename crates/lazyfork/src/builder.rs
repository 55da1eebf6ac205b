// SPDX-License-Identifier: GPL-3.0

//! Block builder for constructing new blocks on a forked chain.
//!
//! # Architecture
//!
//! The block building process is a fixed sequence of phases:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Block Building Flow                        │
//! │                                                                 │
//! │   1. new()              Compute next header (digest advance)    │
//! │         │                                                       │
//! │         ▼                                                       │
//! │   2. initialize()       Call Core_initialize_block              │
//! │         │                                                       │
//! │         ▼                                                       │
//! │   3. apply_inherents()  One provider at a time, fatal on error  │
//! │         │                                                       │
//! │         ▼                                                       │
//! │   4. apply_extrinsic()  User extrinsics (repeatable)            │
//! │         │                                                       │
//! │         ▼                                                       │
//! │   5. finalize()         Call BlockBuilder_finalize_block,       │
//! │                         seal an immutable Block                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each phase pushes one transient overlay onto the in-progress block and
//! folds the runtime's storage diff into it; sealing flattens the stack into
//! the new block's frozen base.
//!
//! # Extrinsic outcomes
//!
//! - The runtime reports a transaction-validity error: the extrinsic is
//!   dropped and reported, the build continues.
//! - The execution itself faults (including transient remote-storage
//!   failures): the extrinsic is handed back for retry in a later build.
//! - Otherwise the extrinsic is included, dispatch errors and all, exactly as
//!   on a real chain.

use crate::{
	Block, BuildBlockParams,
	block::flatten_diff,
	error::{BlockBuilderError, BlockError},
	executor::{RuntimeCallResult, SignatureMockMode, magic_signature_bytes},
	inherent::{
		ConsensusType, InherentProvider, TimestampInherent, calculate_next_slot,
		detect_consensus_type, encode_aura_slot, encode_babe_predigest,
	},
	storage::StorageValue,
	strings::builder::{runtime_api, storage_names},
	txpool::TransactionValidityError,
};
use scale::{Compact, Decode, Encode};
use subxt::config::substrate::H256;

/// Phase of the block building process.
///
/// Tracks the current state of the builder to enforce correct ordering:
/// `Created` → `Initialized` → `InherentsApplied` → (extrinsics) → finalize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuilderPhase {
	/// Builder created, `initialize()` not yet called.
	#[default]
	Created,
	/// Block initialized via `Core_initialize_block`, ready for inherents.
	Initialized,
	/// Inherents applied, ready for user extrinsics and finalization.
	InherentsApplied,
}

/// Result of applying one user extrinsic.
#[derive(Debug, Clone)]
pub enum ApplyExtrinsicResult {
	/// Extrinsic was included in the block.
	Success {
		/// Number of storage keys modified by this extrinsic.
		storage_changes: usize,
	},
	/// The runtime rejected the extrinsic as invalid.
	///
	/// Dropped, never retried; storage changes are not applied.
	ValidityError {
		/// Human-readable rejection reason.
		error: String,
	},
	/// The execution itself faulted (runtime trap, transient storage failure).
	///
	/// The extrinsic is a candidate for retry in the next build.
	ExecutionFault {
		/// Description of the fault.
		message: String,
	},
}

/// Consensus engine identifier (4-byte ASCII).
pub type ConsensusEngineId = [u8; 4];

/// Well-known consensus engine identifiers.
pub mod consensus_engine {
	use super::ConsensusEngineId;

	/// Aura consensus engine identifier.
	pub const AURA: ConsensusEngineId = *b"aura";

	/// Babe consensus engine identifier.
	pub const BABE: ConsensusEngineId = *b"BABE";

	/// Nimbus author-continuity engine identifier.
	pub const NIMBUS: ConsensusEngineId = *b"nmbs";

	/// GRANDPA finality engine identifier.
	pub const GRANDPA: ConsensusEngineId = *b"FRNK";
}

/// Digest item for block headers.
///
/// Digest items carry consensus-related information included in the header but
/// not in the block body. Codec indices match the Polkadot SDK definitions.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum DigestItem {
	/// A pre-runtime digest item, produced by the consensus engine before
	/// block execution (slot numbers for Aura/Babe, author for Nimbus).
	#[codec(index = 6)]
	PreRuntime(ConsensusEngineId, Vec<u8>),

	/// A consensus digest item, produced during block execution.
	#[codec(index = 4)]
	Consensus(ConsensusEngineId, Vec<u8>),

	/// A seal digest item, added after block execution.
	#[codec(index = 5)]
	Seal(ConsensusEngineId, Vec<u8>),

	/// An "other" digest item for runtime-specific data.
	#[codec(index = 0)]
	Other(Vec<u8>),

	/// Marker that the runtime environment was updated in this block.
	#[codec(index = 8)]
	RuntimeEnvironmentUpdated,
}

/// Block header as this builder encodes and decodes it.
#[derive(Debug, Clone, Encode, Decode)]
pub struct Header {
	/// Hash of the parent block.
	pub parent_hash: [u8; 32],
	/// Block number.
	#[codec(compact)]
	pub number: u32,
	/// State root. Zeroed before finalize; this system tracks flat diffs, not
	/// a real trie, so the value is never a consensus-valid root.
	pub state_root: [u8; 32],
	/// Extrinsics root. See [`mock_extrinsics_root`].
	pub extrinsics_root: [u8; 32],
	/// Consensus digest log.
	pub digest: Vec<DigestItem>,
}

/// Compute the mock extrinsics root: a blake2-256 hash over the concatenated
/// extrinsics.
///
/// Deliberately not a real trie-backed extrinsics root. Local testing and
/// dry-run previews depend on this cheap, deterministic shape; downstream
/// consumers must not expect a consensus-valid block.
pub fn mock_extrinsics_root(extrinsics: &[Vec<u8>]) -> [u8; 32] {
	let concatenated: Vec<u8> = extrinsics.iter().flatten().copied().collect();
	sp_core::blake2_256(&concatenated)
}

/// Compute the next block's header from its parent.
///
/// Copies the parent's digest log and advances it by scheme:
/// - Aura/Babe: only the pre-runtime item is rewritten to the next slot,
///   everything else is preserved untouched.
/// - Nimbus-style author continuity: the author pre-runtime item is reused
///   verbatim (the caller additionally clears the randomness first-block flag).
/// - Unrecognized schemes: the digest passes through unmodified.
pub async fn compute_next_header(
	parent: &Block,
	number: u32,
) -> Result<(Vec<u8>, ConsensusType), BlockBuilderError> {
	let parent_header_bytes = parent.header().await?;
	let parent_header = Header::decode(&mut parent_header_bytes.as_slice())
		.map_err(|e| BlockBuilderError::Codec(format!("parent header: {e}")))?;

	let metadata = parent.metadata().await?;
	let consensus = detect_consensus_type(&metadata);

	let mut digest = parent_header.digest.clone();

	match consensus {
		ConsensusType::Aura | ConsensusType::Babe => {
			let fallback = TimestampInherent::default_slot_duration_for(&metadata);
			let slot_duration =
				TimestampInherent::slot_duration(parent, &metadata, fallback).await;
			let timestamp = TimestampInherent::current_timestamp(parent).await?;
			let next_slot = calculate_next_slot(timestamp, slot_duration);

			for item in digest.iter_mut() {
				if let DigestItem::PreRuntime(engine, payload) = item {
					match consensus {
						ConsensusType::Aura if *engine == consensus_engine::AURA =>
							*payload = encode_aura_slot(next_slot),
						ConsensusType::Babe if *engine == consensus_engine::BABE =>
							*payload = encode_babe_predigest(next_slot, 0),
						_ => {},
					}
				}
			}
		},
		// The author item is carried over verbatim by the digest copy.
		ConsensusType::Nimbus => {},
		ConsensusType::Unknown => {},
	}

	let header = Header {
		parent_hash: parent.hash().0,
		number,
		state_root: [0u8; 32],
		extrinsics_root: [0u8; 32],
		digest,
	};

	Ok((header.encode(), consensus))
}

/// Storage key for `System::ParentHash`.
fn system_parent_hash_key() -> Vec<u8> {
	let pallet_hash = sp_core::twox_128(storage_names::SYSTEM_PALLET.as_bytes());
	let storage_hash = sp_core::twox_128(storage_names::PARENT_HASH.as_bytes());
	[pallet_hash.as_slice(), storage_hash.as_slice()].concat()
}

/// Storage key for the nimbus randomness "not first block" flag.
fn randomness_not_first_block_key() -> Vec<u8> {
	let pallet_hash = sp_core::twox_128(storage_names::RANDOMNESS_PALLET.as_bytes());
	let storage_hash = sp_core::twox_128(storage_names::NOT_FIRST_BLOCK.as_bytes());
	[pallet_hash.as_slice(), storage_hash.as_slice()].concat()
}

/// Builder for constructing one new block on a forked chain.
///
/// Drives the runtime through `Core_initialize_block`,
/// `BlockBuilder_apply_extrinsic` and `BlockBuilder_finalize_block` against an
/// in-progress [`Block`] whose overlay stack absorbs each phase's storage diff.
///
/// Only one builder runs at a time per chain (the transaction pool's build
/// queue enforces this); the builder itself is not `Sync`.
pub struct BlockBuilder<'a> {
	/// The parent block being extended.
	parent: &'a Block,
	/// The in-progress block: parent state plus the phases applied so far.
	new_block: Block,
	/// Registered inherent providers, applied in order.
	providers: &'a [Box<dyn InherentProvider>],
	/// Parameters of this build (messages, height override).
	params: &'a BuildBlockParams,
	/// Successfully applied extrinsics (inherents + user).
	extrinsics: Vec<Vec<u8>>,
	/// Consensus scheme detected while computing the header.
	consensus: ConsensusType,
	/// Current phase.
	phase: BuilderPhase,
}

impl<'a> BlockBuilder<'a> {
	/// Create a builder for the next block on `parent`.
	///
	/// Computes the next header (consensus digest advance) and sets up the
	/// in-progress block carrying the parent's state and runtime.
	pub async fn new(
		parent: &'a Block,
		providers: &'a [Box<dyn InherentProvider>],
		params: &'a BuildBlockParams,
	) -> Result<BlockBuilder<'a>, BlockBuilderError> {
		let number = params.unsafe_block_height.unwrap_or_else(|| parent.number() + 1);
		let (header, consensus) = compute_next_header(parent, number).await?;

		// Identity is provisional until sealing computes the real header hash.
		let temp_hash = H256::from(sp_core::blake2_256(&header));
		let runtime = parent.runtime().await?.clone();
		let new_block =
			Block::sealed(number, temp_hash, header, Vec::new(), Vec::new(), parent, Some(runtime));

		Ok(Self {
			parent,
			new_block,
			providers,
			params,
			extrinsics: Vec::new(),
			consensus,
			phase: BuilderPhase::Created,
		})
	}

	/// The in-progress block.
	pub fn block(&self) -> &Block {
		&self.new_block
	}

	/// The extrinsics applied so far (inherents + user).
	pub fn extrinsics(&self) -> &[Vec<u8>] {
		&self.extrinsics
	}

	/// The current phase.
	pub fn phase(&self) -> BuilderPhase {
		self.phase
	}

	/// Initialize the block via `Core_initialize_block`.
	///
	/// Must be called exactly once, before inherents. When building the first
	/// block on top of genesis, additionally force-writes `System::ParentHash`
	/// to the genesis hash, correcting the default the runtime would otherwise
	/// leave wrong.
	pub async fn initialize(&mut self) -> Result<RuntimeCallResult, BlockBuilderError> {
		if self.phase != BuilderPhase::Created {
			return Err(BlockBuilderError::AlreadyInitialized);
		}

		let header = self.new_block.header().await?.clone();
		let result = self.new_block.call(runtime_api::CORE_INITIALIZE_BLOCK, &header).await?;

		self.new_block.push_storage_layer().await;
		self.apply_diff(&result.storage_diff).await?;

		if self.parent.number() == 0 {
			self.new_block
				.set_storage(vec![(
					system_parent_hash_key(),
					Some(StorageValue::value(self.parent.hash().as_bytes().to_vec())),
				)])
				.await?;
		}

		if self.consensus == ConsensusType::Nimbus {
			// Author continuity reuses the previous author digest; clearing the
			// flag bypasses the downstream first-block randomness check.
			self.new_block
				.set_storage(vec![(randomness_not_first_block_key(), Some(StorageValue::Deleted))])
				.await?;
		}

		self.phase = BuilderPhase::Initialized;
		Ok(result)
	}

	/// Apply inherent extrinsics from every registered provider, in order.
	///
	/// One overlay is pushed per provider; the provider may write storage into
	/// it directly in addition to the extrinsics it returns. Any failure here
	/// is fatal and aborts the whole block build.
	pub async fn apply_inherents(&mut self) -> Result<Vec<RuntimeCallResult>, BlockBuilderError> {
		match self.phase {
			BuilderPhase::Created => return Err(BlockBuilderError::NotInitialized),
			BuilderPhase::InherentsApplied =>
				return Err(BlockBuilderError::InherentsAlreadyApplied),
			BuilderPhase::Initialized => {},
		}

		let mut results = Vec::new();

		for provider in self.providers {
			self.new_block.push_storage_layer().await;

			let inherents =
				provider.provide(self.parent, &self.new_block, self.params).await.map_err(
					|e| match e {
						err @ BlockBuilderError::InherentProvider { .. } => err,
						other => BlockBuilderError::InherentProvider {
							provider: provider.identifier().to_string(),
							message: other.to_string(),
						},
					},
				)?;

			for inherent in inherents {
				let result = self
					.new_block
					.call(runtime_api::BLOCK_BUILDER_APPLY_EXTRINSIC, &inherent)
					.await
					.map_err(|e| BlockBuilderError::InherentProvider {
						provider: provider.identifier().to_string(),
						message: e.to_string(),
					})?;

				if let ApplyOutcome::Rejected(reason) = decode_apply_outcome(&result.output) {
					return Err(BlockBuilderError::InherentProvider {
						provider: provider.identifier().to_string(),
						message: reason,
					});
				}

				self.apply_diff(&result.storage_diff).await?;
				self.extrinsics.push(inherent);
				results.push(result);
			}
		}

		self.phase = BuilderPhase::InherentsApplied;
		Ok(results)
	}

	/// Apply one user extrinsic via `BlockBuilder_apply_extrinsic`.
	///
	/// Storage changes are applied only when the runtime accepts the
	/// extrinsic; rejected and faulted extrinsics leave no trace.
	pub async fn apply_extrinsic(
		&mut self,
		extrinsic: Vec<u8>,
	) -> Result<ApplyExtrinsicResult, BlockBuilderError> {
		match self.phase {
			BuilderPhase::Created => return Err(BlockBuilderError::NotInitialized),
			BuilderPhase::Initialized => return Err(BlockBuilderError::InherentsNotApplied),
			BuilderPhase::InherentsApplied => {},
		}

		let result = match self
			.new_block
			.call(runtime_api::BLOCK_BUILDER_APPLY_EXTRINSIC, &extrinsic)
			.await
		{
			Ok(result) => result,
			// Execution faults (runtime traps, transient storage failures) are
			// retryable; everything else is an infrastructure error.
			Err(BlockError::Executor(e)) =>
				return Ok(ApplyExtrinsicResult::ExecutionFault { message: e.to_string() }),
			Err(e) => return Err(e.into()),
		};

		match decode_apply_outcome(&result.output) {
			ApplyOutcome::Applied => {
				let storage_changes = result.storage_diff.len();
				self.new_block.push_storage_layer().await;
				self.apply_diff(&result.storage_diff).await?;
				self.extrinsics.push(extrinsic);
				Ok(ApplyExtrinsicResult::Success { storage_changes })
			},
			ApplyOutcome::Rejected(reason) =>
				Ok(ApplyExtrinsicResult::ValidityError { error: reason }),
		}
	}

	/// Finalize via `BlockBuilder_finalize_block` and seal the new block.
	///
	/// The sealed header carries the mock extrinsics root; the block hash is
	/// the blake2-256 of the sealed header.
	pub async fn finalize(mut self) -> Result<Block, BlockBuilderError> {
		match self.phase {
			BuilderPhase::Created => return Err(BlockBuilderError::NotInitialized),
			BuilderPhase::Initialized => return Err(BlockBuilderError::InherentsNotApplied),
			BuilderPhase::InherentsApplied => {},
		}

		let result =
			self.new_block.call(runtime_api::BLOCK_BUILDER_FINALIZE_BLOCK, &[]).await?;

		self.new_block.push_storage_layer().await;
		self.apply_diff(&result.storage_diff).await?;

		// The runtime returns the final header; only the extrinsics root is
		// replaced with the mock value.
		let mut header = Header::decode(&mut result.output.as_slice())
			.map_err(|e| BlockBuilderError::Codec(format!("finalized header: {e}")))?;
		header.extrinsics_root = mock_extrinsics_root(&self.extrinsics);

		let header_encoded = header.encode();
		let hash = H256::from(sp_core::blake2_256(&header_encoded));

		let diff = self.new_block.storage_diff().await?;
		let code_overridden = diff
			.iter()
			.any(|(key, _)| key.as_slice() == sp_core::storage::well_known_keys::CODE);
		let inherited_runtime = if code_overridden {
			// A runtime upgrade in this block: drop the bundle so the child
			// re-derives code and metadata from its own state.
			None
		} else {
			Some(self.parent.runtime().await?.clone())
		};

		Ok(Block::sealed(
			self.new_block.number(),
			hash,
			header_encoded,
			self.extrinsics,
			diff,
			self.parent,
			inherited_runtime,
		))
	}

	/// Write a runtime call's storage diff into the topmost overlay.
	async fn apply_diff(
		&self,
		diff: &[(Vec<u8>, Option<Vec<u8>>)],
	) -> Result<(), BlockBuilderError> {
		if diff.is_empty() {
			return Ok(());
		}
		let entries = diff.iter().map(|(k, v)| {
			let value = match v {
				Some(bytes) => StorageValue::value(bytes.clone()),
				None => StorageValue::Deleted,
			};
			(k.clone(), Some(value))
		});
		self.new_block.set_storage(entries.collect::<Vec<_>>()).await?;
		Ok(())
	}
}

/// Decoded outer outcome of `BlockBuilder_apply_extrinsic`.
enum ApplyOutcome {
	/// The extrinsic was included (its dispatch may still have failed, exactly
	/// as on a real chain).
	Applied,
	/// The runtime rejected the extrinsic with a validity error.
	Rejected(String),
}

/// Decode the `Result<Result<(), DispatchError>, TransactionValidityError>`
/// returned by `BlockBuilder_apply_extrinsic`, looking only at the outer
/// layer: an inner dispatch error still means the extrinsic was included.
fn decode_apply_outcome(output: &[u8]) -> ApplyOutcome {
	match output.first() {
		Some(0x00) => ApplyOutcome::Applied,
		Some(0x01) => {
			let reason = TransactionValidityError::decode(&mut &output[1..])
				.map(|e| e.reason())
				.unwrap_or_else(|_| format!("undecodable validity error: 0x{}", hex::encode(output)));
			ApplyOutcome::Rejected(reason)
		},
		_ => ApplyOutcome::Rejected(format!(
			"empty apply_extrinsic output: 0x{}",
			hex::encode(output)
		)),
	}
}

/// A dry-run target: either a pre-signed extrinsic, or a raw call to wrap in a
/// fabricated mock-signed extrinsic.
#[derive(Debug, Clone)]
pub enum DryRunTarget {
	/// A complete, already-encoded extrinsic.
	Extrinsic(Vec<u8>),
	/// A bare runtime call plus the account to impersonate.
	///
	/// Requires a signature mock mode to be enabled; the fabricated extrinsic
	/// carries a magic signature instead of a real one.
	Call {
		/// SCALE-encoded call (pallet index, call index, arguments).
		call: Vec<u8>,
		/// 32-byte account id of the impersonated signer.
		signer: [u8; 32],
	},
}

/// Result of a dry run.
#[derive(Debug, Clone)]
pub struct DryRunResult {
	/// Outcome of the dry-run extrinsic, when one was applied.
	pub outcome: Option<ApplyExtrinsicResult>,
	/// Flat storage diff of the whole preview (initialize + inherents +
	/// extrinsic, when applicable).
	pub storage_diff: Vec<(Vec<u8>, Option<Vec<u8>>)>,
	/// Runtime logs captured during the preview.
	pub logs: Vec<String>,
}

/// Preview the effect of a single extrinsic without sealing a block.
///
/// Runs the same initialize + inherents machinery as a real build, applies the
/// target, and returns the combined diff. Nothing is adopted as head.
pub async fn dry_run_extrinsic(
	parent: &Block,
	providers: &[Box<dyn InherentProvider>],
	params: &BuildBlockParams,
	target: DryRunTarget,
) -> Result<DryRunResult, BlockBuilderError> {
	let extrinsic = match target {
		DryRunTarget::Extrinsic(extrinsic) => extrinsic,
		DryRunTarget::Call { call, signer } => {
			if parent.executor_config().signature_mock == SignatureMockMode::None {
				return Err(BlockBuilderError::InvalidConfiguration(
					"dry-running a raw call requires a signature mock mode".into(),
				));
			}
			let nonce = account_nonce(parent, &signer).await?;
			build_mock_signed_extrinsic(&signer, nonce, &call)
		},
	};

	let mut builder = BlockBuilder::new(parent, providers, params).await?;
	let mut logs = collect_log_messages(&builder.initialize().await?);
	for result in builder.apply_inherents().await? {
		logs.extend(collect_log_messages(&result));
	}

	let outcome = builder.apply_extrinsic(extrinsic).await?;
	let storage_diff = flatten_diff(builder.new_block.storage_diff().await?);

	Ok(DryRunResult { outcome: Some(outcome), storage_diff, logs })
}

/// Preview the combined effect of block initialization and all inherents.
pub async fn dry_run_inherents(
	parent: &Block,
	providers: &[Box<dyn InherentProvider>],
	params: &BuildBlockParams,
) -> Result<DryRunResult, BlockBuilderError> {
	let mut builder = BlockBuilder::new(parent, providers, params).await?;
	let mut logs = collect_log_messages(&builder.initialize().await?);
	for result in builder.apply_inherents().await? {
		logs.extend(collect_log_messages(&result));
	}

	let storage_diff = flatten_diff(builder.new_block.storage_diff().await?);

	Ok(DryRunResult { outcome: None, storage_diff, logs })
}

fn collect_log_messages(result: &RuntimeCallResult) -> Vec<String> {
	result.logs.iter().map(|l| l.message.clone()).collect()
}

/// Read the signer's account nonce from `System::Account`.
async fn account_nonce(block: &Block, account: &[u8; 32]) -> Result<u64, BlockBuilderError> {
	let mut key = Vec::new();
	key.extend(sp_core::twox_128(storage_names::SYSTEM_PALLET.as_bytes()));
	key.extend(sp_core::twox_128(b"Account"));
	key.extend(sp_core::blake2_128(account));
	key.extend(account);

	// AccountInfo starts with the u32 nonce.
	match block.get(&key).await? {
		Some(value) if value.len() >= 4 => {
			let mut nonce_bytes = [0u8; 4];
			nonce_bytes.copy_from_slice(&value[..4]);
			Ok(u32::from_le_bytes(nonce_bytes) as u64)
		},
		_ => Ok(0),
	}
}

/// Build a mock-signed v4 extrinsic around a raw call.
///
/// Layout: `[compact_len][0x84][MultiAddress::Id(signer)][magic signature]
/// [era immortal][compact nonce][compact tip 0][call]`. Chains whose signed
/// extensions differ from the common era/nonce/payment triple will reject the
/// fabricated extrinsic with a validity error; use a pre-signed extrinsic for
/// those.
pub fn build_mock_signed_extrinsic(signer: &[u8; 32], nonce: u64, call: &[u8]) -> Vec<u8> {
	let mut inner = Vec::new();

	// Version byte: signed (0x80) + v4 (0x04)
	inner.push(0x84);
	// Address: MultiAddress::Id variant
	inner.push(0x00);
	inner.extend(signer);
	// Magic signature, accepted by MagicSignature and AlwaysValid modes
	inner.extend(magic_signature_bytes());
	// CheckMortality: immortal era
	inner.push(0x00);
	// CheckNonce
	inner.extend(Compact(nonce).encode());
	// ChargeTransactionPayment: zero tip
	inner.extend(Compact(0u128).encode());
	inner.extend(call);

	let mut extrinsic = Compact(inner.len() as u32).encode();
	extrinsic.extend(inner);
	extrinsic
}
