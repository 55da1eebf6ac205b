// SPDX-License-Identifier: GPL-3.0

//! Transaction pool and build scheduling for forked chains.
//!
//! The pool collects submitted extrinsics (tagged with their decoded signer)
//! and queued cross-chain messages, and serializes block building through a
//! FIFO request queue drained by a single worker task. Build requests never
//! interleave: if a build is running, new requests wait in the queue.
//!
//! # Build modes
//!
//! - [`BuildMode::Batch`]: repeated triggers are debounced behind an explicit
//!   deadline (a short idle window, capped by a maximum wait from the first
//!   trigger), so many rapid submissions collapse into one block.
//! - [`BuildMode::Instant`]: every trigger builds immediately.
//! - [`BuildMode::Manual`]: only explicit build calls produce blocks.
//!
//! # Retry semantics
//!
//! Extrinsics the builder reports as execution faults are re-queued for the
//! next build; extrinsics rejected as invalid are dropped and broadcast on the
//! dropped-extrinsics channel.

use crate::{
	Blockchain,
	blockchain::{BuildBlockResult, FailedExtrinsic},
	error::{BlockchainError, TxPoolError},
	inherent::decode_compact_len,
	strings::txpool::message_queue,
};
use scale::{Decode, Encode};
use std::{
	collections::BTreeMap,
	sync::{Arc, Mutex},
	time::Duration,
};
use subxt::config::substrate::H256;
use tokio::{
	sync::{broadcast, mpsc, oneshot},
	time::Instant,
};

/// Capacity of the dropped-extrinsics broadcast channel.
const DROPPED_CHANNEL_CAPACITY: usize = 256;

/// Page size for walking `MessageQueue::BookStateFor` after a build.
const BOOK_STATE_PAGE: u32 = 100;

// ============================================================================
// Cross-chain message types
// ============================================================================

/// A downward message (relay chain to parachain).
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct DownwardMessage {
	/// Relay block number the message was sent at.
	pub sent_at: u32,
	/// Opaque message payload.
	pub msg: Vec<u8>,
}

/// A horizontal message (parachain to parachain).
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct HorizontalMessage {
	/// Relay block number the message was sent at.
	pub sent_at: u32,
	/// Opaque message payload.
	pub data: Vec<u8>,
}

/// Parameters for building one block.
#[derive(Debug, Clone, Default)]
pub struct BuildBlockParams {
	/// User extrinsics to apply, in submission order.
	pub transactions: Vec<Vec<u8>>,
	/// Downward messages to inject (relay chain origin).
	pub downward_messages: Vec<DownwardMessage>,
	/// Horizontal messages to inject, keyed by sender parachain id.
	pub horizontal_messages: BTreeMap<u32, Vec<HorizontalMessage>>,
	/// Upward messages to enqueue, keyed by sender parachain id.
	pub upward_messages: BTreeMap<u32, Vec<Vec<u8>>>,
	/// Overrides the next block height. Unsafe: the runtime may reject blocks
	/// that skip heights.
	pub unsafe_block_height: Option<u32>,
}

impl BuildBlockParams {
	/// Whether this build carries any cross-chain messages destined for the
	/// message-queue pallet (downward or horizontal).
	fn has_queue_messages(&self) -> bool {
		!self.downward_messages.is_empty() || !self.horizontal_messages.is_empty()
	}
}

// ============================================================================
// Transaction validity (decoding `TaggedTransactionQueue_validate_transaction`)
// ============================================================================

/// Result of transaction validation.
///
/// Mirrors `sp_runtime::transaction_validity::TransactionValidity`.
#[derive(Debug, Clone, Encode, Decode)]
pub enum TransactionValidity {
	/// Transaction is valid.
	#[codec(index = 0)]
	Ok(ValidTransaction),
	/// Transaction is invalid.
	#[codec(index = 1)]
	Err(TransactionValidityError),
}

/// Information about a valid transaction.
#[derive(Debug, Clone, Encode, Decode)]
pub struct ValidTransaction {
	/// Priority of the transaction (higher = more likely to be included).
	pub priority: u64,
	/// Transaction dependencies (tags this tx requires).
	pub requires: Vec<Vec<u8>>,
	/// Tags this transaction provides.
	pub provides: Vec<Vec<u8>>,
	/// Longevity - how long this tx is valid (in blocks).
	pub longevity: u64,
	/// Whether this transaction should be propagated.
	pub propagate: bool,
}

/// Error when transaction validation fails.
#[derive(Debug, Clone, Encode, Decode)]
pub enum TransactionValidityError {
	/// Transaction is invalid (won't ever be valid).
	#[codec(index = 0)]
	Invalid(InvalidTransaction),
	/// Transaction validity is unknown (might become valid).
	#[codec(index = 1)]
	Unknown(UnknownTransaction),
}

/// Reasons a transaction is invalid.
///
/// Variant order mirrors `sp_runtime::transaction_validity::InvalidTransaction`.
#[derive(Debug, Clone, Encode, Decode)]
pub enum InvalidTransaction {
	/// General call failure.
	#[codec(index = 0)]
	Call,
	/// Payment failed (can't pay fees).
	#[codec(index = 1)]
	Payment,
	/// Future transaction (nonce too high).
	#[codec(index = 2)]
	Future,
	/// Stale transaction (nonce too low).
	#[codec(index = 3)]
	Stale,
	/// Bad signature/proof.
	#[codec(index = 4)]
	BadProof,
	/// The transaction's birth block is ancient.
	#[codec(index = 5)]
	AncientBirthBlock,
	/// The transaction would exhaust block resources.
	#[codec(index = 6)]
	ExhaustsResources,
	/// Custom error (runtime-specific).
	#[codec(index = 7)]
	Custom(u8),
	/// Bad mandatory inherent.
	#[codec(index = 8)]
	BadMandatory,
	/// Mandatory dispatch validation failed.
	#[codec(index = 9)]
	MandatoryValidation,
	/// The signer is not an acceptable origin.
	#[codec(index = 10)]
	BadSigner,
}

/// Reasons transaction validity is unknown.
#[derive(Debug, Clone, Encode, Decode)]
pub enum UnknownTransaction {
	/// Can't lookup validity (dependencies missing).
	#[codec(index = 0)]
	CannotLookup,
	/// No unsigned validation handler.
	#[codec(index = 1)]
	NoUnsignedValidator,
	/// Custom unknown error.
	#[codec(index = 2)]
	Custom(u8),
}

impl TransactionValidityError {
	/// Get a human-readable reason for the error.
	pub fn reason(&self) -> String {
		match self {
			Self::Invalid(inv) => match inv {
				InvalidTransaction::Call => "Call failed".into(),
				InvalidTransaction::Payment => "Insufficient funds for fees".into(),
				InvalidTransaction::Future => "Nonce too high".into(),
				InvalidTransaction::Stale => "Nonce too low (already used)".into(),
				InvalidTransaction::BadProof => "Invalid signature".into(),
				InvalidTransaction::AncientBirthBlock => "Birth block too old".into(),
				InvalidTransaction::ExhaustsResources => "Would exhaust block resources".into(),
				InvalidTransaction::Custom(code) => format!("Custom error: {code}"),
				InvalidTransaction::BadMandatory => "Bad mandatory inherent".into(),
				InvalidTransaction::MandatoryValidation => "Mandatory validation failed".into(),
				InvalidTransaction::BadSigner => "Unacceptable signing origin".into(),
			},
			Self::Unknown(unk) => match unk {
				UnknownTransaction::CannotLookup => "Cannot lookup validity".into(),
				UnknownTransaction::NoUnsignedValidator => "No unsigned validator".into(),
				UnknownTransaction::Custom(code) => format!("Custom unknown: {code}"),
			},
		}
	}

	/// Check if this is an "unknown" error (might become valid later).
	pub fn is_unknown(&self) -> bool {
		matches!(self, Self::Unknown(_))
	}
}

// ============================================================================
// Pool
// ============================================================================

/// When the pool builds blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
	/// Debounce triggers: wait for a short idle window after the last trigger,
	/// but never longer than `max_wait` after the first.
	Batch {
		/// Idle window extended on every trigger.
		idle: Duration,
		/// Upper bound on the total wait from the first trigger.
		max_wait: Duration,
	},
	/// Build immediately after every trigger.
	Instant,
	/// Never auto-build; only explicit build calls.
	Manual,
}

impl BuildMode {
	/// The conventional batch mode: 100ms idle window, 500ms maximum wait.
	pub fn default_batch() -> Self {
		Self::Batch { idle: Duration::from_millis(100), max_wait: Duration::from_millis(500) }
	}
}

/// An extrinsic waiting in the pool, tagged with its decoded signer.
#[derive(Debug, Clone)]
pub struct PoolExtrinsic {
	/// The raw extrinsic bytes.
	pub extrinsic: Vec<u8>,
	/// The 32-byte signer account, when the extrinsic is signed with a plain
	/// account id address.
	pub signer: Option<Vec<u8>>,
}

/// Pending pool content, drained by the single active build.
#[derive(Default)]
struct PoolState {
	pending: Vec<PoolExtrinsic>,
	downward: Vec<DownwardMessage>,
	horizontal: BTreeMap<u32, Vec<HorizontalMessage>>,
	upward: BTreeMap<u32, Vec<Vec<u8>>>,
}

/// Debounce state for batch mode: explicit deadlines checked by the waiter.
struct BatchState {
	deadline: Instant,
	max_deadline: Instant,
}

/// One enqueued build.
struct BuildRequest {
	params: BuildBlockParams,
	done: Option<oneshot::Sender<Result<BuildBlockResult, BlockchainError>>>,
}

struct PoolInner {
	blockchain: Arc<Blockchain>,
	state: Mutex<PoolState>,
	mode: Mutex<BuildMode>,
	build_tx: mpsc::UnboundedSender<BuildRequest>,
	dropped_tx: broadcast::Sender<FailedExtrinsic>,
	batch: Mutex<Option<BatchState>>,
}

/// Transaction pool and build scheduler for one forked chain.
///
/// Cheap to clone; all clones share the same pool and worker.
#[derive(Clone)]
pub struct TxPool {
	inner: Arc<PoolInner>,
}

impl TxPool {
	/// Create a pool and spawn its build worker.
	pub fn new(blockchain: Arc<Blockchain>, mode: BuildMode) -> Self {
		let (build_tx, build_rx) = mpsc::unbounded_channel();
		let (dropped_tx, _) = broadcast::channel(DROPPED_CHANNEL_CAPACITY);

		let inner = Arc::new(PoolInner {
			blockchain,
			state: Mutex::new(PoolState::default()),
			mode: Mutex::new(mode),
			build_tx,
			dropped_tx,
			batch: Mutex::new(None),
		});

		tokio::spawn(build_worker(inner.clone(), build_rx));

		Self { inner }
	}

	/// The current build mode.
	pub fn mode(&self) -> Result<BuildMode, TxPoolError> {
		Ok(*self.inner.mode.lock().map_err(|e| TxPoolError::Lock(e.to_string()))?)
	}

	/// Change the build mode.
	pub fn set_mode(&self, mode: BuildMode) -> Result<(), TxPoolError> {
		*self.inner.mode.lock().map_err(|e| TxPoolError::Lock(e.to_string()))? = mode;
		Ok(())
	}

	/// Subscribe to extrinsics dropped for validity errors during builds.
	pub fn subscribe_dropped_extrinsics(&self) -> broadcast::Receiver<FailedExtrinsic> {
		self.inner.dropped_tx.subscribe()
	}

	/// Submit an extrinsic.
	///
	/// The extrinsic is validated against the current head before entering the
	/// pool; an invalid submission is rejected immediately. Returns the
	/// blake2-256 hash of the extrinsic.
	pub async fn submit_extrinsic(&self, extrinsic: Vec<u8>) -> Result<H256, TxPoolError> {
		if let Err(validity) = self.inner.blockchain.validate_extrinsic(&extrinsic).await {
			return Err(TxPoolError::InvalidTransaction(validity.reason()));
		}

		let hash = H256::from(sp_core::blake2_256(&extrinsic));
		let signer = extract_signer(&extrinsic);
		{
			let mut state =
				self.inner.state.lock().map_err(|e| TxPoolError::Lock(e.to_string()))?;
			state.pending.push(PoolExtrinsic { extrinsic, signer });
		}

		PoolInner::trigger_build(&self.inner)?;
		Ok(hash)
	}

	/// Queue downward messages (relay chain origin) for the next build.
	pub fn submit_downward_messages(
		&self,
		messages: Vec<DownwardMessage>,
	) -> Result<(), TxPoolError> {
		{
			let mut state =
				self.inner.state.lock().map_err(|e| TxPoolError::Lock(e.to_string()))?;
			state.downward.extend(messages);
		}
		PoolInner::trigger_build(&self.inner)
	}

	/// Queue horizontal messages from a sender parachain for the next build.
	pub fn submit_horizontal_messages(
		&self,
		sender_para_id: u32,
		messages: Vec<HorizontalMessage>,
	) -> Result<(), TxPoolError> {
		{
			let mut state =
				self.inner.state.lock().map_err(|e| TxPoolError::Lock(e.to_string()))?;
			state.horizontal.entry(sender_para_id).or_default().extend(messages);
		}
		PoolInner::trigger_build(&self.inner)
	}

	/// Queue upward messages from a sender parachain for the next build.
	pub fn submit_upward_messages(
		&self,
		sender_para_id: u32,
		messages: Vec<Vec<u8>>,
	) -> Result<(), TxPoolError> {
		{
			let mut state =
				self.inner.state.lock().map_err(|e| TxPoolError::Lock(e.to_string()))?;
			state.upward.entry(sender_para_id).or_default().extend(messages);
		}
		PoolInner::trigger_build(&self.inner)
	}

	/// Extrinsics currently waiting in the pool, optionally filtered by signer.
	pub fn pending_extrinsics(
		&self,
		signer: Option<&[u8]>,
	) -> Result<Vec<Vec<u8>>, TxPoolError> {
		let state = self.inner.state.lock().map_err(|e| TxPoolError::Lock(e.to_string()))?;
		Ok(state
			.pending
			.iter()
			.filter(|p| signer.is_none() || p.signer.as_deref() == signer)
			.map(|p| p.extrinsic.clone())
			.collect())
	}

	/// Number of extrinsics waiting in the pool.
	pub fn len(&self) -> Result<usize, TxPoolError> {
		Ok(self.inner.state.lock().map_err(|e| TxPoolError::Lock(e.to_string()))?.pending.len())
	}

	/// Whether the pool has no pending extrinsics.
	pub fn is_empty(&self) -> Result<bool, TxPoolError> {
		Ok(self.len()? == 0)
	}

	/// Build a block from the pool's current content and wait for it.
	///
	/// Drains pending extrinsics and message queues into one build request;
	/// the request waits its turn behind any in-flight build.
	pub async fn build_block(&self) -> Result<BuildBlockResult, TxPoolError> {
		let params = self.inner.drain_params()?;
		self.build_block_with_params(params).await
	}

	/// Build a block with fully explicit parameters, bypassing pool draining.
	pub async fn build_block_with_params(
		&self,
		params: BuildBlockParams,
	) -> Result<BuildBlockResult, TxPoolError> {
		let (done_tx, done_rx) = oneshot::channel();
		self.inner
			.build_tx
			.send(BuildRequest { params, done: Some(done_tx) })
			.map_err(|_| TxPoolError::WorkerGone)?;

		done_rx.await.map_err(|_| TxPoolError::WorkerGone)?.map_err(TxPoolError::Build)
	}
}

impl PoolInner {
	/// Drain pool content into build parameters.
	fn drain_params(&self) -> Result<BuildBlockParams, TxPoolError> {
		let mut state = self.state.lock().map_err(|e| TxPoolError::Lock(e.to_string()))?;
		Ok(BuildBlockParams {
			transactions: state.pending.drain(..).map(|p| p.extrinsic).collect(),
			downward_messages: std::mem::take(&mut state.downward),
			horizontal_messages: std::mem::take(&mut state.horizontal),
			upward_messages: std::mem::take(&mut state.upward),
			unsafe_block_height: None,
		})
	}

	/// Enqueue a detached build of the pool's current content.
	fn enqueue_drained(&self) -> Result<(), TxPoolError> {
		let params = self.drain_params()?;
		self.build_tx
			.send(BuildRequest { params, done: None })
			.map_err(|_| TxPoolError::WorkerGone)
	}

	/// Apply the build policy to a new submission.
	fn trigger_build(inner: &Arc<Self>) -> Result<(), TxPoolError> {
		let mode = *inner.mode.lock().map_err(|e| TxPoolError::Lock(e.to_string()))?;
		match mode {
			BuildMode::Manual => Ok(()),
			BuildMode::Instant => inner.enqueue_drained(),
			BuildMode::Batch { idle, max_wait } => {
				let now = Instant::now();
				let mut batch =
					inner.batch.lock().map_err(|e| TxPoolError::Lock(e.to_string()))?;
				match batch.as_mut() {
					Some(state) => {
						// Extend the idle window, bounded by the max deadline.
						state.deadline = (now + idle).min(state.max_deadline);
					},
					None => {
						*batch = Some(BatchState {
							deadline: now + idle,
							max_deadline: now + max_wait,
						});
						tokio::spawn(batch_waiter(inner.clone()));
					},
				}
				Ok(())
			},
		}
	}
}

/// Sleep until the batch deadline stops moving, then enqueue one build.
async fn batch_waiter(inner: Arc<PoolInner>) {
	loop {
		let deadline = {
			let batch = match inner.batch.lock() {
				Ok(batch) => batch,
				Err(_) => return,
			};
			match batch.as_ref() {
				Some(state) => state.deadline,
				None => return,
			}
		};

		tokio::time::sleep_until(deadline).await;

		let fire = {
			let mut batch = match inner.batch.lock() {
				Ok(batch) => batch,
				Err(_) => return,
			};
			match batch.as_ref() {
				// The deadline may have been pushed while we slept.
				Some(state) if Instant::now() >= state.deadline => {
					*batch = None;
					true
				},
				Some(_) => false,
				None => return,
			}
		};

		if fire {
			if let Err(e) = inner.enqueue_drained() {
				log::warn!(target: "lazyfork::txpool", "batched build failed to enqueue: {e}");
			}
			return;
		}
	}
}

/// The single-flight build worker: drains the request queue in FIFO order.
async fn build_worker(inner: Arc<PoolInner>, mut rx: mpsc::UnboundedReceiver<BuildRequest>) {
	while let Some(mut request) = rx.recv().await {
		let had_queue_messages = request.params.has_queue_messages();
		let result = inner.blockchain.build_block_with_params(request.params.clone()).await;

		match &result {
			Ok(build) => {
				// Execution faults go back into the pool for the next attempt.
				if !build.retry.is_empty() {
					if let Ok(mut state) = inner.state.lock() {
						for extrinsic in &build.retry {
							let signer = extract_signer(extrinsic);
							state.pending.push(PoolExtrinsic {
								extrinsic: extrinsic.clone(),
								signer,
							});
						}
					}
				}

				// Validity rejections are dropped and reported.
				for failed in &build.failed {
					let _ = inner.dropped_tx.send(failed.clone());
				}

				// Under the message-queue pallet, injected messages are queued
				// first and serviced later; when pages still report pending
				// content, one more build bridges the gap.
				if had_queue_messages &&
					message_queue_has_pending(&inner.blockchain).await
				{
					log::debug!(
						target: "lazyfork::txpool",
						"message queue still has pending pages; scheduling a drain block"
					);
					let _ = inner.enqueue_drained();
				}
			},
			Err(e) => {
				log::warn!(target: "lazyfork::txpool", "block build failed: {e}");
			},
		}

		// A failed build rejects only its own completion; later requests still run.
		if let Some(done) = request.done.take() {
			let _ = done.send(result);
		}
	}
}

/// Whether `MessageQueue::BookStateFor` reports any page with pending content
/// at the current head.
async fn message_queue_has_pending(blockchain: &Blockchain) -> bool {
	let head = blockchain.head().await;

	let Ok(metadata) = head.metadata().await else { return false };
	if metadata.pallet_by_name(message_queue::PALLET_NAME).is_none() {
		return false;
	}

	let mut prefix = Vec::new();
	prefix.extend(sp_core::twox_128(message_queue::PALLET_KEY));
	prefix.extend(sp_core::twox_128(message_queue::BOOK_STATE_FOR));

	let mut start = prefix.clone();
	loop {
		let Ok(keys) = head.keys_paged(&prefix, BOOK_STATE_PAGE, &start).await else {
			return false;
		};
		for key in &keys {
			if let Ok(Some(value)) = head.get(key).await &&
				book_state_size(value.as_ref()) > 0
			{
				return true;
			}
		}
		match keys.last() {
			Some(last) if keys.len() == BOOK_STATE_PAGE as usize => start = last.clone(),
			_ => return false,
		}
	}
}

/// Extract the `size` field from an encoded `BookState`.
///
/// `BookState { begin: u32, end: u32, count: u32, ready_neighbours:
/// Option<Neighbours<Origin>>, message_count: u64, size: u64 }` - the origin
/// type varies per runtime, but `message_count` and `size` are the trailing
/// fields, so the last 8 bytes are the size regardless of the origin encoding.
fn book_state_size(encoded: &[u8]) -> u64 {
	const FIXED_PREFIX: usize = 12; // begin + end + count
	const TRAILING: usize = 16; // message_count + size
	if encoded.len() < FIXED_PREFIX + 1 + TRAILING {
		return 0;
	}
	let mut size_bytes = [0u8; 8];
	size_bytes.copy_from_slice(&encoded[encoded.len() - 8..]);
	u64::from_le_bytes(size_bytes)
}

/// Extract the 32-byte signer account from a signed v4/v5 extrinsic using a
/// plain `MultiAddress::Id` address. Returns `None` for bare extrinsics and
/// exotic address formats.
fn extract_signer(extrinsic: &[u8]) -> Option<Vec<u8>> {
	let (_, body) = decode_compact_len(extrinsic)?;
	if body.len() < 35 {
		return None;
	}

	let version_byte = body[0];
	let signed = version_byte & 0x80 != 0;
	let version = version_byte & 0x7f;
	if !signed || (version != 4 && version != 5) {
		return None;
	}

	// MultiAddress::Id discriminant, then the 32-byte account.
	if body[1] != 0x00 {
		return None;
	}
	Some(body[2..34].to_vec())
}

#[cfg(test)]
mod tests {
	use super::*;
	use scale::Compact;

	fn signed_extrinsic(signer: [u8; 32]) -> Vec<u8> {
		let mut inner = Vec::new();
		inner.push(0x84);
		inner.push(0x00);
		inner.extend(signer);
		inner.extend([0u8; 64]);
		inner.extend([0x00]); // era
		inner.extend(Compact(0u64).encode()); // nonce
		inner.extend(Compact(0u128).encode()); // tip
		inner.extend([0x00, 0x00]); // call
		let mut extrinsic = Compact(inner.len() as u32).encode();
		extrinsic.extend(inner);
		extrinsic
	}

	#[test]
	fn extract_signer_reads_multiaddress_id() {
		let signer = [7u8; 32];
		let extrinsic = signed_extrinsic(signer);

		assert_eq!(extract_signer(&extrinsic), Some(signer.to_vec()));
	}

	#[test]
	fn extract_signer_ignores_bare_extrinsics() {
		// Bare (unsigned) extrinsic: version byte 0x04 without the signed bit.
		let mut inner = vec![0x04, 0x03, 0x00];
		inner.extend([0u8; 40]);
		let mut extrinsic = Compact(inner.len() as u32).encode();
		extrinsic.extend(inner);

		assert_eq!(extract_signer(&extrinsic), None);
	}

	#[test]
	fn extract_signer_ignores_non_id_addresses() {
		let mut inner = Vec::new();
		inner.push(0x84);
		inner.push(0x01); // MultiAddress::Index
		inner.extend([0u8; 64]);
		let mut extrinsic = Compact(inner.len() as u32).encode();
		extrinsic.extend(inner);

		assert_eq!(extract_signer(&extrinsic), None);
	}

	#[test]
	fn book_state_size_reads_trailing_field() {
		// begin, end, count, no neighbours, message_count, size
		let mut encoded = Vec::new();
		encoded.extend(0u32.encode());
		encoded.extend(5u32.encode());
		encoded.extend(5u32.encode());
		encoded.push(0x00); // ready_neighbours: None
		encoded.extend(17u64.encode());
		encoded.extend(4242u64.encode());

		assert_eq!(book_state_size(&encoded), 4242);
	}

	#[test]
	fn book_state_size_handles_origin_bearing_neighbours() {
		// Neighbours with Sibling origins: the variable middle doesn't matter.
		let mut encoded = Vec::new();
		encoded.extend(0u32.encode());
		encoded.extend(1u32.encode());
		encoded.extend(1u32.encode());
		encoded.push(0x01); // ready_neighbours: Some
		encoded.push(0x02); // prev: Sibling
		encoded.extend(2000u32.encode());
		encoded.push(0x02); // next: Sibling
		encoded.extend(2001u32.encode());
		encoded.extend(3u64.encode());
		encoded.extend(99u64.encode());

		assert_eq!(book_state_size(&encoded), 99);
	}

	#[test]
	fn book_state_size_rejects_truncated_values() {
		assert_eq!(book_state_size(&[0u8; 10]), 0);
	}

	#[test]
	fn validity_error_reasons_are_descriptive() {
		let stale = TransactionValidityError::Invalid(InvalidTransaction::Stale);
		assert_eq!(stale.reason(), "Nonce too low (already used)");
		assert!(!stale.is_unknown());

		let unknown = TransactionValidityError::Unknown(UnknownTransaction::CannotLookup);
		assert_eq!(unknown.reason(), "Cannot lookup validity");
		assert!(unknown.is_unknown());
	}

	#[test]
	fn validity_roundtrips_through_codec() {
		let valid = TransactionValidity::Ok(ValidTransaction {
			priority: 100,
			requires: vec![],
			provides: vec![vec![1, 2, 3]],
			longevity: 64,
			propagate: true,
		});
		let encoded = valid.encode();
		let decoded = TransactionValidity::decode(&mut encoded.as_slice()).unwrap();
		assert!(matches!(decoded, TransactionValidity::Ok(v) if v.priority == 100));

		let invalid =
			TransactionValidity::Err(TransactionValidityError::Invalid(InvalidTransaction::Payment));
		let encoded = invalid.encode();
		assert_eq!(encoded[0], 0x01);
		assert_eq!(encoded[1], 0x00);
		assert_eq!(encoded[2], 0x01);
	}

	#[test]
	fn build_params_queue_message_detection() {
		let mut params = BuildBlockParams::default();
		assert!(!params.has_queue_messages());

		params.downward_messages.push(DownwardMessage { sent_at: 1, msg: vec![1] });
		assert!(params.has_queue_messages());

		let mut params = BuildBlockParams::default();
		params
			.horizontal_messages
			.insert(2000, vec![HorizontalMessage { sent_at: 1, data: vec![1] }]);
		assert!(params.has_queue_messages());

		let mut params = BuildBlockParams::default();
		params.upward_messages.insert(2000, vec![vec![1]]);
		assert!(!params.has_queue_messages());
	}
}
