// SPDX-License-Identifier: GPL-3.0

//! Timestamp inherent provider for block building.
//!
//! Generates the mandatory `timestamp.set(now)` inherent that advances the
//! chain's notion of time by one slot.
//!
//! # How It Works
//!
//! 1. Look up the Timestamp pallet and `set` call indices from runtime metadata
//! 2. Detect the slot duration using the following fallback chain:
//!    - `AuraApi_slot_duration` runtime API (Aura-based chains)
//!    - `Babe::ExpectedBlockTime` metadata constant (Babe-based chains)
//!    - configured default slot duration
//! 3. Read the current timestamp from `Timestamp::Now`
//! 4. Add the slot duration
//! 5. Encode a `timestamp.set(new_timestamp)` call with the dynamic indices
//! 6. Wrap it as a bare inherent extrinsic

use crate::{
	Block, BuildBlockParams,
	error::BlockBuilderError,
	inherent::InherentProvider,
	strings::inherent::timestamp as strings,
};
use async_trait::async_trait;
use scale::{Compact, Decode, Encode};
use subxt::Metadata;

/// Default slot duration for relay chains (6 seconds).
const DEFAULT_RELAY_SLOT_DURATION_MS: u64 = 6_000;

/// Default slot duration for parachains (12 seconds).
const DEFAULT_PARA_SLOT_DURATION_MS: u64 = 12_000;

/// Extrinsic format byte for bare/unsigned extrinsics.
///
/// Both v4 and v5 extrinsic formats use 0x04 for bare extrinsics:
/// - V4: version byte = 0x04 (unsigned, no signature)
/// - V5: mode byte = 0x04 (bare extrinsic, no extensions)
const BARE_EXTRINSIC_VERSION: u8 = 0x04;

/// Timestamp inherent provider.
///
/// The pallet and call indices are looked up dynamically from the runtime
/// metadata, so the provider works across different runtimes without manual
/// configuration.
#[derive(Debug, Clone)]
pub struct TimestampInherent {
	/// Fallback slot duration in milliseconds.
	slot_duration_ms: u64,
}

impl TimestampInherent {
	/// Create a provider with an explicit fallback slot duration.
	pub fn new(slot_duration_ms: u64) -> Self {
		Self { slot_duration_ms }
	}

	/// Create with default settings for relay chains (6-second slots).
	pub fn default_relay() -> Self {
		Self::new(DEFAULT_RELAY_SLOT_DURATION_MS)
	}

	/// Create with default settings for parachains (12-second slots).
	pub fn default_para() -> Self {
		Self::new(DEFAULT_PARA_SLOT_DURATION_MS)
	}

	/// Compute the storage key for `Timestamp::Now`.
	pub(crate) fn timestamp_now_key() -> Vec<u8> {
		let pallet_hash = sp_core::twox_128(strings::storage_keys::PALLET_NAME);
		let storage_hash = sp_core::twox_128(strings::storage_keys::NOW);
		[pallet_hash.as_slice(), storage_hash.as_slice()].concat()
	}

	/// Encode the `timestamp.set(now)` call: `[pallet_index, call_index, Compact<u64>]`.
	fn encode_timestamp_set_call(pallet_index: u8, call_index: u8, timestamp: u64) -> Vec<u8> {
		let mut call = vec![pallet_index, call_index];
		call.extend(Compact(timestamp).encode());
		call
	}

	/// Wrap a call as a bare inherent extrinsic:
	/// compact length prefix, version/mode byte (0x04), call data.
	pub(crate) fn encode_inherent_extrinsic(call: Vec<u8>) -> Vec<u8> {
		let mut extrinsic = vec![BARE_EXTRINSIC_VERSION];
		extrinsic.extend(call);

		let len = Compact(extrinsic.len() as u32);
		let mut result = len.encode();
		result.extend(extrinsic);
		result
	}

	/// Detect the slot duration, falling back to the configured default.
	///
	/// Detection order:
	/// 1. `AuraApi_slot_duration` runtime API
	/// 2. `Babe::ExpectedBlockTime` metadata constant
	/// 3. configured fallback
	pub(crate) async fn slot_duration(
		new_block: &Block,
		metadata: &Metadata,
		fallback: u64,
	) -> u64 {
		if let Some(duration) = new_block
			.call(strings::slot_duration::AURA_API_METHOD, &[])
			.await
			.ok()
			.and_then(|r| u64::decode(&mut r.output.as_slice()).ok())
		{
			return duration;
		}

		if let Some(duration) = Self::constant_from_metadata(
			metadata,
			strings::slot_duration::BABE_PALLET,
			strings::slot_duration::BABE_EXPECTED_BLOCK_TIME,
		) {
			return duration;
		}

		fallback
	}

	/// The conventional fallback slot duration for a runtime: 12 seconds for
	/// parachains, 6 seconds for relay chains.
	pub(crate) fn default_slot_duration_for(metadata: &Metadata) -> u64 {
		if metadata.pallet_by_name("ParachainSystem").is_some() {
			DEFAULT_PARA_SLOT_DURATION_MS
		} else {
			DEFAULT_RELAY_SLOT_DURATION_MS
		}
	}

	/// Attempt to read a u64 constant from metadata.
	fn constant_from_metadata(
		metadata: &Metadata,
		pallet_name: &str,
		constant_name: &str,
	) -> Option<u64> {
		metadata
			.pallet_by_name(pallet_name)?
			.constant_by_name(constant_name)
			.and_then(|c| u64::decode(&mut &c.value()[..]).ok())
	}

	/// Read `Timestamp::Now` from the in-progress block, falling back to the
	/// system clock when the chain has no timestamp yet (genesis or very early
	/// blocks).
	pub(crate) async fn current_timestamp(new_block: &Block) -> Result<u64, BlockBuilderError> {
		let key = Self::timestamp_now_key();

		match new_block.get(&key).await.map_err(|e| BlockBuilderError::InherentProvider {
			provider: strings::IDENTIFIER.to_string(),
			message: e.to_string(),
		})? {
			Some(value) => u64::decode(&mut value.as_ref().as_slice()).map_err(|e| {
				BlockBuilderError::InherentProvider {
					provider: strings::IDENTIFIER.to_string(),
					message: format!("{}: {}", strings::errors::DECODE_FAILED, e),
				}
			}),
			None => Ok(std::time::SystemTime::now()
				.duration_since(std::time::UNIX_EPOCH)
				.map(|d| d.as_millis() as u64)
				.unwrap_or(0)),
		}
	}
}

impl Default for TimestampInherent {
	fn default() -> Self {
		Self::default_relay()
	}
}

#[async_trait]
impl InherentProvider for TimestampInherent {
	fn identifier(&self) -> &'static str {
		strings::IDENTIFIER
	}

	async fn provide(
		&self,
		_parent: &Block,
		new_block: &Block,
		_params: &BuildBlockParams,
	) -> Result<Vec<Vec<u8>>, BlockBuilderError> {
		let metadata = new_block.metadata().await?;

		let pallet = metadata.pallet_by_name(strings::metadata::PALLET_NAME).ok_or_else(|| {
			BlockBuilderError::InherentProvider {
				provider: self.identifier().to_string(),
				message: format!(
					"{}: {}",
					strings::errors::PALLET_NOT_FOUND,
					strings::metadata::PALLET_NAME
				),
			}
		})?;

		let pallet_index = pallet.index();

		let call_variant = pallet
			.call_variant_by_name(strings::metadata::SET_CALL_NAME)
			.ok_or_else(|| BlockBuilderError::InherentProvider {
				provider: self.identifier().to_string(),
				message: format!(
					"{}: {}",
					strings::errors::CALL_NOT_FOUND,
					strings::metadata::SET_CALL_NAME
				),
			})?;

		let call_index = call_variant.index;

		let slot_duration =
			Self::slot_duration(new_block, &metadata, self.slot_duration_ms).await;
		let current_timestamp = Self::current_timestamp(new_block).await?;
		let new_timestamp = current_timestamp.saturating_add(slot_duration);

		log::debug!(
			target: "lazyfork::inherent",
			"timestamp: {current_timestamp} + {slot_duration} -> {new_timestamp}"
		);

		let call = Self::encode_timestamp_set_call(pallet_index, call_index, new_timestamp);
		let extrinsic = Self::encode_inherent_extrinsic(call);

		Ok(vec![extrinsic])
	}
}
