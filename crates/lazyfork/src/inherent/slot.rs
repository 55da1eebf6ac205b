// SPDX-License-Identifier: GPL-3.0

//! Slot calculation utilities for block building.
//!
//! Computing the next block's consensus digest needs to know which scheme the
//! chain runs and what the next slot number is. This module detects the scheme
//! from runtime metadata and provides the slot math and digest payload
//! encoders.

use scale::Encode;
use subxt::Metadata;

/// Consensus scheme detected from runtime metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusType {
	/// Aura (Authority Round): fixed-interval slots.
	///
	/// Uses `PreRuntime(*b"aura", slot)` digest items.
	Aura,
	/// Babe: randomized slot assignment.
	///
	/// Uses `PreRuntime(*b"BABE", predigest)` digest items.
	Babe,
	/// Nimbus-style author continuity: the author digest is carried over from
	/// block to block rather than derived from a slot.
	Nimbus,
	/// Unknown or no slot-based consensus; the digest passes through unchanged.
	Unknown,
}

/// Pallet name for Aura consensus.
const AURA_PALLET: &str = "Aura";

/// Pallet name for Babe consensus.
const BABE_PALLET: &str = "Babe";

/// Pallet name for nimbus author tracking.
const AUTHOR_INHERENT_PALLET: &str = "AuthorInherent";

/// Compute the storage key for `Aura::CurrentSlot`.
pub fn aura_current_slot_key() -> Vec<u8> {
	let pallet_hash = sp_core::twox_128(b"Aura");
	let storage_hash = sp_core::twox_128(b"CurrentSlot");
	[pallet_hash.as_slice(), storage_hash.as_slice()].concat()
}

/// Compute the storage key for `Babe::CurrentSlot`.
pub fn babe_current_slot_key() -> Vec<u8> {
	let pallet_hash = sp_core::twox_128(b"Babe");
	let storage_hash = sp_core::twox_128(b"CurrentSlot");
	[pallet_hash.as_slice(), storage_hash.as_slice()].concat()
}

/// Detect the consensus scheme from runtime metadata.
///
/// # Detection Order
///
/// 1. `Aura` pallet -> [`ConsensusType::Aura`]
/// 2. `Babe` pallet -> [`ConsensusType::Babe`]
/// 3. `AuthorInherent` pallet -> [`ConsensusType::Nimbus`]
/// 4. Otherwise -> [`ConsensusType::Unknown`]
pub fn detect_consensus_type(metadata: &Metadata) -> ConsensusType {
	if metadata.pallet_by_name(AURA_PALLET).is_some() {
		ConsensusType::Aura
	} else if metadata.pallet_by_name(BABE_PALLET).is_some() {
		ConsensusType::Babe
	} else if metadata.pallet_by_name(AUTHOR_INHERENT_PALLET).is_some() {
		ConsensusType::Nimbus
	} else {
		ConsensusType::Unknown
	}
}

/// Calculate the next slot number from the current timestamp and slot duration.
///
/// `next_slot = (current_timestamp + slot_duration) / slot_duration`: the slot
/// the next block lands in, given time advances by one slot duration.
///
/// # Panics
///
/// Panics if `slot_duration_ms` is zero.
pub fn calculate_next_slot(current_timestamp_ms: u64, slot_duration_ms: u64) -> u64 {
	assert!(slot_duration_ms > 0, "Slot duration cannot be zero");
	let next_timestamp = current_timestamp_ms.saturating_add(slot_duration_ms);
	next_timestamp / slot_duration_ms
}

/// Encode an Aura slot for use in a PreRuntime digest: plain SCALE `u64`.
pub fn encode_aura_slot(slot: u64) -> Vec<u8> {
	slot.encode()
}

/// Encode a Babe PreDigest for use in a PreRuntime digest.
///
/// Produces a `SecondaryPlain` pre-digest, which needs no VRF output; suitable
/// for forked execution where the real author's VRF keys are unavailable.
///
/// # Babe PreDigest Format
///
/// ```text
/// enum PreDigest {
///     Primary(PrimaryPreDigest),               // index 1
///     SecondaryPlain(SecondaryPlainPreDigest), // index 2
///     SecondaryVRF(SecondaryVRFPreDigest),     // index 3
/// }
///
/// struct SecondaryPlainPreDigest {
///     authority_index: u32,
///     slot: Slot, // u64
/// }
/// ```
pub fn encode_babe_predigest(slot: u64, authority_index: u32) -> Vec<u8> {
	const SECONDARY_PLAIN_INDEX: u8 = 2;

	let mut encoded = vec![SECONDARY_PLAIN_INDEX];
	encoded.extend(authority_index.encode());
	encoded.extend(slot.encode());
	encoded
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn calculate_next_slot_works_correctly() {
		// timestamp=12000, duration=6000 -> next_timestamp=18000, slot=3
		assert_eq!(calculate_next_slot(12_000, 6_000), 3);

		// timestamp=0, duration=6000 -> next_timestamp=6000, slot=1
		assert_eq!(calculate_next_slot(0, 6_000), 1);

		// timestamp=5999, duration=6000 -> next_timestamp=11999, slot=1
		assert_eq!(calculate_next_slot(5_999, 6_000), 1);

		// timestamp=6000, duration=6000 -> next_timestamp=12000, slot=2
		assert_eq!(calculate_next_slot(6_000, 6_000), 2);
	}

	#[test]
	fn calculate_next_slot_saturates_on_overflow() {
		let large_timestamp = u64::MAX - 1000;
		let result = calculate_next_slot(large_timestamp, 6_000);
		assert_eq!(result, u64::MAX / 6_000);
	}

	#[test]
	#[should_panic(expected = "Slot duration cannot be zero")]
	fn calculate_next_slot_panics_on_zero_duration() {
		calculate_next_slot(12_000, 0);
	}

	#[test]
	fn encode_aura_slot_produces_u64_le() {
		let slot: u64 = 12345;
		let encoded = encode_aura_slot(slot);

		assert_eq!(encoded.len(), 8);
		assert_eq!(encoded, slot.to_le_bytes());
	}

	#[test]
	fn encode_babe_predigest_produces_correct_format() {
		let slot: u64 = 295033271;
		let authority_index: u32 = 0;
		let encoded = encode_babe_predigest(slot, authority_index);

		// variant_index (1) + authority_index (4) + slot (8)
		assert_eq!(encoded.len(), 13);
		assert_eq!(encoded[0], 2);
		assert_eq!(&encoded[1..5], &authority_index.to_le_bytes());
		assert_eq!(&encoded[5..13], &slot.to_le_bytes());
	}

	#[test]
	fn slot_storage_keys_are_32_bytes() {
		assert_eq!(aura_current_slot_key().len(), 32);
		assert_eq!(babe_current_slot_key().len(), 32);
		assert_ne!(aura_current_slot_key(), babe_current_slot_key());
	}
}
