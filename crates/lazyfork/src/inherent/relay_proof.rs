// SPDX-License-Identifier: GPL-3.0

//! Relay chain state proof manipulation.
//!
//! Building blocks on a forked parachain means re-anchoring the relay chain
//! state proof carried by the validation-data inherent: the parachain runtime
//! validates its own head, slot and message queues against that proof, and the
//! original proof describes the pre-fork world. The utilities here read values
//! out of a proof, apply updates, and recompute the storage root so the
//! modified proof verifies again.

use scale::{Decode, Encode};
use sp_core::Blake2Hasher;
use sp_trie::{EMPTY_PREFIX, LayoutV1, MemoryDB, StorageProof, TrieDBMutBuilder, TrieHash};
use std::collections::BTreeSet;
use subxt::config::substrate::H256;
use thiserror::Error;

/// Type alias for the relay chain trie layout.
type RelayLayout = LayoutV1<Blake2Hasher>;

/// Errors from proof manipulation.
#[derive(Debug, Error)]
pub enum ProofError {
	/// Failed to decode a value from the proof.
	#[error("Decode error: {0}")]
	Decode(String),
	/// Failed to read or modify the trie.
	#[error("Trie error: {0}")]
	Trie(String),
}

/// Storage key for `Babe::CurrentSlot` on the relay chain.
///
/// Parachains derive their own slot from this value.
pub fn relay_current_slot_key() -> Vec<u8> {
	storage_value_key(b"Babe", b"CurrentSlot")
}

/// Storage key for `Paras::Heads(para_id)` on the relay chain.
pub fn paras_heads_key(para_id: u32) -> Vec<u8> {
	storage_map_key(b"Paras", b"Heads", &para_id.encode())
}

/// Storage key for `Dmp::DownwardMessageQueueHeads(para_id)` on the relay chain.
///
/// Holds the message-queue-chain head the parachain checks injected downward
/// messages against.
pub fn dmq_mqc_head_key(para_id: u32) -> Vec<u8> {
	storage_map_key(b"Dmp", b"DownwardMessageQueueHeads", &para_id.encode())
}

/// Storage key for `Hrmp::HrmpIngressChannelsIndex(recipient)` on the relay chain.
pub fn hrmp_ingress_channels_index_key(recipient: u32) -> Vec<u8> {
	storage_map_key(b"Hrmp", b"HrmpIngressChannelsIndex", &recipient.encode())
}

/// Storage key for `Hrmp::HrmpChannels({sender, recipient})` on the relay chain.
pub fn hrmp_channel_key(sender: u32, recipient: u32) -> Vec<u8> {
	let channel_id = (sender, recipient).encode();
	storage_map_key(b"Hrmp", b"HrmpChannels", &channel_id)
}

/// `twox_128(pallet) ++ twox_128(item)`.
pub(crate) fn storage_value_key(pallet: &[u8], item: &[u8]) -> Vec<u8> {
	let pallet_hash = sp_core::twox_128(pallet);
	let item_hash = sp_core::twox_128(item);
	[pallet_hash.as_slice(), item_hash.as_slice()].concat()
}

/// `twox_128(pallet) ++ twox_128(item) ++ twox_64(arg) ++ arg` (Twox64Concat maps).
pub(crate) fn storage_map_key(pallet: &[u8], item: &[u8], arg: &[u8]) -> Vec<u8> {
	let mut key = storage_value_key(pallet, item);
	key.extend(sp_core::twox_64(arg));
	key.extend(arg);
	key
}

/// Advance a message-queue-chain head by one message.
///
/// `new_head = blake2_256(prev_head ++ sent_at ++ blake2_256(payload))`, the
/// chain the relay chain maintains per downward/HRMP queue.
pub fn advance_mqc_head(head: H256, sent_at: u32, payload: &[u8]) -> H256 {
	let payload_hash = sp_core::blake2_256(payload);
	let mut preimage = Vec::with_capacity(32 + 4 + 32);
	preimage.extend(head.as_bytes());
	preimage.extend(sent_at.encode());
	preimage.extend(payload_hash);
	H256::from(sp_core::blake2_256(&preimage))
}

/// Read a typed value from a storage proof.
pub fn read_from_proof<T: Decode>(
	proof: &StorageProof,
	root: &[u8; 32],
	key: &[u8],
) -> Result<Option<T>, ProofError> {
	match read_raw_from_proof(proof, root, key)? {
		Some(data) =>
			T::decode(&mut &data[..]).map(Some).map_err(|e| ProofError::Decode(e.to_string())),
		None => Ok(None),
	}
}

/// Read raw bytes from a storage proof without decoding.
pub fn read_raw_from_proof(
	proof: &StorageProof,
	root: &[u8; 32],
	key: &[u8],
) -> Result<Option<Vec<u8>>, ProofError> {
	use sp_trie::TrieDBBuilder;
	use trie_db::Trie;

	let db: MemoryDB<Blake2Hasher> = proof.clone().into_memory_db();
	let root_hash = TrieHash::<RelayLayout>::from_slice(root);

	let trie = TrieDBBuilder::<RelayLayout>::new(&db, &root_hash).build();

	match trie.get(key) {
		Ok(value) => Ok(value),
		Err(e) => Err(ProofError::Trie(format!("Failed to read from trie: {e:?}"))),
	}
}

/// Apply updates to a storage proof and return the new root and proof.
///
/// Builds a mutable trie over the proof's nodes, inserts the key-value pairs,
/// recomputes the root and collects the surviving nodes into a fresh proof.
pub fn modify_proof<I>(
	proof: &StorageProof,
	root: &[u8; 32],
	updates: I,
) -> Result<([u8; 32], StorageProof), ProofError>
where
	I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
{
	let mut db: MemoryDB<Blake2Hasher> = proof.clone().into_memory_db();
	let mut root_hash = TrieHash::<RelayLayout>::from_slice(root);

	{
		use sp_trie::TrieMut;
		let mut trie =
			TrieDBMutBuilder::<RelayLayout>::from_existing(&mut db, &mut root_hash).build();

		for (key, value) in updates {
			log::trace!(
				target: "lazyfork::relay_proof",
				"updating key 0x{} ({} bytes)",
				hex::encode(&key[..8.min(key.len())]),
				value.len()
			);
			trie.insert(&key, &value)
				.map_err(|e| ProofError::Trie(format!("Failed to insert: {e:?}")))?;
		}

		trie.commit();
	}

	let new_proof = extract_proof_from_db(&db);

	Ok((root_hash.into(), new_proof))
}

/// Collect all live trie nodes from a memory database into a proof.
fn extract_proof_from_db(db: &MemoryDB<Blake2Hasher>) -> StorageProof {
	use sp_trie::HashDBT;
	let mut nodes = BTreeSet::new();

	for (key, (value, rc)) in db.clone().drain() {
		if rc > 0 {
			nodes.insert(value);
		}
		if let Some(data) = db.get(&key, EMPTY_PREFIX) {
			nodes.insert(data);
		}
	}

	StorageProof::new(nodes)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn paras_heads_key_format_is_correct() {
		let para_id: u32 = 1000;
		let key = paras_heads_key(para_id);

		// prefix (32) + twox_64 hash (8) + para_id encoded (4)
		assert_eq!(key.len(), 44);

		let pallet_hash = sp_core::twox_128(b"Paras");
		let storage_hash = sp_core::twox_128(b"Heads");
		assert_eq!(&key[..16], &pallet_hash[..]);
		assert_eq!(&key[16..32], &storage_hash[..]);

		let para_id_encoded = para_id.encode();
		let expected_hash = sp_core::twox_64(&para_id_encoded);
		assert_eq!(&key[32..40], &expected_hash[..]);
		assert_eq!(&key[40..], &para_id_encoded[..]);
	}

	#[test]
	fn relay_current_slot_key_matches_babe_pallet() {
		let pallet_hash = sp_core::twox_128(b"Babe");
		let storage_hash = sp_core::twox_128(b"CurrentSlot");

		let expected: Vec<u8> = pallet_hash.iter().chain(storage_hash.iter()).copied().collect();
		assert_eq!(relay_current_slot_key(), expected);
	}

	#[test]
	fn hrmp_channel_key_uses_channel_id_encoding() {
		let key = hrmp_channel_key(2000, 1000);
		// prefix (32) + twox_64 (8) + (sender, recipient) encoded (8)
		assert_eq!(key.len(), 48);
		assert_eq!(&key[40..], (2000u32, 1000u32).encode().as_slice());
	}

	#[test]
	fn advance_mqc_head_is_deterministic_and_order_sensitive() {
		let start = H256::zero();

		let a = advance_mqc_head(start, 7, b"first");
		let b = advance_mqc_head(a, 7, b"second");

		assert_eq!(advance_mqc_head(start, 7, b"first"), a);
		assert_ne!(a, b);

		// Different order, different chain.
		let c = advance_mqc_head(start, 7, b"second");
		assert_ne!(advance_mqc_head(c, 7, b"first"), b);
	}

	#[test]
	fn modify_proof_roundtrip_reads_back_updates() {
		use sp_trie::TrieMut;

		// Build a tiny trie to act as the original proof.
		let mut db = MemoryDB::<Blake2Hasher>::new(&[0u8]);
		let mut root = TrieHash::<RelayLayout>::default();
		{
			let mut trie = TrieDBMutBuilder::<RelayLayout>::new(&mut db, &mut root).build();
			trie.insert(b"key_a", &b"value_a".encode()).unwrap();
			trie.insert(b"key_b", &b"value_b".encode()).unwrap();
			trie.commit();
		}
		let proof = extract_proof_from_db(&db);
		let root: [u8; 32] = root.into();

		// Read back an original value.
		let value: Option<Vec<u8>> = read_from_proof(&proof, &root, b"key_a").unwrap();
		assert_eq!(value, Some(b"value_a".to_vec()));

		// Modify one key and add another.
		let updates: Vec<(Vec<u8>, Vec<u8>)> = vec![
			(b"key_a".to_vec(), b"new_a".encode()),
			(b"key_c".to_vec(), b"value_c".encode()),
		];
		let (new_root, new_proof) = modify_proof(&proof, &root, updates).unwrap();

		assert_ne!(new_root, root);
		let value: Option<Vec<u8>> = read_from_proof(&new_proof, &new_root, b"key_a").unwrap();
		assert_eq!(value, Some(b"new_a".to_vec()));
		let value: Option<Vec<u8>> = read_from_proof(&new_proof, &new_root, b"key_c").unwrap();
		assert_eq!(value, Some(b"value_c".to_vec()));
		let value: Option<Vec<u8>> = read_from_proof(&new_proof, &new_root, b"key_b").unwrap();
		assert_eq!(value, Some(b"value_b".to_vec()));
	}
}
