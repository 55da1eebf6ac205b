// SPDX-License-Identifier: GPL-3.0

//! Parachain validation-data inherent provider.
//!
//! Parachain runtimes require a `parachainSystem.setValidationData` inherent
//! carrying relay-chain validation data and a relay state proof. When forking,
//! the parent block's inherent describes the pre-fork relay world, so this
//! provider re-anchors it:
//!
//! 1. Find the `setValidationData` extrinsic in the parent block
//! 2. Decode the validation data, relay state proof and inbound messages
//! 3. Rewrite `Paras::Heads(para_id)` in the proof to the parent block header,
//!    advance the relay slot and relay parent number
//! 4. Inject queued downward/horizontal messages from the build parameters,
//!    advancing the corresponding message-queue-chain heads in the proof
//! 5. Recompute the storage root and re-encode the extrinsic
//!
//! The parachain runtime validates its head and every inbound message against
//! the proof, so each injected message must be reflected in the proof's MQC
//! heads or the inherent is rejected.

use super::relay_proof::{
	self, advance_mqc_head, dmq_mqc_head_key, hrmp_channel_key, hrmp_ingress_channels_index_key,
	paras_heads_key, relay_current_slot_key,
};
use crate::{
	Block, BuildBlockParams,
	error::BlockBuilderError,
	inherent::InherentProvider,
	strings::inherent::parachain as strings,
};
use async_trait::async_trait;
use scale::{Compact, Decode, Encode};
use sp_trie::StorageProof;
use std::collections::{BTreeMap, BTreeSet};
use subxt::config::substrate::H256;

/// Extrinsic format version for bare extrinsics (v5 - new format).
const EXTRINSIC_FORMAT_VERSION_V5: u8 = 5;
/// Extrinsic format version for bare extrinsics (v4 - legacy format).
const EXTRINSIC_FORMAT_VERSION_V4: u8 = 4;

/// How many relay slots (and relay block numbers) the fork advances per built
/// block: one 12s parachain block spans two 6s relay slots.
const RELAY_SLOT_ADVANCE: u64 = 2;

// ============================================================================
// Types for decoding/encoding the inherent data
// ============================================================================

/// Persisted validation data from the relay chain.
#[derive(Debug, Clone, Encode, Decode)]
struct PersistedValidationData {
	/// Parachain head data (parent block header).
	parent_head: Vec<u8>,
	/// Relay chain block number.
	relay_parent_number: u32,
	/// Storage root of the relay chain at `relay_parent_number`.
	relay_parent_storage_root: [u8; 32],
	/// Maximum proof-of-validity size.
	max_pov_size: u32,
}

/// Storage proof from the relay chain (a set of trie nodes).
#[derive(Debug, Clone)]
struct RelayChainStateProof {
	trie_nodes: BTreeSet<Vec<u8>>,
}

impl Encode for RelayChainStateProof {
	fn encode(&self) -> Vec<u8> {
		let nodes: Vec<Vec<u8>> = self.trie_nodes.iter().cloned().collect();
		nodes.encode()
	}
}

impl Decode for RelayChainStateProof {
	fn decode<I: scale::Input>(input: &mut I) -> Result<Self, scale::Error> {
		let nodes: Vec<Vec<u8>> = Decode::decode(input)?;
		Ok(Self { trie_nodes: nodes.into_iter().collect() })
	}
}

impl From<StorageProof> for RelayChainStateProof {
	fn from(proof: StorageProof) -> Self {
		Self { trie_nodes: proof.into_nodes() }
	}
}

impl From<RelayChainStateProof> for StorageProof {
	fn from(proof: RelayChainStateProof) -> Self {
		StorageProof::new(proof.trie_nodes)
	}
}

/// A downward message as carried inside the inherent.
#[derive(Debug, Clone, Encode, Decode)]
struct InboundDownwardMessage {
	sent_at: u32,
	msg: Vec<u8>,
}

/// An HRMP message as carried inside the inherent.
#[derive(Debug, Clone, Encode, Decode)]
struct InboundHrmpMessage {
	sent_at: u32,
	data: Vec<u8>,
}

/// The relay chain's abridged view of an HRMP channel, as stored in the proof.
#[derive(Debug, Clone, Encode, Decode)]
struct AbridgedHrmpChannel {
	max_capacity: u32,
	max_total_size: u32,
	max_message_size: u32,
	msg_count: u32,
	total_size: u32,
	mqc_head: Option<[u8; 32]>,
}

impl Default for AbridgedHrmpChannel {
	fn default() -> Self {
		Self {
			max_capacity: 1_000,
			max_total_size: 102_400,
			max_message_size: 102_400,
			msg_count: 0,
			total_size: 0,
			mqc_head: None,
		}
	}
}

/// Parsed `setValidationData` call data.
struct ParsedInherentData {
	validation_data: PersistedValidationData,
	relay_chain_state: RelayChainStateProof,
	downward_messages: Vec<InboundDownwardMessage>,
	horizontal_messages: BTreeMap<u32, Vec<InboundHrmpMessage>>,
	/// Bytes after the known fields (newer runtimes append extra data);
	/// carried through verbatim.
	remaining: Vec<u8>,
}

// ============================================================================
// ParachainInherent Provider
// ============================================================================

/// Parachain inherent provider.
///
/// Generates the `parachainSystem.setValidationData` inherent extrinsic by
/// re-anchoring the parent block's inherent to the forked chain's state.
#[derive(Debug, Clone, Default)]
pub struct ParachainInherent;

impl ParachainInherent {
	/// Create a new parachain inherent provider.
	pub fn new() -> Self {
		Self
	}

	/// Compute the storage key for `ParachainInfo::ParachainId`.
	fn parachain_id_key() -> Vec<u8> {
		let pallet_hash = sp_core::twox_128(b"ParachainInfo");
		let storage_hash = sp_core::twox_128(b"ParachainId");
		[pallet_hash.as_slice(), storage_hash.as_slice()].concat()
	}

	/// Read the parachain ID from the in-progress block's storage.
	async fn read_parachain_id(new_block: &Block) -> Option<u32> {
		let key = Self::parachain_id_key();
		match new_block.get(&key).await {
			Ok(Some(value)) => u32::decode(&mut value.as_ref().as_slice()).ok(),
			_ => None,
		}
	}

	/// Find the `setValidationData` extrinsic among the parent's extrinsics.
	fn find_validation_data_extrinsic<'a>(
		extrinsics: &'a [Vec<u8>],
		pallet_index: u8,
		call_index: u8,
	) -> Option<&'a Vec<u8>> {
		extrinsics.iter().find(|ext| {
			let Some((_len, body)) = decode_compact_len(ext) else { return false };
			if body.len() < 3 {
				return false;
			}
			let version_ok = body[0] == EXTRINSIC_FORMAT_VERSION_V4 ||
				body[0] == EXTRINSIC_FORMAT_VERSION_V5;
			version_ok && body[1] == pallet_index && body[2] == call_index
		})
	}

	/// Decode the inherent call data.
	fn parse_inherent_data(call_data: &[u8]) -> Result<ParsedInherentData, BlockBuilderError> {
		let mut cursor = call_data;

		let validation_data = PersistedValidationData::decode(&mut cursor)
			.map_err(|e| provider_error(format!("Failed to decode PersistedValidationData: {e}")))?;

		let relay_chain_state = RelayChainStateProof::decode(&mut cursor)
			.map_err(|e| provider_error(format!("Failed to decode relay_chain_state: {e}")))?;

		let downward_messages: Vec<InboundDownwardMessage> = Decode::decode(&mut cursor)
			.map_err(|e| provider_error(format!("Failed to decode downward_messages: {e}")))?;

		let horizontal_messages: BTreeMap<u32, Vec<InboundHrmpMessage>> =
			Decode::decode(&mut cursor)
				.map_err(|e| provider_error(format!("Failed to decode horizontal_messages: {e}")))?;

		Ok(ParsedInherentData {
			validation_data,
			relay_chain_state,
			downward_messages,
			horizontal_messages,
			remaining: cursor.to_vec(),
		})
	}

	/// Re-anchor the inherent: new head, advanced slot, injected messages,
	/// recomputed storage root.
	fn process_inherent(
		&self,
		ext: &[u8],
		para_id: u32,
		para_head: &[u8],
		params: &BuildBlockParams,
	) -> Result<Vec<u8>, BlockBuilderError> {
		let (_, body) = decode_compact_len(ext)
			.ok_or_else(|| provider_error("Failed to decode extrinsic length prefix".into()))?;

		// body[0] = version, body[1] = pallet, body[2] = call
		let version = body[0];
		let pallet = body[1];
		let call = body[2];
		let call_data = &body[3..];

		let parsed = Self::parse_inherent_data(call_data)?;
		let mut validation_data = parsed.validation_data;
		let proof_nodes = parsed.relay_chain_state.trie_nodes.len();
		let proof: StorageProof = parsed.relay_chain_state.into();

		log::debug!(
			target: "lazyfork::inherent",
			"re-anchoring setValidationData: relay_parent={}, proof_nodes={}, dmp={}, hrmp_senders={}",
			validation_data.relay_parent_number,
			proof_nodes,
			params.downward_messages.len(),
			params.horizontal_messages.len(),
		);

		let current_relay_slot: u64 = relay_proof::read_from_proof(
			&proof,
			&validation_data.relay_parent_storage_root,
			&relay_current_slot_key(),
		)
		.map_err(|e| provider_error(format!("Failed to read current slot from proof: {e}")))?
		.ok_or_else(|| provider_error("CurrentSlot not found in relay chain proof".into()))?;

		let new_relay_slot = current_relay_slot.saturating_add(RELAY_SLOT_ADVANCE);
		let new_relay_number =
			validation_data.relay_parent_number.saturating_add(RELAY_SLOT_ADVANCE as u32);

		let mut updates: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();

		// The runtime checks its own head in the proof at Paras::Heads(para_id);
		// point it at our parent block. HeadData is the encoded header wrapped
		// as a byte vector.
		updates.push((paras_heads_key(para_id), para_head.to_vec().encode()));
		updates.push((relay_current_slot_key(), new_relay_slot.encode()));

		// Inject queued downward messages, advancing the DMQ MQC head so the
		// runtime accepts them.
		let downward_messages = self.inject_downward_messages(
			&proof,
			&validation_data,
			para_id,
			new_relay_number,
			params,
			&mut updates,
		)?;

		// Inject queued horizontal messages, advancing each channel's MQC head
		// and keeping the ingress index consistent.
		let horizontal_messages = self.inject_horizontal_messages(
			&proof,
			&validation_data,
			para_id,
			new_relay_number,
			params,
			&mut updates,
		)?;

		let (new_root, new_proof) =
			relay_proof::modify_proof(&proof, &validation_data.relay_parent_storage_root, updates)
				.map_err(|e| provider_error(format!("Failed to modify relay proof: {e}")))?;

		validation_data.parent_head = para_head.to_vec();
		validation_data.relay_parent_number = new_relay_number;
		validation_data.relay_parent_storage_root = new_root;

		let new_relay_state: RelayChainStateProof = new_proof.into();

		let mut new_call_data = Vec::new();
		new_call_data.extend(validation_data.encode());
		new_call_data.extend(new_relay_state.encode());
		new_call_data.extend(downward_messages.encode());
		new_call_data.extend(horizontal_messages.encode());
		new_call_data.extend(&parsed.remaining);

		let mut new_body = vec![version, pallet, call];
		new_body.extend(new_call_data);

		let mut result = Compact(new_body.len() as u32).encode();
		result.extend(new_body);

		Ok(result)
	}

	fn inject_downward_messages(
		&self,
		proof: &StorageProof,
		validation_data: &PersistedValidationData,
		para_id: u32,
		sent_at: u32,
		params: &BuildBlockParams,
		updates: &mut Vec<(Vec<u8>, Vec<u8>)>,
	) -> Result<Vec<InboundDownwardMessage>, BlockBuilderError> {
		if params.downward_messages.is_empty() {
			return Ok(Vec::new());
		}

		let mqc_key = dmq_mqc_head_key(para_id);
		let mut head: H256 = relay_proof::read_from_proof::<[u8; 32]>(
			proof,
			&validation_data.relay_parent_storage_root,
			&mqc_key,
		)
		.map_err(|e| provider_error(format!("Failed to read DMQ MQC head: {e}")))?
		.map(H256::from)
		.unwrap_or_default();

		let mut messages = Vec::with_capacity(params.downward_messages.len());
		for message in &params.downward_messages {
			head = advance_mqc_head(head, sent_at, &message.msg);
			messages.push(InboundDownwardMessage { sent_at, msg: message.msg.clone() });
		}

		updates.push((mqc_key, head.as_bytes().to_vec()));
		Ok(messages)
	}

	fn inject_horizontal_messages(
		&self,
		proof: &StorageProof,
		validation_data: &PersistedValidationData,
		para_id: u32,
		sent_at: u32,
		params: &BuildBlockParams,
		updates: &mut Vec<(Vec<u8>, Vec<u8>)>,
	) -> Result<BTreeMap<u32, Vec<InboundHrmpMessage>>, BlockBuilderError> {
		let mut messages: BTreeMap<u32, Vec<InboundHrmpMessage>> = BTreeMap::new();
		if params.horizontal_messages.is_empty() {
			return Ok(messages);
		}

		let ingress_key = hrmp_ingress_channels_index_key(para_id);
		let mut ingress: Vec<u32> = relay_proof::read_from_proof(
			proof,
			&validation_data.relay_parent_storage_root,
			&ingress_key,
		)
		.map_err(|e| provider_error(format!("Failed to read HRMP ingress index: {e}")))?
		.unwrap_or_default();

		for (sender, inbound) in &params.horizontal_messages {
			if inbound.is_empty() {
				continue;
			}

			let channel_key = hrmp_channel_key(*sender, para_id);
			let mut channel: AbridgedHrmpChannel = relay_proof::read_from_proof(
				proof,
				&validation_data.relay_parent_storage_root,
				&channel_key,
			)
			.map_err(|e| provider_error(format!("Failed to read HRMP channel: {e}")))?
			.unwrap_or_default();

			let mut head = channel.mqc_head.map(H256::from).unwrap_or_default();
			let mut entry = Vec::with_capacity(inbound.len());
			for message in inbound {
				head = advance_mqc_head(head, sent_at, &message.data);
				channel.msg_count = channel.msg_count.saturating_add(1);
				channel.total_size =
					channel.total_size.saturating_add(message.data.len() as u32);
				entry.push(InboundHrmpMessage { sent_at, data: message.data.clone() });
			}
			channel.mqc_head = Some(head.0);

			updates.push((channel_key, channel.encode()));
			messages.insert(*sender, entry);

			if let Err(pos) = ingress.binary_search(sender) {
				ingress.insert(pos, *sender);
			}
		}

		updates.push((ingress_key, ingress.encode()));
		Ok(messages)
	}
}

/// Decode a compact length prefix from SCALE-encoded data.
pub(crate) fn decode_compact_len(data: &[u8]) -> Option<(u32, &[u8])> {
	if data.is_empty() {
		return None;
	}

	let first_byte = data[0];
	let mode = first_byte & 0b11;

	match mode {
		0b00 => {
			let len = (first_byte >> 2) as u32;
			Some((len, &data[1..]))
		},
		0b01 => {
			if data.len() < 2 {
				return None;
			}
			let len = (u16::from_le_bytes([data[0], data[1]]) >> 2) as u32;
			Some((len, &data[2..]))
		},
		0b10 => {
			if data.len() < 4 {
				return None;
			}
			let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) >> 2;
			Some((len, &data[4..]))
		},
		_ => None,
	}
}

fn provider_error(message: String) -> BlockBuilderError {
	BlockBuilderError::InherentProvider { provider: strings::IDENTIFIER.to_string(), message }
}

#[async_trait]
impl InherentProvider for ParachainInherent {
	fn identifier(&self) -> &'static str {
		strings::IDENTIFIER
	}

	async fn provide(
		&self,
		parent: &Block,
		new_block: &Block,
		params: &BuildBlockParams,
	) -> Result<Vec<Vec<u8>>, BlockBuilderError> {
		let metadata = new_block.metadata().await?;

		let pallet = match metadata.pallet_by_name(strings::metadata::PALLET_NAME) {
			Some(p) => p,
			// Not a parachain runtime.
			None => return Ok(vec![]),
		};

		let pallet_index = pallet.index();

		let call_variant = pallet
			.call_variant_by_name(strings::metadata::SET_VALIDATION_DATA_CALL_NAME)
			.ok_or_else(|| {
				provider_error(format!(
					"Call '{}' not found in pallet '{}'",
					strings::metadata::SET_VALIDATION_DATA_CALL_NAME,
					strings::metadata::PALLET_NAME
				))
			})?;

		let call_index = call_variant.index;

		let para_id = Self::read_parachain_id(new_block)
			.await
			.ok_or_else(|| provider_error("Failed to read ParachainId from storage".into()))?;

		let parent_extrinsics = parent.extrinsics().await?;
		let validation_ext = Self::find_validation_data_extrinsic(
			parent_extrinsics,
			pallet_index,
			call_index,
		);

		match validation_ext {
			Some(ext) => {
				let para_head = parent.header().await?;
				let processed = self.process_inherent(ext, para_id, para_head, params)?;
				Ok(vec![processed])
			},
			None => {
				log::warn!(
					target: "lazyfork::inherent",
					"no setValidationData extrinsic found in parent block {}",
					parent.number()
				);
				Ok(vec![])
			},
		}
	}
}
