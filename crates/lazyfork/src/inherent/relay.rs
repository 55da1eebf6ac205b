// SPDX-License-Identifier: GPL-3.0

//! Relay chain inherent mocking.
//!
//! On relay chains, the `ParaInherent` pallet's `on_finalize` hook panics if
//! its `Included` storage was not set during the block:
//!
//! ```ignore
//! fn on_finalize(_: BlockNumberFor<T>) {
//!     if Included::<T>::take().is_none() {
//!         panic!("Bitfields and heads must be included every block");
//!     }
//! }
//! ```
//!
//! Instead of constructing a `paras_inherent.enter` extrinsic with proper
//! bitfields and candidates, [`ParaInherentMock`] writes `Included` directly:
//! the runtime only checks for existence, not validity. The same provider
//! drains queued upward messages into the legacy `Ump` dispatch queues, making
//! them visible to the relay runtime's next dispatch pass.

use crate::{
	Block, BuildBlockParams,
	error::BlockBuilderError,
	inherent::{InherentProvider, relay_proof::storage_map_key},
	storage::StorageValue,
	strings::inherent::relay as strings,
};
use async_trait::async_trait;
use scale::{Decode, Encode};

/// Compute the storage key for `ParaInherent::Included`.
pub fn para_inherent_included_key() -> Vec<u8> {
	let pallet_hash = sp_core::twox_128(b"ParaInherent");
	let storage_hash = sp_core::twox_128(b"Included");
	[pallet_hash.as_slice(), storage_hash.as_slice()].concat()
}

/// Relay-chain inherent mock.
///
/// Returns no extrinsics; all effects go through storage writes on the
/// in-progress block.
#[derive(Debug, Clone, Default)]
pub struct ParaInherentMock;

impl ParaInherentMock {
	/// Create a new relay inherent mock.
	pub fn new() -> Self {
		Self
	}

	/// Enqueue upward messages into the legacy `Ump` pallet's dispatch queues.
	async fn drain_upward_messages(
		&self,
		new_block: &Block,
		params: &BuildBlockParams,
	) -> Result<(), BlockBuilderError> {
		let mut entries: Vec<(Vec<u8>, Option<StorageValue>)> = Vec::new();

		let needs_dispatch_key =
			crate::inherent::relay_proof::storage_value_key(b"Ump", b"NeedsDispatch");
		let mut needs_dispatch: Vec<u32> = match new_block
			.get(&needs_dispatch_key)
			.await
			.map_err(|e| self.provider_error(e.to_string()))?
		{
			Some(raw) => Decode::decode(&mut raw.as_ref().as_slice())
				.map_err(|e| self.provider_error(format!("NeedsDispatch: {e}")))?,
			None => Vec::new(),
		};

		for (para_id, messages) in &params.upward_messages {
			if messages.is_empty() {
				continue;
			}

			let queue_key = storage_map_key(b"Ump", b"RelayDispatchQueues", &para_id.encode());
			let mut queue: Vec<Vec<u8>> = match new_block
				.get(&queue_key)
				.await
				.map_err(|e| self.provider_error(e.to_string()))?
			{
				Some(raw) => Decode::decode(&mut raw.as_ref().as_slice())
					.map_err(|e| self.provider_error(format!("RelayDispatchQueues: {e}")))?,
				None => Vec::new(),
			};
			queue.extend(messages.iter().cloned());

			let size_key =
				storage_map_key(b"Ump", b"RelayDispatchQueueSize", &para_id.encode());
			let count = queue.len() as u32;
			let total: u32 = queue.iter().map(|m| m.len() as u32).sum();

			entries.push((queue_key, Some(StorageValue::value(queue.encode()))));
			entries.push((size_key, Some(StorageValue::value((count, total).encode()))));

			if let Err(pos) = needs_dispatch.binary_search(para_id) {
				needs_dispatch.insert(pos, *para_id);
			}
		}

		entries.push((needs_dispatch_key, Some(StorageValue::value(needs_dispatch.encode()))));

		new_block.set_storage(entries).await.map_err(|e| self.provider_error(e.to_string()))
	}

	fn provider_error(&self, message: String) -> BlockBuilderError {
		BlockBuilderError::InherentProvider {
			provider: self.identifier().to_string(),
			message,
		}
	}
}

#[async_trait]
impl InherentProvider for ParaInherentMock {
	fn identifier(&self) -> &'static str {
		strings::IDENTIFIER
	}

	async fn provide(
		&self,
		_parent: &Block,
		new_block: &Block,
		params: &BuildBlockParams,
	) -> Result<Vec<Vec<u8>>, BlockBuilderError> {
		let metadata = new_block.metadata().await?;

		if metadata.pallet_by_name(strings::metadata::PARA_INHERENT_PALLET).is_none() {
			// Not a relay chain runtime.
			return Ok(vec![]);
		}

		// `Included` is an existence flag; `()` encodes to the empty value.
		new_block
			.set_storage(vec![(
				para_inherent_included_key(),
				Some(StorageValue::value(().encode())),
			)])
			.await
			.map_err(|e| self.provider_error(e.to_string()))?;

		if !params.upward_messages.is_empty() {
			if metadata.pallet_by_name(strings::metadata::UMP_PALLET).is_some() {
				self.drain_upward_messages(new_block, params).await?;
			} else {
				log::warn!(
					target: "lazyfork::inherent",
					"runtime has no Ump pallet; dropping {} queued upward message origin(s)",
					params.upward_messages.len()
				);
			}
		}

		Ok(vec![])
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn para_inherent_included_key_is_32_bytes() {
		let key = para_inherent_included_key();
		// twox_128 produces 16 bytes, so pallet + storage = 32 bytes
		assert_eq!(key.len(), 32);
	}

	#[test]
	fn para_inherent_included_key_is_deterministic() {
		let key1 = para_inherent_included_key();
		let key2 = para_inherent_included_key();
		assert_eq!(key1, key2);
	}

	#[test]
	fn identifier_matches_pallet_name() {
		let provider = ParaInherentMock::new();
		assert_eq!(provider.identifier(), "ParaInherent");
	}
}
