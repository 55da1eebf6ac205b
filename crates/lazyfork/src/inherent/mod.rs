// SPDX-License-Identifier: GPL-3.0

//! Inherent extrinsic providers for block building.
//!
//! Inherents are special transactions that:
//! - are unsigned (no signature required),
//! - are mandatory (the block is invalid without them),
//! - are applied before regular extrinsics, in fixed provider order.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    InherentProvider Trait                       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!          ┌─────────────────────┼─────────────────────┐
//!          ▼                     ▼                     ▼
//!    ┌──────────┐          ┌──────────┐          ┌──────────┐
//!    │Timestamp │          │Parachain │          │RelayChain│
//!    │ Inherent │          │ Inherent │          │   Mock   │
//!    └──────────┘          └──────────┘          └──────────┘
//! ```

mod parachain;
pub mod relay;
pub mod relay_proof;
pub mod slot;
mod timestamp;

pub use parachain::ParachainInherent;
pub(crate) use parachain::decode_compact_len;
pub use relay::ParaInherentMock;
pub use relay_proof::ProofError;
pub use slot::{
	ConsensusType, aura_current_slot_key, babe_current_slot_key, calculate_next_slot,
	detect_consensus_type, encode_aura_slot, encode_babe_predigest,
};
pub use timestamp::TimestampInherent;

use crate::{Block, BuildBlockParams, error::BlockBuilderError};
use async_trait::async_trait;

/// Trait for creating inherent extrinsics during block building.
///
/// Providers run after `Core_initialize_block`, in list order. They may read
/// the in-progress block's state and are side-effect-free except through the
/// extrinsics they return and any storage they write onto the in-progress
/// block directly. Any provider failure aborts the whole block build.
///
/// Implementations should return an empty `Vec` if the inherent doesn't apply
/// to the current chain (e.g. parachain inherents on a relay chain).
#[async_trait]
pub trait InherentProvider: Send + Sync {
	/// Identifier for this inherent provider (for logging and error reporting).
	fn identifier(&self) -> &'static str;

	/// Synthesize inherent extrinsics for the block under construction.
	///
	/// # Arguments
	///
	/// * `parent` - The parent block being built upon
	/// * `new_block` - The in-progress block (initialized state, writable)
	/// * `params` - The build parameters, including queued cross-chain messages
	async fn provide(
		&self,
		parent: &Block,
		new_block: &Block,
		params: &BuildBlockParams,
	) -> Result<Vec<Vec<u8>>, BlockBuilderError>;
}

/// Create the default inherent providers for block building.
///
/// For parachains, `setValidationData` MUST be applied before the timestamp:
/// the validation data sets up the relay chain state the timestamp pallet
/// validates against. For relay chains, [`ParaInherentMock`] stands in for a
/// real `paras_inherent.enter` extrinsic.
///
/// # Arguments
///
/// * `is_parachain` - Whether the chain is a parachain (affects the default
///   slot duration and the provider set)
pub fn default_providers(is_parachain: bool) -> Vec<Box<dyn InherentProvider>> {
	let timestamp = if is_parachain {
		TimestampInherent::default_para()
	} else {
		TimestampInherent::default_relay()
	};

	if is_parachain {
		vec![Box::new(ParachainInherent::new()), Box::new(timestamp)]
	} else {
		vec![Box::new(ParaInherentMock::new()), Box::new(timestamp)]
	}
}
