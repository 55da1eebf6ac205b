// SPDX-License-Identifier: GPL-3.0

//! String constants for the block builder module.

/// Runtime API entry points driven during block construction.
pub mod runtime_api {
	pub const CORE_INITIALIZE_BLOCK: &str = "Core_initialize_block";
	pub const BLOCK_BUILDER_APPLY_EXTRINSIC: &str = "BlockBuilder_apply_extrinsic";
	pub const BLOCK_BUILDER_FINALIZE_BLOCK: &str = "BlockBuilder_finalize_block";
	pub const METADATA_METADATA: &str = "Metadata_metadata";
}

/// Pallet and storage item names read or written by the builder.
pub mod storage_names {
	pub const SYSTEM_PALLET: &str = "System";
	pub const PARENT_HASH: &str = "ParentHash";
	/// Nimbus-style chains gate randomness on this flag; it is cleared when
	/// reusing the previous author digest.
	pub const RANDOMNESS_PALLET: &str = "Randomness";
	pub const NOT_FIRST_BLOCK: &str = "NotFirstBlock";
}
