// SPDX-License-Identifier: GPL-3.0

//! String constants for the RPC client module.

/// RPC method names, used in error messages to identify the failing request.
pub mod methods {
	pub const CHAIN_GET_FINALIZED_HEAD: &str = "chain_getFinalizedHead";
	pub const CHAIN_GET_HEADER: &str = "chain_getHeader";
	pub const CHAIN_GET_BLOCK: &str = "chain_getBlock";
	pub const CHAIN_GET_BLOCK_HASH: &str = "chain_getBlockHash";
	pub const STATE_GET_STORAGE: &str = "state_getStorage";
	pub const STATE_QUERY_STORAGE_AT: &str = "state_queryStorageAt";
	pub const STATE_GET_KEYS_PAGED: &str = "state_getKeysPaged";
	pub const STATE_GET_METADATA: &str = "state_getMetadata";
	pub const SYSTEM_CHAIN: &str = "system_chain";
}

/// Well-known storage key names.
pub mod storage_keys {
	/// The `:code` well-known key holding the runtime WASM blob.
	pub const CODE: &str = ":code";
}
