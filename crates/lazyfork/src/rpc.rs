// SPDX-License-Identifier: GPL-3.0

//! RPC client wrapper for connecting to live Polkadot SDK chains.
//!
//! Provides fork-specific RPC functionality for lazy-loading storage from live chains.
//!
//! # Design Decision: Why This Wrapper Exists
//!
//! This module wraps subxt's [`LegacyRpcMethods`], which means we are duplicating
//! some of subxt's API surface. We could use `LegacyRpcMethods` directly throughout
//! the codebase, but this layer buys us:
//!
//! 1. **Focused API surface**: only the requests the fork core needs, all keyed by a
//!    fixed historical block hash for determinism.
//! 2. **Ergonomic error handling**: [`RpcClientError`] names the failing method
//!    instead of surfacing generic subxt errors.
//! 3. **Convenience methods**: [`ForkRpcClient::runtime_code`] encapsulates the
//!    `:code` well-known key lookup.
//! 4. **Insulation from subxt internals**: API churn in subxt only touches this file.
//!
//! # Why Legacy RPCs?
//!
//! The legacy `state_*`/`chain_*` methods use plain request/response patterns and are
//! supported by every Polkadot SDK node, whereas the `chainHead_v1_*` spec requires
//! subscription lifecycle management that adds nothing for querying one historical
//! block. This decision should be revisited if endpoints start dropping legacy RPCs.

use crate::{
	error::rpc::RpcClientError,
	strings::rpc::{methods, storage_keys},
};
use subxt::{
	SubstrateConfig,
	backend::legacy::{LegacyRpcMethods, rpc_methods::NumberOrHex},
	config::substrate::H256,
	ext::codec::Encode,
};
use url::Url;

/// The header type used by all chains this client talks to.
pub type ChainHeader = <SubstrateConfig as subxt::Config>::Header;

/// A block fetched from the remote chain, with extrinsics as raw bytes.
#[derive(Debug, Clone)]
pub struct RemoteBlock {
	/// The block hash.
	pub hash: H256,
	/// The decoded block header.
	pub header: ChainHeader,
	/// The block's extrinsics, opaque encoded bytes.
	pub extrinsics: Vec<Vec<u8>>,
}

impl RemoteBlock {
	/// The SCALE-encoded header bytes.
	pub fn encoded_header(&self) -> Vec<u8> {
		self.header.encode()
	}
}

/// RPC client wrapper for fork operations.
///
/// Wraps subxt's [`LegacyRpcMethods`] to provide a focused API for fetching state
/// from live Polkadot SDK chains. See the module-level documentation for why this
/// wrapper exists rather than using `LegacyRpcMethods` directly.
///
/// # Example
///
/// ```ignore
/// use lazyfork::ForkRpcClient;
///
/// let client = ForkRpcClient::connect(&"wss://rpc.polkadot.io".parse()?).await?;
/// let block_hash = client.finalized_head().await?;
/// let storage_value = client.storage(&key, block_hash).await?;
/// ```
#[derive(Clone, Debug)]
pub struct ForkRpcClient {
	legacy: LegacyRpcMethods<SubstrateConfig>,
	endpoint: Url,
}

impl ForkRpcClient {
	/// Connect to a live Polkadot SDK chain.
	///
	/// # Arguments
	/// * `endpoint` - WebSocket URL of the chain's RPC endpoint (e.g., `wss://rpc.polkadot.io`)
	pub async fn connect(endpoint: &Url) -> Result<Self, RpcClientError> {
		let client = subxt::backend::rpc::RpcClient::from_url(endpoint.as_str()).await.map_err(
			|e| RpcClientError::ConnectionFailed {
				endpoint: endpoint.to_string(),
				message: e.to_string(),
			},
		)?;

		let legacy = LegacyRpcMethods::new(client);

		Ok(Self { legacy, endpoint: endpoint.clone() })
	}

	/// Get the endpoint URL this client is connected to.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	/// Get the latest finalized block hash.
	///
	/// This is typically the starting point for forking - we fork from the latest
	/// finalized state to ensure consistency.
	pub async fn finalized_head(&self) -> Result<H256, RpcClientError> {
		self.legacy.chain_get_finalized_head().await.map_err(|e| {
			RpcClientError::RequestFailed {
				method: methods::CHAIN_GET_FINALIZED_HEAD,
				message: e.to_string(),
			}
		})
	}

	/// Get block header by hash.
	///
	/// Returns the header for the specified block, which contains the parent hash,
	/// state root, extrinsics root, and digest.
	pub async fn header(&self, hash: H256) -> Result<ChainHeader, RpcClientError> {
		self.legacy
			.chain_get_header(Some(hash))
			.await
			.map_err(|e| RpcClientError::RequestFailed {
				method: methods::CHAIN_GET_HEADER,
				message: e.to_string(),
			})?
			.ok_or_else(|| RpcClientError::InvalidResponse(format!("No header found for {hash:?}")))
	}

	/// Get a full block (header + extrinsics) by hash.
	///
	/// Returns `None` if the block does not exist on the remote chain.
	pub async fn block_by_hash(&self, hash: H256) -> Result<Option<RemoteBlock>, RpcClientError> {
		let details = self.legacy.chain_get_block(Some(hash)).await.map_err(|e| {
			RpcClientError::RequestFailed {
				method: methods::CHAIN_GET_BLOCK,
				message: e.to_string(),
			}
		})?;

		Ok(details.map(|d| RemoteBlock {
			hash,
			header: d.block.header,
			extrinsics: d.block.extrinsics.into_iter().map(|ext| ext.0.to_vec()).collect(),
		}))
	}

	/// Get a full block by number.
	///
	/// Returns `None` if no block exists at that height.
	pub async fn block_by_number(
		&self,
		number: u32,
	) -> Result<Option<RemoteBlock>, RpcClientError> {
		match self.block_hash_at(number).await? {
			Some(hash) => self.block_by_hash(hash).await,
			None => Ok(None),
		}
	}

	/// Get the block hash at a specific height.
	///
	/// Returns `None` if no block exists at that height.
	pub async fn block_hash_at(&self, number: u32) -> Result<Option<H256>, RpcClientError> {
		self.legacy
			.chain_get_block_hash(Some(NumberOrHex::Number(u64::from(number)).into()))
			.await
			.map_err(|e| RpcClientError::RequestFailed {
				method: methods::CHAIN_GET_BLOCK_HASH,
				message: e.to_string(),
			})
	}

	/// Get a single storage value at a specific block.
	///
	/// # Returns
	/// * `Ok(Some(value))` - Storage exists with value
	/// * `Ok(None)` - Storage key doesn't exist (empty)
	/// * `Err(_)` - RPC error
	pub async fn storage(&self, key: &[u8], at: H256) -> Result<Option<Vec<u8>>, RpcClientError> {
		self.legacy.state_get_storage(key, Some(at)).await.map_err(|e| {
			RpcClientError::RequestFailed {
				method: methods::STATE_GET_STORAGE,
				message: e.to_string(),
			}
		})
	}

	/// Get multiple storage values in a single batch request.
	///
	/// More efficient than multiple individual `storage()` calls when fetching
	/// many keys at once.
	///
	/// # Returns
	/// A vector of optional values, in the same order as the input keys.
	pub async fn storage_batch(
		&self,
		keys: &[&[u8]],
		at: H256,
	) -> Result<Vec<Option<Vec<u8>>>, RpcClientError> {
		if keys.is_empty() {
			return Ok(vec![]);
		}

		let result = self
			.legacy
			.state_query_storage_at(keys.iter().copied(), Some(at))
			.await
			.map_err(|e| RpcClientError::RequestFailed {
				method: methods::STATE_QUERY_STORAGE_AT,
				message: e.to_string(),
			})?;

		// Build a map of key -> value from the response.
		let mut changes: std::collections::HashMap<Vec<u8>, Option<Vec<u8>>> = result
			.into_iter()
			.flat_map(|change_set| {
				change_set.changes.into_iter().map(|(k, v)| {
					let key_bytes = k.0.to_vec();
					let value_bytes = v.map(|v| v.0.to_vec());
					(key_bytes, value_bytes)
				})
			})
			.collect();

		// Return values in the same order as input keys.
		// Use remove() to avoid cloning potentially large storage values.
		let values = keys.iter().map(|key| changes.remove(*key).flatten()).collect();

		Ok(values)
	}

	/// Get storage keys matching a prefix, with pagination.
	///
	/// Useful for iterating over map storage items.
	///
	/// # Arguments
	/// * `prefix` - The storage key prefix to match
	/// * `count` - Maximum number of keys to return
	/// * `start_key` - Optional key to start from (for pagination)
	/// * `at` - The block hash to query state at
	pub async fn storage_keys_paged(
		&self,
		prefix: &[u8],
		count: u32,
		start_key: Option<&[u8]>,
		at: H256,
	) -> Result<Vec<Vec<u8>>, RpcClientError> {
		self.legacy.state_get_keys_paged(prefix, count, start_key, Some(at)).await.map_err(
			|e| RpcClientError::RequestFailed {
				method: methods::STATE_GET_KEYS_PAGED,
				message: e.to_string(),
			},
		)
	}

	/// Get runtime metadata at a specific block.
	///
	/// Returns the raw metadata bytes which can be parsed using `subxt::Metadata`.
	pub async fn metadata(&self, at: H256) -> Result<Vec<u8>, RpcClientError> {
		let metadata = self.legacy.state_get_metadata(Some(at)).await.map_err(|e| {
			RpcClientError::RequestFailed {
				method: methods::STATE_GET_METADATA,
				message: e.to_string(),
			}
		})?;

		Ok(metadata.into_raw())
	}

	/// Get the runtime WASM code at a specific block.
	///
	/// This fetches the `:code` storage key which contains the runtime WASM blob.
	pub async fn runtime_code(&self, at: H256) -> Result<Vec<u8>, RpcClientError> {
		let code_key = sp_core::storage::well_known_keys::CODE;

		self.storage(code_key, at)
			.await?
			.ok_or_else(|| RpcClientError::StorageNotFound(storage_keys::CODE.to_string()))
	}

	/// Get the chain name.
	pub async fn system_chain(&self) -> Result<String, RpcClientError> {
		self.legacy.system_chain().await.map_err(|e| RpcClientError::RequestFailed {
			method: methods::SYSTEM_CHAIN,
			message: e.to_string(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_display_connection_failed() {
		let err = RpcClientError::ConnectionFailed {
			endpoint: "wss://example.com".to_string(),
			message: "connection refused".to_string(),
		};
		assert_eq!(err.to_string(), "Failed to connect to wss://example.com: connection refused");
	}

	#[test]
	fn error_display_request_failed() {
		let err = RpcClientError::RequestFailed {
			method: methods::STATE_GET_STORAGE,
			message: "connection reset".to_string(),
		};
		assert!(err.to_string().contains("state_getStorage"));
		assert!(err.to_string().contains("connection reset"));
	}

	#[test]
	fn error_display_storage_not_found() {
		let err = RpcClientError::StorageNotFound(storage_keys::CODE.to_string());
		assert_eq!(err.to_string(), "Required storage key not found: :code");
	}
}
