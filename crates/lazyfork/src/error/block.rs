// SPDX-License-Identifier: GPL-3.0

//! Block error types.

use crate::error::{ExecutorError, RpcClientError, StorageError};
use subxt::config::substrate::H256;
use thiserror::Error;

/// Errors that can occur when working with blocks.
#[derive(Debug, Error)]
pub enum BlockError {
	/// RPC error while fetching block data.
	#[error("RPC error: {0}")]
	Rpc(#[from] RpcClientError),

	/// Storage layer error.
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	/// Runtime executor error.
	#[error("Executor error: {0}")]
	Executor(#[from] ExecutorError),

	/// Block not found at the specified hash.
	#[error("Block not found: {0:?}")]
	BlockHashNotFound(H256),

	/// Block not found at the specified height.
	#[error("Block not found at height {0}")]
	BlockNumberNotFound(u32),

	/// Runtime code not found in storage.
	#[error("Runtime code not found in storage")]
	RuntimeCodeNotFound,

	/// Metadata could not be decoded from the runtime.
	#[error("Failed to decode runtime metadata: {0}")]
	MetadataDecode(String),

	/// The block has no RPC client to lazily resolve remote data with.
	#[error("Block has no remote endpoint to resolve {0} from")]
	NoRemote(&'static str),

	/// Attempted to mutate or pop a transient storage layer when none was pushed.
	#[error("No transient storage layer active on this block")]
	NoTransientLayer,
}
