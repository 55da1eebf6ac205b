// SPDX-License-Identifier: GPL-3.0

//! Blockchain registry error types.

use crate::error::{BlockBuilderError, BlockError, CacheError, ExecutorError, RpcClientError};
use thiserror::Error;

/// Errors that can occur when working with the blockchain registry.
#[derive(Debug, Error)]
pub enum BlockchainError {
	/// Block-related error.
	#[error(transparent)]
	Block(#[from] BlockError),

	/// Block builder error.
	#[error(transparent)]
	Builder(#[from] BlockBuilderError),

	/// Cache error.
	#[error(transparent)]
	Cache(#[from] CacheError),

	/// Executor error.
	#[error(transparent)]
	Executor(#[from] ExecutorError),

	/// RPC error.
	#[error("RPC error: {0}")]
	Rpc(#[from] RpcClientError),

	/// Concurrent block build detected - parent block changed during build.
	#[error("Concurrent block build detected: parent block changed during building")]
	ConcurrentBlockBuild,
}
