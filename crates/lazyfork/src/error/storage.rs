// SPDX-License-Identifier: GPL-3.0

//! Layered storage error types.

use crate::error::{CacheError, RpcClientError};
use thiserror::Error;

/// Errors that can occur when accessing the layered storage stack.
#[derive(Debug, Error)]
pub enum StorageError {
	/// RPC client error when fetching from the live chain.
	#[error("RPC error: {0}")]
	Rpc(#[from] RpcClientError),
	/// Cache error when storing/retrieving cached values.
	#[error("Cache error: {0}")]
	Cache(#[from] CacheError),
	/// Lock acquire error.
	#[error("Storage lock acquire error: {0}")]
	Lock(String),
}
