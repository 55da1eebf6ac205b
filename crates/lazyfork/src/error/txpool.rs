// SPDX-License-Identifier: GPL-3.0

//! Transaction pool error types.

use crate::error::BlockchainError;
use thiserror::Error;

/// Errors that can occur when interacting with the transaction pool.
#[derive(Debug, Error)]
pub enum TxPoolError {
	/// Lock acquire error.
	#[error("TxPool lock acquire error: {0}")]
	Lock(String),

	/// The submitted extrinsic failed validation against the current head.
	#[error("Invalid transaction: {0}")]
	InvalidTransaction(String),

	/// The build worker is no longer running.
	#[error("Build worker has shut down")]
	WorkerGone,

	/// The build itself failed.
	#[error("Block build failed: {0}")]
	Build(#[from] BlockchainError),
}
