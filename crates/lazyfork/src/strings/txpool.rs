// SPDX-License-Identifier: GPL-3.0

//! String constants for the transaction pool module.

/// Runtime API entry points used by the pool.
pub mod runtime_api {
	pub const TAGGED_TRANSACTION_QUEUE_VALIDATE: &str =
		"TaggedTransactionQueue_validate_transaction";
}

/// Transaction source discriminants for `validate_transaction`.
pub mod transaction_source {
	/// Transaction received from an external source (RPC submission).
	pub const EXTERNAL: u8 = 0x02;
}

/// Pallet and storage names inspected after message-bearing builds.
pub mod message_queue {
	pub const PALLET_NAME: &str = "MessageQueue";
	pub const PALLET_KEY: &[u8] = b"MessageQueue";
	pub const BOOK_STATE_FOR: &[u8] = b"BookStateFor";
}
