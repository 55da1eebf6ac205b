// SPDX-License-Identifier: GPL-3.0

//! String constants for the executor module.

/// Magic signature bytes for signature mocking.
pub mod magic_signature {
	/// Magic signatures start with these bytes.
	pub const PREFIX: &[u8] = &[0xde, 0xad, 0xbe, 0xef];
	/// Remaining bytes are padded with this value.
	pub const PADDING: u8 = 0xcd;
	/// Size of an sr25519 signature in bytes.
	pub const SR25519_SIZE: usize = 64;
}

/// Storage key prefixes used by the executor.
pub mod storage_prefixes {
	/// Prefix for default child storage keys.
	pub const DEFAULT_CHILD_STORAGE: &[u8] = b":child_storage:default:";
}
