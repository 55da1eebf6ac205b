// SPDX-License-Identifier: GPL-3.0

//! String constants for the inherent provider modules.

/// Strings for the timestamp inherent provider.
pub mod timestamp {
	/// Provider identifier for logging and error reporting.
	pub const IDENTIFIER: &str = "Timestamp";

	/// Metadata lookup names.
	pub mod metadata {
		pub const PALLET_NAME: &str = "Timestamp";
		pub const SET_CALL_NAME: &str = "set";
	}

	/// Storage key components.
	pub mod storage_keys {
		pub const PALLET_NAME: &[u8] = b"Timestamp";
		pub const NOW: &[u8] = b"Now";
	}

	/// Slot duration detection.
	pub mod slot_duration {
		pub const AURA_API_METHOD: &str = "AuraApi_slot_duration";
		pub const BABE_PALLET: &str = "Babe";
		pub const BABE_EXPECTED_BLOCK_TIME: &str = "ExpectedBlockTime";
	}

	/// Error message fragments.
	pub mod errors {
		pub const PALLET_NOT_FOUND: &str = "Pallet not found in metadata";
		pub const CALL_NOT_FOUND: &str = "Call not found in pallet";
		pub const DECODE_FAILED: &str = "Failed to decode Timestamp::Now";
	}
}

/// Strings for the parachain validation-data inherent provider.
pub mod parachain {
	/// Provider identifier for logging and error reporting.
	pub const IDENTIFIER: &str = "ParachainSystem";

	/// Metadata lookup names.
	pub mod metadata {
		pub const PALLET_NAME: &str = "ParachainSystem";
		pub const SET_VALIDATION_DATA_CALL_NAME: &str = "set_validation_data";
	}
}

/// Strings for the relay-chain inherent mock.
pub mod relay {
	/// Provider identifier for logging and error reporting.
	pub const IDENTIFIER: &str = "ParaInherent";

	/// Metadata lookup names.
	pub mod metadata {
		pub const PARA_INHERENT_PALLET: &str = "ParaInherent";
		pub const UMP_PALLET: &str = "Ump";
	}
}
