// SPDX-License-Identifier: GPL-3.0

//! Well-known dev accounts and encoding helpers for exercising forks.
//!
//! These are the standard Substrate dev accounts (derived from the `//Alice`
//! style dev seeds) plus the storage-key and extrinsic encoding helpers used
//! throughout the test suites. They are part of the public API because a local
//! fork is usually driven with exactly these accounts.

use scale::{Compact, Encode};

/// Well-known dev account: Alice.
pub const ALICE: [u8; 32] = [
	0xd4, 0x35, 0x93, 0xc7, 0x15, 0xfd, 0xd3, 0x1c, 0x61, 0x14, 0x1a, 0xbd, 0x04, 0xa9, 0x9f, 0xd6,
	0x82, 0x2c, 0x85, 0x58, 0x85, 0x4c, 0xcd, 0xe3, 0x9a, 0x56, 0x84, 0xe7, 0xa5, 0x6d, 0xa2, 0x7d,
];

/// Well-known dev account: Bob.
pub const BOB: [u8; 32] = [
	0x8e, 0xaf, 0x04, 0x15, 0x16, 0x87, 0x73, 0x63, 0x26, 0xc9, 0xfe, 0xa1, 0x7e, 0x25, 0xfc, 0x52,
	0x87, 0x61, 0x36, 0x93, 0xc9, 0x12, 0x90, 0x9c, 0xb2, 0x26, 0xaa, 0x47, 0x94, 0xf2, 0x6a, 0x48,
];

/// Well-known dev account: Charlie.
pub const CHARLIE: [u8; 32] = [
	0x90, 0xb5, 0xab, 0x20, 0x5c, 0x69, 0x74, 0xc9, 0xea, 0x84, 0x1b, 0xe6, 0x88, 0x86, 0x46, 0x33,
	0xdc, 0x9c, 0xa8, 0xa3, 0x57, 0x84, 0x3e, 0xea, 0xcf, 0x23, 0x14, 0x64, 0x99, 0x65, 0xfe, 0x22,
];

/// Compute the `System::Account` storage key for an account.
///
/// The key format is
/// `twox128("System") ++ twox128("Account") ++ blake2_128(account) ++ account`
/// (a Blake2_128Concat map).
pub fn account_storage_key(account: &[u8; 32]) -> Vec<u8> {
	let mut key = Vec::new();
	key.extend(sp_core::twox_128(b"System"));
	key.extend(sp_core::twox_128(b"Account"));
	key.extend(sp_core::blake2_128(account));
	key.extend(account);
	key
}

/// Decode the free balance out of an encoded `AccountInfo`.
///
/// `AccountData` sits at offset 16 (after nonce, consumers, providers,
/// sufficients), and its first field is the free balance.
pub fn decode_free_balance(data: &[u8]) -> u128 {
	const ACCOUNT_DATA_OFFSET: usize = 16;
	u128::from_le_bytes(
		data[ACCOUNT_DATA_OFFSET..ACCOUNT_DATA_OFFSET + 16]
			.try_into()
			.expect("need 16 bytes for u128"),
	)
}

/// Encode a `Balances::transfer_keep_alive` call to a 32-byte account.
///
/// # Arguments
///
/// * `pallet_index`/`call_index` - looked up from metadata by the caller
/// * `dest` - recipient account
/// * `amount` - transfer amount
pub fn encode_transfer_call(
	pallet_index: u8,
	call_index: u8,
	dest: &[u8; 32],
	amount: u128,
) -> Vec<u8> {
	let mut call = vec![pallet_index, call_index];
	call.push(0x00); // MultiAddress::Id
	call.extend(dest);
	call.extend(Compact(amount).encode());
	call
}
