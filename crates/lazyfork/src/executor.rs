// SPDX-License-Identifier: GPL-3.0

//! Runtime executor using smoldot to execute Substrate runtime calls.
//!
//! This module provides [`RuntimeExecutor`], a wrapper around smoldot's executor that
//! runs Substrate runtime calls (like `Core_initialize_block`,
//! `BlockBuilder_apply_extrinsic`, etc.) against storage supplied through the
//! [`RuntimeStorage`] capability trait.
//!
//! # Design Decision: Why smoldot?
//!
//! smoldot already implements all ~50 Substrate host functions required for runtime
//! execution:
//!
//! - **Storage operations**: get, set, clear, exists, next_key
//! - **Cryptographic operations**: sr25519, ed25519, ecdsa signature verification
//! - **Hashing**: blake2, keccak, sha2, twox
//! - **Memory allocation**: heap management for the WASM runtime
//! - **Logging and debugging**: runtime log emission
//!
//! By using smoldot's `runtime_call` API, we avoid reimplementing these host
//! functions while gaining full control over storage access: every read the runtime
//! performs is routed through the caller's [`RuntimeStorage`] implementation, which
//! is how the layered fork state stays transparent to the runtime.
//!
//! # The storage capability
//!
//! The storage access object handed to a call is a capability, not a closure over
//! ambient state: the executor only sees the documented methods (`storage`,
//! `next_key`, offchain reads). [`crate::Block`] implements the trait by resolving
//! through its layer stack.

use crate::{
	error::{ExecutorError, StorageError},
	storage::StorageLayerProvider,
	strings::executor::{magic_signature, storage_prefixes},
};
use async_trait::async_trait;
use smoldot::{
	executor::{
		self,
		host::{Config as HostConfig, HostVmPrototype},
		runtime_call::{self, OffchainContext, RuntimeCall},
		storage_diff::TrieDiff,
		vm::{ExecHint, HeapPages},
	},
	trie::{TrieEntryVersion, bytes_to_nibbles, nibbles_to_bytes_suffix_extend},
};
use std::{collections::BTreeMap, iter, iter::Once, sync::Arc};

/// Storage access capability handed to the executor for one runtime call.
///
/// Implementations resolve reads against whatever state the caller wants the
/// runtime to observe; the executor never learns about storage layering.
#[async_trait]
pub trait RuntimeStorage: Send + Sync {
	/// Read a storage value.
	async fn storage(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

	/// The first key under `prefix` strictly greater than `key`.
	async fn next_key(
		&self,
		prefix: &[u8],
		key: &[u8],
	) -> Result<Option<Vec<u8>>, StorageError>;

	/// Read an offchain storage value. Defaults to absent.
	async fn offchain_storage(&self, _key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
		Ok(None)
	}
}

#[async_trait]
impl RuntimeStorage for StorageLayerProvider {
	async fn storage(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
		Ok(self.get(key, true).await?.map(|v| v.as_ref().clone()))
	}

	async fn next_key(
		&self,
		prefix: &[u8],
		key: &[u8],
	) -> Result<Option<Vec<u8>>, StorageError> {
		Ok(self.keys_paged(prefix, 1, key).await?.into_iter().next())
	}
}

/// Signature mock mode for testing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignatureMockMode {
	/// No mock - verify all signatures normally.
	#[default]
	None,
	/// Accept signatures starting with magic bytes `0xdeadbeef` (padded with `0xcd`).
	///
	/// Lets callers impersonate any account for testing purposes. Real signatures
	/// are still verified normally; only magic signatures bypass verification.
	MagicSignature,
	/// Accept all signatures as valid.
	AlwaysValid,
}

/// Result of a runtime call execution.
#[derive(Debug, Clone)]
pub struct RuntimeCallResult {
	/// The output bytes returned by the runtime function.
	pub output: Vec<u8>,
	/// Storage changes made during execution.
	///
	/// Each entry is `(key, value)` where `value` is `None` for deletions.
	pub storage_diff: Vec<(Vec<u8>, Option<Vec<u8>>)>,
	/// Offchain storage changes made during execution.
	pub offchain_storage_diff: Vec<(Vec<u8>, Option<Vec<u8>>)>,
	/// Log messages emitted by the runtime.
	pub logs: Vec<RuntimeLog>,
}

/// A log message emitted by the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeLog {
	/// The log message.
	pub message: String,
	/// Log level (0=error, 1=warn, 2=info, 3=debug, 4=trace).
	pub level: Option<u32>,
	/// Log target (e.g., "runtime", "pallet_balances").
	pub target: Option<String>,
}

/// Configuration for runtime execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
	/// Signature mock mode for testing.
	pub signature_mock: SignatureMockMode,
	/// Whether to allow unresolved imports in the runtime.
	pub allow_unresolved_imports: bool,
	/// Maximum log level (0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace).
	pub max_log_level: u32,
	/// Value to return for storage proof size queries.
	pub storage_proof_size: u64,
}

impl Default for ExecutorConfig {
	fn default() -> Self {
		Self {
			signature_mock: SignatureMockMode::None,
			allow_unresolved_imports: false,
			max_log_level: 3, // Info
			storage_proof_size: 0,
		}
	}
}

/// Runtime executor for executing Substrate runtime calls.
///
/// Wraps smoldot's executor to run WASM runtime code against storage supplied
/// through [`RuntimeStorage`].
///
/// # Thread Safety
///
/// `RuntimeExecutor` is `Send + Sync`. Each call creates a new VM instance, so
/// multiple calls can execute concurrently with independent storage views.
///
/// # Cloning
///
/// Cheap: the runtime code is stored in an `Arc<[u8]>`, so cloning only
/// increments a reference count.
#[derive(Clone)]
pub struct RuntimeExecutor {
	/// The WASM runtime code (shared via Arc to avoid copying large blobs).
	runtime_code: Arc<[u8]>,
	/// Number of heap pages available to the runtime.
	heap_pages: HeapPages,
	/// Execution configuration.
	config: ExecutorConfig,
}

impl RuntimeExecutor {
	/// Create a new executor with runtime WASM code.
	///
	/// # Arguments
	///
	/// * `runtime_code` - The WASM runtime code (can be zstd-compressed).
	/// * `heap_pages` - Number of heap pages. Use `None` for the default.
	///
	/// # Errors
	///
	/// Returns an error if the WASM code is invalid.
	pub fn new(
		runtime_code: impl Into<Arc<[u8]>>,
		heap_pages: Option<u32>,
	) -> Result<Self, ExecutorError> {
		let runtime_code: Arc<[u8]> = runtime_code.into();
		let heap_pages = heap_pages.map(HeapPages::from).unwrap_or(executor::DEFAULT_HEAP_PAGES);

		// Validate the WASM code by creating a prototype
		let _prototype = HostVmPrototype::new(HostConfig {
			module: &runtime_code,
			heap_pages,
			exec_hint: ExecHint::ValidateAndExecuteOnce,
			allow_unresolved_imports: false,
		})?;

		Ok(Self { runtime_code, heap_pages, config: ExecutorConfig::default() })
	}

	/// Create a new executor with custom configuration.
	pub fn with_config(
		runtime_code: impl Into<Arc<[u8]>>,
		heap_pages: Option<u32>,
		config: ExecutorConfig,
	) -> Result<Self, ExecutorError> {
		let mut executor = Self::new(runtime_code, heap_pages)?;
		executor.config = config;
		Ok(executor)
	}

	/// Execute a runtime call.
	///
	/// # Arguments
	///
	/// * `method` - The runtime method to call (e.g., "Core_initialize_block").
	/// * `args` - SCALE-encoded arguments for the method.
	/// * `storage` - Storage capability for reading forked chain state.
	///
	/// # Returns
	///
	/// The call result including output bytes and storage diff.
	pub async fn call(
		&self,
		method: &str,
		args: &[u8],
		storage: &dyn RuntimeStorage,
	) -> Result<RuntimeCallResult, ExecutorError> {
		let vm_proto = HostVmPrototype::new(HostConfig {
			module: &self.runtime_code,
			heap_pages: self.heap_pages,
			exec_hint: ExecHint::ValidateAndExecuteOnce,
			allow_unresolved_imports: self.config.allow_unresolved_imports,
		})?;

		let mut vm = runtime_call::run(runtime_call::Config {
			virtual_machine: vm_proto,
			function_to_call: method,
			parameter: iter::once(args),
			storage_main_trie_changes: TrieDiff::default(),
			max_log_level: self.config.max_log_level,
			calculate_trie_changes: false,
			storage_proof_size_behavior:
				runtime_call::StorageProofSizeBehavior::ConstantReturnValue(
					self.config.storage_proof_size,
				),
		})
		.map_err(|(err, _)| ExecutorError::StartError {
			method: method.to_string(),
			message: err.to_string(),
		})?;

		// Track changes made during execution; reads check these first so the
		// runtime observes its own writes.
		let mut storage_changes: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
		let mut offchain_storage_changes: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
		let mut logs: Vec<RuntimeLog> = Vec::new();

		loop {
			vm = match vm {
				RuntimeCall::Finished(result) => {
					return match result {
						Ok(success) => {
							success.storage_changes.storage_changes_iter_unordered().for_each(
								|(child, key, value)| {
									let prefixed_key = if let Some(child) = child {
										prefixed_child_key(
											child.iter().copied(),
											key.iter().copied(),
										)
									} else {
										key.to_vec()
									};
									storage_changes
										.insert(prefixed_key, value.map(|v| v.to_vec()));
								},
							);

							Ok(RuntimeCallResult {
								output: success.virtual_machine.value().as_ref().to_vec(),
								storage_diff: storage_changes.into_iter().collect(),
								offchain_storage_diff: offchain_storage_changes
									.into_iter()
									.collect(),
								logs,
							})
						},
						Err(err) => Err(ExecutorError::RuntimeError {
							method: method.to_string(),
							message: err.to_string(),
						}),
					};
				},

				RuntimeCall::StorageGet(req) => {
					let key = if let Some(child) = req.child_trie() {
						prefixed_child_key(
							child.as_ref().iter().copied(),
							req.key().as_ref().iter().copied(),
						)
					} else {
						req.key().as_ref().to_vec()
					};

					// Writes made earlier in this call win over the backing state.
					if let Some(value) = storage_changes.get(&key) {
						req.inject_value(
							value.as_ref().map(|v| (iter::once(v), TrieEntryVersion::V1)),
						)
					} else {
						let value = storage.storage(&key).await.map_err(|e| {
							ExecutorError::StorageError {
								key: hex::encode(&key),
								message: e.to_string(),
							}
						})?;
						let none_placeholder: Option<(Once<[u8; 0]>, TrieEntryVersion)> = None;
						match value {
							Some(value) => req.inject_value(Some((
								iter::once(value),
								TrieEntryVersion::V1,
							))),
							None => req.inject_value(none_placeholder),
						}
					}
				},

				RuntimeCall::ClosestDescendantMerkleValue(req) => {
					// We don't track merkle values - let smoldot calculate them
					req.resume_unknown()
				},

				RuntimeCall::NextKey(req) => {
					if req.branch_nodes() {
						// Root calculation - skip
						req.inject_key(None::<Vec<_>>.map(|x| x.into_iter()))
					} else {
						let prefix = if let Some(child) = req.child_trie() {
							prefixed_child_key(
								child.as_ref().iter().copied(),
								nibbles_to_bytes_suffix_extend(req.prefix()),
							)
						} else {
							nibbles_to_bytes_suffix_extend(req.prefix()).collect::<Vec<_>>()
						};

						let key = if let Some(child) = req.child_trie() {
							prefixed_child_key(
								child.as_ref().iter().copied(),
								nibbles_to_bytes_suffix_extend(req.key()),
							)
						} else {
							nibbles_to_bytes_suffix_extend(req.key()).collect::<Vec<_>>()
						};

						let next = self
							.resolve_next_key(storage, &storage_changes, &prefix, &key, req.or_equal())
							.await?;

						req.inject_key(next.map(|k| bytes_to_nibbles(k.into_iter())))
					}
				},

				RuntimeCall::SignatureVerification(req) => match self.config.signature_mock {
					SignatureMockMode::MagicSignature => {
						if is_magic_signature(req.signature().as_ref()) {
							req.resume_success()
						} else {
							req.verify_and_resume()
						}
					},
					SignatureMockMode::AlwaysValid => req.resume_success(),
					SignatureMockMode::None => req.verify_and_resume(),
				},

				RuntimeCall::OffchainStorageSet(req) => {
					offchain_storage_changes.insert(
						req.key().as_ref().to_vec(),
						req.value().map(|x| x.as_ref().to_vec()),
					);
					req.resume()
				},

				RuntimeCall::Offchain(ctx) => match ctx {
					OffchainContext::StorageGet(req) => {
						let key = req.key().as_ref().to_vec();
						let value = match offchain_storage_changes.get(&key) {
							Some(local) => local.clone(),
							None => storage.offchain_storage(&key).await.map_err(|e| {
								ExecutorError::StorageError {
									key: hex::encode(&key),
									message: e.to_string(),
								}
							})?,
						};
						req.inject_value(value)
					},
					OffchainContext::StorageSet(req) => {
						let key = req.key().as_ref().to_vec();
						let current = offchain_storage_changes.get(&key);

						let replace = match (current, req.old_value()) {
							(Some(Some(current)), Some(old)) => old.as_ref().eq(current),
							_ => true,
						};

						if replace {
							offchain_storage_changes
								.insert(key, req.value().map(|x| x.as_ref().to_vec()));
						}

						req.resume(replace)
					},
					OffchainContext::Timestamp(req) => {
						let timestamp = std::time::SystemTime::now()
							.duration_since(std::time::UNIX_EPOCH)
							.map(|d| d.as_millis() as u64)
							.unwrap_or(0);
						req.inject_timestamp(timestamp)
					},
					OffchainContext::RandomSeed(req) => {
						let seed = sp_core::blake2_256(
							&std::time::SystemTime::now()
								.duration_since(std::time::UNIX_EPOCH)
								.map(|d| d.as_nanos().to_le_bytes())
								.unwrap_or([0u8; 16]),
						);
						req.inject_random_seed(seed)
					},
					OffchainContext::SubmitTransaction(req) => {
						// Offchain-submitted transactions are not supported
						req.resume(false)
					},
				},

				RuntimeCall::LogEmit(req) => {
					use smoldot::executor::host::LogEmitInfo;

					let log = match req.info() {
						LogEmitInfo::Num(v) => {
							RuntimeLog { message: format!("{v}"), level: None, target: None }
						},
						LogEmitInfo::Utf8(v) => {
							RuntimeLog { message: v.to_string(), level: None, target: None }
						},
						LogEmitInfo::Hex(v) => {
							RuntimeLog { message: v.to_string(), level: None, target: None }
						},
						LogEmitInfo::Log { log_level, target, message } => RuntimeLog {
							message: message.to_string(),
							level: Some(log_level),
							target: Some(target.to_string()),
						},
					};
					log::debug!(
						target: "lazyfork::runtime",
						"[{}] {}",
						log.target.as_deref().unwrap_or("wasm"),
						log.message
					);
					logs.push(log);
					req.resume()
				},
			}
		}
	}

	/// Resolve a `next_key` host request against both in-call writes and the
	/// backing storage.
	///
	/// Keys written during this call must be visible to iteration, and keys
	/// deleted during this call must be skipped, so the in-call change set is
	/// merged with the capability's view.
	async fn resolve_next_key(
		&self,
		storage: &dyn RuntimeStorage,
		storage_changes: &BTreeMap<Vec<u8>, Option<Vec<u8>>>,
		prefix: &[u8],
		key: &[u8],
		or_equal: bool,
	) -> Result<Option<Vec<u8>>, ExecutorError> {
		let map_err = |e: StorageError| ExecutorError::StorageError {
			key: hex::encode(key),
			message: e.to_string(),
		};

		if or_equal && key.starts_with(prefix) {
			let exists_in_changes = matches!(storage_changes.get(key), Some(Some(_)));
			let deleted_in_changes = matches!(storage_changes.get(key), Some(None));
			if exists_in_changes {
				return Ok(Some(key.to_vec()));
			}
			if !deleted_in_changes && storage.storage(key).await.map_err(map_err)?.is_some() {
				return Ok(Some(key.to_vec()));
			}
		}

		let mut cursor = key.to_vec();
		loop {
			// Next candidate from the backing state.
			let backing = storage.next_key(prefix, &cursor).await.map_err(map_err)?;

			// Next live candidate from the in-call change set.
			let written = storage_changes
				.range::<Vec<u8>, _>((
					std::ops::Bound::Excluded(&cursor),
					std::ops::Bound::Unbounded,
				))
				.find(|(k, v)| k.starts_with(prefix) && v.is_some())
				.map(|(k, _)| k.clone());

			let candidate = match (backing, written) {
				(Some(b), Some(w)) => Some(if b <= w { b } else { w }),
				(Some(b), None) => Some(b),
				(None, Some(w)) => Some(w),
				(None, None) => None,
			};

			match candidate {
				Some(k) => {
					// A key deleted during this call is invisible; continue past it.
					if matches!(storage_changes.get(&k), Some(None)) {
						cursor = k;
						continue;
					}
					return Ok(Some(k));
				},
				None => return Ok(None),
			}
		}
	}

	/// Get the runtime version from the WASM code.
	///
	/// Reads the version from the WASM custom sections without executing any code.
	pub fn runtime_version(&self) -> Result<RuntimeVersion, ExecutorError> {
		let prototype = HostVmPrototype::new(HostConfig {
			module: &self.runtime_code,
			heap_pages: self.heap_pages,
			exec_hint: ExecHint::ValidateAndExecuteOnce,
			allow_unresolved_imports: true,
		})?;

		let version = prototype.runtime_version().decode();

		Ok(RuntimeVersion {
			spec_name: version.spec_name.to_string(),
			impl_name: version.impl_name.to_string(),
			authoring_version: version.authoring_version,
			spec_version: version.spec_version,
			impl_version: version.impl_version,
			transaction_version: version.transaction_version.unwrap_or(0),
			state_version: version.state_version.map(|v| v.into()).unwrap_or(0),
		})
	}
}

/// Runtime version information.
#[derive(Debug, Clone)]
pub struct RuntimeVersion {
	/// Spec name (e.g., "polkadot", "kusama").
	pub spec_name: String,
	/// Implementation name.
	pub impl_name: String,
	/// Authoring version.
	pub authoring_version: u32,
	/// Spec version.
	pub spec_version: u32,
	/// Implementation version.
	pub impl_version: u32,
	/// Transaction version.
	pub transaction_version: u32,
	/// State version (0 or 1).
	pub state_version: u8,
}

/// Create a prefixed key for child storage access.
fn prefixed_child_key(child: impl Iterator<Item = u8>, key: impl Iterator<Item = u8>) -> Vec<u8> {
	[storage_prefixes::DEFAULT_CHILD_STORAGE, &child.collect::<Vec<_>>(), &key.collect::<Vec<_>>()]
		.concat()
}

/// Check if a signature is a magic test signature.
///
/// Magic signatures start with `0xdeadbeef` and are padded with `0xcd`.
pub(crate) fn is_magic_signature(signature: &[u8]) -> bool {
	signature.starts_with(magic_signature::PREFIX) &&
		signature[magic_signature::PREFIX.len()..]
			.iter()
			.all(|&b| b == magic_signature::PADDING)
}

/// Build a full-length magic signature.
pub(crate) fn magic_signature_bytes() -> Vec<u8> {
	let mut signature = magic_signature::PREFIX.to_vec();
	signature.extend(std::iter::repeat_n(
		magic_signature::PADDING,
		magic_signature::SR25519_SIZE - magic_signature::PREFIX.len(),
	));
	signature
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::{SnapshotStorage, StorageLayerProvider};

	#[test]
	fn magic_signature_accepts_valid_patterns() {
		// Valid magic signatures
		assert!(is_magic_signature(&[0xde, 0xad, 0xbe, 0xef, 0xcd, 0xcd]));
		assert!(is_magic_signature(&[0xde, 0xad, 0xbe, 0xef, 0xcd, 0xcd, 0xcd, 0xcd]));
		assert!(is_magic_signature(&[0xde, 0xad, 0xbe, 0xef])); // Just prefix

		// Invalid signatures
		assert!(!is_magic_signature(&[0xde, 0xad, 0xbe, 0xef, 0xcd, 0xcd, 0xcd, 0x00]));
		assert!(!is_magic_signature(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]));
		assert!(!is_magic_signature(&[0xde, 0xad, 0xbe])); // Too short
	}

	#[test]
	fn magic_signature_bytes_is_full_length_and_valid() {
		let signature = magic_signature_bytes();
		assert_eq!(signature.len(), magic_signature::SR25519_SIZE);
		assert!(is_magic_signature(&signature));
	}

	#[test]
	fn prefixed_child_key_combines_prefix_child_and_key() {
		let child = b"child1".iter().copied();
		let key = b"key1".iter().copied();
		let result = prefixed_child_key(child, key);

		assert!(result.starts_with(storage_prefixes::DEFAULT_CHILD_STORAGE));
		assert!(result.ends_with(b"key1"));
	}

	#[test]
	fn executor_config_has_sensible_defaults() {
		let config = ExecutorConfig::default();
		assert_eq!(config.signature_mock, SignatureMockMode::None);
		assert!(!config.allow_unresolved_imports);
		assert_eq!(config.max_log_level, 3);
		assert_eq!(config.storage_proof_size, 0);
	}

	#[tokio::test]
	async fn provider_implements_runtime_storage() {
		let mut snapshot = SnapshotStorage::new();
		snapshot.insert(b"aa1".to_vec(), b"1".to_vec());
		snapshot.insert(b"aa2".to_vec(), b"2".to_vec());
		let provider = StorageLayerProvider::Snapshot(snapshot);

		let storage: &dyn RuntimeStorage = &provider;
		assert_eq!(storage.storage(b"aa1").await.unwrap(), Some(b"1".to_vec()));
		assert_eq!(storage.storage(b"zz").await.unwrap(), None);
		assert_eq!(storage.next_key(b"aa", b"aa1").await.unwrap(), Some(b"aa2".to_vec()));
		assert_eq!(storage.next_key(b"aa", b"aa2").await.unwrap(), None);
		assert_eq!(storage.offchain_storage(b"any").await.unwrap(), None);
	}
}
