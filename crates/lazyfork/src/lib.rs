// SPDX-License-Identifier: GPL-3.0

//! Library for forking live Polkadot SDK chains locally.
//!
//! lazyfork takes a running chain's state at an arbitrary block and forks it
//! locally: replay real storage, submit new transactions, force new blocks,
//! and simulate cross-chain messages - without a full node or validator set.
//! State is lazy-loaded from the live chain over RPC, layered behind
//! copy-on-write overlays, and executed through a WASM runtime executor.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     TxPool + Blockchain                         │
//! │      (build queue, head registry, subscriptions)                │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │               BlockBuilder + RuntimeExecutor                    │
//! │   (initialize / inherents / extrinsics / finalize via WASM)     │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Layered Storage                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  Overlays   │─▶│ Cache Layer │─▶│ Remote Layer (live RPC) │  │
//! │  │ (pending)   │  │  (SQLite)   │  │     (lazy fetch)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use lazyfork::{Blockchain, BuildMode, TxPool};
//!
//! let chain = Blockchain::fork(&"wss://rpc.polkadot.io".parse()?, None).await?;
//! let pool = TxPool::new(chain.clone(), BuildMode::Instant);
//!
//! let hash = pool.submit_extrinsic(signed_extrinsic).await?;
//! let result = pool.build_block().await?;
//! println!("built block #{}", result.block.number());
//! ```

mod block;
mod blockchain;
mod builder;
mod cache;
pub mod error;
mod executor;
mod head_state;
pub mod inherent;
mod rpc;
pub mod storage;
mod strings;
pub mod testing;
mod txpool;

pub use block::{Block, BlockForkPoint, RuntimeBundle};
pub use blockchain::{Blockchain, BuildBlockResult, ChainType, FailedExtrinsic};
pub use builder::{
	ApplyExtrinsicResult, BlockBuilder, BuilderPhase, DigestItem, DryRunResult, DryRunTarget,
	Header, build_mock_signed_extrinsic, compute_next_header, consensus_engine,
	dry_run_extrinsic, dry_run_inherents, mock_extrinsics_root,
};
pub use cache::{BlockRecord, PrefixScanProgress, StorageCache};
pub use error::{
	BlockBuilderError, BlockError, BlockchainError, CacheError, ExecutorError, RpcClientError,
	StorageError, TxPoolError,
};
pub use executor::{
	ExecutorConfig, RuntimeCallResult, RuntimeExecutor, RuntimeLog, RuntimeStorage,
	RuntimeVersion, SignatureMockMode,
};
pub use head_state::{HeadEvent, HeadState, StorageChange, SubscriptionId};
pub use inherent::{InherentProvider, default_providers};
pub use rpc::{ChainHeader, ForkRpcClient, RemoteBlock};
pub use storage::{SharedValue, SnapshotStorage, StorageLayer, StorageLayerProvider, StorageValue};
pub use txpool::{
	BuildBlockParams, BuildMode, DownwardMessage, HorizontalMessage, PoolExtrinsic,
	TransactionValidity, TransactionValidityError, TxPool, ValidTransaction,
};
