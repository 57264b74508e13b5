//! A deterministic, checksum-protected, passphrase-encrypted wallet key
//! store: a persistent file holding a chain-derived sequence of secp256k1
//! signing keys plus optionally-imported ones, guarded by a memory-hard
//! KDF and written through a crash-atomic primary/backup protocol.
//!
//! Entry points: [`wallet::Wallet::create`]/[`wallet::Wallet::open`] for
//! the file; [`indexer::ChainIndexer`] for the external blockchain
//! service the wallet expects its caller to supply.

pub mod address;
pub mod atomic;
pub mod chain;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod indexer;
pub mod kdf;
pub mod packer;
pub mod tx;
pub mod wallet;

pub use address::{AddressRecord, ChainIndex};
pub use error::WalletError;
pub use indexer::ChainIndexer;
pub use wallet::Wallet;
