//! The address record: one entry on the deterministic key chain.
//!
//! Grounded on `rill-wallet::keys::Seed`'s zeroize discipline and
//! `other_examples/*armory*legacy_import.rs`'s field layout, adapted to
//! secp256k1/hash160. Chain extension walks forward by multiplying by a
//! single chain code shared by the whole wallet (§4.2), not a per-level
//! HMAC tweak, so a locked address can still be extended from its public
//! key and chain code alone.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, PrivKey, PubKey65, HASH160_LEN, PUBKEY_LEN};
use crate::error::CryptoError;
use crate::packer::{checksum4, verify_checksum, Reader, Writer};

/// Chain code width (shared by every address derived from one root).
pub const CHAIN_CODE_LEN: usize = 32;
/// Per-address IV width (AES-CBC block size).
pub const IV_LEN: usize = 16;
/// Raw private-key / ciphertext slot width.
const KEY_SLOT_LEN: usize = 32;
/// Deferred-derivation bookkeeping width: ancestor IV + ancestor ciphertext + depth.
const DEFERRED_SLOT_LEN: usize = IV_LEN + KEY_SLOT_LEN + 4;
/// The widest of the tagged key-state payloads; every tag zero-pads to this.
const KEY_PAYLOAD_LEN: usize = DEFERRED_SLOT_LEN;

const TAG_PLAIN: u8 = 0x00;
const TAG_ENCRYPTED: u8 = 0x01;
const TAG_DEFERRED: u8 = 0x02;
const TAG_PUBLIC_ONLY: u8 = 0x03;

/// Fixed on-disk width of one [`AddressRecord`], checksum included.
pub const ADDRESS_RECORD_LEN: usize = 1 // tag
    + PUBKEY_LEN
    + CHAIN_CODE_LEN
    + IV_LEN
    + 8 // chainIndex
    + 8 // firstSeenTime
    + 8 // firstSeenBlock
    + 8 // lastSeenTime
    + 8 // lastSeenBlock
    + KEY_PAYLOAD_LEN
    + 4; // checksum4

/// Chain-index sentinels, per spec: `-2` imported, `-1` uninitialized
/// root, `>=0` chained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainIndex {
    Imported,
    Root,
    Chained(u64),
}

impl ChainIndex {
    pub fn to_raw(self) -> i64 {
        match self {
            ChainIndex::Imported => -2,
            ChainIndex::Root => -1,
            ChainIndex::Chained(i) => i as i64,
        }
    }

    pub fn from_raw(raw: i64) -> Self {
        match raw {
            -2 => ChainIndex::Imported,
            -1 => ChainIndex::Root,
            n => ChainIndex::Chained(n as u64),
        }
    }
}

/// The ancestor pointer carried by an address whose private key could not
/// be derived while its chain of ancestors was locked (§4.6's
/// `createPrivKeyNextUnlock` bookkeeping). `ancestor_iv`/`ancestor_ciphertext`
/// record which locked ancestor this was first deferred from and `depth`
/// how many locked levels separated them; [`AddressRecord::materialize`]
/// doesn't read any of the three fields since `ChainManager` always walks
/// in ascending index order and calls it with the immediate predecessor,
/// but they stay on disk as part of the fixed record layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeferredKey {
    pub ancestor_iv: [u8; IV_LEN],
    pub ancestor_ciphertext: [u8; KEY_SLOT_LEN],
    pub depth: u32,
}

/// The private-key half of an address record. Plaintext variants zeroize
/// on drop; only [`KeyState::Encrypted`]'s ciphertext and
/// [`KeyState::Unlocked`]'s cached ciphertext ever touch disk for an
/// encrypted wallet, and [`KeyState::Plain`] for an unencrypted one.
pub enum KeyState {
    /// Unencrypted wallet: plaintext lives here permanently.
    Plain(PrivKey),
    /// Encrypted wallet, address locked: only ciphertext is held.
    Encrypted([u8; KEY_SLOT_LEN]),
    /// Encrypted wallet, address unlocked: plaintext cached next to the
    /// ciphertext it was decrypted from, so re-locking needs no key.
    Unlocked {
        plaintext: PrivKey,
        ciphertext: [u8; KEY_SLOT_LEN],
    },
    /// Chain-extended while locked: no key material, just an ancestor
    /// pointer to materialize from once unlocked.
    Deferred(DeferredKey),
    /// No private key at all (watching-only import).
    PublicOnly,
}

impl Drop for KeyState {
    fn drop(&mut self) {
        if let KeyState::Encrypted(ct) | KeyState::Unlocked { ciphertext: ct, .. } = self {
            ct.zeroize();
        }
    }
}

/// One entry on the deterministic key chain: a public key, the shared
/// chain code, per-address IV, key material in one of the states above,
/// and first/last-seen bookkeeping for the external indexer.
pub struct AddressRecord {
    pub public_key: PubKey65,
    pub chain_code: [u8; CHAIN_CODE_LEN],
    pub iv: [u8; IV_LEN],
    pub chain_index: ChainIndex,
    pub first_seen_time: u64,
    pub first_seen_block: u64,
    pub last_seen_time: u64,
    pub last_seen_block: u64,
    pub key_state: KeyState,
    /// Byte offset of this record's payload in the wallet file, filled in
    /// by the codec/atomic-update layer after a durable write (§4.4).
    pub wallet_byte_loc: Option<u64>,
}

impl AddressRecord {
    /// Build a freshly generated, unencrypted root address (chain index
    /// `-1`) from random key material.
    pub fn new_root() -> Self {
        let priv_key = PrivKey::generate();
        let public_key = priv_key.public_key();
        let mut chain_code = [0u8; CHAIN_CODE_LEN];
        {
            use rand::RngCore;
            rand::rngs::OsRng.fill_bytes(&mut chain_code);
        }
        Self {
            public_key,
            chain_code,
            iv: random_iv(),
            chain_index: ChainIndex::Root,
            first_seen_time: 0,
            first_seen_block: 0,
            last_seen_time: 0,
            last_seen_block: 0,
            key_state: KeyState::Plain(priv_key),
            wallet_byte_loc: None,
        }
    }

    pub fn hash160(&self) -> [u8; HASH160_LEN] {
        self.public_key.hash160()
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.key_state, KeyState::Encrypted(_) | KeyState::Deferred(_))
    }

    fn plaintext(&self) -> Result<&PrivKey, CryptoError> {
        match &self.key_state {
            KeyState::Plain(k) => Ok(k),
            KeyState::Unlocked { plaintext, .. } => Ok(plaintext),
            _ => Err(CryptoError::NoPrivateKey),
        }
    }

    /// Derive the next address on the chain. If this address's private
    /// key is unavailable (locked and not decryptable without `derived_key`),
    /// the child still gets a public key (via point multiplication) but
    /// carries a [`KeyState::Deferred`] pointer instead of key material.
    ///
    /// Whenever `derived_key` is supplied the child is handed back already
    /// encrypted ([`KeyState::Unlocked`], which carries both the plaintext
    /// and its ciphertext) rather than [`KeyState::Plain`] — an encrypted
    /// wallet's freshly derived addresses must never serialize to a raw
    /// private key on disk.
    pub fn extend_chain(&self, derived_key: Option<&[u8; 32]>) -> Result<AddressRecord, CryptoError> {
        let child_index = match self.chain_index {
            ChainIndex::Root => 0u64,
            ChainIndex::Chained(i) => i + 1,
            ChainIndex::Imported => return Err(CryptoError::InvalidPrivateKey),
        };
        let child_public_key = self.public_key.extend_chain(&self.chain_code)?;

        let child_plaintext = match (&self.key_state, derived_key) {
            (KeyState::Plain(parent), _) => Some(parent.extend_chain(&self.chain_code)?),
            (KeyState::Unlocked { plaintext, .. }, _) => Some(plaintext.extend_chain(&self.chain_code)?),
            (KeyState::Encrypted(ciphertext), Some(key)) => {
                let parent_bytes = crypto::aes_cbc_decrypt_privkey(key, &self.iv, ciphertext);
                let parent = PrivKey::from_bytes(parent_bytes)?;
                Some(parent.extend_chain(&self.chain_code)?)
            }
            (KeyState::Encrypted(_), None) | (KeyState::Deferred(_), _) | (KeyState::PublicOnly, _) => None,
        };

        let child_iv = random_iv();
        let key_state = match child_plaintext {
            Some(plaintext) => match derived_key {
                Some(key) => {
                    let ciphertext = crypto::aes_cbc_encrypt_privkey(key, &child_iv, plaintext.as_bytes());
                    KeyState::Unlocked { plaintext, ciphertext }
                }
                None => KeyState::Plain(plaintext),
            },
            None => match &self.key_state {
                KeyState::Encrypted(ciphertext) => KeyState::Deferred(DeferredKey {
                    ancestor_iv: self.iv,
                    ancestor_ciphertext: *ciphertext,
                    depth: 1,
                }),
                KeyState::Deferred(d) => KeyState::Deferred(DeferredKey {
                    ancestor_iv: d.ancestor_iv,
                    ancestor_ciphertext: d.ancestor_ciphertext,
                    depth: d.depth + 1,
                }),
                KeyState::PublicOnly => KeyState::PublicOnly,
                KeyState::Plain(_) | KeyState::Unlocked { .. } => unreachable!("handled above"),
            },
        };

        Ok(AddressRecord {
            public_key: child_public_key,
            chain_code: self.chain_code,
            iv: child_iv,
            chain_index: ChainIndex::Chained(child_index),
            first_seen_time: 0,
            first_seen_block: 0,
            last_seen_time: 0,
            last_seen_block: 0,
            key_state,
            wallet_byte_loc: None,
        })
    }

    /// Materialize a [`KeyState::Deferred`] address given its *immediate*
    /// predecessor's plaintext key, freshly materialized or otherwise
    /// (§4.6). Callers walk the chain in ascending index order so every
    /// address is exactly one chain-code multiplication past the
    /// predecessor they hand in here, regardless of the stored `depth`
    /// bookkeeping (which records how many levels were locked when this
    /// address was first derived, not how far `materialize` should walk).
    pub fn materialize(&mut self, ancestor_plaintext: &PrivKey) -> Result<(), CryptoError> {
        if !matches!(self.key_state, KeyState::Deferred(_)) {
            return Ok(());
        }
        let key = ancestor_plaintext.extend_chain(&self.chain_code)?;
        if key.public_key() != self.public_key {
            return Err(CryptoError::VerificationFailed);
        }
        self.key_state = KeyState::Plain(key);
        Ok(())
    }

    /// Wipe cached plaintext. If only a [`KeyState::Plain`] copy exists,
    /// `derived_key` must be supplied to produce the encrypted copy first.
    /// An `Unlocked` record normally just falls back to its already-cached
    /// ciphertext, but if `derived_key` is supplied it re-encrypts the
    /// cached plaintext under that key instead — this is what lets
    /// `change_passphrase` re-key an address that was unlocked under the
    /// old passphrase moments earlier.
    pub fn lock(&mut self, derived_key: Option<&[u8; 32]>) -> Result<(), CryptoError> {
        match &self.key_state {
            KeyState::Unlocked { plaintext, ciphertext } => {
                let ciphertext = match derived_key {
                    Some(key) => crypto::aes_cbc_encrypt_privkey(key, &self.iv, plaintext.as_bytes()),
                    None => *ciphertext,
                };
                self.key_state = KeyState::Encrypted(ciphertext);
                Ok(())
            }
            KeyState::Plain(plaintext) => {
                let key = derived_key.ok_or(CryptoError::KdfAbsent)?;
                let ciphertext = crypto::aes_cbc_encrypt_privkey(key, &self.iv, plaintext.as_bytes());
                self.key_state = KeyState::Encrypted(ciphertext);
                Ok(())
            }
            KeyState::Encrypted(_) | KeyState::Deferred(_) | KeyState::PublicOnly => Ok(()),
        }
    }

    /// Decrypt the private key and recompute the public key to confirm
    /// consistency. No-op if already unlocked; errors on a deferred
    /// address (use [`materialize`](Self::materialize) instead).
    pub fn unlock(&mut self, derived_key: &[u8; 32]) -> Result<(), CryptoError> {
        match &self.key_state {
            KeyState::Unlocked { .. } | KeyState::PublicOnly => Ok(()),
            KeyState::Plain(_) => Ok(()),
            KeyState::Encrypted(ciphertext) => {
                let bytes = crypto::aes_cbc_decrypt_privkey(derived_key, &self.iv, ciphertext);
                let plaintext = PrivKey::from_bytes(bytes)?;
                if plaintext.public_key() != self.public_key {
                    return Err(CryptoError::VerificationFailed);
                }
                self.key_state = KeyState::Unlocked {
                    plaintext,
                    ciphertext: *ciphertext,
                };
                Ok(())
            }
            KeyState::Deferred(_) => Err(CryptoError::NoPrivateKey),
        }
    }

    /// Sign a 32-byte message hash. Requires a plaintext key to be present.
    pub fn sign(&self, message_hash: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
        Ok(self.plaintext()?.sign_der(message_hash))
    }

    /// Re-derive the public key from the decrypted private key and check
    /// it against the stored one; this is the address's half of passphrase
    /// verification (§4.2's `verifyEncryptionKey`).
    pub fn verify_encryption_key(&self, derived_key: &[u8; 32]) -> bool {
        let ciphertext = match &self.key_state {
            KeyState::Encrypted(ct) => ct,
            KeyState::Unlocked { ciphertext, .. } => ciphertext,
            _ => return false,
        };
        let bytes = crypto::aes_cbc_decrypt_privkey(derived_key, &self.iv, ciphertext);
        match PrivKey::from_bytes(bytes) {
            Ok(pk) => pk.public_key() == self.public_key,
            Err(_) => false,
        }
    }

    /// Serialize into the fixed [`ADDRESS_RECORD_LEN`]-byte on-disk form.
    pub fn serialize(&self) -> [u8; ADDRESS_RECORD_LEN] {
        let mut w = Writer::with_capacity(ADDRESS_RECORD_LEN - 4);

        let (tag, payload) = self.key_payload();
        w.u8(tag);
        w.bytes(&self.public_key.0);
        w.bytes(&self.chain_code);
        w.bytes(&self.iv);
        w.i64(self.chain_index.to_raw());
        w.u64(self.first_seen_time);
        w.u64(self.first_seen_block);
        w.u64(self.last_seen_time);
        w.u64(self.last_seen_block);
        w.bytes(&payload);

        let covered = w.into_vec();
        let chk = checksum4(&covered);

        let mut out = [0u8; ADDRESS_RECORD_LEN];
        out[..covered.len()].copy_from_slice(&covered);
        out[covered.len()..].copy_from_slice(&chk);
        out
    }

    /// `(tag, zero-padded KEY_PAYLOAD_LEN-byte slot)` for the current key state.
    fn key_payload(&self) -> (u8, [u8; KEY_PAYLOAD_LEN]) {
        let mut slot = [0u8; KEY_PAYLOAD_LEN];
        let tag = match &self.key_state {
            KeyState::Plain(k) => {
                slot[..KEY_SLOT_LEN].copy_from_slice(k.as_bytes());
                TAG_PLAIN
            }
            KeyState::Encrypted(ct) => {
                slot[..KEY_SLOT_LEN].copy_from_slice(ct);
                TAG_ENCRYPTED
            }
            KeyState::Unlocked { ciphertext, .. } => {
                slot[..KEY_SLOT_LEN].copy_from_slice(ciphertext);
                TAG_ENCRYPTED
            }
            KeyState::Deferred(d) => {
                slot[..IV_LEN].copy_from_slice(&d.ancestor_iv);
                slot[IV_LEN..IV_LEN + KEY_SLOT_LEN].copy_from_slice(&d.ancestor_ciphertext);
                slot[IV_LEN + KEY_SLOT_LEN..IV_LEN + KEY_SLOT_LEN + 4]
                    .copy_from_slice(&d.depth.to_le_bytes());
                TAG_DEFERRED
            }
            KeyState::PublicOnly => TAG_PUBLIC_ONLY,
        };
        (tag, slot)
    }

    /// Parse a fixed-width record, applying single-byte checksum repair.
    /// Returns the record and whether a rewrite should be scheduled.
    pub fn unserialize(block: &[u8]) -> Result<(Self, bool), CryptoError> {
        if block.len() != ADDRESS_RECORD_LEN {
            return Err(CryptoError::InvalidPublicKey);
        }
        let covered = &block[..ADDRESS_RECORD_LEN - 4];
        let mut chk = [0u8; 4];
        chk.copy_from_slice(&block[ADDRESS_RECORD_LEN - 4..]);

        let (repaired, needs_rewrite) =
            verify_checksum(covered, chk).map_err(|_| CryptoError::InvalidPublicKey)?;

        let mut r = Reader::new(&repaired);
        let tag = r.u8().map_err(|_| CryptoError::InvalidPublicKey)?;
        let pubkey_bytes: [u8; PUBKEY_LEN] = r.array().map_err(|_| CryptoError::InvalidPublicKey)?;
        let public_key = PubKey65::from_bytes(pubkey_bytes)?;
        let chain_code: [u8; CHAIN_CODE_LEN] = r.array().map_err(|_| CryptoError::InvalidPublicKey)?;
        let iv: [u8; IV_LEN] = r.array().map_err(|_| CryptoError::InvalidPublicKey)?;
        let chain_index = ChainIndex::from_raw(r.i64().map_err(|_| CryptoError::InvalidPublicKey)?);
        let first_seen_time = r.u64().map_err(|_| CryptoError::InvalidPublicKey)?;
        let first_seen_block = r.u64().map_err(|_| CryptoError::InvalidPublicKey)?;
        let last_seen_time = r.u64().map_err(|_| CryptoError::InvalidPublicKey)?;
        let last_seen_block = r.u64().map_err(|_| CryptoError::InvalidPublicKey)?;
        let payload = r.bytes(KEY_PAYLOAD_LEN).map_err(|_| CryptoError::InvalidPublicKey)?;

        let key_state = match tag {
            TAG_PLAIN => {
                let mut raw = [0u8; 32];
                raw.copy_from_slice(&payload[..KEY_SLOT_LEN]);
                KeyState::Plain(PrivKey::from_bytes(raw)?)
            }
            TAG_ENCRYPTED => {
                let mut ct = [0u8; KEY_SLOT_LEN];
                ct.copy_from_slice(&payload[..KEY_SLOT_LEN]);
                KeyState::Encrypted(ct)
            }
            TAG_DEFERRED => {
                let mut ancestor_iv = [0u8; IV_LEN];
                ancestor_iv.copy_from_slice(&payload[..IV_LEN]);
                let mut ancestor_ciphertext = [0u8; KEY_SLOT_LEN];
                ancestor_ciphertext.copy_from_slice(&payload[IV_LEN..IV_LEN + KEY_SLOT_LEN]);
                let mut depth_bytes = [0u8; 4];
                depth_bytes.copy_from_slice(&payload[IV_LEN + KEY_SLOT_LEN..IV_LEN + KEY_SLOT_LEN + 4]);
                KeyState::Deferred(DeferredKey {
                    ancestor_iv,
                    ancestor_ciphertext,
                    depth: u32::from_le_bytes(depth_bytes),
                })
            }
            TAG_PUBLIC_ONLY => KeyState::PublicOnly,
            _ => return Err(CryptoError::InvalidPublicKey),
        };

        Ok((
            Self {
                public_key,
                chain_code,
                iv,
                chain_index,
                first_seen_time,
                first_seen_block,
                last_seen_time,
                last_seen_block,
                key_state,
                wallet_byte_loc: None,
            },
            needs_rewrite,
        ))
    }
}

fn random_iv() -> [u8; IV_LEN] {
    use rand::RngCore;
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_is_fixed_width() {
        let root = AddressRecord::new_root();
        assert_eq!(root.serialize().len(), ADDRESS_RECORD_LEN);
    }

    #[test]
    fn roundtrip_plain_root() {
        let root = AddressRecord::new_root();
        let block = root.serialize();
        let (restored, repaired) = AddressRecord::unserialize(&block).unwrap();
        assert!(!repaired);
        assert_eq!(restored.public_key, root.public_key);
        assert_eq!(restored.chain_index, root.chain_index);
        assert_eq!(restored.serialize(), block);
    }

    #[test]
    fn roundtrip_repairs_single_bit_flip() {
        let root = AddressRecord::new_root();
        let mut block = root.serialize();
        block[10] ^= 0x01;
        let (restored, repaired) = AddressRecord::unserialize(&block).unwrap();
        assert!(repaired);
        assert_eq!(restored.public_key, root.public_key);
    }

    #[test]
    fn extend_chain_matches_private_and_public_paths() {
        let root = AddressRecord::new_root();
        let child = root.extend_chain(None).unwrap();
        assert_eq!(child.chain_index, ChainIndex::Chained(0));
        match &child.key_state {
            KeyState::Plain(k) => assert_eq!(k.public_key(), child.public_key),
            _ => panic!("expected plain key state from a plain root"),
        }
    }

    #[test]
    fn extend_chain_while_locked_defers() {
        let mut root = AddressRecord::new_root();
        let key = [0x42u8; 32];
        root.lock(Some(&key)).unwrap();
        let child = root.extend_chain(None).unwrap();
        assert!(matches!(child.key_state, KeyState::Deferred(_)));
    }

    #[test]
    fn lock_then_unlock_roundtrips_key() {
        let mut root = AddressRecord::new_root();
        let original_priv = match &root.key_state {
            KeyState::Plain(k) => k.as_bytes().to_owned(),
            _ => unreachable!(),
        };
        let key = [0x11u8; 32];
        root.lock(Some(&key)).unwrap();
        assert!(root.is_locked());
        root.unlock(&key).unwrap();
        match &root.key_state {
            KeyState::Unlocked { plaintext, .. } => assert_eq!(plaintext.as_bytes(), &original_priv),
            _ => panic!("expected unlocked state"),
        }
    }

    #[test]
    fn unlock_with_wrong_key_fails_consistency_check() {
        let mut root = AddressRecord::new_root();
        let key = [0x11u8; 32];
        root.lock(Some(&key)).unwrap();
        let wrong_key = [0x22u8; 32];
        assert!(root.unlock(&wrong_key).is_err());
    }

    #[test]
    fn lock_is_idempotent() {
        let mut root = AddressRecord::new_root();
        let key = [0x33u8; 32];
        root.lock(Some(&key)).unwrap();
        root.lock(Some(&key)).unwrap();
        assert!(root.is_locked());
    }

    #[test]
    fn materialize_deferred_address() {
        let mut root = AddressRecord::new_root();
        let root_priv = match &root.key_state {
            KeyState::Plain(k) => k.clone(),
            _ => unreachable!(),
        };
        let key = [0x44u8; 32];
        root.lock(Some(&key)).unwrap();
        let mut child = root.extend_chain(None).unwrap();
        assert!(matches!(child.key_state, KeyState::Deferred(_)));
        child.materialize(&root_priv).unwrap();
        match &child.key_state {
            KeyState::Plain(k) => assert_eq!(k.public_key(), child.public_key),
            _ => panic!("expected materialized plain key"),
        }
    }

    #[test]
    fn sign_requires_plaintext_key() {
        let mut root = AddressRecord::new_root();
        let key = [0x55u8; 32];
        root.lock(Some(&key)).unwrap();
        let msg = crypto::double_sha256(b"msg");
        assert!(root.sign(&msg).is_err());
        root.unlock(&key).unwrap();
        assert!(root.sign(&msg).is_ok());
    }

    #[test]
    fn verify_encryption_key_detects_wrong_passphrase_key() {
        let mut root = AddressRecord::new_root();
        let key = [0x66u8; 32];
        root.lock(Some(&key)).unwrap();
        assert!(root.verify_encryption_key(&key));
        assert!(!root.verify_encryption_key(&[0x77u8; 32]));
    }

    #[test]
    fn chain_index_raw_roundtrip() {
        assert_eq!(ChainIndex::from_raw(-2), ChainIndex::Imported);
        assert_eq!(ChainIndex::from_raw(-1), ChainIndex::Root);
        assert_eq!(ChainIndex::from_raw(7), ChainIndex::Chained(7));
        assert_eq!(ChainIndex::Chained(7).to_raw(), 7);
    }
}
