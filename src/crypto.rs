//! secp256k1 key material, hash160 identities, DER signing, and the
//! AES-CBC cipher used to encrypt private keys at rest.
//!
//! Chain extension multiplies a key by a chain code rather than adding a
//! BIP-32-style tweak: `child = chaincode * parent` (scalar multiplication
//! on the private key, EC point multiplication on the public key). This
//! is what makes watching-only chain extension possible — the parent's
//! public key and chain code are enough to compute the child's public
//! key without ever touching a private key (spec §4.2, §4.6).

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ripemd::Ripemd160;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Scalar, SecretKey, SECP256K1};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Uncompressed public key width (0x04 prefix + 32-byte X + 32-byte Y).
pub const PUBKEY_LEN: usize = 65;
/// hash160 identity width.
pub const HASH160_LEN: usize = 20;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// A 32-byte secp256k1 private key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivKey([u8; 32]);

impl PrivKey {
    pub fn generate() -> Self {
        let (sk, _pk) = SECP256K1.generate_keypair(&mut rand::rngs::OsRng);
        Self(sk.secret_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        SecretKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn secret_key(&self) -> SecretKey {
        SecretKey::from_slice(&self.0).expect("validated at construction")
    }

    pub fn public_key(&self) -> PubKey65 {
        let pk = PublicKey::from_secret_key(SECP256K1, &self.secret_key());
        PubKey65(pk.serialize_uncompressed())
    }

    /// Multiply this key's scalar by `chain_code`, producing the chained
    /// child private key (spec §4.6's deterministic chain extension).
    pub fn extend_chain(&self, chain_code: &[u8; 32]) -> Result<PrivKey, CryptoError> {
        let tweak = scalar_from_bytes(chain_code)?;
        let child = self
            .secret_key()
            .mul_tweak(&tweak)
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(PrivKey(child.secret_bytes()))
    }

    /// Sign a 32-byte message hash, returning a DER-encoded ECDSA signature.
    pub fn sign_der(&self, message_hash: &[u8; 32]) -> Vec<u8> {
        let msg = Message::from_digest(*message_hash);
        let sig = SECP256K1.sign_ecdsa(&msg, &self.secret_key());
        sig.serialize_der().to_vec()
    }
}

/// A 65-byte uncompressed secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PubKey65(pub [u8; PUBKEY_LEN]);

impl PubKey65 {
    pub fn from_bytes(bytes: [u8; PUBKEY_LEN]) -> Result<Self, CryptoError> {
        PublicKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::from_slice(&self.0).expect("validated at construction")
    }

    /// hash160 identity: `RIPEMD160(SHA256(pubkey))`.
    pub fn hash160(&self) -> [u8; HASH160_LEN] {
        hash160(&self.0)
    }

    /// Multiply this public key's point by `chain_code`, producing the
    /// chained child public key without needing the private key.
    pub fn extend_chain(&self, chain_code: &[u8; 32]) -> Result<PubKey65, CryptoError> {
        let tweak = scalar_from_bytes(chain_code)?;
        let child = self
            .public_key()
            .mul_tweak(SECP256K1, &tweak)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(PubKey65(child.serialize_uncompressed()))
    }

    pub fn verify_der(&self, message_hash: &[u8; 32], der_sig: &[u8]) -> Result<(), CryptoError> {
        let msg = Message::from_digest(*message_hash);
        let sig = Signature::from_der(der_sig).map_err(|_| CryptoError::VerificationFailed)?;
        SECP256K1
            .verify_ecdsa(&msg, &sig, &self.public_key())
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

/// `RIPEMD160(SHA256(data))`, the standard 20-byte identity hash.
pub fn hash160(data: &[u8]) -> [u8; HASH160_LEN] {
    let sha = Sha256::digest(data);
    let rmd = Ripemd160::digest(sha);
    let mut out = [0u8; HASH160_LEN];
    out.copy_from_slice(&rmd);
    out
}

/// Double-SHA256, used for transaction sighash and address-record checksums.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// Build a valid curve scalar from 32 bytes, re-hashing on the
/// (astronomically unlikely) chance the bytes exceed the curve order.
fn scalar_from_bytes(bytes: &[u8; 32]) -> Result<Scalar, CryptoError> {
    match Scalar::from_be_bytes(*bytes) {
        Ok(s) => Ok(s),
        Err(_) => {
            let rehashed = Sha256::digest(bytes);
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&rehashed);
            Scalar::from_be_bytes(arr).map_err(|_| CryptoError::InvalidPrivateKey)
        }
    }
}

/// Encrypt a 32-byte private key with AES-256-CBC, no padding (two whole
/// blocks). Matches the original format: a fixed-size ciphertext the same
/// width as the plaintext, authenticated only indirectly via
/// [`verify_encryption_key`].
pub fn aes_cbc_encrypt_privkey(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8; 32]) -> [u8; 32] {
    use aes::cipher::generic_array::GenericArray;
    let mut blocks = [
        *GenericArray::from_slice(&plaintext[0..16]),
        *GenericArray::from_slice(&plaintext[16..32]),
    ];
    let enc = Aes256CbcEnc::new(key.into(), iv.into());
    enc.encrypt_blocks_mut(&mut blocks);
    let mut out = [0u8; 32];
    out[0..16].copy_from_slice(&blocks[0]);
    out[16..32].copy_from_slice(&blocks[1]);
    out
}

/// Decrypt a 32-byte ciphertext produced by [`aes_cbc_encrypt_privkey`].
pub fn aes_cbc_decrypt_privkey(key: &[u8; 32], iv: &[u8; 16], ciphertext: &[u8; 32]) -> [u8; 32] {
    use aes::cipher::generic_array::GenericArray;
    let mut blocks = [
        *GenericArray::from_slice(&ciphertext[0..16]),
        *GenericArray::from_slice(&ciphertext[16..32]),
    ];
    let dec = Aes256CbcDec::new(key.into(), iv.into());
    dec.decrypt_blocks_mut(&mut blocks);
    let mut out = [0u8; 32];
    out[0..16].copy_from_slice(&blocks[0]);
    out[16..32].copy_from_slice(&blocks[1]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privkey_generate_unique() {
        let k1 = PrivKey::generate();
        let k2 = PrivKey::generate();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn privkey_public_key_is_uncompressed() {
        let k = PrivKey::generate();
        let pk = k.public_key();
        assert_eq!(pk.0[0], 0x04);
        assert_eq!(pk.0.len(), PUBKEY_LEN);
    }

    #[test]
    fn hash160_is_20_bytes() {
        let k = PrivKey::generate();
        let pk = k.public_key();
        assert_eq!(pk.hash160().len(), HASH160_LEN);
    }

    #[test]
    fn sign_verify_roundtrip() {
        let k = PrivKey::generate();
        let pk = k.public_key();
        let msg = double_sha256(b"a transaction");
        let sig = k.sign_der(&msg);
        assert!(pk.verify_der(&msg, &sig).is_ok());
    }

    #[test]
    fn verify_rejects_wrong_message() {
        let k = PrivKey::generate();
        let pk = k.public_key();
        let sig = k.sign_der(&double_sha256(b"one message"));
        assert!(pk.verify_der(&double_sha256(b"another message"), &sig).is_err());
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let k1 = PrivKey::generate();
        let k2 = PrivKey::generate();
        let msg = double_sha256(b"a transaction");
        let sig = k1.sign_der(&msg);
        assert!(k2.public_key().verify_der(&msg, &sig).is_err());
    }

    #[test]
    fn chain_extension_deterministic() {
        let k = PrivKey::generate();
        let chain_code = [0x42u8; 32];
        let c1 = k.extend_chain(&chain_code).unwrap();
        let c2 = k.extend_chain(&chain_code).unwrap();
        assert_eq!(c1.as_bytes(), c2.as_bytes());
    }

    #[test]
    fn chain_extension_matches_pubkey_only_extension() {
        let k = PrivKey::generate();
        let chain_code = [0x99u8; 32];
        let child_priv = k.extend_chain(&chain_code).unwrap();
        let child_pub_via_priv = child_priv.public_key();

        let parent_pub = k.public_key();
        let child_pub_via_pub = parent_pub.extend_chain(&chain_code).unwrap();

        assert_eq!(child_pub_via_priv, child_pub_via_pub);
    }

    #[test]
    fn aes_cbc_roundtrip() {
        let key = [0x01u8; 32];
        let iv = [0x02u8; 16];
        let plaintext = [0x03u8; 32];
        let ciphertext = aes_cbc_encrypt_privkey(&key, &iv, &plaintext);
        assert_ne!(ciphertext, plaintext);
        let decrypted = aes_cbc_decrypt_privkey(&key, &iv, &ciphertext);
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn double_sha256_deterministic() {
        assert_eq!(double_sha256(b"x"), double_sha256(b"x"));
    }
}
