//! Error types for the wallet store.

use thiserror::Error;

/// Errors from the secp256k1 / AES / KDF crypto layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("invalid private key bytes")]
    InvalidPrivateKey,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("AES encryption failed")]
    Encryption,
    #[error("AES decryption failed")]
    Decryption,
    #[error("no KDF parameters configured")]
    KdfAbsent,
    #[error("no plaintext private key available")]
    NoPrivateKey,
}

/// Errors from the binary packer / address-record codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer too short: need {need}, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("checksum mismatch and single-byte repair failed")]
    CorruptChecksum,
    #[error("wrong magic bytes")]
    WrongMagic,
    #[error("wrong chain magic: expected {expected:08x}, got {got:08x}")]
    WrongChainMagic { expected: u32, got: u32 },
    #[error("unsupported wallet format version: {0}")]
    UnsupportedVersion(u32),
    #[error("unsupported entry record type: {0:#04x}")]
    UnsupportedRecordType(u8),
}

/// Errors from the atomic safe-update engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AtomicUpdateError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("wallet file is missing: {0}")]
    FileMissing(String),
    #[error("wallet file busy: {0}")]
    FileBusy(String),
}

/// Top-level error type raised by every wallet-store operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Mutation that needs plaintext private keys was attempted while locked.
    #[error("wallet is locked")]
    WalletLocked,
    /// Passphrase failed verification against the root address.
    #[error("incorrect passphrase")]
    BadPassphrase,
    /// Encryption was requested but no KDF parameters are configured.
    #[error("no KDF parameters configured")]
    KdfAbsent,
    /// An address record failed checksum verification and repair.
    #[error("corrupt key data: {0}")]
    CorruptKeyData(String),
    #[error("duplicate address")]
    DuplicateAddress,
    #[error("unknown address")]
    UnknownAddress,
    #[error("cannot delete a non-imported address")]
    NonImportedDelete,
    #[error("chain index out of range: {0}")]
    ChainIndexOutOfRange(i64),
    #[error("wrong network")]
    WrongNetwork,
    #[error("unsupported record type: {0:#04x}")]
    UnsupportedRecordType(u8),
    #[error("P2SH input is missing its redeem script")]
    MissingRedeemScript,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    AtomicUpdate(#[from] AtomicUpdateError),
}

impl From<std::io::Error> for WalletError {
    fn from(e: std::io::Error) -> Self {
        WalletError::AtomicUpdate(AtomicUpdateError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_wallet_locked() {
        assert_eq!(WalletError::WalletLocked.to_string(), "wallet is locked");
    }

    #[test]
    fn from_crypto_error() {
        let e: WalletError = CryptoError::InvalidPublicKey.into();
        assert_eq!(e, WalletError::Crypto(CryptoError::InvalidPublicKey));
    }

    #[test]
    fn from_codec_error() {
        let e: WalletError = CodecError::WrongMagic.into();
        assert_eq!(e, WalletError::Codec(CodecError::WrongMagic));
    }

    #[test]
    fn clone_and_eq() {
        let e1 = WalletError::ChainIndexOutOfRange(5);
        let e2 = e1.clone();
        assert_eq!(e1, e2);
    }
}
