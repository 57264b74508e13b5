//! Wallet file header and entry-stream pack/unpack.
//!
//! Grounded on `other_examples/*armory*legacy_import.rs`'s fixed-offset
//! header layout (file ID, version, flags, unique ID, labels, KDF block,
//! root address slot) — adapted from `Seek`-based file reads to
//! range-indexed buffer parsing, since the atomic-update engine (C5) owns
//! the byte buffer rather than a long-held file handle (§5).

use crate::address::{AddressRecord, ADDRESS_RECORD_LEN};
use crate::crypto::HASH160_LEN;
use crate::error::{CodecError, WalletError};
use crate::kdf::{KdfParams, KDF_BLOCK_LEN};
use crate::packer::{Reader, Writer};

/// 8-byte file-kind identifier.
pub const MAGIC: [u8; 8] = *b"\xbaWALLET\x00";
/// The single wallet-format version this crate accepts (spec §1 Non-goals:
/// no version migration).
pub const FORMAT_VERSION: u32 = 1;

const SHORT_LABEL_LEN: usize = 32;
const LONG_LABEL_LEN: usize = 256;
const CRYPTO_PARAMS_LEN: usize = 256;
const RESERVED_PAD_LEN: usize = 1024;

/// Total fixed-prefix width; the entry stream starts at this offset.
pub const HEADER_LEN: usize = 8 // magic
    + 4 // version
    + 4 // chain magic
    + 8 // flags
    + 6 // unique id
    + 8 // creation time
    + SHORT_LABEL_LEN
    + LONG_LABEL_LEN
    + 8 // highest used chain index
    + KDF_BLOCK_LEN
    + CRYPTO_PARAMS_LEN
    + ADDRESS_RECORD_LEN
    + RESERVED_PAD_LEN;

pub const FLAG_ENCRYPTED: u64 = 1 << 0;
pub const FLAG_WATCHING_ONLY: u64 = 1 << 1;

/// Byte offsets of the in-place-updatable header fields, discovered once
/// on pack/unpack and cached for O(1) later `MODIFY`s (§4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderOffsets {
    pub flags: usize,
    pub unique_id: usize,
    pub label_name: usize,
    pub label_descr: usize,
    pub top_used: usize,
    pub kdf_params: usize,
    pub crypto: usize,
    pub root_addr: usize,
}

/// The fixed-width wallet file prefix (spec §3 "Header").
pub struct WalletHeader {
    pub chain_magic: u32,
    pub flags: u64,
    pub unique_id: [u8; 6],
    pub creation_time: u64,
    pub short_label: String,
    pub long_label: String,
    pub highest_used_chain_index: i64,
    pub kdf_params: KdfParams,
    pub root_addr: AddressRecord,
}

impl WalletHeader {
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn is_watching_only(&self) -> bool {
        self.flags & FLAG_WATCHING_ONLY != 0
    }

    /// `reverse(chainMagicByte ++ firstChained.hash160[:5])`, the wallet's
    /// durable identifier (spec invariant 5; confirmed against
    /// `original_source/armoryengine/PyBtcWallet.py`'s
    /// `(ADDRBYTE + firstAddr.getAddr160()[:5])[::-1]`): one leading byte
    /// of the chain magic, not all four.
    pub fn compute_unique_id(chain_magic: u32, first_chained_hash160: &[u8; HASH160_LEN]) -> [u8; 6] {
        let mut buf = [0u8; 6];
        buf[0] = chain_magic.to_le_bytes()[0];
        buf[1..6].copy_from_slice(&first_chained_hash160[..5]);
        buf.reverse();
        buf
    }

    /// Write the fixed header prefix, returning the bytes and the offsets
    /// of every field later updates may rewrite in place.
    pub fn pack(&self) -> (Vec<u8>, HeaderOffsets) {
        let mut w = Writer::with_capacity(HEADER_LEN);
        w.bytes(&MAGIC);
        w.u32(FORMAT_VERSION);
        w.u32(self.chain_magic);

        let offset_flags = w.len();
        w.u64(self.flags);
        let offset_unique_id = w.len();
        w.bytes(&self.unique_id);
        w.u64(self.creation_time);

        let offset_label_name = w.len();
        w.fixed_str(&self.short_label, SHORT_LABEL_LEN);
        let offset_label_descr = w.len();
        w.fixed_str(&self.long_label, LONG_LABEL_LEN);

        let offset_top_used = w.len();
        w.i64(self.highest_used_chain_index);

        let offset_kdf_params = w.len();
        w.bytes(&self.kdf_params.serialize());

        let offset_crypto = w.len();
        w.zero_pad(CRYPTO_PARAMS_LEN);

        let offset_root_addr = w.len();
        w.bytes(&self.root_addr.serialize());

        w.zero_pad(RESERVED_PAD_LEN);

        let offsets = HeaderOffsets {
            flags: offset_flags,
            unique_id: offset_unique_id,
            label_name: offset_label_name,
            label_descr: offset_label_descr,
            top_used: offset_top_used,
            kdf_params: offset_kdf_params,
            crypto: offset_crypto,
            root_addr: offset_root_addr,
        };
        (w.into_vec(), offsets)
    }

    /// Parse the fixed header prefix. Rejects on magic mismatch; applies
    /// checksum repair inside the KDF block and the root address record,
    /// reporting whether either needs an in-place rewrite scheduled.
    pub fn unpack(buf: &[u8], expected_chain_magic: u32) -> Result<(Self, HeaderOffsets, bool), WalletError> {
        if buf.len() < HEADER_LEN {
            return Err(CodecError::Truncated {
                need: HEADER_LEN,
                have: buf.len(),
            }
            .into());
        }
        let mut r = Reader::new(&buf[..HEADER_LEN]);

        let magic: [u8; 8] = r.array()?;
        if magic != MAGIC {
            return Err(CodecError::WrongMagic.into());
        }
        let version = r.u32()?;
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version).into());
        }
        let chain_magic = r.u32()?;
        if chain_magic != expected_chain_magic {
            return Err(CodecError::WrongChainMagic {
                expected: expected_chain_magic,
                got: chain_magic,
            }
            .into());
        }

        let offset_flags = r.position();
        let flags = r.u64()?;
        let offset_unique_id = r.position();
        let unique_id: [u8; 6] = r.array()?;
        let creation_time = r.u64()?;

        let offset_label_name = r.position();
        let short_label = r.fixed_str(SHORT_LABEL_LEN)?;
        let offset_label_descr = r.position();
        let long_label = r.fixed_str(LONG_LABEL_LEN)?;

        let offset_top_used = r.position();
        let highest_used_chain_index = r.i64()?;

        let offset_kdf_params = r.position();
        let kdf_block = r.bytes(KDF_BLOCK_LEN)?;
        let (kdf_params, kdf_needs_rewrite) = KdfParams::unserialize(kdf_block)?;

        let offset_crypto = r.position();
        let _crypto_reserved = r.bytes(CRYPTO_PARAMS_LEN)?;

        let offset_root_addr = r.position();
        let root_block = r.bytes(ADDRESS_RECORD_LEN)?;
        let (root_addr, root_needs_rewrite) = AddressRecord::unserialize(root_block)?;

        let header = WalletHeader {
            chain_magic,
            flags,
            unique_id,
            creation_time,
            short_label,
            long_label,
            highest_used_chain_index,
            kdf_params,
            root_addr,
        };
        let offsets = HeaderOffsets {
            flags: offset_flags,
            unique_id: offset_unique_id,
            label_name: offset_label_name,
            label_descr: offset_label_descr,
            top_used: offset_top_used,
            kdf_params: offset_kdf_params,
            crypto: offset_crypto,
            root_addr: offset_root_addr,
        };
        Ok((header, offsets, kdf_needs_rewrite || root_needs_rewrite))
    }
}

/// Entry-stream record type tags (spec §3 "Entry stream").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    KeyData,
    AddressComment,
    TxComment,
    Tombstone,
}

impl EntryKind {
    fn tag(self) -> u8 {
        match self {
            EntryKind::KeyData => 0x01,
            EntryKind::AddressComment => 0x02,
            EntryKind::TxComment => 0x03,
            EntryKind::Tombstone => 0x05,
        }
    }
}

/// One parsed entry-stream record, with the absolute file offset of its
/// type byte.
pub enum Entry {
    KeyData {
        offset: u64,
        hash160: [u8; HASH160_LEN],
        record: AddressRecord,
        needs_rewrite: bool,
    },
    AddressComment {
        offset: u64,
        hash160: [u8; HASH160_LEN],
        text: Vec<u8>,
    },
    TxComment {
        offset: u64,
        tx_hash: [u8; 32],
        text: Vec<u8>,
    },
    Tombstone {
        offset: u64,
        len: usize,
    },
}

/// Encode a key-data entry: `0x01 || hash160(20) || addressRecord`.
pub fn pack_key_data(hash160: &[u8; HASH160_LEN], record: &AddressRecord) -> Vec<u8> {
    let mut w = Writer::with_capacity(1 + HASH160_LEN + ADDRESS_RECORD_LEN);
    w.u8(EntryKind::KeyData.tag());
    w.bytes(hash160);
    w.bytes(&record.serialize());
    w.into_vec()
}

/// Encode an address-comment entry: `0x02 || hash160(20) || len(u16) || bytes`.
pub fn pack_address_comment(hash160: &[u8; HASH160_LEN], text: &[u8]) -> Vec<u8> {
    let mut w = Writer::with_capacity(1 + HASH160_LEN + 2 + text.len());
    w.u8(EntryKind::AddressComment.tag());
    w.bytes(hash160);
    w.blob16(text);
    w.into_vec()
}

/// Encode a tx-comment entry: `0x03 || txHash(32) || len(u16) || bytes`.
pub fn pack_tx_comment(tx_hash: &[u8; 32], text: &[u8]) -> Vec<u8> {
    let mut w = Writer::with_capacity(1 + 32 + 2 + text.len());
    w.u8(EntryKind::TxComment.tag());
    w.bytes(tx_hash);
    w.blob16(text);
    w.into_vec()
}

/// Encode an in-place tombstone of `len` zero bytes: `0x05 || len(u16) || zeros`.
pub fn pack_tombstone(len: u16) -> Vec<u8> {
    let mut w = Writer::with_capacity(1 + 2 + len as usize);
    w.u8(EntryKind::Tombstone.tag());
    w.blob16(&vec![0u8; len as usize]);
    w.into_vec()
}

/// Parse every record in the entry stream starting at `base_offset`.
/// `0x04` is fatal (reserved-reject); `0x05` advances by its declared
/// length; any other unknown tag is fatal.
pub fn parse_entries(buf: &[u8], base_offset: u64) -> Result<Vec<Entry>, WalletError> {
    let mut entries = Vec::new();
    let mut r = Reader::new(buf);
    while !r.is_empty() {
        let record_start = base_offset + r.position() as u64;
        let tag = r.u8()?;
        match tag {
            0x01 => {
                let hash160: [u8; HASH160_LEN] = r.array()?;
                let payload_start = record_start + 1 + HASH160_LEN as u64;
                let block = r.bytes(ADDRESS_RECORD_LEN)?;
                let (mut record, needs_rewrite) = AddressRecord::unserialize(block)?;
                record.wallet_byte_loc = Some(payload_start);
                entries.push(Entry::KeyData {
                    offset: record_start,
                    hash160,
                    record,
                    needs_rewrite,
                });
            }
            0x02 => {
                let hash160: [u8; HASH160_LEN] = r.array()?;
                let text = r.blob16()?;
                entries.push(Entry::AddressComment {
                    offset: record_start,
                    hash160,
                    text,
                });
            }
            0x03 => {
                let tx_hash: [u8; 32] = r.array()?;
                let text = r.blob16()?;
                entries.push(Entry::TxComment {
                    offset: record_start,
                    tx_hash,
                    text,
                });
            }
            0x04 => return Err(CodecError::UnsupportedRecordType(0x04).into()),
            0x05 => {
                let len = r.u16()? as usize;
                let _ = r.bytes(len)?;
                entries.push(Entry::Tombstone {
                    offset: record_start,
                    len,
                });
            }
            other => return Err(CodecError::UnsupportedRecordType(other).into()),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressRecord;

    fn sample_header() -> WalletHeader {
        WalletHeader {
            chain_magic: 0xC0FFEE01,
            flags: 0,
            unique_id: [1, 2, 3, 4, 5, 6],
            creation_time: 1_700_000_000,
            short_label: "wlt".into(),
            long_label: "desc".into(),
            highest_used_chain_index: -1,
            kdf_params: KdfParams {
                memory_bytes: 1 << 20,
                iterations: 1,
                salt: [0x11; 32],
            },
            root_addr: AddressRecord::new_root(),
        }
    }

    #[test]
    fn header_roundtrip() {
        let header = sample_header();
        let (bytes, offsets) = header.pack();
        assert_eq!(bytes.len(), HEADER_LEN);
        let (restored, offsets2, needs_rewrite) =
            WalletHeader::unpack(&bytes, header.chain_magic).unwrap();
        assert_eq!(offsets, offsets2);
        assert!(!needs_rewrite);
        assert_eq!(restored.short_label, "wlt");
        assert_eq!(restored.long_label, "desc");
        assert_eq!(restored.highest_used_chain_index, -1);
        assert_eq!(restored.root_addr.public_key, header.root_addr.public_key);
    }

    #[test]
    fn header_rejects_wrong_magic() {
        let header = sample_header();
        let (mut bytes, _) = header.pack();
        bytes[0] ^= 0xFF;
        assert!(WalletHeader::unpack(&bytes, header.chain_magic).is_err());
    }

    #[test]
    fn header_rejects_wrong_chain_magic() {
        let header = sample_header();
        let (bytes, _) = header.pack();
        assert!(WalletHeader::unpack(&bytes, header.chain_magic.wrapping_add(1)).is_err());
    }

    #[test]
    fn header_repairs_corrupted_kdf_block() {
        let header = sample_header();
        let (mut bytes, offsets) = header.pack();
        bytes[offsets.kdf_params + 1] ^= 0x01;
        let (_, _, needs_rewrite) = WalletHeader::unpack(&bytes, header.chain_magic).unwrap();
        assert!(needs_rewrite);
    }

    #[test]
    fn key_data_entry_roundtrip() {
        let record = AddressRecord::new_root();
        let hash = record.hash160();
        let bytes = pack_key_data(&hash, &record);
        let entries = parse_entries(&bytes, 2080).unwrap();
        assert_eq!(entries.len(), 1);
        match &entries[0] {
            Entry::KeyData {
                hash160,
                record: r,
                needs_rewrite,
                ..
            } => {
                assert_eq!(*hash160, hash);
                assert_eq!(r.public_key, record.public_key);
                assert!(!needs_rewrite);
            }
            _ => panic!("expected KeyData entry"),
        }
    }

    #[test]
    fn comment_entries_roundtrip() {
        let hash = [7u8; HASH160_LEN];
        let bytes = pack_address_comment(&hash, b"label text");
        let entries = parse_entries(&bytes, 0).unwrap();
        match &entries[0] {
            Entry::AddressComment { text, .. } => assert_eq!(text, b"label text"),
            _ => panic!("expected AddressComment entry"),
        }
    }

    #[test]
    fn tombstone_advances_by_declared_length() {
        let bytes = pack_tombstone(16);
        let entries = parse_entries(&bytes, 0).unwrap();
        assert_eq!(entries.len(), 1);
        match &entries[0] {
            Entry::Tombstone { len, .. } => assert_eq!(*len, 16),
            _ => panic!("expected Tombstone entry"),
        }
    }

    #[test]
    fn op_eval_is_fatal() {
        let bytes = vec![0x04u8, 0, 0];
        assert!(parse_entries(&bytes, 0).is_err());
    }

    #[test]
    fn unknown_tag_is_fatal() {
        let bytes = vec![0xEEu8];
        assert!(parse_entries(&bytes, 0).is_err());
    }

    #[test]
    fn compute_unique_id_matches_invariant() {
        let hash = [0xAAu8, 0xBB, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18];
        let id = WalletHeader::compute_unique_id(0x01020304, &hash);
        let mut expected = [0u8; 6];
        expected[0] = 0x01020304u32.to_le_bytes()[0];
        expected[1..6].copy_from_slice(&hash[..5]);
        expected.reverse();
        assert_eq!(id, expected);
    }
}
