//! The minimal interface the signer needs from an external,
//! partially-signed transaction proposal (spec §9 Design Notes: "define
//! the minimum input contract the signer needs ... and keep the
//! transaction type itself behind that interface").

use crate::crypto::{double_sha256, PrivKey, HASH160_LEN, PUBKEY_LEN};
use crate::error::WalletError;
use crate::packer::Writer;

/// How an input's owning script commits to a key or keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptType {
    /// Pay-to-pubkey-hash: one destination hash, signature + pubkey.
    P2pkh,
    /// Pay-to-script-hash: a redeem script, signature(s) + redeem script.
    P2sh,
    /// Bare pubkey output: signature only, no pubkey push.
    BarePubkey,
    /// Bare multisig output: one signature per matching member key.
    Multisig,
}

/// Everything the signer needs to know about one input, independent of
/// whatever transaction type the caller actually uses.
#[derive(Clone, Debug)]
pub struct InputContext {
    pub script_type: ScriptType,
    /// The referenced output's script (substituted into the isolated
    /// single-input copy of the transaction while signing).
    pub output_script: Vec<u8>,
    pub redeem_script: Option<Vec<u8>>,
    /// hash160 identities this input's script could be satisfied by; for
    /// P2PKH/bare-pubkey this is a single entry, for multisig one per
    /// possible signer.
    pub destination_hashes: Vec<[u8; HASH160_LEN]>,
}

/// The transaction body surface the signer consumes. Implementations own
/// the real wire format; the signer never sees it directly.
pub trait TransactionBody {
    fn input_count(&self) -> usize;
    fn input_context(&self, index: usize) -> InputContext;

    /// Serialize the whole transaction with every input's script emptied
    /// except `isolated_index`, which is set to `script_override` (spec
    /// §4.7: "single-input-isolated copy ... all other input scripts are
    /// empty").
    fn serialize_isolated(&self, isolated_index: usize, script_override: &[u8]) -> Vec<u8>;
}

/// `SIGHASH_ALL`, the only hash type this signer constructs.
pub const SIGHASH_ALL: u32 = 1;

/// One minimal script-push opcode, sized for the signature/pubkey pushes
/// this signer produces (all well under 76 bytes).
fn push_data(w: &mut Writer, data: &[u8]) {
    w.u8(data.len() as u8);
    w.bytes(data);
}

/// Sign one input in isolation: append `hashcode` to the isolated
/// transaction serialization, double-SHA256 it, sign with `key`, and
/// encode `sig || sighashByte` with script-push framing.
fn isolated_signature(tx: &dyn TransactionBody, index: usize, script_for_sig: &[u8], key: &PrivKey, hashcode: u32) -> Vec<u8> {
    let mut preimage = tx.serialize_isolated(index, script_for_sig);
    preimage.extend_from_slice(&hashcode.to_le_bytes());
    let digest = double_sha256(&preimage);
    let mut der = key.sign_der(&digest);
    der.push(hashcode as u8);
    der
}

/// Sign input `index` using `key`, whose public key must satisfy one of
/// `ctx.destination_hashes`. Returns the finished `scriptSig` bytes.
pub fn sign_input(
    tx: &dyn TransactionBody,
    index: usize,
    ctx: &InputContext,
    key: &PrivKey,
    public_key: &[u8; PUBKEY_LEN],
) -> Result<Vec<u8>, WalletError> {
    let sig = isolated_signature(tx, index, &ctx.output_script, key, SIGHASH_ALL);

    let mut w = Writer::new();
    match ctx.script_type {
        ScriptType::P2pkh => {
            push_data(&mut w, &sig);
            push_data(&mut w, public_key);
        }
        ScriptType::BarePubkey => {
            push_data(&mut w, &sig);
        }
        ScriptType::Multisig => {
            push_data(&mut w, &sig);
        }
        ScriptType::P2sh => {
            push_data(&mut w, &sig);
            let redeem = ctx.redeem_script.as_ref().ok_or(WalletError::MissingRedeemScript)?;
            push_data(&mut w, redeem);
        }
    }
    Ok(w.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressRecord;

    struct FakeTx {
        scripts: Vec<Vec<u8>>,
    }

    impl TransactionBody for FakeTx {
        fn input_count(&self) -> usize {
            self.scripts.len()
        }
        fn input_context(&self, index: usize) -> InputContext {
            InputContext {
                script_type: ScriptType::P2pkh,
                output_script: self.scripts[index].clone(),
                redeem_script: None,
                destination_hashes: vec![[0u8; HASH160_LEN]],
            }
        }
        fn serialize_isolated(&self, isolated_index: usize, script_override: &[u8]) -> Vec<u8> {
            let mut out = Vec::new();
            for (i, s) in self.scripts.iter().enumerate() {
                if i == isolated_index {
                    out.extend_from_slice(script_override);
                } else {
                    out.extend_from_slice(s);
                }
            }
            out
        }
    }

    #[test]
    fn sign_input_produces_push_framed_sig_and_pubkey() {
        let tx = FakeTx {
            scripts: vec![vec![0xAA; 4], vec![0xBB; 4]],
        };
        let record = AddressRecord::new_root();
        let key = match &record.key_state {
            crate::address::KeyState::Plain(k) => k.clone(),
            _ => unreachable!(),
        };
        let pubkey = record.public_key.0;
        let ctx = tx.input_context(0);

        let script_sig = sign_input(&tx, 0, &ctx, &key, &pubkey).unwrap();
        let sig_len = script_sig[0] as usize;
        let pubkey_len_pos = 1 + sig_len;
        assert_eq!(script_sig[pubkey_len_pos] as usize, PUBKEY_LEN);
        assert_eq!(&script_sig[pubkey_len_pos + 1..], &pubkey[..]);
    }

    #[test]
    fn bare_pubkey_script_has_no_pubkey_push() {
        let tx = FakeTx {
            scripts: vec![vec![0xCC; 4]],
        };
        let record = AddressRecord::new_root();
        let key = match &record.key_state {
            crate::address::KeyState::Plain(k) => k.clone(),
            _ => unreachable!(),
        };
        let mut ctx = tx.input_context(0);
        ctx.script_type = ScriptType::BarePubkey;

        let script_sig = sign_input(&tx, 0, &ctx, &key, &record.public_key.0).unwrap();
        let sig_len = script_sig[0] as usize;
        assert_eq!(script_sig.len(), 1 + sig_len);
    }
}
