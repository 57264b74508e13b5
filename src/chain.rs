//! Chain & pool manager (C6): deterministic chain extension, address-pool
//! maintenance, highest-used-index tracking, and the chain-index → hash160
//! map. The root is a first-class optional field rather than a
//! `"ROOT"`-keyed map entry (§9 Design Notes).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, instrument};

use crate::address::{AddressRecord, ChainIndex};
use crate::atomic::{AtomicStore, Op};
use crate::codec::{pack_key_data, HeaderOffsets};
use crate::crypto::HASH160_LEN;
use crate::error::WalletError;
use crate::indexer::ChainIndexer;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// In-memory chain state: the root address, every materialized or
/// deferred chained address, and the indices bounding how many are in
/// active use (spec §3 "Invariants" 1-4, §4.6).
pub struct ChainManager {
    pub root: AddressRecord,
    /// Insertion-ordered hash160 identities of every chained address.
    pub linear_list: Vec<[u8; HASH160_LEN]>,
    pub addr_map: HashMap<[u8; HASH160_LEN], AddressRecord>,
    pub chain_index_map: HashMap<u64, [u8; HASH160_LEN]>,
    /// `-1` before any address has been computed, else the highest
    /// chain index derived so far.
    pub last_computed_chain_index: i64,
    /// `-1` before any chained address has been marked used.
    pub highest_used_chain_index: i64,
    pub pool_target: usize,
}

impl ChainManager {
    pub fn new(root: AddressRecord, pool_target: usize) -> Self {
        Self {
            root,
            linear_list: Vec::new(),
            addr_map: HashMap::new(),
            chain_index_map: HashMap::new(),
            last_computed_chain_index: -1,
            highest_used_chain_index: -1,
            pool_target,
        }
    }

    /// hash160 of the chain-index-0 address, used to compute the wallet's
    /// unique ID (spec invariant 5).
    pub fn first_chained_hash160(&self) -> Option<[u8; HASH160_LEN]> {
        self.chain_index_map.get(&0).copied()
    }

    fn parent_for_next(&self) -> Result<&AddressRecord, WalletError> {
        if self.last_computed_chain_index < 0 {
            Ok(&self.root)
        } else {
            let hash = self
                .chain_index_map
                .get(&(self.last_computed_chain_index as u64))
                .ok_or(WalletError::UnknownAddress)?;
            self.addr_map.get(hash).ok_or(WalletError::UnknownAddress)
        }
    }

    /// Derive exactly one new address past `last_computed_chain_index`,
    /// durably append it via `store`, and register it with `indexer`.
    #[instrument(skip(self, store, indexer, derived_key))]
    pub fn compute_next_address(
        &mut self,
        store: &AtomicStore,
        indexer: &dyn ChainIndexer,
        derived_key: Option<&[u8; 32]>,
    ) -> Result<[u8; HASH160_LEN], WalletError> {
        let child = self.parent_for_next()?.extend_chain(derived_key)?;
        let hash = child.hash160();
        if self.addr_map.contains_key(&hash) {
            return Err(WalletError::DuplicateAddress);
        }

        let bytes = pack_key_data(&hash, &child);
        let outcome = store.safe_update(&[Op::Add(bytes)])?;
        let record_start = outcome.offsets[0];
        let payload_start = record_start + 1 + HASH160_LEN as u64;

        let mut child = child;
        child.wallet_byte_loc = Some(payload_start);
        let ChainIndex::Chained(index) = child.chain_index else {
            return Err(WalletError::UnknownAddress);
        };

        self.linear_list.push(hash);
        self.chain_index_map.insert(index, hash);
        self.addr_map.insert(hash, child);
        self.last_computed_chain_index = index as i64;

        let now = now_unix();
        indexer.register_script_hash(&hash, (now, 0), (0, 0));
        debug!(chain_index = index, hash160 = %hex::encode(hash), "computed next chain address");
        Ok(hash)
    }

    /// Keep computing addresses until `lastComputed - highestUsed >= target`.
    #[instrument(skip(self, store, indexer, derived_key))]
    pub fn fill_address_pool(
        &mut self,
        target: usize,
        store: &AtomicStore,
        indexer: &dyn ChainIndexer,
        derived_key: Option<&[u8; 32]>,
    ) -> Result<(), WalletError> {
        while (self.last_computed_chain_index - self.highest_used_chain_index) < target as i64 {
            self.compute_next_address(store, indexer, derived_key)?;
        }
        Ok(())
    }

    /// Move `highestUsedChainIndex` by `delta`, clamp into
    /// `[0, lastComputed]`, persist via one `MODIFY`, then refill the pool.
    #[instrument(skip(self, store, offsets, indexer, derived_key))]
    pub fn advance_highest_index(
        &mut self,
        delta: i64,
        store: &AtomicStore,
        offsets: &HeaderOffsets,
        indexer: &dyn ChainIndexer,
        derived_key: Option<&[u8; 32]>,
    ) -> Result<(), WalletError> {
        if self.last_computed_chain_index < 0 {
            return Err(WalletError::ChainIndexOutOfRange(self.highest_used_chain_index + delta));
        }
        let new_highest = (self.highest_used_chain_index + delta).clamp(0, self.last_computed_chain_index);

        store.safe_update(&[Op::Modify {
            offset: offsets.top_used as u64,
            bytes: new_highest.to_le_bytes().to_vec(),
        }])?;
        self.highest_used_chain_index = new_highest;
        info!(highest_used = new_highest, "advanced highest-used chain index");

        self.fill_address_pool(self.pool_target, store, indexer, derived_key)
    }

    /// The address at `highestUsed + 1`, filling the pool first if short.
    pub fn peek_next_unused(
        &mut self,
        store: &AtomicStore,
        indexer: &dyn ChainIndexer,
        derived_key: Option<&[u8; 32]>,
    ) -> Result<[u8; HASH160_LEN], WalletError> {
        let want = self.highest_used_chain_index + 1;
        while self.last_computed_chain_index < want {
            self.compute_next_address(store, indexer, derived_key)?;
        }
        self.chain_index_map
            .get(&(want as u64))
            .copied()
            .ok_or(WalletError::ChainIndexOutOfRange(want))
    }

    /// Return the next unused address and advance past it.
    pub fn get_next_unused(
        &mut self,
        store: &AtomicStore,
        offsets: &HeaderOffsets,
        indexer: &dyn ChainIndexer,
        derived_key: Option<&[u8; 32]>,
    ) -> Result<[u8; HASH160_LEN], WalletError> {
        let hash = self.peek_next_unused(store, indexer, derived_key)?;
        self.advance_highest_index(1, store, offsets, indexer, derived_key)?;
        Ok(hash)
    }

    /// O(1) map hit, falling back to walking forward from the nearest
    /// known predecessor by repeated `compute_next_address`.
    pub fn get_address160_by_chain_index(
        &mut self,
        index: u64,
        store: &AtomicStore,
        indexer: &dyn ChainIndexer,
        derived_key: Option<&[u8; 32]>,
    ) -> Result<[u8; HASH160_LEN], WalletError> {
        if let Some(hash) = self.chain_index_map.get(&index) {
            return Ok(*hash);
        }
        while self.last_computed_chain_index < index as i64 {
            self.compute_next_address(store, indexer, derived_key)?;
        }
        self.chain_index_map
            .get(&index)
            .copied()
            .ok_or(WalletError::ChainIndexOutOfRange(index as i64))
    }

    /// Walk every [`crate::address::KeyState::Deferred`] address in
    /// ascending chain-index order, materializing each from its freshly
    /// unlocked predecessor (spec §4.6 "Locked-wallet extension").
    pub fn materialize_deferred(&mut self) -> Result<(), WalletError> {
        let mut indices: Vec<u64> = self.chain_index_map.keys().copied().collect();
        indices.sort_unstable();

        for index in indices {
            let hash = self.chain_index_map[&index];
            let needs_materialization = matches!(
                self.addr_map.get(&hash).map(|a| &a.key_state),
                Some(crate::address::KeyState::Deferred(_))
            );
            if !needs_materialization {
                continue;
            }
            let ancestor_plaintext = self.ancestor_plaintext_for(index)?;
            let record = self.addr_map.get_mut(&hash).expect("checked above");
            record.materialize(&ancestor_plaintext)?;
        }
        Ok(())
    }

    fn ancestor_plaintext_for(&self, index: u64) -> Result<crate::crypto::PrivKey, WalletError> {
        if index == 0 {
            return match &self.root.key_state {
                crate::address::KeyState::Plain(k) => Ok(k.clone()),
                crate::address::KeyState::Unlocked { plaintext, .. } => Ok(plaintext.clone()),
                _ => Err(WalletError::WalletLocked),
            };
        }
        let parent_hash = self.chain_index_map.get(&(index - 1)).ok_or(WalletError::UnknownAddress)?;
        let parent = self.addr_map.get(parent_hash).ok_or(WalletError::UnknownAddress)?;
        match &parent.key_state {
            crate::address::KeyState::Plain(k) => Ok(k.clone()),
            crate::address::KeyState::Unlocked { plaintext, .. } => Ok(plaintext.clone()),
            _ => Err(WalletError::WalletLocked),
        }
    }
}
