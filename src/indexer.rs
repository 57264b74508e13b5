//! The external blockchain indexer's contract (spec §4.8), modeled as an
//! injected trait object rather than a global handle (§9 Design Notes),
//! mirroring how `rill-wallet::wallet` takes `&dyn DecayCalculator` /
//! `&dyn ChainState` as call parameters instead of storing them.

/// A balance or UTXO query kind (spec §4.8 "Balance and ledger queries").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceKind {
    Spendable,
    Unconfirmed,
    Full,
}

/// Whether the indexer has finished its initial chain scan. Balance
/// queries resolve to `-1` unless the indexer is ready or the call is
/// `direct` (spec §4.8).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexerState {
    Scanning,
    BlockchainReady,
}

/// One entry in a wallet's transaction ledger, as supplied by the indexer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    pub tx_hash: [u8; 32],
    pub value: i64,
    pub block_height: u64,
}

/// The surface the wallet core consumes from the external indexer. A
/// `direct` flag on each call distinguishes the indexer's own re-entrant
/// call path (which must not be queued, to avoid self-deadlock) from the
/// ordinary cooperative path (spec §4.8, §5).
pub trait ChainIndexer {
    fn state(&self) -> IndexerState;
    fn top_height(&self) -> u64;

    /// Register a chain-derived address's script hash for future scans.
    /// `first_seen`/`last_seen` are `(0, 0)` when the address is still
    /// unused.
    fn register_script_hash(&self, hash160: &[u8; 20], first_seen: (u64, u64), last_seen: (u64, u64));

    /// Register an imported address's script hash with caller-supplied
    /// time/block ranges.
    fn register_imported_script_hash(
        &self,
        hash160: &[u8; 20],
        first_seen: (u64, u64),
        last_seen: (u64, u64),
    );

    fn register_wallet(&self, wallet_unique_id: &[u8; 6], is_fresh: bool);

    fn scan_wallet_since(&self, wallet_unique_id: &[u8; 6], from_block: u64, direct: bool);

    fn scan_registered_tx_for(&self, hash160: &[u8; 20], from_block: u64, direct: bool);

    fn num_blocks_behind(&self, wallet_unique_id: &[u8; 6]) -> u64;

    fn ledger_for(&self, hash160: &[u8; 20], direct: bool) -> Vec<LedgerEntry>;

    /// Returns `-1` (per spec) when `state() != BlockchainReady` and
    /// `direct` is false; otherwise the resolved balance.
    fn balance(&self, hash160: &[u8; 20], kind: BalanceKind, direct: bool) -> i64;
}

/// An indexer that observes calls but performs no real scanning; used by
/// tests and by callers that want the wallet to operate offline.
#[derive(Default)]
pub struct NullIndexer;

impl ChainIndexer for NullIndexer {
    fn state(&self) -> IndexerState {
        IndexerState::Scanning
    }

    fn top_height(&self) -> u64 {
        0
    }

    fn register_script_hash(&self, _hash160: &[u8; 20], _first_seen: (u64, u64), _last_seen: (u64, u64)) {}

    fn register_imported_script_hash(
        &self,
        _hash160: &[u8; 20],
        _first_seen: (u64, u64),
        _last_seen: (u64, u64),
    ) {
    }

    fn register_wallet(&self, _wallet_unique_id: &[u8; 6], _is_fresh: bool) {}

    fn scan_wallet_since(&self, _wallet_unique_id: &[u8; 6], _from_block: u64, _direct: bool) {}

    fn scan_registered_tx_for(&self, _hash160: &[u8; 20], _from_block: u64, _direct: bool) {}

    fn num_blocks_behind(&self, _wallet_unique_id: &[u8; 6]) -> u64 {
        0
    }

    fn ledger_for(&self, _hash160: &[u8; 20], _direct: bool) -> Vec<LedgerEntry> {
        Vec::new()
    }

    fn balance(&self, _hash160: &[u8; 20], _kind: BalanceKind, direct: bool) -> i64 {
        if direct {
            0
        } else {
            -1
        }
    }
}
