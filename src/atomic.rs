//! The atomic safe-update protocol: primary file, backup sibling, and the
//! two sentinel files whose mere existence (not contents) encodes which
//! half of the protocol is mid-flight (spec §4.5).
//!
//! Grounded on `other_examples/*armory*legacy_import.rs`'s
//! `_backup`/`_update_unsuccessful` sentinel naming, reworked into an
//! explicit straight-line protocol (§9 Design Notes: "not callbacks").

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::error::AtomicUpdateError;

fn io_err(context: &str, e: std::io::Error) -> AtomicUpdateError {
    AtomicUpdateError::Io(format!("{context}: {e}"))
}

/// One unit of a safe-update batch.
#[derive(Clone, Debug)]
pub enum Op {
    /// Append these bytes to the end of the file.
    Add(Vec<u8>),
    /// Overwrite `bytes.len()` bytes starting at `offset`.
    Modify { offset: u64, bytes: Vec<u8> },
}

/// Result of a successful [`AtomicStore::safe_update`]: one absolute file
/// offset per input `Op`, in the same order (start-of-record for `Add`,
/// the given offset for `Modify`).
#[derive(Debug, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub offsets: Vec<u64>,
}

/// A deliberate interruption point in the update protocol, reachable only
/// through [`AtomicStore::safe_update_with_fault`] (test builds).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdateFault {
    #[default]
    None,
    AfterAppendPrimary,
    AfterTouchBackupSentinel,
    AfterRemoveMuf,
    AfterAppendBackup,
}

/// Owns the paths of the primary wallet file, its backup, and the two
/// sentinels, and runs the safe-update and consistency-check protocols
/// over them. Opens a file handle only for the duration of one operation
/// (§5: "no long-held file handle crosses operations").
pub struct AtomicStore {
    primary: PathBuf,
    backup: PathBuf,
    muf: PathBuf,
    buf: PathBuf,
}

impl AtomicStore {
    pub fn new(primary: impl Into<PathBuf>) -> Self {
        let primary = primary.into();
        let mut backup = primary.clone().into_os_string();
        backup.push("_backup");
        let mut muf = primary.clone().into_os_string();
        muf.push("_update_unsuccessful");
        let mut buf = primary.clone().into_os_string();
        buf.push("_backup_unsuccessful");
        Self {
            primary,
            backup: backup.into(),
            muf: muf.into(),
            buf: buf.into(),
        }
    }

    pub fn primary_path(&self) -> &Path {
        &self.primary
    }

    fn touch(path: &Path) -> Result<(), AtomicUpdateError> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map(|_| ())
            .map_err(|e| io_err("touch sentinel", e))
    }

    fn remove_if_present(path: &Path) -> Result<(), AtomicUpdateError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err("remove sentinel", e)),
        }
    }

    fn write_whole(dst: &Path, bytes: &[u8]) -> Result<(), AtomicUpdateError> {
        fs::write(dst, bytes).map_err(|e| io_err("write file", e))
    }

    /// Initialize a brand-new wallet: writes `bytes` to both primary and
    /// backup and ensures no sentinels are present.
    pub fn create(&self, bytes: &[u8]) -> Result<(), AtomicUpdateError> {
        Self::write_whole(&self.primary, bytes)?;
        Self::write_whole(&self.backup, bytes)?;
        Self::remove_if_present(&self.muf)?;
        Self::remove_if_present(&self.buf)?;
        Ok(())
    }

    /// Restore the filesystem invariant described in §4.5 before any read
    /// or write. Idempotent.
    #[instrument(skip(self))]
    pub fn consistency_check(&self) -> Result<(), AtomicUpdateError> {
        let muf_present = self.muf.exists();
        let buf_present = self.buf.exists();

        if muf_present && buf_present {
            debug!("both sentinels present: primary authoritative, rewriting backup");
            self.copy_file(&self.primary, &self.backup)?;
            Self::remove_if_present(&self.muf)?;
            Self::remove_if_present(&self.buf)?;
        } else if muf_present {
            debug!("update-unsuccessful sentinel present: restoring primary from backup");
            self.copy_file(&self.backup, &self.primary)?;
            Self::remove_if_present(&self.muf)?;
        } else if buf_present {
            debug!("backup-unsuccessful sentinel present: rewriting backup from primary");
            self.copy_file(&self.primary, &self.backup)?;
            Self::remove_if_present(&self.buf)?;
        } else if !self.backup.exists() {
            debug!("backup missing: recreating under a backup-unsuccessful fence");
            Self::touch(&self.buf)?;
            self.copy_file(&self.primary, &self.backup)?;
            Self::remove_if_present(&self.buf)?;
        }
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), AtomicUpdateError> {
        if !from.exists() {
            return Err(AtomicUpdateError::FileMissing(from.display().to_string()));
        }
        fs::copy(from, to).map_err(|e| io_err("copy file", e))?;
        Ok(())
    }

    fn current_len(&self) -> Result<u64, AtomicUpdateError> {
        fs::metadata(&self.primary)
            .map(|m| m.len())
            .map_err(|e| io_err("stat primary", e))
    }

    fn apply_to(&self, path: &Path, appended: &[u8], modifies: &[(u64, &[u8])]) -> Result<(), AtomicUpdateError> {
        let mut f = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| io_err("open for update", e))?;
        f.seek(SeekFrom::End(0)).map_err(|e| io_err("seek end", e))?;
        f.write_all(appended).map_err(|e| io_err("append", e))?;
        for (offset, bytes) in modifies {
            f.seek(SeekFrom::Start(*offset)).map_err(|e| io_err("seek modify", e))?;
            f.write_all(bytes).map_err(|e| io_err("write modify", e))?;
        }
        f.flush().map_err(|e| io_err("flush", e))?;
        f.sync_all().map_err(|e| io_err("sync", e))?;
        Ok(())
    }

    /// Run one batch of `Add`/`Modify` operations through the safe-update
    /// protocol (§4.5 steps 1-8).
    pub fn safe_update(&self, ops: &[Op]) -> Result<UpdateOutcome, AtomicUpdateError> {
        self.safe_update_inner(ops, UpdateFault::None)
    }

    /// Test-only entry point that stops the protocol partway through, to
    /// exercise [`consistency_check`](Self::consistency_check)'s recovery
    /// paths (spec §8 scenario S2, §9 `interruptTest1/2/3`).
    #[cfg(test)]
    pub fn safe_update_with_fault(
        &self,
        ops: &[Op],
        fault: UpdateFault,
    ) -> Result<UpdateOutcome, AtomicUpdateError> {
        self.safe_update_inner(ops, fault)
    }

    #[instrument(skip(self, ops))]
    fn safe_update_inner(&self, ops: &[Op], fault: UpdateFault) -> Result<UpdateOutcome, AtomicUpdateError> {
        self.consistency_check()?;

        let old_size = self.current_len()?;
        let mut appended = Vec::new();
        let mut modifies: Vec<(u64, &[u8])> = Vec::new();
        let mut offsets = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                Op::Add(bytes) => {
                    offsets.push(old_size + appended.len() as u64);
                    appended.extend_from_slice(bytes);
                }
                Op::Modify { offset, bytes } => {
                    offsets.push(*offset);
                    modifies.push((*offset, bytes.as_slice()));
                }
            }
        }

        Self::touch(&self.muf)?;
        self.apply_to(&self.primary, &appended, &modifies)?;
        if fault == UpdateFault::AfterAppendPrimary {
            return Ok(UpdateOutcome { offsets });
        }

        Self::touch(&self.buf)?;
        if fault == UpdateFault::AfterTouchBackupSentinel {
            return Ok(UpdateOutcome { offsets });
        }

        Self::remove_if_present(&self.muf)?;
        if fault == UpdateFault::AfterRemoveMuf {
            return Ok(UpdateOutcome { offsets });
        }

        self.apply_to(&self.backup, &appended, &modifies)?;
        if fault == UpdateFault::AfterAppendBackup {
            return Ok(UpdateOutcome { offsets });
        }

        Self::remove_if_present(&self.buf)?;

        Ok(UpdateOutcome { offsets })
    }

    pub fn read_primary(&self) -> Result<Vec<u8>, AtomicUpdateError> {
        fs::read(&self.primary).map_err(|e| io_err("read primary", e))
    }

    pub fn read_backup(&self) -> Result<Vec<u8>, AtomicUpdateError> {
        fs::read(&self.backup).map_err(|e| io_err("read backup", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_writes_primary_and_backup() {
        let dir = tempdir().unwrap();
        let store = AtomicStore::new(dir.path().join("wallet.dat"));
        store.create(b"hello").unwrap();
        assert_eq!(store.read_primary().unwrap(), b"hello");
        assert_eq!(store.read_backup().unwrap(), b"hello");
    }

    #[test]
    fn safe_update_appends_and_modifies() {
        let dir = tempdir().unwrap();
        let store = AtomicStore::new(dir.path().join("wallet.dat"));
        store.create(b"0123456789").unwrap();

        let ops = vec![
            Op::Modify {
                offset: 0,
                bytes: b"9".to_vec(),
            },
            Op::Add(b"ABC".to_vec()),
        ];
        let outcome = store.safe_update(&ops).unwrap();
        assert_eq!(outcome.offsets, vec![0, 10]);

        let primary = store.read_primary().unwrap();
        assert_eq!(&primary[0..1], b"9");
        assert_eq!(&primary[10..13], b"ABC");
        assert_eq!(store.read_primary().unwrap(), store.read_backup().unwrap());
    }

    #[test]
    fn no_sentinels_after_clean_update() {
        let dir = tempdir().unwrap();
        let store = AtomicStore::new(dir.path().join("wallet.dat"));
        store.create(b"data").unwrap();
        store.safe_update(&[Op::Add(b"more".to_vec())]).unwrap();
        assert!(!store.muf.exists());
        assert!(!store.buf.exists());
    }

    #[test]
    fn recovers_from_fault_after_append_primary() {
        let dir = tempdir().unwrap();
        let store = AtomicStore::new(dir.path().join("wallet.dat"));
        store.create(b"0123456789").unwrap();

        store
            .safe_update_with_fault(&[Op::Add(b"XYZ".to_vec())], UpdateFault::AfterAppendPrimary)
            .unwrap();
        assert!(store.muf.exists());
        assert!(!store.buf.exists());
        assert_eq!(store.read_backup().unwrap(), b"0123456789");

        store.consistency_check().unwrap();
        assert!(!store.muf.exists());
        assert_eq!(store.read_primary().unwrap(), store.read_backup().unwrap());
        assert_eq!(store.read_primary().unwrap(), b"0123456789XYZ");
    }

    #[test]
    fn recovers_from_fault_after_touch_backup_sentinel() {
        let dir = tempdir().unwrap();
        let store = AtomicStore::new(dir.path().join("wallet.dat"));
        store.create(b"abc").unwrap();

        store
            .safe_update_with_fault(&[Op::Add(b"Z".to_vec())], UpdateFault::AfterTouchBackupSentinel)
            .unwrap();
        assert!(store.muf.exists());
        assert!(store.buf.exists());

        store.consistency_check().unwrap();
        assert!(!store.muf.exists());
        assert!(!store.buf.exists());
        assert_eq!(store.read_primary().unwrap(), store.read_backup().unwrap());
    }

    #[test]
    fn recovers_from_fault_after_remove_muf() {
        let dir = tempdir().unwrap();
        let store = AtomicStore::new(dir.path().join("wallet.dat"));
        store.create(b"abc").unwrap();

        store
            .safe_update_with_fault(&[Op::Add(b"Q".to_vec())], UpdateFault::AfterRemoveMuf)
            .unwrap();
        assert!(!store.muf.exists());
        assert!(store.buf.exists());
        // primary already has the update; backup is stale.
        assert_eq!(store.read_primary().unwrap(), b"abcQ");

        store.consistency_check().unwrap();
        assert!(!store.buf.exists());
        assert_eq!(store.read_backup().unwrap(), b"abcQ");
    }

    #[test]
    fn consistency_check_is_idempotent_when_clean() {
        let dir = tempdir().unwrap();
        let store = AtomicStore::new(dir.path().join("wallet.dat"));
        store.create(b"steady").unwrap();
        store.consistency_check().unwrap();
        store.consistency_check().unwrap();
        assert_eq!(store.read_primary().unwrap(), b"steady");
    }
}
