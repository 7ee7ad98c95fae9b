//! Reader slot management for MVCC
//!
//! This module manages reader slots to track active read transactions
//! and determine which pages can be safely recycled. Liveness of the
//! process that owns a slot is tracked with an OS file-record lock
//! rather than a PID/signal probe, so a crashed (not merely exited)
//! process is still detected correctly (spec.md §4.2).

use crate::error::{Error, Result, TransactionId};
use crossbeam_utils::CachePadded;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum number of readers
pub const MAX_READERS: usize = 126;

/// Reader slot information stored in shared memory
#[repr(C)]
#[derive(Debug)]
pub struct ReaderSlot {
    /// Process ID
    pub pid: AtomicU32,
    /// Thread ID
    pub tid: AtomicU64,
    /// Transaction ID being read
    pub txn_id: AtomicU64,
    /// Timestamp when slot was acquired (for stale reader detection)
    pub timestamp: AtomicU64,
}

impl ReaderSlot {
    /// Create a new empty reader slot
    pub fn new() -> Self {
        Self {
            pid: AtomicU32::new(0),
            tid: AtomicU64::new(0),
            txn_id: AtomicU64::new(0),
            timestamp: AtomicU64::new(0),
        }
    }

    /// Check if this slot is free
    pub fn is_free(&self) -> bool {
        self.pid.load(Ordering::Acquire) == 0
    }

    /// Try to acquire this slot
    pub fn try_acquire(&self, txn_id: TransactionId) -> bool {
        // Try to atomically set PID from 0 to current process ID
        let pid = std::process::id();
        let old_pid = self.pid.compare_exchange(0, pid, Ordering::AcqRel, Ordering::Acquire);

        if old_pid.is_ok() {
            // Successfully acquired the slot
            self.tid.store(thread_id(), Ordering::Release);
            self.txn_id.store(txn_id.0, Ordering::Release);
            self.timestamp.store(current_timestamp(), Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Release this slot
    pub fn release(&self) {
        // Clear transaction ID first to ensure readers see consistent state
        self.txn_id.store(0, Ordering::Release);
        self.tid.store(0, Ordering::Release);
        self.timestamp.store(0, Ordering::Release);
        // Clear PID last to make slot available
        self.pid.store(0, Ordering::Release);
    }

    /// Forget this slot's snapshot (HSR action `ForgetSnapshot`): reset
    /// `txn_id` so its pages become reclaimable, without touching slot
    /// ownership (`pid`/`tid` stay put).
    pub fn forget_snapshot(&self) {
        self.txn_id.store(0, Ordering::Release);
    }

    /// Forcibly evict this slot (HSR action `Evict`): forget the snapshot
    /// and also clear `pid`/`tid`, as if the owning process had died.
    pub fn evict(&self) {
        self.release();
    }

    /// Probe process liveness. When a shared `lock_file` is available this
    /// uses an `fcntl(F_GETLK)` byte-range-lock probe keyed by `pid`
    /// (spec.md §4.2): a live owner holds an exclusive lock on byte `pid`
    /// of the lock file, and the OS releases that lock automatically, even
    /// on a crash, when the process exits. Absence of the lock means the
    /// process is dead. Falls back to a signal-0 liveness probe when no
    /// lock file is available (e.g. an in-process-only table).
    pub fn is_stale(&self, lock_file: Option<&File>) -> bool {
        let pid = self.pid.load(Ordering::Acquire);
        if pid == 0 {
            return false;
        }

        match lock_file {
            Some(file) => !pid_lock_held(file, pid),
            None => {
                #[cfg(unix)]
                {
                    unsafe { libc::kill(pid as i32, 0) != 0 }
                }
                #[cfg(not(unix))]
                {
                    let timestamp = self.timestamp.load(Ordering::Acquire);
                    let now = current_timestamp();
                    now.saturating_sub(timestamp) > 300_000_000_000
                }
            }
        }
    }
}

/// Take this process's liveness lock: an exclusive `fcntl` record lock on
/// byte `pid` of the shared lock file. Idempotent within a process — a
/// second lock request for the same range by the same process succeeds
/// without stacking, per POSIX record-lock semantics.
#[cfg(unix)]
fn claim_pid_lock(file: &File, pid: u32) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let mut lock = libc::flock {
        l_type: libc::F_WRLCK as i16,
        l_whence: libc::SEEK_SET as i16,
        l_start: pid as libc::off_t,
        l_len: 1,
        l_pid: 0,
    };
    let ret = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &mut lock) };
    if ret != 0 {
        return Err(Error::Problem(format!(
            "failed to claim reader liveness lock for pid {pid}: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn claim_pid_lock(_file: &File, _pid: u32) -> Result<()> {
    Ok(())
}

/// Query whether byte `pid` of the lock file is still held by a live
/// process, via `fcntl(F_GETLK)`.
#[cfg(unix)]
fn pid_lock_held(file: &File, pid: u32) -> bool {
    use std::os::unix::io::AsRawFd;

    let mut lock = libc::flock {
        l_type: libc::F_WRLCK as i16,
        l_whence: libc::SEEK_SET as i16,
        l_start: pid as libc::off_t,
        l_len: 1,
        l_pid: 0,
    };
    let ret = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_GETLK, &mut lock) };
    if ret != 0 {
        // Can't probe; assume live rather than falsely reclaiming.
        return true;
    }
    lock.l_type != libc::F_UNLCK as i16
}

#[cfg(not(unix))]
fn pid_lock_held(_file: &File, _pid: u32) -> bool {
    true
}

/// Open (creating if needed) the shared lock file readers use to publish
/// process liveness via byte-range locks.
pub fn open_lock_file(path: impl AsRef<Path>) -> Result<File> {
    OpenOptions::new().read(true).write(true).create(true).open(path).map_err(Error::from)
}

/// Reader table for managing all reader slots
pub struct ReaderTable {
    /// Array of reader slots. Each slot is cache-line padded: slots are
    /// polled and mutated concurrently by independent reader threads, and
    /// without padding adjacent slots' atomics would share a cache line and
    /// ping-pong between cores on every acquire/release.
    slots: Vec<CachePadded<ReaderSlot>>,
    /// Shared lock file used for the fcntl-based liveness probe. `None`
    /// in contexts (tests, in-memory use) that never opened one.
    lock_file: Option<File>,
}

impl ReaderTable {
    /// Create a new reader table with no cross-process liveness lock file
    /// (liveness falls back to a signal probe).
    pub fn new(max_readers: usize) -> Self {
        let mut slots = Vec::with_capacity(max_readers);
        for _ in 0..max_readers {
            slots.push(CachePadded::new(ReaderSlot::new()));
        }
        Self { slots, lock_file: None }
    }

    /// Create a new reader table backed by `lock_file` for the
    /// fcntl-based stale-reader probe (spec.md §4.2).
    pub fn with_lock_file(max_readers: usize, lock_file: File) -> Self {
        let mut table = Self::new(max_readers);
        table.lock_file = Some(lock_file);
        table
    }

    /// Try to acquire a reader slot
    pub fn acquire(&self, txn_id: TransactionId) -> Result<usize> {
        if let Some(file) = &self.lock_file {
            claim_pid_lock(file, std::process::id())?;
        }

        // First pass: try to find a free slot
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.try_acquire(txn_id) {
                return Ok(i);
            }
        }

        // Second pass: check for stale slots
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.is_stale(self.lock_file.as_ref()) {
                tracing::warn!(slot = i, "reclaiming stale reader slot");
                slot.release();
                if slot.try_acquire(txn_id) {
                    return Ok(i);
                }
            }
        }

        Err(Error::ReadersFull)
    }

    /// Release a reader slot
    pub fn release(&self, slot_index: usize) {
        if let Some(slot) = self.slots.get(slot_index) {
            slot.release();
        }
    }

    /// Get the oldest active reader transaction ID
    pub fn oldest_reader(&self) -> Option<TransactionId> {
        let mut oldest = None;

        for slot in &self.slots {
            let txn_id = slot.txn_id.load(Ordering::Acquire);
            if txn_id > 0 {
                match oldest {
                    None => oldest = Some(TransactionId(txn_id)),
                    Some(TransactionId(old)) if txn_id < old => {
                        oldest = Some(TransactionId(txn_id));
                    }
                    _ => {}
                }
            }
        }

        oldest
    }

    /// Clean up stale reader slots. This is the periodic "reader-table
    /// sweep" spec.md §4.2 describes, tolerant of concurrent unlocked
    /// reads of the table.
    pub fn cleanup_stale(&self) -> usize {
        let mut cleaned = 0;

        for (i, slot) in self.slots.iter().enumerate() {
            if slot.is_stale(self.lock_file.as_ref()) {
                tracing::debug!(slot = i, "sweeping stale reader slot");
                slot.release();
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            tracing::info!(cleaned, "reader-table sweep reclaimed stale slots");
        }
        cleaned
    }

    /// Apply an HSR action (spec.md §4.2) to the slot currently holding
    /// `txn_id`, if any. Returns whether a matching slot was found.
    pub fn apply_hsr_action(&self, txn_id: TransactionId, action: crate::env::HsrAction) -> bool {
        for slot in &self.slots {
            if slot.txn_id.load(Ordering::Acquire) == txn_id.0 {
                match action {
                    crate::env::HsrAction::ForgetSnapshot => slot.forget_snapshot(),
                    crate::env::HsrAction::Evict => slot.evict(),
                    crate::env::HsrAction::GiveUp | crate::env::HsrAction::Proceed => {}
                }
                return true;
            }
        }
        false
    }

    /// Get all active reader transaction IDs
    pub fn active_readers(&self) -> Vec<TransactionId> {
        let mut readers = Vec::new();

        for slot in &self.slots {
            let txn_id = slot.txn_id.load(Ordering::Acquire);
            if txn_id > 0 {
                readers.push(TransactionId(txn_id));
            }
        }

        readers
    }

    /// Get reader count
    pub fn reader_count(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_free()).count()
    }

    /// Enumerate all active readers with detailed information
    pub fn enumerate_readers(&self) -> Vec<ReaderInfo> {
        let mut readers = Vec::new();

        for (slot_idx, slot) in self.slots.iter().enumerate() {
            let pid = slot.pid.load(Ordering::Acquire);
            if pid > 0 {
                readers.push(ReaderInfo {
                    slot_index: slot_idx,
                    pid,
                    tid: slot.tid.load(Ordering::Acquire),
                    txn_id: TransactionId(slot.txn_id.load(Ordering::Acquire)),
                    timestamp: slot.timestamp.load(Ordering::Acquire),
                    is_stale: slot.is_stale(self.lock_file.as_ref()),
                });
            }
        }

        readers
    }
}

/// Detailed information about an active reader
#[derive(Debug, Clone)]
pub struct ReaderInfo {
    /// Slot index
    pub slot_index: usize,
    /// Process ID
    pub pid: u32,
    /// Thread ID
    pub tid: u64,
    /// Transaction ID
    pub txn_id: TransactionId,
    /// Timestamp when acquired (nanoseconds since epoch)
    pub timestamp: u64,
    /// Whether this reader appears to be stale
    pub is_stale: bool,
}

impl ReaderInfo {
    /// Get age of this reader in seconds
    pub fn age_seconds(&self) -> u64 {
        let now = current_timestamp();
        (now.saturating_sub(self.timestamp)) / 1_000_000_000
    }
}

/// Get current thread ID
fn thread_id() -> u64 {
    #[cfg(unix)]
    {
        unsafe { libc::pthread_self() as u64 }
    }

    #[cfg(windows)]
    {
        unsafe { winapi::um::processthreadsapi::GetCurrentThreadId() as u64 }
    }

    #[cfg(not(any(unix, windows)))]
    {
        // Fallback: use thread local storage address as ID
        thread_local! {
            static THREAD_ID: u8 = 0;
        }
        THREAD_ID.with(|id| id as *const _ as u64)
    }
}

/// Get current timestamp in nanoseconds
fn current_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_slot_acquire_release() {
        let slot = ReaderSlot::new();
        assert!(slot.is_free());

        // Acquire slot
        assert!(slot.try_acquire(TransactionId(100)));
        assert!(!slot.is_free());
        assert_eq!(slot.txn_id.load(Ordering::Acquire), 100);

        // Can't acquire again
        assert!(!slot.try_acquire(TransactionId(200)));

        // Release slot
        slot.release();
        assert!(slot.is_free());
        assert_eq!(slot.txn_id.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_reader_table() {
        let table = ReaderTable::new(10);

        // Acquire some slots
        let slot1 = table.acquire(TransactionId(100)).unwrap();
        let slot2 = table.acquire(TransactionId(200)).unwrap();
        let slot3 = table.acquire(TransactionId(150)).unwrap();

        assert_eq!(table.reader_count(), 3);

        // Check oldest reader
        assert_eq!(table.oldest_reader(), Some(TransactionId(100)));

        // Release a slot
        table.release(slot1);
        assert_eq!(table.reader_count(), 2);
        assert_eq!(table.oldest_reader(), Some(TransactionId(150)));

        // Release all
        table.release(slot2);
        table.release(slot3);
        assert_eq!(table.reader_count(), 0);
        assert_eq!(table.oldest_reader(), None);
    }

    #[test]
    fn test_reader_table_full() {
        let table = ReaderTable::new(3);

        // Fill all slots
        let _slot1 = table.acquire(TransactionId(100)).unwrap();
        let _slot2 = table.acquire(TransactionId(200)).unwrap();
        let _slot3 = table.acquire(TransactionId(300)).unwrap();

        // Next acquire should fail
        assert!(table.acquire(TransactionId(400)).is_err());
    }

    #[test]
    fn test_hsr_forget_snapshot_keeps_slot_ownership() {
        let table = ReaderTable::new(3);
        let slot = table.acquire(TransactionId(100)).unwrap();

        assert!(table.apply_hsr_action(TransactionId(100), crate::env::HsrAction::ForgetSnapshot));
        assert_eq!(table.slots[slot].txn_id.load(Ordering::Acquire), 0);
        assert!(!table.slots[slot].is_free());
    }

    #[test]
    fn test_hsr_evict_frees_slot_entirely() {
        let table = ReaderTable::new(3);
        let slot = table.acquire(TransactionId(100)).unwrap();

        assert!(table.apply_hsr_action(TransactionId(100), crate::env::HsrAction::Evict));
        assert!(table.slots[slot].is_free());
    }

    #[test]
    fn test_reader_management_integration() {
        use crate::env::EnvBuilder;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let env =
            EnvBuilder::new().map_size(10 * 1024 * 1024).set_maxreaders(5).open(dir.path()).unwrap();

        // Start multiple read transactions
        let txn1 = env.read_txn().unwrap();
        let txn2 = env.read_txn().unwrap();
        let txn3 = env.read_txn().unwrap();

        // Check reader count
        let inner = env.inner();
        assert_eq!(inner.readers.reader_count(), 3);

        // Drop a transaction
        drop(txn2);

        // Reader count should decrease
        assert_eq!(inner.readers.reader_count(), 2);

        // Should be able to start new transactions
        let txn4 = env.read_txn().unwrap();
        let txn5 = env.read_txn().unwrap();

        assert_eq!(inner.readers.reader_count(), 4);

        // Clean up
        drop(txn1);
        drop(txn3);
        drop(txn4);
        drop(txn5);

        assert_eq!(inner.readers.reader_count(), 0);
    }
}
