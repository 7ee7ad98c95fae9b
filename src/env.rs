//! Environment management with type-state pattern

use bitflags::bitflags;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock};

use crate::checksum::ChecksumMode;
use crate::error::{Error, PageId, Result, TransactionId};
use crate::freelist::ReclaimPolicy;
use crate::io::{IoBackend, MmapBackend};
use crate::meta::{DbInfo, MetaPage, META_PAGE_1, META_PAGE_2};
use crate::page::Page;
use crate::reader::ReaderTable;
use crate::txn::{Read, Transaction, Write};

/// Outcome requested by an [`HsrCallback`] when the writer is stuck behind
/// a slow reader and cannot reclaim enough free pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HsrAction {
    /// Give up; the allocator should surface `MapFull`.
    GiveUp,
    /// Take no action on the reader table; the caller may spill or grow
    /// the map instead.
    Proceed,
    /// Forget the laggard's snapshot (`txnid` reset to "none") so its
    /// pages become reclaimable, without touching slot ownership.
    ForgetSnapshot,
    /// Forget the snapshot and forcibly evict the slot (clear pid/tid),
    /// as if the reader's process had died.
    Evict,
}

/// User callback invoked when the writer cannot reclaim enough pages
/// because the oldest reader blocks freelist recycling
/// (`handle-slow-reader`, spec.md §4.2).
///
/// Called with `(laggard_txnid, gap_pages, space_needed, retry_count)`.
#[derive(Clone)]
pub struct HsrCallback(pub Arc<dyn Fn(TransactionId, u64, usize, u32) -> HsrAction + Send + Sync>);

impl std::fmt::Debug for HsrCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HsrCallback(..)")
    }
}

bitflags! {
    /// Environment-wide open flags, mirroring the engine's documented
    /// options table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EnvFlags: u32 {
        /// Map the data file at a fixed address (advisory; not all
        /// platforms honor this).
        const FIXEDMAP = 0x0000_0001;
        /// The path passed to `open` is the data file itself, not a
        /// directory containing `data.mdb`/`lock.mdb`.
        const NOSUBDIR = 0x0000_0002;
        /// Open for read-only access; write transactions are refused.
        const RDONLY = 0x0000_0004;
        /// Write directly to the memory map instead of via `write()`.
        const WRITEMAP = 0x0000_0008;
        /// Skip fsync of the meta page after a commit (data pages are
        /// still synced unless `NOSYNC` is also set).
        const NOMETASYNC = 0x0000_0010;
        /// Skip fsync entirely; a crash can roll back or corrupt the
        /// last transactions.
        const NOSYNC = 0x0000_0020;
        /// Use `msync(MS_ASYNC)` instead of a synchronous flush.
        const MAPASYNC = 0x0000_0040;
        /// Disable the thread-local reader-slot cache; every transaction
        /// explicitly manages its own slot.
        const NOTLS = 0x0000_0080;
        /// Skip the cross-process locking (single-process use only).
        const NOLOCK = 0x0000_0100;
        /// Disable `MADV_RANDOM` read-ahead hints.
        const NORDAHEAD = 0x0000_0200;
        /// Skip zero-filling newly allocated pages.
        const NOMEMINIT = 0x0000_0400;
        /// Coalesce adjacent free-list runs during GC.
        const COALESCE = 0x0000_0800;
        /// Reclaim free pages LIFO instead of FIFO.
        const LIFORECLAIM = 0x0000_1000;
        /// Fill freed pages with a debug byte pattern before reuse.
        const PAGEPERTURB = 0x0000_2000;
    }
}



/// Environment state marker traits
pub mod state {
    /// Sealed trait for environment states
    mod sealed {
        pub trait Sealed {}
    }

    /// Environment state trait
    pub trait State: sealed::Sealed {}

    /// Closed environment state
    #[derive(Debug)]
    pub struct Closed;
    impl sealed::Sealed for Closed {}
    impl State for Closed {}

    /// Open environment state
    #[derive(Debug)]
    pub struct Open;
    impl sealed::Sealed for Open {}
    impl State for Open {}

    /// Read-only environment state
    #[derive(Debug)]
    pub struct ReadOnly;
    impl sealed::Sealed for ReadOnly {}
    impl State for ReadOnly {}
}

use state::*;

/// Maximum number of named databases
pub const MAX_DBS: u32 = 128;

/// Default map size (1GB)
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

/// Durability modes for write transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// No sync - fastest but no durability guarantees
    NoSync,
    /// Async sync - data is flushed asynchronously (default)
    AsyncFlush,
    /// Sync data pages only - metadata might be lost
    SyncData,
    /// Full sync - both data and metadata are synced (safest)
    FullSync,
}



/// Geometry knobs for the auto-grow path (`set_geometry`).
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    /// Lower bound the map is never shrunk below.
    pub lower: usize,
    /// Size requested at `open` if the file doesn't already exceed it.
    pub size: usize,
    /// Upper bound growth will not exceed.
    pub upper: usize,
    /// Amount added per growth step below `growth_threshold`.
    pub growth_step: usize,
    /// Amount trimmed per shrink step (0 disables auto-shrink).
    pub shrink_threshold: usize,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            lower: 0,
            size: DEFAULT_MAP_SIZE,
            upper: usize::MAX,
            growth_step: DEFAULT_MAP_SIZE / 4,
            shrink_threshold: 0,
        }
    }
}

/// Fully resolved environment configuration, as set by `EnvBuilder` and
/// frozen once the environment is open.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Map size in bytes.
    pub map_size: usize,
    /// Maximum concurrent reader slots.
    pub max_readers: u32,
    /// Maximum named sub-databases.
    pub max_dbs: u32,
    /// Open flags.
    pub flags: EnvFlags,
    /// Durability policy for commits.
    pub durability: DurabilityMode,
    /// Free-page reclaim order.
    pub reclaim_policy: ReclaimPolicy,
    /// Geometry / auto-grow configuration.
    pub geometry: Geometry,
    /// Cap on dirty pages a single write transaction may accumulate
    /// before `alloc_page` returns `TxnFull`.
    pub max_txn_pages: usize,
    /// Page checksum policy.
    pub checksum_mode: ChecksumMode,
    /// Dirty-list size above which a write transaction spills pages to
    /// disk early (spec.md §4.4). `None` disables spilling.
    pub spill_threshold: Option<usize>,
    /// Handle-slow-reader callback, invoked when the writer is blocked by
    /// the oldest reader and cannot reclaim space (spec.md §4.2).
    pub hsr: Option<HsrCallback>,
}

impl EnvConfig {
    fn from_flags(flags: EnvFlags) -> ReclaimPolicy {
        if flags.contains(EnvFlags::LIFORECLAIM) {
            ReclaimPolicy::Lifo
        } else {
            ReclaimPolicy::Fifo
        }
    }
}

/// Shared environment data
pub(crate) struct EnvInner {
    /// Path to the database
    _path: PathBuf,
    /// I/O backend
    pub(crate) io: Box<dyn IoBackend>,
    /// Current map size
    pub(crate) map_size: usize,
    /// Current transaction ID
    pub(crate) txn_id: AtomicU64,
    /// Write lock
    pub(crate) write_lock: Mutex<()>,
    /// Reader table
    pub(crate) readers: ReaderTable,
    /// Named databases
    pub(crate) databases: RwLock<HashMap<Option<String>, DbInfo>>,
    /// Free pages tracking
    pub(crate) _free_pages: RwLock<Vec<PageId>>,
    /// Durability mode
    pub(crate) durability: DurabilityMode,
    /// Next page ID to allocate
    pub(crate) next_page_id: AtomicU64,
    /// Frozen configuration this environment was opened with
    pub(crate) config: EnvConfig,
}

// Safety: EnvInner is Send/Sync because IoBackend is Send/Sync
unsafe impl Send for EnvInner {}
unsafe impl Sync for EnvInner {}

impl EnvInner {
    /// Get the current meta page
    pub(crate) fn meta(&self) -> Result<MetaPage> {
        // Read both meta pages
        let meta0 = self.io.read_page(META_PAGE_1)?;
        let meta1 = self.io.read_page(META_PAGE_2)?;
        


        // Validate MetaPage fits in page data before casting
        if size_of::<MetaPage>() > meta0.data.len() || size_of::<MetaPage>() > meta1.data.len() {
            return Err(Error::Corrupted {
                details: "MetaPage size exceeds page data".into(),
                page_id: None,
            });
        }
        
        // Validate alignment
        if meta0.data.as_ptr() as usize % std::mem::align_of::<MetaPage>() != 0 ||
           meta1.data.as_ptr() as usize % std::mem::align_of::<MetaPage>() != 0 {
            return Err(Error::Corrupted {
                details: "MetaPage not properly aligned".into(),
                page_id: None,
            });
        }
        
        // Cast data area to MetaPage
        let meta0 = unsafe { &*(meta0.data.as_ptr() as *const MetaPage) };
        let meta1 = unsafe { &*(meta1.data.as_ptr() as *const MetaPage) };

        // Validate and return the most recent valid one
        let meta0_valid = meta0.validate().is_ok();
        let meta1_valid = meta1.validate().is_ok();

        match (meta0_valid, meta1_valid) {
            (true, true) => {
                // Both valid, use the one with higher transaction ID
                if meta0.last_txnid.0 >= meta1.last_txnid.0 {
                    Ok(*meta0)
                } else {
                    Ok(*meta1)
                }
            }
            (true, false) => {
                tracing::warn!("meta page 1 failed validation; recovering from meta page 0");
                Ok(*meta0)
            }
            (false, true) => {
                tracing::warn!("meta page 0 failed validation; recovering from meta page 1");
                Ok(*meta1)
            }
            (false, false) => {
                tracing::error!("both meta pages failed validation");
                Err(Error::Corrupted {
                    details: "both meta pages failed validation".into(),
                    page_id: None,
                })
            }
        }
    }

    /// Get the non-current meta page ID (for writing)
    pub(crate) fn next_meta_page_id(&self) -> Result<PageId> {
        let meta = self.meta()?;
        // If current is page 0, next is page 1
        if meta.last_txnid.0 % 2 == 0 {
            Ok(META_PAGE_2)
        } else {
            Ok(META_PAGE_1)
        }
    }




}

/// Database environment
pub struct Environment<S: State = Closed> {
    inner: Option<Arc<EnvInner>>,
    _state: PhantomData<S>,
}

/// Builder for creating environments
pub struct EnvBuilder {
    map_size: usize,
    max_readers: u32,
    max_dbs: u32,
    flags: EnvFlags,
    durability: DurabilityMode,
    geometry: Geometry,
    max_txn_pages: usize,
    checksum_mode: ChecksumMode,
    spill_threshold: Option<usize>,
    hsr: Option<HsrCallback>,
}

impl EnvBuilder {
    /// Create a new environment builder
    pub fn new() -> Self {
        Self {
            map_size: DEFAULT_MAP_SIZE,
            max_readers: 126,
            max_dbs: MAX_DBS,
            flags: EnvFlags::empty(),
            durability: DurabilityMode::AsyncFlush,
            geometry: Geometry::default(),
            max_txn_pages: 1 << 20,
            checksum_mode: ChecksumMode::None,
            spill_threshold: Some(1024),
            hsr: None,
        }
    }

    /// Set the page checksum policy.
    pub fn checksum_mode(mut self, mode: ChecksumMode) -> Self {
        self.checksum_mode = mode;
        self
    }

    /// Set the dirty-list size above which a write transaction spills
    /// pages to disk early. `None` disables spilling.
    pub fn spill_threshold(mut self, threshold: Option<usize>) -> Self {
        self.spill_threshold = threshold;
        self
    }

    /// Install a handle-slow-reader callback (spec.md §4.2), invoked when
    /// the writer cannot reclaim enough space because the oldest reader
    /// is blocking freelist recycling.
    pub fn set_hsr(mut self, callback: HsrCallback) -> Self {
        self.hsr = Some(callback);
        self
    }

    /// Set the map size
    pub fn map_size(mut self, size: usize) -> Self {
        self.map_size = size;
        self.geometry.size = size;
        self
    }

    /// Set the maximum number of readers (`mdb_env_set_maxreaders`)
    pub fn set_maxreaders(mut self, readers: u32) -> Self {
        self.max_readers = readers;
        self
    }

    /// Set the maximum number of named databases (`mdb_env_set_maxdbs`)
    pub fn set_maxdbs(mut self, dbs: u32) -> Self {
        self.max_dbs = dbs.min(MAX_DBS);
        self
    }

    /// Set the map geometry for the auto-grow path (`mdb_env_set_geometry`)
    pub fn set_geometry(mut self, geometry: Geometry) -> Self {
        self.map_size = geometry.size;
        self.geometry = geometry;
        self
    }

    /// Cap the number of dirty pages a write transaction may accumulate
    /// before `alloc_page` returns `TxnFull`.
    pub fn max_txn_pages(mut self, pages: usize) -> Self {
        self.max_txn_pages = pages;
        self
    }

    /// Replace the open flags wholesale.
    pub fn flags(mut self, flags: EnvFlags) -> Self {
        self.flags = flags;
        self
    }

    /// OR in one or more open flags (`FIXEDMAP`, `NOSUBDIR`, `RDONLY`,
    /// `WRITEMAP`, `NOMETASYNC`, `NOSYNC`, `MAPASYNC`, `NOTLS`, `NOLOCK`,
    /// `NORDAHEAD`, `NOMEMINIT`, `COALESCE`, `LIFORECLAIM`, `PAGEPERTURB`).
    pub fn set_flags(mut self, flags: EnvFlags) -> Self {
        self.flags.insert(flags);
        self
    }

    /// Set the durability mode
    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    /// Build and open the environment
    #[tracing::instrument(skip(self, path), fields(map_size = self.map_size))]
    pub fn open(self, path: impl AsRef<Path>) -> Result<Environment<Open>> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening environment");

        let config = EnvConfig {
            map_size: self.map_size,
            max_readers: self.max_readers,
            max_dbs: self.max_dbs,
            flags: self.flags,
            durability: self.durability,
            reclaim_policy: EnvConfig::from_flags(self.flags),
            geometry: self.geometry,
            max_txn_pages: self.max_txn_pages,
            checksum_mode: self.checksum_mode,
            spill_threshold: self.spill_threshold,
            hsr: self.hsr.clone(),
        };

        // Create directory if it doesn't exist
        std::fs::create_dir_all(path)?;

        let data_path = path.join("data.mdb");
        let lock_path = path.join("lock.mdb");
        let lock_file = crate::reader::open_lock_file(&lock_path)?;

        // Create I/O backend
        let mut io: Box<dyn IoBackend> =
            Box::new(MmapBackend::with_options(&data_path, self.map_size as u64)?);

        // Check if this is a new database by trying to read meta pages
        let is_new_db = match io.read_page(META_PAGE_1) {
            Ok(page) => {
                let meta = unsafe { &*(page.data.as_ptr() as *const MetaPage) };
                meta.magic != crate::meta::MAGIC
            }
            Err(_) => true,
        };
        tracing::debug!(is_new_db, "resolved database initialization state");

        let last_txn_id;
        let mut last_page_id = 3; // After two meta pages and two root pages
        let meta_info;

        if is_new_db {
            // Initialize new database
            let mut meta = MetaPage::new();
            meta.mapsize = self.map_size as u64;
            meta.maxreaders = self.max_readers;
            meta.dbs = self.max_dbs;
            meta.last_txnid = TransactionId(0);
            meta.free_db.root = PageId(2);
            meta.main_db.root = PageId(3);
            meta.last_pg = PageId(3);

            // Write meta page 0
            let meta_page0 = Page::from_meta(&meta, META_PAGE_1);
            io.write_page(&meta_page0)?;

            // Write meta page 1
            meta.last_txnid = TransactionId(1);
            let meta_page1 = Page::from_meta(&meta, META_PAGE_2);
            io.write_page(&meta_page1)?;

            // Initialize free DB root page (page 2)
            let free_page = Page::new(PageId(2), crate::page::PageFlags::LEAF);
            io.write_page(&free_page)?;

            // Initialize main DB root page (page 3)
            let main_page = Page::new(PageId(3), crate::page::PageFlags::LEAF);
            io.write_page(&main_page)?;

            // Sync to disk
            io.sync()?;

            last_txn_id = 1;
            meta_info = meta;
        } else {
            // Load existing meta info
            let inner = Arc::new(EnvInner {
                _path: path.to_path_buf(),
                io,
                map_size: self.map_size,
                txn_id: AtomicU64::new(0),
                write_lock: Mutex::new(()),
                readers: ReaderTable::with_lock_file(
                    self.max_readers as usize,
                    lock_file.try_clone()?,
                ),
                databases: RwLock::new(HashMap::new()),
                _free_pages: RwLock::new(Vec::new()),
                durability: self.durability,
                next_page_id: AtomicU64::new(0),
                config: config.clone(),
            });

            meta_info = inner.meta()?;
            last_txn_id = meta_info.last_txnid.0;
            last_page_id = meta_info.last_pg.0;

            // Recreate with correct values
            drop(inner);
            io = Box::new(MmapBackend::with_options(&data_path, self.map_size as u64)?);
        }

        // Initialize reader table, backed by the shared lock file for
        // cross-process stale-reader detection (spec.md §4.2).
        let readers = ReaderTable::with_lock_file(self.max_readers as usize, lock_file);

        let inner = Arc::new(EnvInner {
            _path: path.to_path_buf(),
            io,
            map_size: self.map_size,
            txn_id: AtomicU64::new(last_txn_id),
            write_lock: Mutex::new(()),
            readers,
            databases: RwLock::new(HashMap::new()),
            _free_pages: RwLock::new(Vec::new()),
            durability: self.durability,
            next_page_id: AtomicU64::new(last_page_id + 1),
            config,
        });

        // Initialize main database entry
        {
            let mut dbs = inner.databases.write()
                .expect("Failed to acquire database lock during initialization");
            dbs.insert(None, meta_info.main_db);
        }

        // Note: Named databases will be loaded on-demand from the catalog
        // We can't load them here because we'd need a transaction, but the
        // environment isn't fully constructed yet

        tracing::info!(last_txn_id, "environment opened");
        Ok(Environment { inner: Some(inner), _state: PhantomData })
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for Environment<Closed> {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment<Closed> {
    /// Create a new closed environment
    pub fn new() -> Self {
        Self { inner: None, _state: PhantomData }
    }

    /// Open the environment
    pub fn open(self, path: impl AsRef<Path>) -> Result<Environment<Open>> {
        EnvBuilder::new().open(path)
    }
}

impl Environment<Open> {
    /// Begin a read transaction
    pub fn read_txn(&self) -> Result<Transaction<'_, Read>> {
        Transaction::new_read(self)
    }

    /// Begin a write transaction
    pub fn write_txn(&self) -> Result<Transaction<'_, Write>> {
        Transaction::new_write(self)
    }

    /// Get inner reference (for internal use)
    pub(crate) fn inner(&self) -> &Arc<EnvInner> {
        self.inner.as_ref().expect("Environment not open")
    }

    /// The frozen configuration this environment was opened with.
    pub fn config(&self) -> &EnvConfig {
        &self.inner().config
    }



    /// Get inner reference (for testing)
    #[cfg(test)]
    #[allow(dead_code)]
    pub(crate) fn inner_test(&self) -> &Arc<EnvInner> {
        self.inner()
    }

    /// Sync data to disk
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner();
        if inner.config.flags.contains(EnvFlags::NOSYNC) {
            return Ok(());
        }
        match inner.durability {
            DurabilityMode::NoSync => {
                // No sync requested
                Ok(())
            }
            DurabilityMode::AsyncFlush | DurabilityMode::SyncData | DurabilityMode::FullSync => {
                if inner.config.flags.contains(EnvFlags::MAPASYNC) {
                    inner.io.sync_async()?;
                } else {
                    inner.io.sync()?;
                }
                Ok(())
            }
        }
    }

    /// Force a full synchronous sync regardless of durability mode
    pub fn force_sync(&self) -> Result<()> {
        let inner = self.inner();
        inner.io.sync()?;
        Ok(())
    }
    
    /// Get current space usage information
    pub fn space_info(&self) -> Result<crate::space_info::SpaceInfo> {
        let inner = self.inner();
        let total_pages = inner.io.size_in_pages();
        let next_page_id = inner.next_page_id.load(std::sync::atomic::Ordering::Acquire);
        
        // Get free pages count from a read transaction
        let free_pages = {
            let _txn = self.read_txn()?;
            // Count regular freelist pages
            total_pages.saturating_sub(next_page_id)
        };
        
        let used_pages = next_page_id;
        let map_size = inner.map_size as u64;
        
        Ok(crate::space_info::SpaceInfo::new(
            total_pages,
            used_pages,
            free_pages,
            map_size,
        ))
    }

    /// Get environment statistics
    pub fn stat(&self) -> Result<crate::meta::DbStats> {
        let inner = self.inner();
        let meta = inner.meta()?;

        Ok(crate::meta::DbStats {
            psize: meta.psize,
            depth: meta.main_db.depth,
            branch_pages: meta.main_db.branch_pages,
            leaf_pages: meta.main_db.leaf_pages,
            overflow_pages: meta.main_db.overflow_pages,
            entries: meta.main_db.entries,
        })
    }

    /// Walk every page reachable from the main database and every named
    /// database's tree, validating stored checksums in one batch rather
    /// than the lazy per-page checks `checksum_mode` performs during
    /// normal reads. Pages with no stored checksum (checksum 0) are
    /// skipped, same as [`ChecksummedPage`](crate::checksum::ChecksummedPage).
    /// Returns the first failure's error if any page's checksum mismatches;
    /// callers who need every mismatch, not just the first, can inspect
    /// [`BatchValidator::failed_pages`](crate::checksum::BatchValidator::failed_pages)
    /// via a lower-level walk of their own.
    pub fn verify_checksums(&self) -> Result<()> {
        let txn = self.read_txn()?;
        let main_db_info = txn.db_info(None)?;

        let mut page_ids = Vec::new();
        if main_db_info.root.0 != 0 {
            page_ids.extend(crate::tree_utils::collect_tree_pages(&txn, main_db_info.root)?);
        }
        for (_, info) in crate::catalog::Catalog::list_databases(&txn)? {
            if info.root.0 != 0 {
                page_ids.extend(crate::tree_utils::collect_tree_pages(&txn, info.root)?);
            }
        }
        page_ids.sort_unstable();
        page_ids.dedup();

        let pages: Vec<_> =
            page_ids.iter().map(|id| txn.get_page(*id).map(|p| (*id, p))).collect::<Result<_>>()?;

        let mut validator = crate::checksum::BatchValidator::new();
        validator.validate_pages(&pages)
    }

    /// Write a defragmented copy of this environment to `path`, mirroring
    /// `mdb_env_copy`. This is the sanctioned way to reclaim space (spec.md
    /// §1): only pages reachable from a live database tree are written, so
    /// the copy has no free pages left over from prior deletes.
    pub fn copy_to(&self, path: impl AsRef<Path>) -> Result<()> {
        crate::copy::copy_to_file(self, path, crate::copy::CopyOptions::compact())
    }
}

impl<S: State> Drop for Environment<S> {
    fn drop(&mut self) {
        if let Some(_inner) = self.inner.take() {
            // Meta page alternation handled in commit
            tracing::debug!("environment closed");
        }
    }
}
