//! Error taxonomy for basalt
//!
//! Every public call returns a [`Result`]; the library never panics on a
//! user-reachable path. The variant set mirrors the stable numeric error
//! codes of the original design so callers can reason about a fixed,
//! documented set of failure modes rather than ad-hoc strings.

use std::fmt;
use thiserror::Error;

/// Page identifier: a physical page number (file offset / page size).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u64);

impl PageId {
    /// The sentinel meaning "no page" / empty tree (`P_INVALID`).
    pub const INVALID: PageId = PageId(u64::MAX);

    /// Byte offset of this page in the data file.
    pub fn to_offset(self, page_size: usize) -> u64 {
        self.0 * page_size as u64
    }

    /// Whether this is the `P_INVALID` sentinel.
    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction identifier. Monotonically increasing; txn 0 is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse page classification, used in corruption diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// Internal B+tree node.
    Branch,
    /// B+tree leaf holding data (or fixed-width dup keys, `LEAF2`).
    Leaf,
    /// Span of one or more pages holding a single large value.
    Overflow,
    /// One of the rotating meta pages.
    Meta,
    /// Page not currently in any recognized role.
    Free,
}

/// The stable error taxonomy. Each variant corresponds to one of the
/// documented failure modes; callers should match on variants rather than
/// inspect message text.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Underlying I/O failure (open/read/write/msync/fsync).
    #[error("I/O error: {0}")]
    Io(String),

    /// Key already exists (`put` with `NOOVERWRITE`/`NODUPDATA`).
    #[error("key already exists")]
    KeyExist,

    /// Key/cursor position not found.
    #[error("key not found")]
    NotFound,

    /// A page number referenced by a node could not be read.
    #[error("page {0} not found")]
    PageNotFound(PageId),

    /// On-disk structure fails an invariant check (bad header, key order,
    /// orphaned/doubly-referenced page, etc).
    #[error("database corrupted: {details}")]
    Corrupted {
        /// Human-readable description.
        details: String,
        /// Page where the corruption was detected, if known.
        page_id: Option<PageId>,
    },

    /// A write or sync failed and the environment can no longer be
    /// trusted; it must be closed and reopened.
    #[error("environment is in a fatal (panicked) state")]
    Panic,

    /// Data file signature/format version does not match this build.
    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version this build expects.
        expected: u32,
        /// Version found on disk.
        found: u32,
    },

    /// File is not a basalt database (bad magic).
    #[error("not a valid database file")]
    Invalid,

    /// No room left in the mapped address space / file for this operation.
    #[error("map full")]
    MapFull,

    /// `maxdbs` named databases are already open.
    #[error("too many named databases open")]
    DbsFull,

    /// The reader table has no free slots.
    #[error("reader table is full")]
    ReadersFull,

    /// Thread-local reader-slot table is full (NOTLS mode exhaustion).
    #[error("thread-local reader slot table is full")]
    TlsFull,

    /// The write transaction's dirty list / dirty-room budget is exhausted.
    #[error("transaction has too many dirty pages")]
    TxnFull,

    /// The cursor stack exceeded its bounded depth.
    #[error("cursor stack too deep")]
    CursorFull,

    /// A page has no more room for the requested node.
    #[error("page has no more space")]
    PageFull,

    /// Another process grew the data file past our mapping.
    #[error("map was resized by another process")]
    MapResized,

    /// Operation not compatible with the database's persistent flags
    /// (e.g. `GET_BOTH` on a non-`DUPSORT` database).
    #[error("incompatible operation for this database's flags")]
    Incompatible,

    /// Couldn't allocate or find a valid reader slot.
    #[error("bad reader slot")]
    BadRslot,

    /// Transaction handle is stale, already committed, or already aborted.
    #[error("bad transaction")]
    BadTxn,

    /// Key or value size is out of the allowed range.
    #[error("bad key/value size")]
    BadValSize,

    /// DBI handle is stale (sequence number mismatch) or unknown.
    #[error("bad database handle")]
    BadDbi,

    /// Programmer error: invalid argument combination, cursor misuse, etc.
    #[error("invalid usage: {0}")]
    Problem(String),

    /// Internal: DB root is `P_INVALID` (empty tree). Never escapes the
    /// crate boundary; callers see `NotFound` instead.
    #[error("no root page")]
    NoRoot,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Whether this error, raised during the commit pipeline, should mark
    /// the environment fatal (spec.md §7's "consistency/environmental"
    /// classes) rather than just fail the one transaction.
    pub fn is_fatal_during_commit(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Corrupted { .. })
    }
}
