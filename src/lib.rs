//! An embedded, ACID, memory-mapped key/value store.
//!
//! The engine is a copy-on-write B+tree with multi-version concurrency
//! control: one writer and many readers operate concurrently over a single
//! file-backed mapping, with durability controlled by fsync policy rather
//! than a write-ahead log. See [`Environment`] for the entry point.

#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod auto_grow;
pub mod branch;
pub mod btree;
pub mod catalog;
pub mod checksum;
pub mod comparator;
pub mod copy;
pub mod cursor;
pub mod cursor_iter;
pub mod db;
pub mod dupsort;
pub mod env;
pub mod error;
pub mod freelist;
pub mod idl;
pub mod io;
pub mod meta;
pub mod nested_txn;
pub mod overflow;
pub mod page;
pub mod reader;
pub mod space_info;
pub mod tree_utils;
pub mod txn;

#[cfg(test)]
mod btree_tests;

// Re-exports
pub use db::{Database, DatabaseFlags, Key, Value};
pub use env::{EnvBuilder, Environment};
pub use error::{Error, PageId, Result, TransactionId};
pub use txn::{Read, Transaction, Write};

/// A read-only transaction.
pub type RoTxn<'env> = Transaction<'env, txn::Read>;
/// A read-write transaction.
pub type RwTxn<'env> = Transaction<'env, txn::Write>;

/// The default page size (4KB).
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Library version, as reported by Cargo.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
