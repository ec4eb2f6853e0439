//! # Storage Module
//!
//! Durable [`crate::store::ContentStore`] backed by redb.
//!
//! Uses redb embedded database for:
//! - ACID transactions (a revision promotion updates page and revision
//!   atomically)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)

mod redb_store;

pub use redb_store::RedbStore;
