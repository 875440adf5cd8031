//! catalogsync server library.
//!
//! The reference receiving side for `catalog-sync-core` envelopes.

pub mod server;
