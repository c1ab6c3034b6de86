//! Signup-form backend.
//!
//! Persists member signups to SQLite and enforces a per-minute quota on
//! join and check actions. The quota counters are shared by every process
//! using the same database file and are updated atomically.

pub mod config;
pub mod handlers;
pub mod storage;
pub mod utils;
