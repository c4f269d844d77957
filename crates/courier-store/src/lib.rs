//! # courier-store
//!
//! SQLite persistence for the Courier chat service.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed CRUD helpers for users, messages, and
//! groups.  Seen-state transitions are expressed as single conditional SQL
//! statements so that interleaved reconcilers compose without lost updates
//! or double notifications.

pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod users;

mod error;

#[cfg(test)]
mod test_support;

pub use database::Database;
pub use error::StoreError;
