//! The primary document store: SQLite-backed repositories for
//! integrations, parts, the durable sync-request queue and the sync
//! history audit log. Key columns are denormalized beside a full JSON
//! document per record, so lookups are indexed while the canonical shape
//! stays schema-free.

mod db;
mod integrations;
mod parts;
mod queue;

pub use db::{PrimaryStore, StoreError, WriteMode, WriteSummary};
