//! Durable state for comment ingestion and variant monitoring.
//!
//! Postgres is the single source of truth for which comments exist and which
//! monitoring sessions are still active. Consumers talk to the `CommentStore`
//! and `SessionStore` traits; `MemoryStore` backs tests without a database.

pub mod comments;
pub mod memory;
pub mod sessions;

pub use comments::{CommentStore, PgCommentStore};
pub use memory::MemoryStore;
pub use sessions::{PgSessionStore, SessionStore};

/// Table definitions for `comments`, `variant_monitoring`, and `task_queue`.
pub const SCHEMA_SQL: &str = include_str!("../schema.sql");
