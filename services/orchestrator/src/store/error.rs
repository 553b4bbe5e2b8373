//! Store error types.

use gsfleet_id::ServerId;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record to update does not exist.
    #[error("server record not found: {0}")]
    NotFound(ServerId),

    /// Another record already uses this display name for the owner.
    #[error("server name '{display_name}' already in use by {owner_id}")]
    DuplicateName {
        owner_id: String,
        display_name: String,
    },

    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("migrations directory not found (tried: {tried}); last error: {last_error}")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// The store rejected the write; retrying later may succeed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded.
    #[error("corrupt server record: {0}")]
    Corrupt(String),
}
