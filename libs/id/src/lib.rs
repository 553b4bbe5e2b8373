//! # gsfleet-id
//!
//! Typed identifiers for gsfleet.
//!
//! Records are keyed by system-generated IDs; display names are owner-chosen
//! labels and may collide across owners. Every ID renders as
//! `{prefix}_{ulid}`, for example `srv_01HV4Z4NYPLTRS0JTUA8XDME5F`, so the
//! prefix tells you what kind of record you are looking at and the ULID
//! sorts by creation time.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
