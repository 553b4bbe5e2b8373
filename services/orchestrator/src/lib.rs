//! gsfleet orchestrator library.
//!
//! This crate primarily ships the `fleetd` binary, but exposes its
//! components so they can be embedded and integration-tested.

pub mod cleanup;
pub mod config;
pub mod fleet;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod store;
