//! Account credential mutations.
//!
//! The gateway applies password changes and deactivation only after
//! interactive authentication has succeeded and the winning stage result has
//! been cross-checked against the bearer-authenticated requester. Credential
//! persistence and password hashing live behind [`AccountStore`].

pub mod service;
pub mod store;

pub use service::AccountService;
pub use store::{AccountStore, DeactivateOutcome, MemoryAccountStore, PgAccountStore, Principal};
