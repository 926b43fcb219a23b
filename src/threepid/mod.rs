//! Third-party identifier (threepid) lifecycle.
//!
//! A threepid is an email address or phone number bound to an account as an
//! alternate login/recovery credential. This module owns the verification and
//! binding state machine:
//!
//! 1) A client asks for a verification token for an address; the request-token
//!    guard decides whether the address must already be owned (password reset)
//!    or must be unowned (adding a new threepid).
//! 2) The identity verifier mails/texts a token and later exchanges the signed
//!    credentials for a verified `{medium, address, validated_at}` triple.
//! 3) The association is inserted atomically; binding publication to the
//!    identity server is best-effort and never rolls back the local insert.
//!
//! Addresses are canonicalized before every lookup, insert, and delete so add
//! and delete share one key space.

pub mod models;
pub mod normalize;
pub mod service;
pub mod store;

pub use models::{
    Medium, ThreepidAssociation, ThreepidCredentials, TokenRequestPolicy, VerifiedThreepid,
};
pub use service::{AddressInput, BindStatus, ThreepidService};
pub use store::{DeleteOutcome, InsertOutcome, MemoryThreepidStore, PgThreepidStore, ThreepidStore};
