//! # Atesti (Account Credentials & Threepid Authority)
//!
//! `atesti` manages account credential changes and ownership proofs of
//! third-party identifiers (threepids: email addresses and phone numbers),
//! gated by a reusable interactive multi-stage authentication protocol (UIA).
//!
//! ## Interactive Authentication (UIA)
//!
//! Sensitive mutations declare which stage combinations they accept (current
//! password, proof of email ownership, proof of phone ownership). The engine
//! answers 401 with the open flows until the client completes every stage of
//! one alternative; completed stages accumulate in a server-side session so a
//! flow may span several round trips.
//!
//! ## Threepids
//!
//! - **Address Normalization:** emails are trimmed and lower-cased, phone
//!   numbers canonicalized to E.164 digits, before every lookup, insert, and
//!   delete. At most one account owns a given `(medium, address)` pair.
//! - **Ownership Proofs:** a trusted identity server delivers verification
//!   tokens and exchanges signed credentials for a verified triple; this
//!   service never sees the token email/SMS itself.
//! - **Binding:** publication of an association to the identity server's
//!   public directory is best-effort; the local association is authoritative.
//!
//! ## Accounts
//!
//! Password changes and deactivation cross-check the UIA result against the
//! bearer-authenticated requester. Deactivation is terminal: the account's
//! credentials and access tokens are rejected from then on.

pub mod account;
pub mod api;
pub mod cli;
pub mod error;
pub mod identity;
pub mod threepid;
pub mod uia;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
