//! API handlers for atesti.
//!
//! Route handlers are organized by surface: `account` carries the credential
//! and threepid endpoints, `health` the liveness probe.

pub mod account;
pub mod health;
