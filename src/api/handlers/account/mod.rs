//! Account credential and threepid endpoints.
//!
//! Every sensitive mutation here is gated by interactive authentication; the
//! handlers only parse bodies, resolve the bearer principal, and translate
//! service outcomes into responses.

pub mod deactivate;
pub mod password;
pub(crate) mod principal;
pub mod state;
pub mod threepid;
pub mod types;
pub mod whoami;
