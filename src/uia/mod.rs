//! Interactive multi-stage authentication (UIA).
//!
//! Flow Overview:
//! 1) A sensitive endpoint declares which stage combinations it accepts.
//! 2) The first request usually carries no auth; the engine opens a session
//!    and answers 401 with the flows and a session token. That response is a
//!    protocol step, not an error.
//! 3) The client completes one stage per round trip. Completed stages
//!    accumulate in the session, so retries and multi-stage flows survive
//!    across requests.
//! 4) Once every stage of some accepted flow is complete, the engine hands
//!    the verified stage results back to the endpoint.
//!
//! Re-submitting an already-completed stage returns the stored result without
//! re-verifying; stage verifiers may consume one-time tokens, so this matters
//! under client retries.

pub mod models;
pub mod service;
pub mod store;

pub use models::{
    AuthDict, AuthStageResult, StageResult, StageType, UiaChallenge, UiaOutcome, UiaSession,
};
pub use service::UiaService;
pub use store::{MemoryUiaSessionStore, PgUiaSessionStore, UiaSessionStore};
