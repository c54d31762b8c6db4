//! Router Module Index
//!
//! Splits the REST surface by access level so the authentication layer is applied
//! per module rather than per handler.

/// Routes reachable without a session: health, registration, login, stateless rule evaluation.
pub mod public;

/// Routes protected by the `AuthUser` extractor middleware.
pub mod authenticated;
