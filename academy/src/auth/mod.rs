//! Identity gateway integration.
//!
//! The hosted backend owns users and sessions. This module is the client side of that
//! relationship:
//!
//! - [`session`]: the token pair and user the gateway issues
//! - [`events`]: in-process pub/sub for auth-state changes, with disposable subscriptions
//! - [`gateway`]: the [`IdentityGateway`](gateway::IdentityGateway) trait and its HTTP client
//! - [`profiles`]: point lookups of the `profiles` row that marks a session as ready for use

pub mod events;
pub mod gateway;
pub mod profiles;
pub mod session;
