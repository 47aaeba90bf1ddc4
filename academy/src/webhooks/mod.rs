//! Inbound webhook verification.
//!
//! - [`signing`]: Standard Webhooks HMAC-SHA256 signatures, used to authenticate delivery events
//!   from the email provider

pub mod signing;

pub use signing::{SignatureError, verify_headers};
