//! OAuth callback reconciliation.
//!
//! After a third-party sign-in the browser lands on the callback page with one of three redirect
//! shapes: an `error`, an authorization `code`, or an implicit-flow token pair. Sometimes it
//! carries nothing and the gateway announces the session on its own a moment later.
//! [`CallbackReconciler`] turns any of these into a session whose profile row exists, then
//! hands over to the landing page; every failure ends back at login.
//!
//! - [`params`]: reading the redirect parameters from the URL
//! - [`state`]: states, outcomes, the failure taxonomy and the one-shot guard
//! - [`host`]: the page-side effects (status line, history, navigation)
//! - [`reconciler`]: the state machine itself

pub mod host;
pub mod params;
pub mod reconciler;
pub mod state;

pub use host::{CallbackHost, TracingHost};
pub use params::CallbackParams;
pub use reconciler::{CallbackHandle, CallbackReconciler};
pub use state::{AuthCallbackState, CallbackError, CallbackOutcome, CallbackStatus};
