//! Turns an identity-provider redirect into a confirmed, profile-backed session.
//!
//! ```text
//! Init ─┬─ error ────────────────────────────────────────────────┐
//!       ├─ existing session ─────────────┐                       │
//!       ├─ code ──────── ExchangingCode ─┤                       │
//!       ├─ token pair ── SettingSession ─┼─ AwaitingProfile ─┐   │
//!       └─ nothing ── AwaitingAsyncSignIn┘                   │   │
//!                                          Redirecting ◄─────┘   Error
//!                                              │                   │
//!                                              └──── Terminal ◄────┘
//! ```
//!
//! Every path ends in exactly one navigation: the landing page on success, the login page after
//! a readable delay on failure. A [`OneShot`] flag makes the expensive part (exchange, set-session,
//! acting on a sign-in event) happen at most once per reconciler, however many times `run` is
//! called. All waits race the reconciler's cancellation token, so after teardown nothing else
//! reaches the host.

use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

use crate::{
    auth::{
        events::{AuthEvent, Subscription},
        gateway::IdentityGateway,
        profiles::{Profile, ProfileStore},
        session::User,
    },
    callback::{
        host::CallbackHost,
        params::CallbackParams,
        state::{AuthCallbackState, CallbackError, CallbackOutcome, CallbackStatus, OneShot},
    },
    config::CallbackConfig,
    types::{UserId, abbrev_uuid},
};

/// Why a run stopped before redirecting.
enum Halt {
    Failed(CallbackError),
    Duplicate,
    Cancelled,
}

impl From<CallbackError> for Halt {
    fn from(error: CallbackError) -> Self {
        Self::Failed(error)
    }
}

pub struct CallbackReconciler {
    gateway: Arc<dyn IdentityGateway>,
    profiles: Arc<dyn ProfileStore>,
    host: Arc<dyn CallbackHost>,
    config: CallbackConfig,
    processed: OneShot,
    cancel: CancellationToken,
    state: watch::Sender<AuthCallbackState>,
}

impl CallbackReconciler {
    pub fn new(
        gateway: Arc<dyn IdentityGateway>,
        profiles: Arc<dyn ProfileStore>,
        host: Arc<dyn CallbackHost>,
        config: CallbackConfig,
    ) -> Self {
        let (state, _) = watch::channel(AuthCallbackState::Init);
        Self {
            gateway,
            profiles,
            host,
            config,
            processed: OneShot::default(),
            cancel: CancellationToken::new(),
            state,
        }
    }

    pub fn state(&self) -> AuthCallbackState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<AuthCallbackState> {
        self.state.subscribe()
    }

    /// Cancel pending delays, lookups and the sign-in wait. Irreversible.
    pub fn teardown(&self) {
        self.cancel.cancel();
    }

    /// Run the reconciler on its own task, tied to the returned handle.
    pub fn mount(self: Arc<Self>, url: Url) -> CallbackHandle {
        let guard = self.cancel.clone().drop_guard();
        let task = tokio::spawn(async move { self.run(&url).await });
        CallbackHandle { guard, task }
    }

    /// Reconcile the redirect at `url`. Never fails: errors end in a login redirect.
    #[instrument(skip_all, fields(path = %url.path()))]
    pub async fn run(&self, url: &Url) -> CallbackOutcome {
        let params = CallbackParams::from_url(url);
        debug!(?params, shape = ?params.shape(), "Parsed callback parameters");

        match self.reconcile(&params, url.path()).await {
            Ok(outcome) => outcome,
            Err(Halt::Duplicate) => {
                debug!("Callback already processed, ignoring");
                CallbackOutcome::AlreadyProcessed
            }
            Err(Halt::Cancelled) => {
                debug!("Callback torn down before completion");
                self.transition(AuthCallbackState::Terminal);
                CallbackOutcome::Cancelled
            }
            Err(Halt::Failed(error)) => self.fail(error, &params).await,
        }
    }

    async fn reconcile(&self, params: &CallbackParams, path: &str) -> Result<CallbackOutcome, Halt> {
        if self.processed.is_claimed() {
            return Err(Halt::Duplicate);
        }
        if self.cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        self.host.set_status(CallbackStatus::Processing);

        if let Some(error) = &params.error {
            self.claim()?;
            return Err(CallbackError::Provider {
                error: error.clone(),
                description: params.error_description.clone(),
            }
            .into());
        }

        let user = self.ensure_session(params).await?;
        let profile = self.await_profile(user.id).await?;
        self.redirect(profile, path).await
    }

    /// Establish a session, trying in order: the gateway's existing session, the authorization
    /// code, the implicit-flow token pair, and finally an asynchronous sign-in event.
    async fn ensure_session(&self, params: &CallbackParams) -> Result<User, Halt> {
        // Subscribe before reading so a sign-in that lands in between is not lost
        let subscription = self.gateway.subscribe();

        match self.cancellable(self.gateway.get_session()).await? {
            Ok(Some(session)) => {
                self.claim()?;
                info!(user_id = %abbrev_uuid(&session.user.id), code_ignored = params.code.is_some(), "Using existing session");
                return Ok(session.user);
            }
            Ok(None) => trace!("No existing session"),
            Err(e) => warn!(error = %e, "Failed to read existing session, continuing with redirect parameters"),
        }

        if let Some(code) = &params.code {
            self.claim()?;
            self.transition(AuthCallbackState::ExchangingCode);
            return match self.cancellable(self.gateway.exchange_code_for_session(code)).await? {
                Ok(session) => {
                    info!(user_id = %abbrev_uuid(&session.user.id), "Authorization code exchanged");
                    Ok(session.user)
                }
                Err(e) => Err(CallbackError::Exchange(e.to_string()).into()),
            };
        }

        if let Some((access_token, refresh_token)) = params.token_pair() {
            self.claim()?;
            self.transition(AuthCallbackState::SettingSession);
            let installed = match self.cancellable(self.gateway.set_session(access_token, refresh_token)).await? {
                Ok(session) => session,
                Err(e) => return Err(CallbackError::Exchange(e.to_string()).into()),
            };
            return match self.cancellable(self.gateway.get_session()).await? {
                Ok(Some(session)) if session.user.id == installed.user.id => {
                    info!(user_id = %abbrev_uuid(&session.user.id), "Token pair accepted");
                    Ok(session.user)
                }
                Ok(Some(session)) => {
                    warn!(
                        installed = %abbrev_uuid(&installed.user.id),
                        current = %abbrev_uuid(&session.user.id),
                        "Session read back for a different user"
                    );
                    Err(CallbackError::Exchange("session read back for a different user".to_string()).into())
                }
                Ok(None) => Err(CallbackError::Exchange("session missing after set_session".to_string()).into()),
                Err(e) => Err(CallbackError::Exchange(e.to_string()).into()),
            };
        }

        self.transition(AuthCallbackState::AwaitingAsyncSignIn);
        self.await_sign_in(subscription).await
    }

    async fn await_sign_in(&self, mut subscription: Subscription) -> Result<User, Halt> {
        let timeout = self.config.async_sign_in_timeout;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut closed = false;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Halt::Cancelled),
                event = subscription.recv(), if !closed => match event {
                    Some(AuthEvent { kind, session: Some(session) }) if kind.establishes_session() => {
                        self.claim()?;
                        info!(event = %kind, user_id = %abbrev_uuid(&session.user.id), "Session announced by gateway");
                        return Ok(session.user);
                    }
                    Some(event) => {
                        debug!(event = %event.kind, has_session = event.session.is_some(), "Ignoring auth event");
                    }
                    None => {
                        debug!("Auth event stream closed, waiting for timeout");
                        closed = true;
                    }
                },
                _ = &mut deadline => {
                    self.claim()?;
                    return Err(CallbackError::SessionTimeout(timeout).into());
                }
            }
        }
    }

    /// Poll for the profile row at fixed spacing. Lookup errors count as "not yet".
    async fn await_profile(&self, user_id: UserId) -> Result<Profile, Halt> {
        self.transition(AuthCallbackState::AwaitingProfile);

        let attempts = self.config.profile_poll_attempts;
        let mut ticker = tokio::time::interval(self.config.profile_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for attempt in 1..=attempts {
            self.cancellable(ticker.tick()).await?;

            match self.cancellable(self.profiles.find_profile(user_id)).await? {
                Ok(Some(profile)) => {
                    info!(user_id = %abbrev_uuid(&user_id), attempt, role = ?profile.role, "Profile found");
                    return Ok(profile);
                }
                Ok(None) => debug!(attempt, attempts, "Profile not visible yet"),
                Err(e) => warn!(attempt, attempts, error = %e, "Profile lookup failed"),
            }
        }

        Err(CallbackError::ProfileTimeout { user_id, attempts }.into())
    }

    /// Scrub the redirect parameters from the page's own path, then hand over to the landing page.
    async fn redirect(&self, profile: Profile, path: &str) -> Result<CallbackOutcome, Halt> {
        self.transition(AuthCallbackState::Redirecting);
        self.host.replace_url(path);
        self.host.set_status(CallbackStatus::Success);

        self.pause(self.config.success_delay).await?;

        let to = self.config.landing_path.clone();
        self.host.navigate(&to);
        self.transition(AuthCallbackState::Terminal);
        info!(user_id = %abbrev_uuid(&profile.id), to, "Callback complete");

        Ok(CallbackOutcome::Redirected {
            user_id: profile.id,
            role: profile.role,
            to,
        })
    }

    async fn fail(&self, error: CallbackError, params: &CallbackParams) -> CallbackOutcome {
        self.transition(AuthCallbackState::Error);
        warn!(%error, ?params, "Callback failed, returning to login");
        self.host.set_status(CallbackStatus::Error(error.status_message()));

        if self.pause(error.redirect_delay(&self.config)).await.is_err() {
            self.transition(AuthCallbackState::Terminal);
            return CallbackOutcome::Cancelled;
        }

        self.host.navigate(&self.config.login_path);
        self.transition(AuthCallbackState::Terminal);
        CallbackOutcome::Failed(error)
    }

    fn claim(&self) -> Result<(), Halt> {
        if self.processed.claim() { Ok(()) } else { Err(Halt::Duplicate) }
    }

    fn transition(&self, next: AuthCallbackState) {
        let previous = self.state.send_replace(next);
        trace!(?previous, ?next, "Callback state transition");
    }

    async fn cancellable<F: Future>(&self, future: F) -> Result<F::Output, Halt> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Halt::Cancelled),
            output = future => Ok(output),
        }
    }

    async fn pause(&self, duration: Duration) -> Result<(), Halt> {
        let started = Instant::now();
        self.cancellable(tokio::time::sleep(duration)).await?;
        trace!(elapsed_ms = started.elapsed().as_millis() as u64, "Delay elapsed");
        Ok(())
    }
}

/// A mounted reconciler. Dropping or unmounting it tears the run down.
pub struct CallbackHandle {
    guard: DropGuard,
    task: JoinHandle<CallbackOutcome>,
}

impl CallbackHandle {
    /// Wait for the run to finish on its own.
    pub async fn outcome(self) -> CallbackOutcome {
        let CallbackHandle { guard, task } = self;
        let outcome = join(task).await;
        guard.disarm();
        outcome
    }

    /// Tear the run down and wait for it to settle.
    pub async fn unmount(self) -> CallbackOutcome {
        let CallbackHandle { guard, task } = self;
        drop(guard);
        join(task).await
    }
}

async fn join(task: JoinHandle<CallbackOutcome>) -> CallbackOutcome {
    match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "Callback task did not complete");
            CallbackOutcome::Cancelled
        }
    }
}
