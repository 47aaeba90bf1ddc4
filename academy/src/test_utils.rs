//! Test utilities: configuration, an in-memory app, and scripted collaborators for the callback
//! reconciler.

use async_trait::async_trait;
use axum_test::TestServer;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, AtomicUsize, Ordering},
};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::{
    auth::{
        events::{AuthChangeEvent, AuthEvent, AuthEventBus, Subscription},
        gateway::{GatewayError, IdentityGateway},
        profiles::{Profile, ProfileError, ProfileStore, Role},
        session::{Session, User},
    },
    callback::{CallbackHost, CallbackStatus},
    config::{Config, EmailTransportConfig},
    db::store::MemoryMailStore,
    types::UserId,
};

pub fn create_test_config() -> Config {
    // Use temp directory for test emails
    let temp_dir = std::env::temp_dir().join(format!("academy-test-emails-{}", std::process::id()));

    let mut config = Config::default();
    config.email.transport = EmailTransportConfig::File {
        path: temp_dir.to_string_lossy().to_string(),
    };
    config.email.from_email = "hello@school.example".to_string();
    config
}

/// App backed by an in-memory store, plus the store for assertions.
pub fn create_test_app(config: Config) -> (TestServer, Arc<MemoryMailStore>) {
    let store = Arc::new(MemoryMailStore::new());
    let app = crate::Application::with_store(config, store.clone()).expect("Failed to create application");
    (app.into_test_server(), store)
}

pub fn test_session(user_id: UserId) -> Session {
    Session {
        access_token: format!("access-{user_id}"),
        refresh_token: format!("refresh-{user_id}"),
        token_type: "bearer".to_string(),
        expires_in: Some(3600),
        expires_at: None,
        provider_token: None,
        user: User {
            id: user_id,
            email: Some("student@example.com".to_string()),
        },
    }
}

#[derive(Default)]
enum SetSessionBehaviour {
    #[default]
    Rejected,
    NotPersisted,
    Installs(Session),
    /// Returns `returned` but leaves `stored` as the current session.
    ReadsBack { returned: Session, stored: Session },
}

/// Scripted identity gateway that counts the calls the reconciler makes.
#[derive(Default)]
pub struct MockGateway {
    current: Mutex<Option<Session>>,
    exchange: Option<Session>,
    set_session: SetSessionBehaviour,
    exchange_calls: AtomicUsize,
    set_session_calls: AtomicUsize,
    last_code: Mutex<Option<String>>,
    failing_reads: AtomicUsize,
    sign_in_during_read: Mutex<Option<Session>>,
    bus: AuthEventBus,
}

impl MockGateway {
    /// No session, failing exchange, rejected token pairs.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing(self, session: Session) -> Self {
        *self.current.lock().unwrap() = Some(session);
        self
    }

    pub fn exchange_succeeds(mut self, session: Session) -> Self {
        self.exchange = Some(session);
        self
    }

    pub fn exchange_fails(mut self) -> Self {
        self.exchange = None;
        self
    }

    pub fn set_session_installs(mut self, session: Session) -> Self {
        self.set_session = SetSessionBehaviour::Installs(session);
        self
    }

    /// `set_session` reports success but the session cannot be read back.
    pub fn set_session_not_persisted(mut self) -> Self {
        self.set_session = SetSessionBehaviour::NotPersisted;
        self
    }

    pub fn set_session_rejected(mut self) -> Self {
        self.set_session = SetSessionBehaviour::Rejected;
        self
    }

    /// `set_session` reports `returned`, but reading the session back yields `stored`.
    pub fn set_session_reads_back(mut self, returned: Session, stored: Session) -> Self {
        self.set_session = SetSessionBehaviour::ReadsBack { returned, stored };
        self
    }

    /// The next `count` session reads fail.
    pub fn failing_session_reads(self, count: usize) -> Self {
        self.failing_reads.store(count, Ordering::SeqCst);
        self
    }

    /// A sign-in completes while the first session read is in flight: the read sees no session,
    /// and the session only arrives as a `SignedIn` event.
    pub fn sign_in_during_read(self, session: Session) -> Self {
        *self.sign_in_during_read.lock().unwrap() = Some(session);
        self
    }

    pub fn announce(&self, event: AuthEvent) -> usize {
        self.bus.publish(event)
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn set_session_calls(&self) -> usize {
        self.set_session_calls.load(Ordering::SeqCst)
    }

    pub fn last_code(&self) -> Option<String> {
        self.last_code.lock().unwrap().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }
}

#[async_trait]
impl IdentityGateway for MockGateway {
    async fn get_session(&self) -> Result<Option<Session>, GatewayError> {
        if self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(GatewayError::Api {
                status: 503,
                message: "gateway unavailable".to_string(),
            });
        }

        let late_sign_in = self.sign_in_during_read.lock().unwrap().take();
        if let Some(session) = late_sign_in {
            *self.current.lock().unwrap() = Some(session.clone());
            self.bus.publish(AuthEvent::new(AuthChangeEvent::SignedIn, Some(session)));
            return Ok(None);
        }

        Ok(self.current.lock().unwrap().clone())
    }

    async fn exchange_code_for_session(&self, code: &str) -> Result<Session, GatewayError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_code.lock().unwrap() = Some(code.to_string());

        match &self.exchange {
            Some(session) => {
                *self.current.lock().unwrap() = Some(session.clone());
                Ok(session.clone())
            }
            None => Err(GatewayError::Api {
                status: 400,
                message: "invalid_grant".to_string(),
            }),
        }
    }

    async fn set_session(&self, _access_token: &str, _refresh_token: &str) -> Result<Session, GatewayError> {
        self.set_session_calls.fetch_add(1, Ordering::SeqCst);

        match &self.set_session {
            SetSessionBehaviour::Installs(session) => {
                *self.current.lock().unwrap() = Some(session.clone());
                Ok(session.clone())
            }
            SetSessionBehaviour::NotPersisted => Ok(test_session(Uuid::new_v4())),
            SetSessionBehaviour::ReadsBack { returned, stored } => {
                *self.current.lock().unwrap() = Some(stored.clone());
                Ok(returned.clone())
            }
            SetSessionBehaviour::Rejected => Err(GatewayError::Api {
                status: 401,
                message: "invalid JWT".to_string(),
            }),
        }
    }

    fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }
}

/// Profile store whose row "appears" on a given attempt.
pub struct MockProfiles {
    found_on: Option<u32>,
    failing_until: u32,
    role: Role,
    attempts: AtomicU32,
    attempt_times: Mutex<Vec<Duration>>,
    start: Instant,
}

impl MockProfiles {
    pub fn found_on(attempt: u32) -> Self {
        Self {
            found_on: Some(attempt),
            ..Self::never()
        }
    }

    pub fn never() -> Self {
        Self {
            found_on: None,
            failing_until: 0,
            role: Role::Student,
            attempts: AtomicU32::new(0),
            attempt_times: Mutex::new(Vec::new()),
            start: Instant::now(),
        }
    }

    /// Lookups up to and including `attempt` return an error.
    pub fn failing_until(mut self, attempt: u32) -> Self {
        self.failing_until = attempt;
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Time of each lookup, relative to construction.
    pub fn attempt_times(&self) -> Vec<Duration> {
        self.attempt_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProfileStore for MockProfiles {
    async fn find_profile(&self, user_id: UserId) -> Result<Option<Profile>, ProfileError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.attempt_times.lock().unwrap().push(self.start.elapsed());

        if attempt <= self.failing_until {
            return Err(ProfileError::Api { status: 500 });
        }

        Ok(self.found_on.filter(|found_on| attempt >= *found_on).map(|_| Profile {
            id: user_id,
            email: None,
            role: self.role,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Status(CallbackStatus),
    Replace(String),
    Navigate(String),
}

/// Host that records every effect with the (virtual) time it happened.
pub struct RecordingHost {
    start: Instant,
    events: Mutex<Vec<(Duration, HostEvent)>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            events: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, event: HostEvent) {
        self.events.lock().unwrap().push((self.start.elapsed(), event));
    }

    pub fn events(&self) -> Vec<(Duration, HostEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn navigations(&self) -> Vec<(Duration, String)> {
        self.events()
            .into_iter()
            .filter_map(|(at, event)| match event {
                HostEvent::Navigate(path) => Some((at, path)),
                _ => None,
            })
            .collect()
    }

    pub fn last_status(&self) -> Option<CallbackStatus> {
        self.events().into_iter().rev().find_map(|(_, event)| match event {
            HostEvent::Status(status) => Some(status),
            _ => None,
        })
    }
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackHost for RecordingHost {
    fn set_status(&self, status: CallbackStatus) {
        self.record(HostEvent::Status(status));
    }

    fn replace_url(&self, path: &str) {
        self.record(HostEvent::Replace(path.to_string()));
    }

    fn navigate(&self, path: &str) {
        self.record(HostEvent::Navigate(path.to_string()));
    }
}
