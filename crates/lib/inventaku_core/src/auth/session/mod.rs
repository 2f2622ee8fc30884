//! Session/role authority.
//!
//! [`SessionAuthority`] owns the current [`Identity`] and the session
//! lifecycle flags, publishes them through a `watch` channel and answers role
//! questions. One instance is created per application and passed by handle
//! (usually `Arc<SessionAuthority>`) to whatever needs it.
//!
//! Lifecycle:
//!
//! 1. [`initialize`](SessionAuthority::initialize) runs once: it publishes the
//!    stored snapshot as a pre-paint hint, validates against `/auth/me` and
//!    lets the server answer win. Booting ends when it resolves, whatever the
//!    outcome.
//! 2. `login` / `logout` / `refresh_user` / `update_profile` change the
//!    identity and keep the snapshot in step.
//! 3. [`shutdown`](SessionAuthority::shutdown) (or drop) cancels the pending
//!    error-clear timer. Calls still in flight resolve without touching
//!    published state or storage, and later calls are refused.


use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::api::{AuthApi, HttpAuthApi};
use super::roles;
use super::storage::{self, FileStorage, SessionStorage};
use super::{AuthError, LOGIN_FAILED_MESSAGE};
use crate::config::{DEFAULT_ERROR_CLEAR_MS, SessionConfig};
use crate::models::auth::{AuthResponse, Credentials, Identity, LoginOutcome};

/// One-shot initialization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitPhase {
    #[default]
    NotStarted,
    InFlight,
    Done,
}

/// Snapshot of the session published to subscribers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub user: Option<Identity>,
    pub phase: InitPhase,
    /// A login, logout or refresh is in flight.
    pub loading: bool,
    /// Last error message; cleared automatically after a delay.
    pub error: Option<String>,
    error_seq: u64,
}

impl SessionState {
    /// True until the first session validation has resolved.
    pub fn booting(&self) -> bool {
        self.phase != InitPhase::Done
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn has_role(&self, required: &str) -> bool {
        roles::has_role(self.user.as_ref(), required)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, required: &[S]) -> bool {
        roles::has_any_role(self.user.as_ref(), required)
    }

    pub fn has_all_roles<S: AsRef<str>>(&self, required: &[S]) -> bool {
        roles::has_all_roles(self.user.as_ref(), required)
    }
}

/// Owner of the current identity and session flags.
pub struct SessionAuthority {
    api: Arc<dyn AuthApi>,
    storage: Arc<dyn SessionStorage>,
    state: Arc<watch::Sender<SessionState>>,
    shutdown: CancellationToken,
    error_timer: Mutex<Option<CancellationToken>>,
    error_clear_delay: Duration,
}

impl SessionAuthority {
    pub fn new(api: Arc<dyn AuthApi>, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            api,
            storage,
            state: Arc::new(watch::Sender::new(SessionState::default())),
            shutdown: CancellationToken::new(),
            error_timer: Mutex::new(None),
            error_clear_delay: Duration::from_millis(DEFAULT_ERROR_CLEAR_MS),
        }
    }

    /// Authority backed by the HTTP API and file storage described by `config`.
    ///
    /// The API session cookie is persisted next to the identity snapshot.
    pub fn from_config(config: &SessionConfig) -> Result<Self, AuthError> {
        let storage: Arc<dyn SessionStorage> = Arc::new(FileStorage::new(&config.session_file));
        let api = HttpAuthApi::from_config(config)?.with_persistent_cookies(Arc::clone(&storage));
        Ok(Self::new(Arc::new(api), storage).with_error_clear_delay(config.error_clear_delay))
    }

    pub fn with_error_clear_delay(mut self, delay: Duration) -> Self {
        self.error_clear_delay = delay;
        self
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Receiver that observes every published change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn current_user(&self) -> Option<Identity> {
        self.state.borrow().user.clone()
    }

    pub fn phase(&self) -> InitPhase {
        self.state.borrow().phase
    }

    pub fn is_booting(&self) -> bool {
        self.state.borrow().booting()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn has_role(&self, required: &str) -> bool {
        self.state.borrow().has_role(required)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, required: &[S]) -> bool {
        self.state.borrow().has_any_role(required)
    }

    pub fn has_all_roles<S: AsRef<str>>(&self, required: &[S]) -> bool {
        self.state.borrow().has_all_roles(required)
    }

    /// Storage the authority persists into.
    pub fn storage(&self) -> &Arc<dyn SessionStorage> {
        &self.storage
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Validate the session once.
    ///
    /// Later calls (and calls while the first is still in flight) return
    /// immediately without touching the network. Never fails: every error path
    /// ends with booting finished and no identity.
    pub async fn initialize(&self) {
        if self.is_shut_down() {
            debug!("initialize after shutdown ignored");
            return;
        }
        let mut claimed = false;
        self.state.send_if_modified(|s| {
            if s.phase == InitPhase::NotStarted {
                s.phase = InitPhase::InFlight;
                claimed = true;
                true
            } else {
                false
            }
        });
        if !claimed {
            debug!("session already initialized");
            return;
        }

        let mut boot = BootGuard {
            authority: self,
            finished: false,
        };

        if let Some(cached) = storage::load_identity(self.storage.as_ref()) {
            debug!(user_id = %cached.id, "publishing stored identity until validated");
            self.publish(|s| s.user = Some(cached));
        }

        match self.api.me().await {
            Ok(AuthResponse {
                user: Some(user), ..
            }) => {
                info!(user_id = %user.id, role = %user.role, "session validated");
                self.persist(&user);
                boot.finish(Some(user));
            }
            Ok(_) => {
                debug!("no active session");
                self.forget_identity();
                boot.finish(None);
            }
            Err(e) => {
                warn!(error = %e, "session validation failed");
                self.forget_identity();
                boot.finish(None);
            }
        }
    }

    /// Stop publishing and cancel the pending error-clear timer.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.take_error_timer();
        debug!("session authority shut down");
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Exchange credentials for an identity.
    ///
    /// On failure the derived message is published as the current error and
    /// the published identity is left as it was.
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome, AuthError> {
        if self.is_shut_down() {
            return Err(AuthError::ShutDown);
        }
        let _loading = LoadingGuard::start(self);
        self.clear_error();

        let result = self.api.login(credentials).await;
        if self.is_shut_down() {
            return Err(AuthError::ShutDown);
        }

        match result {
            Ok(resp) => match resp.user.clone() {
                Some(user) => {
                    info!(user_id = %user.id, role = %user.role, "logged in");
                    self.persist(&user);
                    self.publish(|s| s.user = Some(user.clone()));
                    Ok(LoginOutcome { user, data: resp })
                }
                None => {
                    let message = resp
                        .message
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| LOGIN_FAILED_MESSAGE.to_string());
                    warn!(username = %credentials.username, %message, "login response carried no user");
                    self.set_error(message.clone());
                    Err(AuthError::LoginRejected(message))
                }
            },
            Err(e) => {
                let err = AuthError::Api(e);
                warn!(username = %credentials.username, error = %err, "login failed");
                self.set_error(err.user_message());
                Err(err)
            }
        }
    }

    /// End the session.
    ///
    /// The server call may fail; local state is cleared regardless, including
    /// when this future is dropped before the call resolves. A no-op after
    /// shutdown.
    pub async fn logout(&self) {
        if self.is_shut_down() {
            debug!("logout after shutdown ignored");
            return;
        }
        let _cleanup = LogoutCleanup { authority: self };
        self.publish(|s| s.loading = true);

        if let Err(e) = self.api.logout().await {
            warn!(error = %e, "server logout failed, clearing local session anyway");
        }
    }

    /// Re-validate with `/auth/me` and overlay the fresh fields.
    ///
    /// An empty answer clears the session and fails with
    /// [`AuthError::SessionExpired`]; a failed call logs out and returns the
    /// original error.
    pub async fn refresh_user(&self) -> Result<Identity, AuthError> {
        if self.is_shut_down() {
            return Err(AuthError::ShutDown);
        }
        let loading = LoadingGuard::start(self);
        let result = self.api.me().await;
        if self.is_shut_down() {
            return Err(AuthError::ShutDown);
        }

        match result {
            Ok(AuthResponse {
                user: Some(fresh),
                user_fields,
                ..
            }) => {
                let merged = match (self.current_user(), user_fields) {
                    (Some(current), Some(fields)) => merge_identity(&current, &fields, fresh),
                    _ => fresh,
                };
                debug!(user_id = %merged.id, "identity refreshed");
                self.persist(&merged);
                self.publish(|s| s.user = Some(merged.clone()));
                Ok(merged)
            }
            Ok(_) => {
                info!("session expired");
                self.forget_identity();
                self.publish(|s| s.user = None);
                Err(AuthError::SessionExpired)
            }
            Err(e) => {
                warn!(error = %e, "refresh failed, logging out");
                drop(loading);
                self.logout().await;
                Err(AuthError::Api(e))
            }
        }
    }

    /// Shallow-merge `fields` onto the current identity. Local only.
    ///
    /// Returns `Ok(None)` without writing anything when nobody is logged in.
    pub fn update_profile(&self, fields: Map<String, Value>) -> Result<Option<Identity>, AuthError> {
        if self.is_shut_down() {
            return Err(AuthError::ShutDown);
        }
        let Some(current) = self.current_user() else {
            return Ok(None);
        };
        let updated = current
            .overlay(&fields)
            .map_err(|e| AuthError::ValidationError(format!("profile update: {e}")))?;
        self.persist(&updated);
        self.publish(|s| s.user = Some(updated.clone()));
        Ok(Some(updated))
    }

    // -------------------------------------------------------------------------
    // Errors
    // -------------------------------------------------------------------------

    /// Publish `message` and schedule it to clear after the configured delay.
    ///
    /// A newer error cancels the older one's timer.
    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        if message.is_empty() {
            self.clear_error();
            return;
        }

        let mut seq = 0;
        let published = self.publish(|s| {
            s.error_seq = s.error_seq.wrapping_add(1);
            seq = s.error_seq;
            s.error = Some(message);
        });
        if !published {
            return;
        }

        let token = self.shutdown.child_token();
        if let Some(previous) = self.replace_error_timer(Some(token.clone())) {
            previous.cancel();
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime, error message will not auto-clear");
            return;
        };
        let state = Arc::clone(&self.state);
        let delay = self.error_clear_delay;
        handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    state.send_if_modified(|s| {
                        if s.error_seq == seq && s.error.is_some() {
                            s.error = None;
                            true
                        } else {
                            false
                        }
                    });
                }
            }
        });
    }

    pub fn clear_error(&self) {
        self.take_error_timer();
        self.publish(|s| {
            if s.error.is_some() {
                s.error_seq = s.error_seq.wrapping_add(1);
                s.error = None;
            }
        });
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Apply `update` unless the authority has been shut down.
    fn publish(&self, update: impl FnOnce(&mut SessionState)) -> bool {
        if self.is_shut_down() {
            debug!("ignoring state update after shutdown");
            return false;
        }
        self.state.send_modify(update);
        true
    }

    fn persist(&self, user: &Identity) {
        if self.is_shut_down() {
            return;
        }
        if let Err(e) = storage::save_identity(self.storage.as_ref(), user) {
            warn!(error = %e, "could not persist identity snapshot");
        }
    }

    fn forget_identity(&self) {
        if self.is_shut_down() {
            return;
        }
        if let Err(e) = storage::clear_identity(self.storage.as_ref()) {
            warn!(error = %e, "could not clear identity snapshot");
        }
    }

    fn replace_error_timer(&self, token: Option<CancellationToken>) -> Option<CancellationToken> {
        let mut timer = self
            .error_timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *timer, token)
    }

    fn take_error_timer(&self) {
        if let Some(token) = self.replace_error_timer(None) {
            token.cancel();
        }
    }
}

impl Drop for SessionAuthority {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Overlay the server's identity onto the current one.
///
/// `fields` is the raw `user` object, so keys the server omitted keep their
/// current value.
fn merge_identity(current: &Identity, fields: &Map<String, Value>, fresh: Identity) -> Identity {
    match current.overlay(fields) {
        Ok(merged) => merged,
        Err(e) => {
            warn!(error = %e, "could not merge refreshed identity, replacing it");
            fresh
        }
    }
}

/// Holds `loading` true for its lifetime.
struct LoadingGuard<'a> {
    authority: &'a SessionAuthority,
}

impl<'a> LoadingGuard<'a> {
    fn start(authority: &'a SessionAuthority) -> Self {
        authority.publish(|s| s.loading = true);
        Self { authority }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.authority.publish(|s| s.loading = false);
    }
}

/// Local half of `logout`, run on drop.
struct LogoutCleanup<'a> {
    authority: &'a SessionAuthority,
}

impl Drop for LogoutCleanup<'_> {
    fn drop(&mut self) {
        let authority = self.authority;
        if authority.is_shut_down() {
            debug!("logout resolved after shutdown, leaving storage as is");
            return;
        }
        authority.forget_identity();
        if let Err(e) = storage::forget_username(authority.storage.as_ref()) {
            warn!(error = %e, "could not clear remembered username");
        }
        authority.take_error_timer();
        authority.publish(|s| {
            s.user = None;
            if s.error.is_some() {
                s.error_seq = s.error_seq.wrapping_add(1);
            }
            s.error = None;
            s.loading = false;
        });
        info!("logged out");
    }
}

/// Ends booting when initialization finishes or its future is dropped.
struct BootGuard<'a> {
    authority: &'a SessionAuthority,
    finished: bool,
}

impl BootGuard<'_> {
    fn finish(&mut self, user: Option<Identity>) {
        self.finished = true;
        self.authority.publish(|s| {
            s.user = user;
            s.phase = InitPhase::Done;
        });
    }
}

impl Drop for BootGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("session validation abandoned, treating as logged out");
        self.authority.forget_identity();
        self.authority.publish(|s| {
            s.user = None;
            s.phase = InitPhase::Done;
        });
    }
}
