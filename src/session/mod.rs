pub mod forms;
pub mod store;

use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};

use crate::api::ApiClient;
use crate::error::ClientError;
use crate::models::user::{SessionToken, User};
use forms::{LoginForm, SignupForm};
use store::{PersistedSession, SessionStore};

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    /// Startup, before the persisted session has been checked.
    Unknown,
    Anonymous,
    Authenticated { user: User, token: SessionToken },
}

/// What the presentation layer is allowed to show for a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Loading,
    SignIn,
    Soundboard,
}

impl AuthState {
    pub fn user(&self) -> Option<&User> {
        match self {
            AuthState::Authenticated { user, .. } => Some(user),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&SessionToken> {
        match self {
            AuthState::Authenticated { token, .. } => Some(token),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, AuthState::Unknown)
    }

    pub fn view(&self) -> View {
        match self {
            AuthState::Unknown => View::Loading,
            AuthState::Anonymous => View::SignIn,
            AuthState::Authenticated { .. } => View::Soundboard,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn(User),
    SignedOut,
    /// The server rejected the session's token; the user must log in again.
    Expired,
}

const EVENT_CAPACITY: usize = 16;

struct AuthInner {
    state: watch::Sender<AuthState>,
    events: broadcast::Sender<SessionEvent>,
    store: SessionStore,
}

/// Shared view of the auth state. Cloning is cheap; all clones observe the
/// same state. Only [`Session`] and the API client's 401 path write to it.
#[derive(Clone)]
pub struct AuthHandle {
    inner: Arc<AuthInner>,
}

impl AuthHandle {
    pub fn new(store: SessionStore) -> Self {
        let (state, _) = watch::channel(AuthState::Unknown);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(AuthInner {
                state,
                events,
                store,
            }),
        }
    }

    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.state.borrow().user().cloned()
    }

    pub fn token(&self) -> Option<SessionToken> {
        self.inner.state.borrow().token().cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.inner.events.send(event);
    }

    pub(crate) async fn sign_in(&self, user: User, token: SessionToken) {
        let persisted = PersistedSession {
            token: token.clone(),
            user: user.clone(),
        };
        if let Err(e) = self.inner.store.save(&persisted).await {
            tracing::warn!("session will not survive a restart: {e}");
        }
        tracing::info!(user_id = %user.id, username = %user.username, "signed in");
        self.inner.state.send_replace(AuthState::Authenticated {
            user: user.clone(),
            token,
        });
        self.emit(SessionEvent::SignedIn(user));
    }

    pub(crate) async fn sign_out(&self) {
        if let Err(e) = self.inner.store.clear().await {
            tracing::warn!("failed to remove session file: {e}");
        }
        let previous = self.inner.state.send_replace(AuthState::Anonymous);
        if previous.user().is_some() {
            tracing::info!("signed out");
            self.emit(SessionEvent::SignedOut);
        }
    }

    /// Leave the loading state without a session.
    pub(crate) fn settle_anonymous(&self) {
        self.inner.state.send_replace(AuthState::Anonymous);
    }

    /// Forced logout after `rejected` got a 401. Only the first caller holding
    /// the current token performs the transition; returns whether it did.
    pub(crate) async fn expire(&self, rejected: &SessionToken) -> bool {
        let expired = self.inner.state.send_if_modified(|state| match state {
            AuthState::Authenticated { token, .. } if token == rejected => {
                *state = AuthState::Anonymous;
                true
            }
            _ => false,
        });

        if expired {
            tracing::warn!("session expired, login required");
            if let Err(e) = self.inner.store.clear().await {
                tracing::warn!("failed to remove session file: {e}");
            }
            self.emit(SessionEvent::Expired);
        }
        expired
    }
}

/// The session holder: resolves the persisted session at startup and owns the
/// login / signup / logout actions.
pub struct Session {
    api: ApiClient,
    in_flight: Mutex<()>,
}

impl Session {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            in_flight: Mutex::new(()),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    fn auth(&self) -> &AuthHandle {
        self.api.auth()
    }

    pub fn state(&self) -> AuthState {
        self.auth().state()
    }

    pub fn user(&self) -> Option<User> {
        self.auth().user()
    }

    pub fn is_loading(&self) -> bool {
        self.auth().state().is_loading()
    }

    pub fn view(&self) -> View {
        self.auth().state().view()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.auth().subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.auth().events()
    }

    /// The signed-in user, or the error a privileged view should surface.
    pub fn require_user(&self) -> Result<User, ClientError> {
        match self.state() {
            AuthState::Authenticated { user, .. } => Ok(user),
            AuthState::Unknown => Err(ClientError::SessionLoading),
            AuthState::Anonymous => Err(ClientError::Unauthorized(
                "Please log in to continue.".to_string(),
            )),
        }
    }

    /// Resolve the persisted session against the server. Always leaves the
    /// loading state, whatever happens.
    pub async fn initialize(&self) -> AuthState {
        let Some(persisted) = self.auth().store().load().await else {
            self.auth().settle_anonymous();
            return self.state();
        };

        match self.api.current_user(&persisted.token).await {
            Ok(user) => self.auth().sign_in(user, persisted.token).await,
            Err(e) if e.is_auth_rejection() => {
                tracing::info!("stored session was rejected: {e}");
                self.auth().sign_out().await;
            }
            Err(ClientError::Cancelled) => self.auth().settle_anonymous(),
            Err(e) => {
                tracing::warn!("could not restore session: {e}");
                self.auth().settle_anonymous();
            }
        }
        self.state()
    }

    pub async fn login(&self, form: &LoginForm) -> Result<User, ClientError> {
        form.validate()?;
        let _guard = self.in_flight.try_lock().map_err(|_| ClientError::Busy)?;
        let resp = self.api.login(form.email.trim(), &form.password).await?;
        self.establish(resp.user, resp.token).await
    }

    pub async fn signup(&self, form: &SignupForm) -> Result<User, ClientError> {
        form.validate()?;
        let _guard = self.in_flight.try_lock().map_err(|_| ClientError::Busy)?;
        let resp = self
            .api
            .register(form.username.trim(), form.email.trim(), &form.password)
            .await?;
        self.establish(resp.user, resp.token).await
    }

    /// End the session on the server and locally. Local state is cleared even
    /// when the server call fails; that failure is still returned.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let _guard = self.in_flight.try_lock().map_err(|_| ClientError::Busy)?;
        let result = if self.auth().token().is_some() {
            self.api.logout().await
        } else {
            Ok(())
        };
        self.auth().sign_out().await;
        match result {
            // A 401 here means the server already forgot us.
            Err(ClientError::Unauthorized(_)) => Ok(()),
            other => other,
        }
    }

    async fn establish(
        &self,
        user: User,
        token: Option<SessionToken>,
    ) -> Result<User, ClientError> {
        let token = token.filter(|t| !t.is_blank()).ok_or_else(|| {
            ClientError::Protocol("server did not issue a session token".to_string())
        })?;
        self.auth().sign_in(user.clone(), token).await;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            username: format!("user-{id}"),
            email: format!("{id}@example.com"),
            favorites: vec![],
            created_at: "2024-01-01".to_string(),
        }
    }

    fn handle() -> (AuthHandle, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        (AuthHandle::new(store), dir)
    }

    #[test]
    fn test_views_follow_state() {
        assert_eq!(AuthState::Unknown.view(), View::Loading);
        assert_eq!(AuthState::Anonymous.view(), View::SignIn);
        let state = AuthState::Authenticated {
            user: user("1"),
            token: SessionToken::new("t"),
        };
        assert_eq!(state.view(), View::Soundboard);
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn test_starts_unknown() {
        let (auth, _dir) = handle();
        assert!(auth.state().is_loading());
        assert!(auth.token().is_none());
    }

    #[tokio::test]
    async fn test_expire_only_once_for_same_token() {
        let (auth, _dir) = handle();
        let mut events = auth.events();
        let token = SessionToken::new("t1");
        auth.sign_in(user("1"), token.clone()).await;

        assert!(auth.expire(&token).await);
        assert!(!auth.expire(&token).await);
        assert_eq!(auth.state(), AuthState::Anonymous);

        assert_eq!(events.recv().await.unwrap(), SessionEvent::SignedIn(user("1")));
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_token_does_not_expire_new_session() {
        let (auth, _dir) = handle();
        let old = SessionToken::new("old");
        auth.sign_in(user("1"), SessionToken::new("new")).await;
        assert!(!auth.expire(&old).await);
        assert_eq!(auth.user(), Some(user("1")));
    }

    #[tokio::test]
    async fn test_sign_in_persists_and_sign_out_clears() {
        let (auth, _dir) = handle();
        auth.sign_in(user("7"), SessionToken::new("tok")).await;
        let stored = auth.store().load().await.unwrap();
        assert_eq!(stored.user.id, "7");

        auth.sign_out().await;
        assert!(auth.store().load().await.is_none());
        assert_eq!(auth.state(), AuthState::Anonymous);
    }
}
