use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{ClientError, ClientResult};
use crate::models::UserProfile;
use crate::source::DataSource;
use crate::sync::lock_or_recover;

pub const MOCK_USER_ID: &str = "demo-user";
pub const MOCK_TOKEN: &str = "mock-token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            display_name: None,
        }
    }
}

/// Notifications published by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// The provider has not reported yet.
    Pending,
    SignedOut,
    SignedIn(Identity),
}

/// External source of identities and short-lived id tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn subscribe(&self) -> watch::Receiver<AuthEvent>;

    /// Starts the provider's sign-in flow. Completion is reported through
    /// [`IdentityProvider::subscribe`].
    async fn sign_in(&self) -> ClientResult<()>;

    async fn sign_out(&self) -> ClientResult<()>;

    async fn id_token(&self, identity: &Identity, force_refresh: bool) -> ClientResult<String>;
}

/// Live provider backed by an id token issued outside this process.
pub struct StaticIdentityProvider {
    identity: Identity,
    token: Mutex<Option<String>>,
    events: watch::Sender<AuthEvent>,
}

impl StaticIdentityProvider {
    pub fn new(identity: Identity, token: Option<String>) -> Self {
        let token = token.filter(|value| !value.trim().is_empty());
        let initial = if token.is_some() {
            AuthEvent::SignedIn(identity.clone())
        } else {
            AuthEvent::SignedOut
        };
        let (events, _) = watch::channel(initial);
        Self {
            identity,
            token: Mutex::new(token),
            events,
        }
    }

    /// Installs a rotated token. Requests issued afterwards carry it once the
    /// session refreshes its credentials.
    pub fn set_token(&self, token: impl Into<String>) {
        *lock_or_recover(&self.token) = Some(token.into());
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    fn subscribe(&self) -> watch::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_in(&self) -> ClientResult<()> {
        if lock_or_recover(&self.token).is_none() {
            return Err(ClientError::Identity(
                "no id token configured, set OPSDESK_ID_TOKEN".to_string(),
            ));
        }
        self.events
            .send_replace(AuthEvent::SignedIn(self.identity.clone()));
        Ok(())
    }

    async fn sign_out(&self) -> ClientResult<()> {
        self.events.send_replace(AuthEvent::SignedOut);
        Ok(())
    }

    async fn id_token(&self, identity: &Identity, _force_refresh: bool) -> ClientResult<String> {
        if identity.uid != self.identity.uid {
            return Err(ClientError::Identity(format!(
                "no token held for identity '{}'",
                identity.uid
            )));
        }
        lock_or_recover(&self.token)
            .clone()
            .ok_or_else(|| ClientError::Identity("id token is not available".to_string()))
    }
}

/// Offline provider: signing in installs a fixed identity and token.
pub struct MockIdentityProvider {
    events: watch::Sender<AuthEvent>,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        let (events, _) = watch::channel(AuthEvent::SignedOut);
        Self { events }
    }

    pub fn identity() -> Identity {
        Identity {
            uid: MOCK_USER_ID.to_string(),
            email: Some("demo@opsdesk.local".to_string()),
            display_name: Some("Demo User".to_string()),
        }
    }
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    fn subscribe(&self) -> watch::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_in(&self) -> ClientResult<()> {
        self.events.send_replace(AuthEvent::SignedIn(Self::identity()));
        Ok(())
    }

    async fn sign_out(&self) -> ClientResult<()> {
        self.events.send_replace(AuthEvent::SignedOut);
        Ok(())
    }

    async fn id_token(&self, _identity: &Identity, _force_refresh: bool) -> ClientResult<String> {
        Ok(MOCK_TOKEN.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Unauthenticated,
    Authenticating,
    Authenticated,
}

/// Identity and token travel together, so a token exists iff a user does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub identity: Identity,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub credentials: Option<Credentials>,
    pub profile: Option<UserProfile>,
}

impl SessionSnapshot {
    fn initializing() -> Self {
        Self {
            state: SessionState::Initializing,
            credentials: None,
            profile: None,
        }
    }

    fn signed_out(&mut self) {
        self.state = SessionState::Unauthenticated;
        self.credentials = None;
        self.profile = None;
    }

    pub fn user(&self) -> Option<&Identity> {
        self.credentials.as_ref().map(|credentials| &credentials.identity)
    }

    pub fn token(&self) -> Option<&str> {
        self.credentials
            .as_ref()
            .map(|credentials| credentials.token.as_str())
    }

    pub fn needs_onboarding(&self) -> bool {
        self.profile
            .as_ref()
            .is_some_and(UserProfile::needs_onboarding)
    }
}

/// Shared handle to the current identity, token and profile.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    provider: Arc<dyn IdentityProvider>,
    source: Arc<dyn DataSource>,
    snapshot: watch::Sender<SessionSnapshot>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(listener) = lock_or_recover(&self.listener).take() {
            listener.abort();
        }
    }
}

impl Session {
    /// Subscribes to the provider and applies its notifications in the
    /// background. Must be called from within a tokio runtime.
    pub fn start(provider: Arc<dyn IdentityProvider>, source: Arc<dyn DataSource>) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::initializing());
        let inner = Arc::new(SessionInner {
            provider,
            source,
            snapshot,
            listener: Mutex::new(None),
        });

        let events = inner.provider.subscribe();
        let listener = tokio::spawn(listen(Arc::downgrade(&inner), events));
        *lock_or_recover(&inner.listener) = Some(listener);

        Self { inner }
    }

    /// Waits until the provider's first notification has been applied.
    pub async fn ready(&self) -> SessionSnapshot {
        self.wait_until(|snapshot| snapshot.state != SessionState::Initializing)
            .await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.snapshot.borrow().state
    }

    pub fn token(&self) -> Option<String> {
        self.inner.snapshot.borrow().token().map(ToOwned::to_owned)
    }

    pub fn user(&self) -> Option<Identity> {
        self.inner.snapshot.borrow().user().cloned()
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.inner.snapshot.borrow().profile.clone()
    }

    pub async fn login(&self) -> ClientResult<()> {
        self.inner
            .snapshot
            .send_modify(|snapshot| snapshot.state = SessionState::Authenticating);

        if let Err(error) = self.inner.provider.sign_in().await {
            tracing::warn!(error = %error, "sign-in failed");
            self.inner.snapshot.send_modify(SessionSnapshot::signed_out);
            return Err(error);
        }

        let snapshot = self
            .wait_until(|snapshot| snapshot.state != SessionState::Authenticating)
            .await;
        match snapshot.state {
            SessionState::Authenticated => Ok(()),
            _ => Err(ClientError::Identity(
                "sign-in did not produce a usable identity".to_string(),
            )),
        }
    }

    /// Clears the local token and profile, then signs out of the provider.
    /// A provider failure is returned but the local state stays cleared.
    pub async fn logout(&self) -> ClientResult<()> {
        self.inner.snapshot.send_modify(SessionSnapshot::signed_out);
        tracing::info!("signed out");
        if let Err(error) = self.inner.provider.sign_out().await {
            tracing::warn!(error = %error, "provider sign-out failed");
            return Err(error);
        }
        Ok(())
    }

    /// Re-fetches the profile with the current token. On failure the
    /// previously loaded profile is kept.
    pub async fn refresh_profile(&self) -> ClientResult<UserProfile> {
        let token = self.token().ok_or(ClientError::Unauthenticated)?;
        let profile = self.inner.source.current_profile(Some(&token)).await?;
        self.inner.install_profile(&token, profile.clone());
        Ok(profile)
    }

    /// Asks the provider for a fresh token. Requests already sent keep the
    /// token they were sent with.
    pub async fn refresh_token(&self) -> ClientResult<String> {
        let identity = self.user().ok_or(ClientError::Unauthenticated)?;
        let token = self.inner.provider.id_token(&identity, true).await?;
        self.inner.snapshot.send_if_modified(|snapshot| {
            match snapshot.credentials.as_mut() {
                Some(credentials) if credentials.identity == identity => {
                    credentials.token = token.clone();
                    true
                }
                _ => false,
            }
        });
        Ok(token)
    }

    async fn wait_until<F>(&self, mut predicate: F) -> SessionSnapshot
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut receiver = self.inner.snapshot.subscribe();
        let snapshot = match receiver.wait_for(|snapshot| predicate(snapshot)).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        snapshot
    }
}

impl SessionInner {
    async fn apply(&self, event: AuthEvent) {
        match event {
            AuthEvent::Pending => {}
            AuthEvent::SignedOut => {
                self.snapshot.send_modify(SessionSnapshot::signed_out);
            }
            AuthEvent::SignedIn(identity) => self.sign_in(identity).await,
        }
    }

    async fn sign_in(&self, identity: Identity) {
        let token = match self.provider.id_token(&identity, false).await {
            Ok(token) => token,
            Err(error) => {
                tracing::error!(error = %error, uid = %identity.uid, "failed to obtain id token");
                self.snapshot.send_modify(SessionSnapshot::signed_out);
                return;
            }
        };

        self.snapshot.send_modify(|snapshot| {
            let same_user = snapshot.user() == Some(&identity);
            snapshot.state = SessionState::Authenticated;
            snapshot.credentials = Some(Credentials {
                identity: identity.clone(),
                token: token.clone(),
            });
            if !same_user {
                snapshot.profile = None;
            }
        });
        tracing::info!(uid = %identity.uid, "session authenticated");

        match self.source.current_profile(Some(&token)).await {
            Ok(profile) => self.install_profile(&token, profile),
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    uid = %identity.uid,
                    "profile unavailable, continuing without it"
                );
            }
        }
    }

    /// Installs a fetched profile unless the session moved on to another token.
    fn install_profile(&self, token: &str, profile: UserProfile) {
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.token() != Some(token) {
                return false;
            }
            snapshot.profile = Some(profile);
            true
        });
    }
}

async fn listen(inner: Weak<SessionInner>, mut events: watch::Receiver<AuthEvent>) {
    loop {
        let event = events.borrow_and_update().clone();
        let Some(session) = inner.upgrade() else {
            return;
        };
        session.apply(event).await;
        drop(session);

        if events.changed().await.is_err() {
            return;
        }
    }
}
