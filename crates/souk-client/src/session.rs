//! Session store: who is signed in.
//!
//! The store is backed either by an [`IdentityProvider`] that pushes
//! session changes, or by local storage holding the identity as JSON. State
//! is published through a `watch` channel so the router and any observer
//! read it synchronously and can await changes.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use souk_shared::constants::STORAGE_KEY_USER;
use souk_shared::{AuthError, Identity, ProviderProfile};
use souk_store::KeyValueStorage;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub user: Option<Identity>,
    /// Set once the first session value has been processed.
    pub initialized: bool,
    /// Last auth failure, for display.
    pub error: Option<String>,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// One notification from the identity provider.
pub type SessionChange = std::result::Result<Option<Identity>, AuthError>;

/// Stream of notifications; the first item is the current session.
pub type SessionChanges = mpsc::UnboundedReceiver<SessionChange>;

/// External identity provider (Firebase Auth, an OAuth popup, ...).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in_interactive(&self) -> std::result::Result<Identity, AuthError>;

    async fn sign_out(&self) -> std::result::Result<(), AuthError>;

    /// Subscribe to session changes. The provider delivers the current
    /// session first, then one item per change, until it shuts down.
    fn on_session_change(&self) -> SessionChanges;

    /// Bearer token proving the signed-in user to the review backend.
    /// Providers without one keep the default.
    async fn id_token(&self) -> std::result::Result<Option<String>, AuthError> {
        Ok(None)
    }
}

pub enum SessionSource {
    Provider(Arc<dyn IdentityProvider>),
    Local(Arc<dyn KeyValueStorage>),
}

/// Handle to the task applying provider notifications.
///
/// Dropping the handle cancels the task.
pub struct SessionSubscription {
    task: JoinHandle<()>,
}

impl SessionSubscription {
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SessionSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct SessionStore {
    source: SessionSource,
    state: Arc<watch::Sender<SessionState>>,
    listener: Mutex<Option<SessionSubscription>>,
}

impl SessionStore {
    pub fn new(source: SessionSource) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            source,
            state: Arc::new(state),
            listener: Mutex::new(None),
        }
    }

    pub fn with_provider(provider: Arc<dyn IdentityProvider>) -> Self {
        Self::new(SessionSource::Provider(provider))
    }

    pub fn with_local_storage(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self::new(SessionSource::Local(storage))
    }

    /// Start tracking the session and wait for the first value.
    ///
    /// Safe to call repeatedly: only the first call subscribes, later calls
    /// wait on the same first value. Failures end up in
    /// [`SessionState::error`]; the return value is whether a user is
    /// signed in.
    pub async fn initialize(&self) -> bool {
        match &self.source {
            SessionSource::Provider(provider) => self.start_listener(provider.as_ref()),
            SessionSource::Local(storage) => self.restore_local(storage.as_ref()),
        }

        self.state
            .subscribe()
            .wait_for(|s| s.initialized)
            .await
            .map(|state| state.is_authenticated())
            .unwrap_or(false)
    }

    fn start_listener(&self, provider: &dyn IdentityProvider) {
        let mut listener = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if listener.is_some() {
            return;
        }

        info!("subscribing to identity provider session changes");
        let mut changes = provider.on_session_change();
        let state = Arc::clone(&self.state);

        let task = tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                apply_change(&state, change);
            }

            debug!("identity provider closed its session stream");
            state.send_modify(|s| {
                if !s.initialized {
                    s.initialized = true;
                    s.error = Some("identity provider closed before reporting a session".into());
                }
            });
        });

        *listener = Some(SessionSubscription { task });
    }

    fn restore_local(&self, storage: &dyn KeyValueStorage) {
        if self.state.borrow().initialized {
            return;
        }

        let restored = storage
            .get(STORAGE_KEY_USER)
            .map_err(|e| e.to_string())
            .and_then(|raw| match raw {
                Some(json) => serde_json::from_str::<ProviderProfile>(&json)
                    .map_err(|e| e.to_string())
                    .and_then(|profile| profile.into_identity().map_err(|e| e.to_string()))
                    .map(Some)
                    .map_err(|e| format!("stored session is unreadable: {e}")),
                None => Ok(None),
            });

        self.state.send_modify(|s| {
            match restored {
                Ok(user) => {
                    debug!(authenticated = user.is_some(), "session restored from local storage");
                    s.user = user;
                }
                Err(message) => {
                    warn!(error = %message, "failed to restore session");
                    s.user = None;
                    s.error = Some(message);
                }
            }
            s.initialized = true;
        });
    }

    /// Run the provider's interactive sign-in flow.
    ///
    /// On failure the previous session is kept and the message recorded.
    pub async fn sign_in_interactive(&self) -> Result<Identity> {
        let SessionSource::Provider(provider) = &self.source else {
            return Err(AuthError::Unsupported("interactive sign-in needs an identity provider").into());
        };

        match provider.sign_in_interactive().await {
            Ok(identity) => {
                info!(uid = %identity.uid, "signed in");
                self.state.send_modify(|s| {
                    s.user = Some(identity.clone());
                    s.error = None;
                });
                Ok(identity)
            }
            Err(e) => {
                warn!(error = %e, "sign-in failed");
                self.record_error(&e);
                Err(e.into())
            }
        }
    }

    pub async fn sign_out(&self) -> Result<()> {
        let provider = match &self.source {
            SessionSource::Provider(provider) => provider,
            SessionSource::Local(_) => return self.logout(),
        };

        match provider.sign_out().await {
            Ok(()) => {
                info!("signed out");
                self.state.send_modify(|s| {
                    s.user = None;
                    s.error = None;
                });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "sign-out failed");
                self.record_error(&e);
                Err(e.into())
            }
        }
    }

    /// Persist `profile` as the signed-in user (local storage variant).
    ///
    /// Accepts an [`Identity`] or a raw provider profile; the profile is
    /// normalized before it is stored.
    pub fn set_user(&self, profile: impl Into<ProviderProfile>) -> Result<()> {
        let SessionSource::Local(storage) = &self.source else {
            return Err(AuthError::Unsupported("set_user needs local session storage").into());
        };
        let identity = profile.into().into_identity()?;

        let json = serde_json::to_string(&identity).map_err(souk_store::StoreError::from)?;
        storage.set(STORAGE_KEY_USER, &json)?;

        info!(uid = %identity.uid, "session stored locally");
        self.state.send_modify(|s| {
            s.user = Some(identity);
            s.error = None;
            s.initialized = true;
        });
        Ok(())
    }

    /// Forget the signed-in user (local storage variant).
    pub fn logout(&self) -> Result<()> {
        let SessionSource::Local(storage) = &self.source else {
            return Err(AuthError::Unsupported("logout needs local session storage").into());
        };

        storage.remove(STORAGE_KEY_USER)?;
        info!("local session cleared");
        self.state.send_modify(|s| {
            s.user = None;
            s.error = None;
        });
        Ok(())
    }

    /// Stop listening to the identity provider.
    pub fn shutdown(&self) {
        let mut listener = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(subscription) = listener.take() {
            subscription.cancel();
            debug!("session listener cancelled");
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.borrow().initialized
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn current_user(&self) -> Option<Identity> {
        self.state.borrow().user.clone()
    }

    /// Backend credential for the signed-in user, if the source has one.
    ///
    /// Token failures are logged and treated as "no token".
    pub async fn id_token(&self) -> Option<String> {
        if !self.is_authenticated() {
            return None;
        }
        let SessionSource::Provider(provider) = &self.source else {
            return None;
        };
        match provider.id_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "failed to obtain id token");
                None
            }
        }
    }

    pub fn is_listening(&self) -> bool {
        let listener = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        listener.as_ref().is_some_and(SessionSubscription::is_active)
    }

    fn record_error(&self, err: &AuthError) {
        let message = err.to_string();
        self.state.send_modify(|s| s.error = Some(message));
    }
}

fn apply_change(state: &watch::Sender<SessionState>, change: SessionChange) {
    state.send_modify(|s| {
        match change {
            Ok(Some(identity)) => {
                debug!(uid = %identity.uid, "provider reports signed-in user");
                s.user = Some(identity);
                s.error = None;
            }
            Ok(None) => {
                debug!("provider reports no signed-in user");
                s.user = None;
            }
            Err(e) => {
                warn!(error = %e, "session notification failed");
                s.error = Some(e.to_string());
            }
        }
        s.initialized = true;
    });
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ClientError;
    use souk_store::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Identity provider driven by the test.
    #[derive(Default)]
    pub(crate) struct ScriptedProvider {
        initial: Mutex<Option<SessionChange>>,
        subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionChange>>>,
        pub subscriptions: AtomicUsize,
        next_sign_in: Mutex<Option<std::result::Result<Identity, AuthError>>>,
        fail_sign_out: Mutex<Option<AuthError>>,
        token: Mutex<Option<String>>,
    }

    impl ScriptedProvider {
        pub(crate) fn signed_in(identity: Identity) -> Arc<Self> {
            let provider = Self::default();
            *provider.initial.lock().unwrap() = Some(Ok(Some(identity)));
            Arc::new(provider)
        }

        pub(crate) fn signed_out() -> Arc<Self> {
            let provider = Self::default();
            *provider.initial.lock().unwrap() = Some(Ok(None));
            Arc::new(provider)
        }

        pub(crate) fn silent() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn push(&self, change: SessionChange) {
            for tx in self.subscribers.lock().unwrap().iter() {
                let _ = tx.send(change.clone());
            }
        }

        pub(crate) fn close(&self) {
            self.subscribers.lock().unwrap().clear();
        }

        pub(crate) fn next_sign_in(&self, result: std::result::Result<Identity, AuthError>) {
            *self.next_sign_in.lock().unwrap() = Some(result);
        }

        pub(crate) fn fail_sign_out(&self, err: AuthError) {
            *self.fail_sign_out.lock().unwrap() = Some(err);
        }

        pub(crate) fn set_token(&self, token: &str) {
            *self.token.lock().unwrap() = Some(token.to_string());
        }
    }

    #[async_trait]
    impl IdentityProvider for ScriptedProvider {
        async fn sign_in_interactive(&self) -> std::result::Result<Identity, AuthError> {
            self.next_sign_in
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(AuthError::PopupClosed))
        }

        async fn sign_out(&self) -> std::result::Result<(), AuthError> {
            match self.fail_sign_out.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn id_token(&self) -> std::result::Result<Option<String>, AuthError> {
            Ok(self.token.lock().unwrap().clone())
        }

        fn on_session_change(&self) -> SessionChanges {
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            if let Some(initial) = self.initial.lock().unwrap().clone() {
                let _ = tx.send(initial);
            }
            self.subscribers.lock().unwrap().push(tx);
            rx
        }
    }

    fn ann() -> Identity {
        Identity::new("u1")
            .with_display_name("Ann")
            .with_email("ann@example.com")
    }

    #[tokio::test]
    async fn initialize_waits_for_first_notification() {
        let provider = ScriptedProvider::signed_in(ann());
        let store = SessionStore::with_provider(provider.clone());
        assert!(!store.is_initialized());

        assert!(store.initialize().await);
        assert!(store.is_initialized());
        assert_eq!(store.current_user(), Some(ann()));
        assert!(store.is_listening());
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let provider = ScriptedProvider::signed_out();
        let store = SessionStore::with_provider(provider.clone());

        assert!(!store.initialize().await);
        assert!(!store.initialize().await);
        assert_eq!(provider.subscriptions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_initialize_subscribes_once() {
        let provider = ScriptedProvider::signed_in(ann());
        let store = SessionStore::with_provider(provider.clone());

        let (a, b) = futures::join!(store.initialize(), store.initialize());
        assert!(a && b);
        assert_eq!(provider.subscriptions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn later_notifications_update_state() {
        let provider = ScriptedProvider::signed_out();
        let store = SessionStore::with_provider(provider.clone());
        store.initialize().await;

        let mut rx = store.subscribe();
        provider.push(Ok(Some(ann())));
        rx.wait_for(|s| s.is_authenticated()).await.unwrap();
        assert_eq!(store.current_user(), Some(ann()));

        provider.push(Ok(None));
        rx.wait_for(|s| !s.is_authenticated()).await.unwrap();
    }

    #[tokio::test]
    async fn failed_notification_still_initializes() {
        let provider = ScriptedProvider::silent();
        let store = SessionStore::with_provider(provider.clone());

        let init = tokio::spawn({
            let provider = provider.clone();
            async move {
                tokio::task::yield_now().await;
                provider.push(Err(AuthError::Notification("token expired".into())));
            }
        });

        assert!(!store.initialize().await);
        init.await.unwrap();

        let state = store.snapshot();
        assert!(state.initialized);
        assert!(state.error.unwrap().contains("token expired"));
    }

    #[tokio::test]
    async fn closed_stream_releases_waiters() {
        let provider = ScriptedProvider::silent();
        let store = SessionStore::with_provider(provider.clone());

        let closer = tokio::spawn({
            let provider = provider.clone();
            async move {
                tokio::task::yield_now().await;
                provider.close();
            }
        });

        assert!(!store.initialize().await);
        closer.await.unwrap();
        assert!(store.is_initialized());
        assert!(store.snapshot().error.is_some());
    }

    #[tokio::test]
    async fn sign_in_success_sets_user() {
        let provider = ScriptedProvider::signed_out();
        let store = SessionStore::with_provider(provider.clone());
        store.initialize().await;

        provider.next_sign_in(Ok(ann()));
        let identity = store.sign_in_interactive().await.unwrap();
        assert_eq!(identity, ann());
        assert!(store.is_authenticated());
        assert_eq!(store.snapshot().error, None);
    }

    #[tokio::test]
    async fn sign_in_failure_keeps_prior_state() {
        let provider = ScriptedProvider::signed_in(ann());
        let store = SessionStore::with_provider(provider.clone());
        store.initialize().await;

        provider.next_sign_in(Err(AuthError::SignInFailed("popup blocked".into())));
        let err = store.sign_in_interactive().await.unwrap_err();
        assert!(matches!(err, ClientError::Auth(AuthError::SignInFailed(_))));

        let state = store.snapshot();
        assert_eq!(state.user, Some(ann()));
        assert!(state.error.unwrap().contains("popup blocked"));
    }

    #[tokio::test]
    async fn sign_out_clears_user() {
        let provider = ScriptedProvider::signed_in(ann());
        let store = SessionStore::with_provider(provider.clone());
        store.initialize().await;

        store.sign_out().await.unwrap();
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn failed_sign_out_keeps_user() {
        let provider = ScriptedProvider::signed_in(ann());
        let store = SessionStore::with_provider(provider.clone());
        store.initialize().await;

        provider.fail_sign_out(AuthError::SignOutFailed("network".into()));
        assert!(store.sign_out().await.is_err());
        assert!(store.is_authenticated());
        assert!(store.snapshot().error.is_some());
    }

    #[tokio::test]
    async fn shutdown_stops_listening() {
        let provider = ScriptedProvider::signed_out();
        let store = SessionStore::with_provider(provider.clone());
        store.initialize().await;

        store.shutdown();
        assert!(!store.is_listening());

        provider.push(Ok(Some(ann())));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn provider_source_rejects_local_operations() {
        let store = SessionStore::with_provider(ScriptedProvider::signed_out());
        assert!(matches!(
            store.set_user(ann()),
            Err(ClientError::Auth(AuthError::Unsupported(_)))
        ));
        assert!(store.logout().is_err());
    }

    #[tokio::test]
    async fn local_set_user_survives_new_store() {
        let storage = Arc::new(MemoryStorage::new());

        let store = SessionStore::with_local_storage(storage.clone());
        assert!(!store.initialize().await);
        store.set_user(ann()).unwrap();
        assert!(store.is_authenticated());

        let reopened = SessionStore::with_local_storage(storage.clone());
        assert!(reopened.initialize().await);
        assert_eq!(reopened.current_user(), Some(ann()));

        reopened.logout().unwrap();
        assert!(!reopened.is_authenticated());
        assert_eq!(storage.get(STORAGE_KEY_USER).unwrap(), None);
    }

    #[tokio::test]
    async fn local_corrupt_session_is_signed_out() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(STORAGE_KEY_USER, "{not json").unwrap();

        let store = SessionStore::with_local_storage(storage);
        assert!(!store.initialize().await);

        let state = store.snapshot();
        assert!(state.initialized);
        assert!(state.error.unwrap().contains("unreadable"));
    }

    #[tokio::test]
    async fn local_source_has_no_interactive_sign_in() {
        let store = SessionStore::with_local_storage(Arc::new(MemoryStorage::new()));
        let err = store.sign_in_interactive().await.unwrap_err();
        assert!(matches!(err, ClientError::Auth(AuthError::Unsupported(_))));
    }

    #[tokio::test]
    async fn local_set_user_rejects_blank_uid() {
        let store = SessionStore::with_local_storage(Arc::new(MemoryStorage::new()));
        assert!(matches!(
            store.set_user(Identity::new("  ")),
            Err(ClientError::Auth(AuthError::MissingIdentifier))
        ));
    }

    #[tokio::test]
    async fn local_set_user_normalizes_provider_profile() {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::with_local_storage(storage.clone());
        store.initialize().await;

        let profile: ProviderProfile = serde_json::from_str(
            r#"{"id":"g-42","given_name":"Bob","name":"Bob Smith","picture":"https://img/bob.png"}"#,
        )
        .unwrap();
        store.set_user(profile).unwrap();

        let user = store.current_user().unwrap();
        assert_eq!(user.uid.as_str(), "g-42");
        assert_eq!(user.display_name.as_deref(), Some("Bob"));
        assert_eq!(user.photo_url.as_deref(), Some("https://img/bob.png"));

        let reopened = SessionStore::with_local_storage(storage);
        reopened.initialize().await;
        assert_eq!(reopened.current_user(), Some(user));
    }

    #[tokio::test]
    async fn local_restore_reads_raw_profile_payload() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(STORAGE_KEY_USER, r#"{"sub":"oidc-7","name":"Cara","picture":"https://img/c.png"}"#)
            .unwrap();

        let store = SessionStore::with_local_storage(storage);
        assert!(store.initialize().await);
        let user = store.current_user().unwrap();
        assert_eq!(user.uid.as_str(), "oidc-7");
        assert_eq!(user.display_name.as_deref(), Some("Cara"));
    }

    #[tokio::test]
    async fn id_token_only_for_signed_in_provider_users() {
        let provider = ScriptedProvider::signed_out();
        provider.set_token("tok-u1");
        let store = SessionStore::with_provider(provider.clone());
        store.initialize().await;
        assert_eq!(store.id_token().await, None);

        provider.next_sign_in(Ok(ann()));
        store.sign_in_interactive().await.unwrap();
        assert_eq!(store.id_token().await.as_deref(), Some("tok-u1"));

        let local = SessionStore::with_local_storage(Arc::new(MemoryStorage::new()));
        local.initialize().await;
        local.set_user(ann()).unwrap();
        assert_eq!(local.id_token().await, None);
    }
}
