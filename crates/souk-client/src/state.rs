//! Application state shared by every screen.
//!
//! [`App`] owns the session store, the review store and the router. It is
//! built once at startup and passed by reference to whatever drives the UI.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use souk_shared::{ReviewDraft, ReviewId, UserId};
use souk_store::{
    FirestoreBackend, KeyValueStorage, LocalReviewBackend, ReviewBackend, SqliteStorage,
};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{BackendKind, ClientConfig, RedirectMode};
use crate::error::Result;
use crate::reviews::ReviewStore;
use crate::router::{Location, RedirectMemory, Router};
use crate::session::{IdentityProvider, SessionStore};

/// Central application state.
pub struct App {
    pub config: ClientConfig,

    /// Local durable storage (SQLite in production).
    pub storage: Arc<dyn KeyValueStorage>,

    pub session: Arc<SessionStore>,

    pub reviews: Arc<ReviewStore>,

    pub router: Router,

    /// Task forwarding session changes to the review backend's credentials.
    auth_sync: Mutex<Option<JoinHandle<()>>>,
}

impl App {
    /// Wire an application from already-built parts.
    pub fn new(
        config: ClientConfig,
        storage: Arc<dyn KeyValueStorage>,
        session: Arc<SessionStore>,
        backend: Arc<dyn ReviewBackend>,
    ) -> Self {
        let reviews = Arc::new(
            ReviewStore::new(backend).with_fallback_name(config.fallback_reviewer_name.clone()),
        );
        let memory = match config.redirect_mode {
            RedirectMode::Query => RedirectMemory::Query,
            RedirectMode::Storage => RedirectMemory::Storage(storage.clone()),
        };
        let router = Router::new(session.clone(), memory);

        Self {
            config,
            storage,
            session,
            reviews,
            router,
            auth_sync: Mutex::new(None),
        }
    }

    /// Open storage, pick the backends from `config`, restore the session
    /// and load the initial review list.
    ///
    /// Without a `provider` the session is kept in local storage.
    pub async fn bootstrap(
        config: ClientConfig,
        provider: Option<Arc<dyn IdentityProvider>>,
    ) -> anyhow::Result<Self> {
        let sqlite = match &config.db_path {
            Some(path) => SqliteStorage::open_at(path)
                .with_context(|| format!("opening database at {}", path.display()))?,
            None => SqliteStorage::new().context("opening database in data directory")?,
        };
        if let Some(path) = sqlite.path() {
            info!(path = %path.display(), "local storage opened");
        }
        let storage: Arc<dyn KeyValueStorage> = Arc::new(sqlite);

        let backend: Arc<dyn ReviewBackend> = match config.backend {
            BackendKind::Local => Arc::new(LocalReviewBackend::new(storage.clone())),
            BackendKind::Firestore => {
                let firestore = config.firestore()?;
                Arc::new(FirestoreBackend::new(firestore).context("building Firestore client")?)
            }
        };

        let session = Arc::new(match provider {
            Some(provider) => SessionStore::with_provider(provider),
            None => SessionStore::with_local_storage(storage.clone()),
        });

        let app = Self::new(config, storage, session, backend);

        let authenticated = app.session.initialize().await;
        app.refresh_auth_token().await;
        app.start_auth_sync();
        app.reviews.fetch_all().await;
        info!(
            backend = app.reviews.backend_name(),
            authenticated,
            "application ready"
        );

        Ok(app)
    }

    /// Add a review authored by the signed-in user.
    pub async fn add_review(&self, draft: ReviewDraft) -> Result<ReviewId> {
        let author = self.session.current_user();
        self.reviews.add(draft, author.as_ref()).await
    }

    /// Sign in through the identity provider and continue to the page that
    /// sent the user to login, or home.
    pub async fn sign_in(&self) -> Result<Location> {
        self.session.sign_in_interactive().await?;
        self.refresh_auth_token().await;
        self.continue_after_login().await
    }

    /// Sign out and drop the backend credential.
    pub async fn sign_out(&self) -> Result<()> {
        self.session.sign_out().await?;
        self.reviews.set_auth_token(None);
        Ok(())
    }

    /// Navigate to the remembered post-login page, or home.
    pub async fn continue_after_login(&self) -> Result<Location> {
        let target = self
            .router
            .take_post_login_redirect()
            .unwrap_or_else(|| "/".to_string());
        self.router.navigate(&target).await
    }

    /// Give the review backend the current user's credential.
    pub async fn refresh_auth_token(&self) {
        push_auth_token(&self.session, &self.reviews).await;
    }

    /// Keep the backend credential in step with provider-pushed session
    /// changes. Calling it again while running is a no-op.
    pub fn start_auth_sync(&self) {
        let mut slot = self.auth_sync.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let session = Arc::clone(&self.session);
        let reviews = Arc::clone(&self.reviews);
        let mut changes = session.subscribe();
        let mut last_uid = current_uid(&session);

        *slot = Some(tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let uid = changes.borrow_and_update().user.as_ref().map(|u| u.uid.clone());
                if uid == last_uid {
                    continue;
                }
                debug!(signed_in = uid.is_some(), "session user changed");
                last_uid = uid;
                push_auth_token(&session, &reviews).await;
            }
        }));
    }

    /// Stop background work. The stores stay readable.
    pub fn shutdown(&self) {
        self.session.shutdown();
        let mut slot = self.auth_sync.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn current_uid(session: &SessionStore) -> Option<UserId> {
    session.current_user().map(|u| u.uid)
}

async fn push_auth_token(session: &SessionStore, reviews: &ReviewStore) {
    let token = session.id_token().await;
    debug!(present = token.is_some(), "updating backend credentials");
    reviews.set_auth_token(token);
}
