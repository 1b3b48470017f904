//! End-to-end flows over the public API: SQLite-backed storage, the local
//! review backend and the navigation guard.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use souk_client::session::{IdentityProvider, SessionChange, SessionChanges, SessionStore};
use souk_client::{App, BackendKind, ClientConfig, RedirectMode, RouteName};
use souk_shared::{AuthError, Identity, ReviewDraft, ReviewPatch, UserId};
use souk_store::{KeyValueStorage, LocalReviewBackend, SqliteStorage};
use tokio::sync::mpsc;

/// Provider that reports a fixed initial session and signs in as `next`.
struct FixedProvider {
    initial: Option<Identity>,
    next: Mutex<Option<Identity>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionChange>>>,
}

impl FixedProvider {
    fn new(initial: Option<Identity>) -> Arc<Self> {
        Arc::new(Self {
            initial,
            next: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl IdentityProvider for FixedProvider {
    async fn sign_in_interactive(&self) -> Result<Identity, AuthError> {
        let identity = self.next.lock().unwrap().take().ok_or(AuthError::PopupClosed)?;
        for tx in self.subscribers.lock().unwrap().iter() {
            let _ = tx.send(Ok(Some(identity.clone())));
        }
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        for tx in self.subscribers.lock().unwrap().iter() {
            let _ = tx.send(Ok(None));
        }
        Ok(())
    }

    fn on_session_change(&self) -> SessionChanges {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(self.initial.clone()));
        self.subscribers.lock().unwrap().push(tx);
        rx
    }
}

fn provided(provider: &Arc<FixedProvider>) -> Option<Arc<dyn IdentityProvider>> {
    Some(provider.clone())
}

fn ann() -> Identity {
    Identity::new("u1").with_display_name("Ann")
}

fn local_config(dir: &tempfile::TempDir) -> ClientConfig {
    ClientConfig {
        backend: BackendKind::Local,
        db_path: Some(dir.path().join("souk.db")),
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn add_lookup_delete_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::bootstrap(local_config(&dir), provided(&FixedProvider::new(Some(ann()))))
        .await
        .unwrap();
    assert!(app.session.is_authenticated());

    let id = app
        .add_review(ReviewDraft::new().field("name", "Cafe X"))
        .await
        .unwrap();

    let review = app.reviews.by_id(&id).unwrap();
    assert_eq!(review.id, id);
    assert_eq!(review.field("name"), Some(serde_json::json!("Cafe X")));
    assert_eq!(review.user_id.as_str(), "u1");
    assert_eq!(review.reviewer_name, "Ann");

    let json = serde_json::to_value(&review).unwrap();
    let created_at = json["createdAt"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(created_at).is_ok());
    assert!(created_at.ends_with('Z'));

    app.reviews.delete(&id).await.unwrap();
    assert!(app.reviews.by_id(&id).is_none());
    assert!(app.reviews.snapshot().error.is_none());
}

#[tokio::test]
async fn reviews_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let id = {
        let app = App::bootstrap(local_config(&dir), provided(&FixedProvider::new(Some(ann()))))
            .await
            .unwrap();
        let id = app
            .add_review(ReviewDraft::new().field("name", "Cafe X").field("rating", 4))
            .await
            .unwrap();
        app.reviews
            .update(&id, ReviewPatch::new().set("rating", 5))
            .await
            .unwrap();
        app.shutdown();
        id
    };

    let app = App::bootstrap(local_config(&dir), provided(&FixedProvider::new(None)))
        .await
        .unwrap();
    let review = app.reviews.by_id(&id).unwrap();
    assert_eq!(review.field("rating"), Some(serde_json::json!(5)));
    assert_eq!(review.field("name"), Some(serde_json::json!("Cafe X")));
    assert_eq!(app.reviews.by_user(&UserId::new("u1")).len(), 1);
    assert!(app.reviews.by_user(&UserId::new("u2")).is_empty());
}

#[tokio::test]
async fn local_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let app = App::bootstrap(local_config(&dir), None).await.unwrap();
        assert!(!app.session.is_authenticated());
        app.session.set_user(ann()).unwrap();
    }

    let app = App::bootstrap(local_config(&dir), None).await.unwrap();
    assert_eq!(app.session.current_user(), Some(ann()));

    app.session.logout().unwrap();
    let app = App::bootstrap(local_config(&dir), None).await.unwrap();
    assert!(!app.session.is_authenticated());
}

#[tokio::test]
async fn guard_routes_by_session() {
    let dir = tempfile::tempdir().unwrap();
    let provider = FixedProvider::new(None);
    let app = App::bootstrap(local_config(&dir), provided(&provider))
        .await
        .unwrap();

    let landed = app.router.navigate("/profile").await.unwrap();
    assert_eq!(landed.route, RouteName::Login);

    *provider.next.lock().unwrap() = Some(ann());
    let landed = app.sign_in().await.unwrap();
    assert_eq!(landed.route, RouteName::Profile);

    let landed = app.router.navigate("/login").await.unwrap();
    assert_eq!(landed.route, RouteName::Home);

    app.session.sign_out().await.unwrap();
    let landed = app.router.navigate("/add").await.unwrap();
    assert_eq!(landed.route, RouteName::Login);
}

#[tokio::test]
async fn query_redirects_survive_the_login_page() {
    let storage: Arc<dyn KeyValueStorage> = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let provider = FixedProvider::new(None);
    let config = ClientConfig {
        redirect_mode: RedirectMode::Query,
        ..ClientConfig::default()
    };
    let app = App::new(
        config,
        storage.clone(),
        Arc::new(SessionStore::with_provider(provider.clone())),
        Arc::new(LocalReviewBackend::new(storage)),
    );

    let landed = app.router.navigate("/restaurant/r1").await.unwrap();
    assert_eq!(landed.route, RouteName::RestaurantDetail);
    assert_eq!(landed.param("id"), Some("r1"));

    let landed = app.router.navigate("/add").await.unwrap();
    assert_eq!(landed.route, RouteName::Login);
    assert_eq!(landed.full_path(), "/login?redirect=%2Fadd");

    *provider.next.lock().unwrap() = Some(ann());
    assert_eq!(app.sign_in().await.unwrap().route, RouteName::AddReview);
}
