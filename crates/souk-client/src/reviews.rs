//! Review collection store.
//!
//! Keeps the in-memory, most-recent-first list of reviews in step with a
//! [`ReviewBackend`]. Every mutation hits the backend first and only touches
//! the list once the backend succeeded, so the list always mirrors what was
//! persisted.

use std::sync::Arc;

use chrono::Utc;
use souk_shared::constants::DEFAULT_REVIEWER_NAME;
use souk_shared::{Identity, NewReview, Review, ReviewDraft, ReviewId, ReviewPatch, UserId, ValidationError};
use souk_store::{ReviewBackend, SortOrder, StoreError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewState {
    pub reviews: Vec<Review>,
    pub is_loading: bool,
    pub error: Option<String>,
}

pub struct ReviewStore {
    backend: Arc<dyn ReviewBackend>,
    state: watch::Sender<ReviewState>,
    order: SortOrder,
    fallback_name: String,
}

impl ReviewStore {
    pub fn new(backend: Arc<dyn ReviewBackend>) -> Self {
        let (state, _) = watch::channel(ReviewState::default());
        Self {
            backend,
            state,
            order: SortOrder::newest_first(),
            fallback_name: DEFAULT_REVIEWER_NAME.to_string(),
        }
    }

    /// Reviewer name stamped when the author has no display name.
    pub fn with_fallback_name(mut self, name: impl Into<String>) -> Self {
        self.fallback_name = name.into();
        self
    }

    /// Replace the list with everything the backend holds.
    ///
    /// Failures are recorded in [`ReviewState::error`] and leave the current
    /// list as it was.
    pub async fn fetch_all(&self) {
        self.state.send_modify(|s| s.is_loading = true);

        match self.backend.list_all(&self.order).await {
            Ok(reviews) => {
                info!(backend = self.backend.name(), count = reviews.len(), "reviews loaded");
                self.state.send_modify(|s| {
                    s.reviews = reviews;
                    s.is_loading = false;
                    s.error = None;
                });
            }
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "failed to load reviews");
                self.state.send_modify(|s| {
                    s.is_loading = false;
                    s.error = Some(e.to_string());
                });
            }
        }
    }

    /// Persist a new review by `author` and put it at the front of the list.
    pub async fn add(&self, draft: ReviewDraft, author: Option<&Identity>) -> Result<ReviewId> {
        let author = author.ok_or(ValidationError::MissingAuthor)?;
        if author.uid.is_blank() {
            return Err(ValidationError::BlankAuthorId.into());
        }

        let new_review = NewReview::stamp(draft, author, &self.fallback_name, Utc::now());
        let id = self
            .backend
            .insert(&new_review)
            .await
            .map_err(|e| self.persistence_failed("add", e))?;

        info!(id = %id, uid = %author.uid, "review added");
        let review = new_review.with_id(id.clone());
        self.state.send_modify(|s| {
            s.reviews.retain(|r| r.id != review.id);
            s.reviews.insert(0, review);
        });
        Ok(id)
    }

    /// Delete a review. An id missing from the list is only a backend
    /// concern.
    pub async fn delete(&self, id: &ReviewId) -> Result<()> {
        self.backend
            .delete_by_id(id)
            .await
            .map_err(|e| self.persistence_failed("delete", e))?;

        self.state.send_modify(|s| {
            let before = s.reviews.len();
            s.reviews.retain(|r| &r.id != id);
            if s.reviews.len() == before {
                debug!(id = %id, "deleted review was not loaded");
            }
        });
        info!(id = %id, "review deleted");
        Ok(())
    }

    /// Shallow-merge `patch` into a review.
    pub async fn update(&self, id: &ReviewId, patch: ReviewPatch) -> Result<()> {
        patch.validate()?;
        if let Some(current) = self.by_id(id) {
            current.merged(&patch)?;
        }
        if patch.is_empty() {
            return Ok(());
        }

        self.backend
            .update_by_id(id, &patch)
            .await
            .map_err(|e| self.persistence_failed("update", e))?;

        self.state.send_modify(|s| {
            if let Some(slot) = s.reviews.iter_mut().find(|r| &r.id == id) {
                match slot.merged(&patch) {
                    Ok(merged) => *slot = merged,
                    Err(e) => warn!(id = %id, error = %e, "in-memory merge failed"),
                }
            }
        });
        info!(id = %id, fields = patch.fields().len(), "review updated");
        Ok(())
    }

    pub fn by_id(&self, id: &ReviewId) -> Option<Review> {
        self.state.borrow().reviews.iter().find(|r| &r.id == id).cloned()
    }

    pub fn by_user(&self, user_id: &UserId) -> Vec<Review> {
        self.state
            .borrow()
            .reviews
            .iter()
            .filter(|r| &r.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Hand the signed-in user's credential to the backend.
    pub fn set_auth_token(&self, token: Option<String>) {
        self.backend.set_auth_token(token);
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn snapshot(&self) -> ReviewState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReviewState> {
        self.state.subscribe()
    }

    fn persistence_failed(&self, op: &'static str, err: StoreError) -> ClientError {
        warn!(backend = self.backend.name(), op, error = %err, "review persistence failed");
        let message = err.to_string();
        self.state.send_modify(|s| s.error = Some(message));
        ClientError::Persistence(err)
    }
}
