//! Offline review backend: the whole collection as one JSON array in local
//! storage.

use std::sync::Arc;

use async_trait::async_trait;
use souk_shared::constants::STORAGE_KEY_REVIEWS;
use souk_shared::{NewReview, Review, ReviewId, ReviewPatch};
use tokio::sync::Mutex;

use crate::backend::{ReviewBackend, SortOrder};
use crate::error::{Result, StoreError};
use crate::kv::KeyValueStorage;

pub struct LocalReviewBackend {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
    // read-modify-write of the blob must not interleave
    write_lock: Mutex<()>,
}

impl LocalReviewBackend {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self::with_key(storage, STORAGE_KEY_REVIEWS)
    }

    pub fn with_key(storage: Arc<dyn KeyValueStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<Vec<Review>> {
        match self.storage.get(&self.key)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, reviews: &[Review]) -> Result<()> {
        let json = serde_json::to_string(reviews)?;
        self.storage.set(&self.key, &json)
    }
}

/// Millisecond timestamp of the creation time, bumped past any taken id.
fn next_id(review: &NewReview, existing: &[Review]) -> ReviewId {
    let mut candidate = review.created_at.timestamp_millis();
    loop {
        let id = ReviewId(candidate.to_string());
        if !existing.iter().any(|r| r.id == id) {
            return id;
        }
        candidate += 1;
    }
}

#[async_trait]
impl ReviewBackend for LocalReviewBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn insert(&self, review: &NewReview) -> Result<ReviewId> {
        let _guard = self.write_lock.lock().await;

        let mut reviews = self.load()?;
        let id = next_id(review, &reviews);
        reviews.insert(0, review.clone().with_id(id.clone()));
        self.save(&reviews)?;

        tracing::debug!(id = %id, total = reviews.len(), "review stored locally");
        Ok(id)
    }

    async fn list_all(&self, _order: &SortOrder) -> Result<Vec<Review>> {
        self.load()
    }

    async fn delete_by_id(&self, id: &ReviewId) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut reviews = self.load()?;
        let before = reviews.len();
        reviews.retain(|r| &r.id != id);

        if reviews.len() == before {
            tracing::debug!(id = %id, "delete of unknown local review ignored");
            return Ok(());
        }
        self.save(&reviews)
    }

    async fn update_by_id(&self, id: &ReviewId, patch: &ReviewPatch) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut reviews = self.load()?;
        let slot = reviews
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        *slot = slot
            .merged(patch)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        self.save(&reviews)
    }
}
