//! The persistence capability set review stores are written against.

use async_trait::async_trait;
use souk_shared::constants::CREATED_AT_FIELD;
use souk_shared::{NewReview, Review, ReviewId, ReviewPatch};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Ordering requested from [`ReviewBackend::list_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    pub field: String,
    pub direction: Direction,
}

impl SortOrder {
    pub fn new(field: impl Into<String>, direction: Direction) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    /// Most recently created first.
    pub fn newest_first() -> Self {
        Self::new(CREATED_AT_FIELD, Direction::Descending)
    }
}

/// A collection of review documents.
///
/// Implementations assign identifiers on insert. Whether `delete_by_id` of a
/// missing record is an error is up to the backend.
#[async_trait]
pub trait ReviewBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn insert(&self, review: &NewReview) -> Result<ReviewId>;

    /// All records. Backends that cannot sort may ignore `order`.
    async fn list_all(&self, order: &SortOrder) -> Result<Vec<Review>>;

    async fn delete_by_id(&self, id: &ReviewId) -> Result<()>;

    async fn update_by_id(&self, id: &ReviewId, patch: &ReviewPatch) -> Result<()>;

    /// Credential of the signed-in user, `None` after sign-out. Backends
    /// that do not authenticate ignore it.
    fn set_auth_token(&self, _token: Option<String>) {}
}
