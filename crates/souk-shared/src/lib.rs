//! # souk-shared
//!
//! Domain types shared by the Souk review stores: identities, review
//! records, and the error types every layer agrees on.

pub mod constants;
pub mod error;
pub mod review;
pub mod types;

pub use error::{AuthError, ValidationError};
pub use review::{NewReview, Review, ReviewDraft, ReviewPatch};
pub use types::{Identity, ProviderProfile, ReviewId, UserId};
