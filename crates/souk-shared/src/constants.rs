/// Remote document collection holding review records
pub const REVIEWS_COLLECTION: &str = "restaurants";

/// Local storage key for the serialized review list
pub const STORAGE_KEY_REVIEWS: &str = "reviews";

/// Local storage key for the serialized session identity
pub const STORAGE_KEY_USER: &str = "user";

/// Local storage key for the path to resume after login
pub const STORAGE_KEY_REDIRECT: &str = "redirect_after_login";

/// Query parameter carrying the path to resume after login
pub const REDIRECT_QUERY_PARAM: &str = "redirect";

/// Reviewer name used when the author has no display name
pub const DEFAULT_REVIEWER_NAME: &str = "User";

/// Field the remote backend orders the collection by
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Review fields owned by the store; caller-supplied values are overwritten.
pub const SYSTEM_FIELDS: [&str; 5] = ["id", "createdAt", "userId", "reviewerName", "reviewerImage"];

/// Review fields that can never change after creation.
pub const IMMUTABLE_FIELDS: [&str; 2] = ["id", "userId"];
