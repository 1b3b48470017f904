use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Sign-in failed: {0}")]
    SignInFailed(String),

    #[error("Sign-in popup was closed before completing")]
    PopupClosed,

    #[error("Sign-out failed: {0}")]
    SignOutFailed(String),

    #[error("Session notification failed: {0}")]
    Notification(String),

    #[error("Identity provider returned a profile without an identifier")]
    MissingIdentifier,

    #[error("Operation not supported by this session source: {0}")]
    Unsupported(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("User must be logged in to add a restaurant review")]
    MissingAuthor,

    #[error("Author identifier is empty")]
    BlankAuthorId,

    #[error("Field `{0}` cannot be changed after creation")]
    ImmutableField(String),

    #[error("Invalid review record: {0}")]
    InvalidRecord(String),
}
