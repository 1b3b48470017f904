use serde::{Deserialize, Serialize};

use crate::error::AuthError;

// Identifier handed out by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// Identifier of a persisted review, assigned by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ReviewId(pub String);

impl ReviewId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReviewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReviewId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ReviewId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The signed-in user as the session store keeps it.
///
/// Serialized with the field names the browser client used so that a
/// session persisted to local storage stays readable across versions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub uid: UserId,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
}

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: UserId::new(uid),
            display_name: None,
            email: None,
            photo_url: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }

    /// Name stamped on reviews written by this user.
    pub fn reviewer_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(fallback)
    }
}

/// Loosely shaped profile as returned by different identity providers.
///
/// Firebase reports `uid` / `displayName` / `photoURL`, OpenID Connect
/// style providers report `id` (or `sub`) / `given_name` / `name` /
/// `picture`. [`ProviderProfile::into_identity`] picks the first non-empty
/// value of each.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderProfile {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl ProviderProfile {
    pub fn into_identity(self) -> Result<Identity, AuthError> {
        let uid = first_present([self.uid, self.id, self.sub]).ok_or(AuthError::MissingIdentifier)?;

        Ok(Identity {
            uid: UserId(uid),
            display_name: first_present([self.display_name, self.given_name, self.name]),
            email: first_present([self.email]),
            photo_url: first_present([self.photo_url, self.picture]),
        })
    }
}

impl From<Identity> for ProviderProfile {
    fn from(identity: Identity) -> Self {
        Self {
            uid: Some(identity.uid.0),
            display_name: identity.display_name,
            email: identity.email,
            photo_url: identity.photo_url,
            ..Self::default()
        }
    }
}

fn first_present<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}
