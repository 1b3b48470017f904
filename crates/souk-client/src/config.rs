//! Client configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the client can start with zero
//! configuration for local development (offline backend, SQLite storage in
//! the platform data directory).

use std::path::PathBuf;
use std::time::Duration;

use souk_shared::constants::{DEFAULT_REVIEWER_NAME, REVIEWS_COLLECTION};
use souk_store::firestore::DEFAULT_BASE_URL;
use souk_store::FirestoreConfig;

use crate::error::{ClientError, Result};

/// Where reviews are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Firestore,
}

/// Where the router remembers the page to resume after login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    Query,
    Storage,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Review persistence backend.
    /// Env: `SOUK_BACKEND` (`local` / `firestore`)
    /// Default: `local`
    pub backend: BackendKind,

    /// SQLite file holding local storage.
    /// Env: `SOUK_DB_PATH`
    /// Default: `None` (platform data directory)
    pub db_path: Option<PathBuf>,

    /// Env: `FIRESTORE_PROJECT_ID`. Required for the firestore backend.
    pub firestore_project_id: Option<String>,

    /// Env: `FIRESTORE_API_KEY`
    pub firestore_api_key: Option<String>,

    /// Env: `FIRESTORE_COLLECTION`
    /// Default: `restaurants`
    pub firestore_collection: String,

    /// Env: `FIRESTORE_BASE_URL`
    /// Default: `https://firestore.googleapis.com/v1`
    pub firestore_base_url: String,

    /// Env: `FIRESTORE_TIMEOUT_SECS`
    /// Default: `30`
    pub firestore_timeout: Duration,

    /// Env: `SOUK_REDIRECT_MODE` (`query` / `storage`)
    /// Default: `storage`
    pub redirect_mode: RedirectMode,

    /// Reviewer name for authors without a display name.
    /// Env: `SOUK_FALLBACK_REVIEWER`
    /// Default: `User`
    pub fallback_reviewer_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            db_path: None,
            firestore_project_id: None,
            firestore_api_key: None,
            firestore_collection: REVIEWS_COLLECTION.to_string(),
            firestore_base_url: DEFAULT_BASE_URL.to_string(),
            firestore_timeout: Duration::from_secs(30),
            redirect_mode: RedirectMode::Storage,
            fallback_reviewer_name: DEFAULT_REVIEWER_NAME.to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("SOUK_BACKEND") {
            match val.trim().to_ascii_lowercase().as_str() {
                "local" => config.backend = BackendKind::Local,
                "firestore" | "remote" => config.backend = BackendKind::Firestore,
                _ => tracing::warn!(value = %val, "Invalid SOUK_BACKEND, using default"),
            }
        }

        if let Some(path) = lookup("SOUK_DB_PATH").filter(|p| !p.is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        config.firestore_project_id = lookup("FIRESTORE_PROJECT_ID").filter(|v| !v.is_empty());
        config.firestore_api_key = lookup("FIRESTORE_API_KEY").filter(|v| !v.is_empty());

        if let Some(collection) = lookup("FIRESTORE_COLLECTION").filter(|v| !v.is_empty()) {
            config.firestore_collection = collection;
        }

        if let Some(url) = lookup("FIRESTORE_BASE_URL").filter(|v| !v.is_empty()) {
            config.firestore_base_url = url;
        }

        if let Some(val) = lookup("FIRESTORE_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.firestore_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid FIRESTORE_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(val) = lookup("SOUK_REDIRECT_MODE") {
            match val.trim().to_ascii_lowercase().as_str() {
                "query" => config.redirect_mode = RedirectMode::Query,
                "storage" => config.redirect_mode = RedirectMode::Storage,
                _ => tracing::warn!(value = %val, "Invalid SOUK_REDIRECT_MODE, using default"),
            }
        }

        if let Some(name) = lookup("SOUK_FALLBACK_REVIEWER").filter(|v| !v.trim().is_empty()) {
            config.fallback_reviewer_name = name;
        }

        config
    }

    /// Settings for [`souk_store::FirestoreBackend`].
    pub fn firestore(&self) -> Result<FirestoreConfig> {
        let project_id = self
            .firestore_project_id
            .clone()
            .ok_or_else(|| ClientError::Config("FIRESTORE_PROJECT_ID is not set".into()))?;

        Ok(FirestoreConfig {
            base_url: self.firestore_base_url.clone(),
            collection: self.firestore_collection.clone(),
            api_key: self.firestore_api_key.clone(),
            timeout: self.firestore_timeout,
            ..FirestoreConfig::new(project_id)
        })
    }
}
