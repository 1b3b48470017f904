//! Remote review backend over the Cloud Firestore REST API (v1).
//!
//! Each review is one document in a collection; Firestore assigns the
//! document id on insert. Listing goes through `:runQuery` so the server
//! applies the requested ordering.

pub mod value;

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Map, Value};
use souk_shared::constants::REVIEWS_COLLECTION;
use souk_shared::{NewReview, Review, ReviewId, ReviewPatch};

use crate::backend::{Direction, ReviewBackend, SortOrder};
use crate::error::{Result, StoreError};

pub const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";

#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// REST root, without trailing slash.
    pub base_url: String,
    pub project_id: String,
    /// Database id, `(default)` unless the project uses named databases.
    pub database: String,
    pub collection: String,
    /// Web API key sent as the `key` query parameter.
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            project_id: project_id.into(),
            database: "(default)".to_string(),
            collection: REVIEWS_COLLECTION.to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }

    fn documents_root(&self) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents",
            self.base_url.trim_end_matches('/'),
            self.project_id,
            self.database
        )
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.documents_root(), self.collection)
    }

    fn document_url(&self, id: &ReviewId) -> String {
        format!("{}/{}", self.collection_url(), id)
    }

    fn run_query_url(&self) -> String {
        format!("{}:runQuery", self.documents_root())
    }
}

pub struct FirestoreBackend {
    client: reqwest::Client,
    config: FirestoreConfig,
    id_token: RwLock<Option<String>>,
}

impl FirestoreBackend {
    pub fn new(config: FirestoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        tracing::info!(
            project = %config.project_id,
            collection = %config.collection,
            "firestore backend configured"
        );

        Ok(Self {
            client,
            config,
            id_token: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    /// Bearer token of the signed-in user, for security rules that check
    /// `request.auth`. `None` sends requests unauthenticated.
    pub fn set_id_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.id_token.write() {
            *slot = token;
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(ref key) = self.config.api_key {
            builder = builder.query(&[("key", key)]);
        }
        let token = self.id_token.read().ok().and_then(|t| t.clone());
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        builder
    }
}

#[async_trait]
impl ReviewBackend for FirestoreBackend {
    fn name(&self) -> &'static str {
        "firestore"
    }

    fn set_auth_token(&self, token: Option<String>) {
        tracing::debug!(authenticated = token.is_some(), "firestore credentials updated");
        self.set_id_token(token);
    }

    async fn insert(&self, review: &NewReview) -> Result<ReviewId> {
        let body = json!({ "fields": value::encode_fields(&review.to_document()) });

        let resp = self
            .request(Method::POST, &self.config.collection_url())
            .json(&body)
            .send()
            .await?;
        let doc: Value = check(resp).await?.json().await?;

        let id = document_id(&doc)?;
        tracing::debug!(id = %id, "firestore document created");
        Ok(id)
    }

    async fn list_all(&self, order: &SortOrder) -> Result<Vec<Review>> {
        let body = structured_query(&self.config.collection, order);

        let resp = self
            .request(Method::POST, &self.config.run_query_url())
            .json(&body)
            .send()
            .await?;
        let rows: Vec<Value> = check(resp).await?.json().await?;

        let reviews = decode_run_query(&rows);
        tracing::debug!(count = reviews.len(), "firestore query returned");
        Ok(reviews)
    }

    async fn delete_by_id(&self, id: &ReviewId) -> Result<()> {
        let resp = self
            .request(Method::DELETE, &self.config.document_url(id))
            .send()
            .await?;
        check(resp).await.map_err(|e| not_found_as(e, id))?;
        Ok(())
    }

    async fn update_by_id(&self, id: &ReviewId, patch: &ReviewPatch) -> Result<()> {
        let mut query: Vec<(&str, String)> = patch
            .fields()
            .keys()
            .map(|k| ("updateMask.fieldPaths", quote_field_path(k)))
            .collect();
        query.push(("currentDocument.exists", "true".to_string()));

        let body = json!({ "fields": value::encode_fields(patch.fields()) });

        let resp = self
            .request(Method::PATCH, &self.config.document_url(id))
            .query(&query)
            .json(&body)
            .send()
            .await?;
        check(resp).await.map_err(|e| not_found_as(e, id))?;
        Ok(())
    }
}

/// Turn non-2xx responses into [`StoreError::Remote`], keeping Firestore's
/// error message when the body carries one.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or(text);

    tracing::warn!(status = status.as_u16(), %message, "firestore request failed");
    Err(StoreError::Remote {
        status: status.as_u16(),
        message,
    })
}

fn not_found_as(err: StoreError, id: &ReviewId) -> StoreError {
    match err {
        StoreError::Remote { status, .. } if status == StatusCode::NOT_FOUND.as_u16() => {
            StoreError::NotFound(id.to_string())
        }
        other => other,
    }
}

fn structured_query(collection: &str, order: &SortOrder) -> Value {
    let direction = match order.direction {
        Direction::Ascending => "ASCENDING",
        Direction::Descending => "DESCENDING",
    };
    json!({
        "structuredQuery": {
            "from": [{ "collectionId": collection }],
            "orderBy": [{
                "field": { "fieldPath": quote_field_path(&order.field) },
                "direction": direction
            }]
        }
    })
}

/// Field paths that are not plain identifiers must be backtick-quoted.
fn quote_field_path(field: &str) -> String {
    let mut chars = field.chars();
    let simple = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if simple {
        field.to_string()
    } else {
        format!("`{}`", field.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

fn document_id(doc: &Value) -> Result<ReviewId> {
    doc["name"]
        .as_str()
        .and_then(|name| name.rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(ReviewId::new)
        .ok_or_else(|| StoreError::Malformed("document without a name".into()))
}

fn decode_document(doc: &Value) -> Result<Review> {
    let id = document_id(doc)?;
    let mut fields = match doc.get("fields") {
        Some(Value::Object(fields)) => value::decode_fields(fields)?,
        None => Map::new(),
        Some(other) => return Err(StoreError::Malformed(format!("fields: {other}"))),
    };
    fields.insert("id".to_string(), Value::String(id.0.clone()));

    serde_json::from_value(Value::Object(fields))
        .map_err(|e| StoreError::Malformed(format!("document {id}: {e}")))
}

/// `:runQuery` streams one object per row; rows without a `document` only
/// carry read metadata. Documents that do not decode are logged and skipped
/// so one bad record cannot hide the rest of the collection.
fn decode_run_query(rows: &[Value]) -> Vec<Review> {
    rows.iter()
        .filter_map(|row| row.get("document"))
        .filter_map(|doc| match decode_document(doc) {
            Ok(review) => Some(review),
            Err(e) => {
                let id = doc["name"].as_str().unwrap_or("<unnamed>");
                tracing::warn!(id, error = %e, "skipping undecodable firestore document");
                None
            }
        })
        .collect()
}
