//! Review records and the payloads used to create and patch them.
//!
//! Restaurant fields are opaque to the stores: whatever the caller puts in
//! a [`ReviewDraft`] is carried through in `fields` and flattened next to
//! the system fields when serialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{CREATED_AT_FIELD, IMMUTABLE_FIELDS, SYSTEM_FIELDS};
use crate::error::ValidationError;
use crate::types::{Identity, ReviewId, UserId};

/// A persisted review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: ReviewId,
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
    pub user_id: UserId,
    pub reviewer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_image: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A review that has been stamped with its author but not yet persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewReview {
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
    pub user_id: UserId,
    pub reviewer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_image: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl NewReview {
    /// Stamp `draft` with authorship and a creation time.
    ///
    /// Draft keys that collide with system fields are dropped.
    pub fn stamp(
        draft: ReviewDraft,
        author: &Identity,
        fallback_name: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut fields = draft.0;
        for key in SYSTEM_FIELDS {
            fields.remove(key);
        }

        Self {
            created_at,
            user_id: author.uid.clone(),
            reviewer_name: author.reviewer_name(fallback_name).to_string(),
            reviewer_image: author.photo_url.clone(),
            fields,
        }
    }

    pub fn with_id(self, id: ReviewId) -> Review {
        Review {
            id,
            created_at: self.created_at,
            user_id: self.user_id,
            reviewer_name: self.reviewer_name,
            reviewer_image: self.reviewer_image,
            fields: self.fields,
        }
    }

    /// The record as a flat JSON object (what document stores receive).
    pub fn to_document(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

impl Review {
    /// Look up a field by its serialized name, system fields included.
    pub fn field(&self, key: &str) -> Option<Value> {
        match key {
            "id" => Some(Value::String(self.id.0.clone())),
            "createdAt" => Some(Value::String(iso_millis::format(&self.created_at))),
            "userId" => Some(Value::String(self.user_id.0.clone())),
            "reviewerName" => Some(Value::String(self.reviewer_name.clone())),
            "reviewerImage" => self.reviewer_image.clone().map(Value::String),
            other => self.fields.get(other).cloned(),
        }
    }

    /// Shallow-merge `patch` into a copy of this review.
    pub fn merged(&self, patch: &ReviewPatch) -> Result<Review, ValidationError> {
        patch.validate()?;

        let mut map = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(ValidationError::InvalidRecord("not an object".into())),
            Err(e) => return Err(ValidationError::InvalidRecord(e.to_string())),
        };
        for (key, value) in patch.fields() {
            map.insert(key.clone(), value.clone());
        }

        serde_json::from_value(Value::Object(map))
            .map_err(|e| ValidationError::InvalidRecord(e.to_string()))
    }
}

/// Caller-supplied restaurant fields for a new review.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ReviewDraft(pub Map<String, Value>);

impl ReviewDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }
}

impl From<Map<String, Value>> for ReviewDraft {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Partial update applied to an existing review.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ReviewPatch(pub Map<String, Value>);

impl ReviewPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reject patches that would rewrite identity or authorship, or that
    /// would leave a system field unreadable.
    ///
    /// Runs without the current record, so a patch for a review that is not
    /// loaded locally is held to the same schema.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for key in IMMUTABLE_FIELDS {
            if self.0.contains_key(key) {
                return Err(ValidationError::ImmutableField(key.to_string()));
            }
        }

        if let Some(value) = self.0.get(CREATED_AT_FIELD) {
            let valid = value.as_str().is_some_and(|s| iso_millis::parse(s).is_ok());
            if !valid {
                return Err(ValidationError::InvalidRecord(format!(
                    "`{CREATED_AT_FIELD}` must be an ISO-8601 timestamp, got {value}"
                )));
            }
        }
        if let Some(value) = self.0.get("reviewerName") {
            if !value.is_string() {
                return Err(ValidationError::InvalidRecord(format!(
                    "`reviewerName` must be a string, got {value}"
                )));
            }
        }
        if let Some(value) = self.0.get("reviewerImage") {
            if !(value.is_string() || value.is_null()) {
                return Err(ValidationError::InvalidRecord(format!(
                    "`reviewerImage` must be a string or null, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// ISO-8601 timestamps with millisecond precision and a `Z` suffix.
pub mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }
}
