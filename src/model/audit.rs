use chrono::{DateTime, Utc};
use log::error;
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, Document};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Coll;

/// Audit actions recorded by this core.
pub const CAST_VOTE: &str = "CAST_VOTE";
pub const UPDATE_VOTE: &str = "UPDATE_VOTE";
pub const DISPATCH_VOTER: &str = "DISPATCH_VOTER";
pub const REGISTER_VOTER: &str = "REGISTER_VOTER";
pub const UPDATE_SETTINGS: &str = "UPDATE_SETTINGS";
pub const CREATE_RULE: &str = "CREATE_RULE";
pub const TOGGLE_RULE: &str = "TOGGLE_RULE";
pub const DELETE_RULE: &str = "DELETE_RULE";
pub const CREATE_CANDIDATE: &str = "CREATE_CANDIDATE";
pub const DEACTIVATE_CANDIDATE: &str = "DEACTIVATE_CANDIDATE";
pub const DELETE_CANDIDATE: &str = "DELETE_CANDIDATE";
pub const DELETE_VOTER: &str = "DELETE_VOTER";

/// One append-only audit row. This log is write-only for the whole core;
/// nothing here ever reads it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub actor_label: String,
    pub action: String,
    pub payload: Document,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl NewAuditEntry {
    pub fn new(actor_label: impl Into<String>, action: &str, payload: Document) -> Self {
        Self {
            actor_label: actor_label.into(),
            action: action.to_string(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Append an entry, swallowing failures. The operation being audited has
/// already landed by the time this runs; losing an advisory audit row must
/// not turn a recorded vote into a reported error.
pub async fn append(audit: &Coll<NewAuditEntry>, entry: NewAuditEntry) {
    if let Err(e) = audit.insert_one(&entry, None).await {
        error!("Failed to append audit entry {}: {e}", entry.action);
    }
}
