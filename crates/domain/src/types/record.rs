//! Local mirror of CRM records pulled from the remote side

use serde::{Deserialize, Serialize};

use super::sync::ObjectType;

/// A CRM object as last seen remotely, scoped to a workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmRecord {
    pub workspace_id: String,
    pub object_type: ObjectType,
    pub remote_id: String,
    pub properties: serde_json::Value,
    pub updated_at: i64,
}
