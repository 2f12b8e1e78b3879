use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CellId, MethodId, MethodRef, SelectionId, SubmissionId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub selection_a: SelectionId,
    pub selection_b: SelectionId,
    pub method: MethodId,
    pub result_name: String,
}

/// Output of the differential computation. The panel never looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiffExprPayload(pub serde_json::Value);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub submission_id: SubmissionId,
    pub name: String,
    pub selection_a: SelectionId,
    pub selection_b: SelectionId,
    pub method: MethodId,
    pub results: DiffExprPayload,
    pub selection_a_cells: BTreeSet<CellId>,
    pub selection_b_cells: BTreeSet<CellId>,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionDefinition {
    pub id: SelectionId,
    pub display_name: String,
    #[serde(default)]
    pub cells: Vec<CellId>,
}

/// Session contents loaded by the in-memory collaborators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub selections: Vec<SelectionDefinition>,
    #[serde(default)]
    pub methods: Vec<MethodRef>,
}

impl SessionSnapshot {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
