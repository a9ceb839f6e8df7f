//! Typed views over platform resource documents

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::PlatformError;
use crate::types::ResourceId;

/// Field identifiers are opaque strings such as `"000004"`.
pub type FieldId = String;

/// Location of the per-evaluation performance score.
pub const AVERAGE_PHI_PATH: [&str; 3] = ["result", "model", "average_phi"];

/// Platform status code of a finished resource.
pub const STATUS_FINISHED: i64 = 5;
/// Platform status code of a faulty resource.
pub const STATUS_FAULTY: i64 = -1;
/// Platform status code of a resource in an unknown state.
pub const STATUS_UNKNOWN: i64 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Optype {
    Categorical,
    Numeric,
    Text,
    Items,
    Datetime,
    #[serde(other)]
    Other,
}

/// Field metadata carried by dataset documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub optype: Optype,
    #[serde(default = "default_preferred")]
    pub preferred: bool,
}

fn default_preferred() -> bool {
    true
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, optype: Optype) -> Self {
        Self {
            name: name.into(),
            optype,
            preferred: true,
        }
    }

    pub fn non_preferred(mut self) -> Self {
        self.preferred = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveField {
    pub id: FieldId,
}

/// The parts of a dataset document this system reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDocument {
    pub resource: ResourceId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rows: u64,
    #[serde(default)]
    pub fields: BTreeMap<FieldId, FieldInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective_field: Option<ObjectiveField>,
}

impl DatasetDocument {
    pub fn from_value(value: Value) -> Result<Self, PlatformError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn field(&self, id: &str) -> Option<&FieldInfo> {
        self.fields.get(id)
    }

    pub fn field_name(&self, id: &str) -> Option<&str> {
        self.fields.get(id).map(|field| field.name.as_str())
    }

    /// The dataset's default objective field id, if it has one.
    pub fn default_objective(&self) -> Option<&FieldId> {
        self.objective_field.as_ref().map(|objective| &objective.id)
    }

    /// Preferred fields other than `objective`, in field-id order.
    pub fn input_candidates<'a>(&'a self, objective: &'a str) -> impl Iterator<Item = &'a FieldId> {
        self.fields
            .iter()
            .filter(move |(id, field)| field.preferred && id.as_str() != objective)
            .map(|(id, _)| id)
    }
}

fn lookup<'a>(document: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(document, |node, key| node.get(key))
}

/// Performance score of an evaluation document.
pub fn performance_score(document: &Value) -> Result<f64, PlatformError> {
    lookup(document, &AVERAGE_PHI_PATH)
        .and_then(Value::as_f64)
        .ok_or_else(|| {
            PlatformError::Malformed(format!(
                "evaluation has no numeric {}",
                AVERAGE_PHI_PATH.join(".")
            ))
        })
}

/// Field importance of an ensemble document.
pub fn ensemble_importance(document: &Value) -> Result<BTreeMap<FieldId, f64>, PlatformError> {
    let importance = document
        .get("importance")
        .and_then(Value::as_object)
        .ok_or_else(|| PlatformError::Malformed("ensemble has no importance map".to_string()))?;

    importance
        .iter()
        .map(|(field, score)| {
            score
                .as_f64()
                .map(|score| (field.clone(), score))
                .ok_or_else(|| {
                    PlatformError::Malformed(format!("importance of {field} is not a number"))
                })
        })
        .collect()
}

/// `status.code` of any resource document.
pub fn status_code(document: &Value) -> Option<i64> {
    lookup(document, &["status", "code"]).and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset_json() -> Value {
        json!({
            "resource": "dataset/5af59f9cc7736e6b33005697",
            "name": "iris",
            "rows": 150,
            "fields": {
                "000000": {"name": "sepal length", "optype": "numeric", "preferred": true},
                "000001": {"name": "sepal width", "optype": "numeric"},
                "000002": {"name": "row id", "optype": "numeric", "preferred": false},
                "000004": {"name": "species", "optype": "categorical", "preferred": true}
            },
            "objective_field": {"id": "000004", "name": "species"}
        })
    }

    #[test]
    fn reads_dataset_document() {
        let dataset = DatasetDocument::from_value(dataset_json()).unwrap();
        assert_eq!(dataset.name, "iris");
        assert_eq!(dataset.rows, 150);
        assert_eq!(dataset.default_objective().map(String::as_str), Some("000004"));
        assert_eq!(dataset.field_name("000001"), Some("sepal width"));
        assert!(dataset.field("000001").unwrap().preferred);

        let inputs: Vec<_> = dataset.input_candidates("000004").cloned().collect();
        assert_eq!(inputs, vec!["000000".to_string(), "000001".to_string()]);
    }

    #[test]
    fn unknown_optypes_are_tolerated() {
        let field: FieldInfo =
            serde_json::from_value(json!({"name": "shape", "optype": "regions"})).unwrap();
        assert_eq!(field.optype, Optype::Other);
    }

    #[test]
    fn reads_performance_score() {
        let evaluation = json!({"result": {"model": {"average_phi": 0.75}}});
        assert_eq!(performance_score(&evaluation).unwrap(), 0.75);

        let missing = json!({"result": {"model": {}}});
        assert!(matches!(
            performance_score(&missing),
            Err(PlatformError::Malformed(_))
        ));
    }

    #[test]
    fn reads_importance_and_status() {
        let ensemble = json!({
            "importance": {"000000": 0.7, "000001": 0.3},
            "status": {"code": 5}
        });
        let importance = ensemble_importance(&ensemble).unwrap();
        assert_eq!(importance["000000"], 0.7);
        assert_eq!(status_code(&ensemble), Some(STATUS_FINISHED));
        assert!(ensemble_importance(&json!({})).is_err());
    }
}
