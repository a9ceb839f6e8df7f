//! In-memory modeling platform
//!
//! Keeps every resource in a map and derives documents from creation
//! arguments the way the remote platform would: partitions get their row
//! counts from `row_offset` / `row_step`, ensembles expose a configurable
//! importance map and evaluations are scored by a caller-supplied function.
//! Failures can be injected per resource kind.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::api::ModelingPlatform;
use crate::documents::{
    performance_score, DatasetDocument, FieldId, FieldInfo, ObjectiveField, Optype,
    STATUS_FAULTY, STATUS_FINISHED,
};
use crate::errors::PlatformError;
use crate::types::{ResourceId, ResourceKind};

/// What the scoring function sees when an evaluation is created.
#[derive(Debug)]
pub struct EvaluationContext<'a> {
    pub model_kind: ResourceKind,
    pub model_args: &'a Map<String, Value>,
    /// `input_fields` the model was restricted to, empty when unrestricted.
    pub input_fields: Vec<FieldId>,
    /// `row_offset` of the holdout partition, i.e. its fold index.
    pub holdout_offset: Option<u64>,
    pub holdout_rows: u64,
}

type Scorer = dyn Fn(&EvaluationContext<'_>) -> f64 + Send + Sync;

struct StoredResource {
    args: Map<String, Value>,
    document: Value,
    faulty: bool,
}

#[derive(Default)]
struct StubState {
    sequence: u64,
    resources: BTreeMap<ResourceId, StoredResource>,
    created: Vec<ResourceId>,
    pending_failures: HashMap<ResourceKind, u32>,
    faulty_kinds: HashSet<ResourceKind>,
    importance: BTreeMap<FieldId, f64>,
}

/// Stub implementation backed by an in-memory map.
#[derive(Clone)]
pub struct InMemoryPlatform {
    state: Arc<RwLock<StubState>>,
    scorer: Arc<Scorer>,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(StubState::default())),
            scorer: Arc::new(|_| 0.5),
        }
    }
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score evaluations with `scorer` instead of the constant `0.5`.
    pub fn with_scorer<F>(mut self, scorer: F) -> Self
    where
        F: Fn(&EvaluationContext<'_>) -> f64 + Send + Sync + 'static,
    {
        self.scorer = Arc::new(scorer);
        self
    }

    /// Importance reported by every ensemble created afterwards.
    pub fn with_importance<I, K>(self, importance: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<FieldId>,
    {
        self.state.write().importance = importance
            .into_iter()
            .map(|(field, score)| (field.into(), score))
            .collect();
        self
    }

    /// Store a finished source dataset and return its id.
    pub fn register_dataset<I, K>(
        &self,
        name: &str,
        rows: u64,
        fields: I,
        objective: Option<&str>,
    ) -> ResourceId
    where
        I: IntoIterator<Item = (K, FieldInfo)>,
        K: Into<FieldId>,
    {
        let mut state = self.state.write();
        let id = state.next_id(ResourceKind::Dataset);
        let dataset = DatasetDocument {
            resource: id.clone(),
            name: name.to_string(),
            rows,
            fields: fields
                .into_iter()
                .map(|(field, info)| (field.into(), info))
                .collect(),
            objective_field: objective.map(|id| ObjectiveField { id: id.to_string() }),
        };
        let document = with_status(serde_json::to_value(&dataset).unwrap_or_default(), false);
        state.resources.insert(
            id.clone(),
            StoredResource {
                args: Map::new(),
                document,
                faulty: false,
            },
        );
        id
    }

    /// Make the next `count` creations of `kind` fail.
    pub fn fail_next_creates(&self, kind: ResourceKind, count: u32) {
        self.state.write().pending_failures.insert(kind, count);
    }

    /// Resources of `kind` created from now on end up faulty.
    pub fn mark_kind_faulty(&self, kind: ResourceKind) {
        self.state.write().faulty_kinds.insert(kind);
    }

    /// Resources of `kind` that currently exist.
    pub fn live(&self, kind: ResourceKind) -> Vec<ResourceId> {
        self.state
            .read()
            .resources
            .keys()
            .filter(|id| id.kind() == kind)
            .cloned()
            .collect()
    }

    /// Every resource of `kind` ever created through [`ModelingPlatform::create`].
    pub fn created(&self, kind: ResourceKind) -> Vec<ResourceId> {
        self.state
            .read()
            .created
            .iter()
            .filter(|id| id.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.state.read().resources.contains_key(id)
    }

    /// Creation arguments of a stored resource.
    pub fn args(&self, id: &ResourceId) -> Option<Map<String, Value>> {
        self.state.read().resources.get(id).map(|r| r.args.clone())
    }

    pub fn document(&self, id: &ResourceId) -> Option<Value> {
        self.state.read().resources.get(id).map(|r| r.document.clone())
    }
}

impl StubState {
    fn next_id(&mut self, kind: ResourceKind) -> ResourceId {
        self.sequence += 1;
        ResourceId::from_sequence(kind, self.sequence)
    }

    fn resolve(&self, value: Option<&Value>, expected: &[ResourceKind]) -> Result<ResourceId, PlatformError> {
        let raw = value
            .and_then(Value::as_str)
            .ok_or_else(|| PlatformError::Malformed("missing resource reference".to_string()))?;
        let id = ResourceId::parse(raw).map_err(|err| PlatformError::Malformed(err.to_string()))?;
        if !expected.contains(&id.kind()) {
            return Err(PlatformError::Malformed(format!("unexpected reference {id}")));
        }
        if !self.resources.contains_key(&id) {
            return Err(PlatformError::NotFound(id.to_string()));
        }
        Ok(id)
    }

    fn dataset(&self, id: &ResourceId) -> Result<DatasetDocument, PlatformError> {
        let stored = self
            .resources
            .get(id)
            .ok_or_else(|| PlatformError::NotFound(id.to_string()))?;
        DatasetDocument::from_value(stored.document.clone())
    }

    fn derive_dataset(&self, id: &ResourceId, args: &Map<String, Value>) -> Result<Value, PlatformError> {
        let origin_id = self.resolve(args.get("origin_dataset"), &[ResourceKind::Dataset])?;
        let origin = self.dataset(&origin_id)?;

        let offset = args.get("row_offset").and_then(Value::as_u64).unwrap_or(0);
        let step = args.get("row_step").and_then(Value::as_u64).unwrap_or(1).max(1);
        let rows = if offset >= origin.rows {
            0
        } else {
            (origin.rows - offset).div_ceil(step)
        };

        let mut fields = origin.fields.clone();
        if let Some(inputs) = args.get("input_fields").and_then(Value::as_array) {
            let keep: HashSet<&str> = inputs.iter().filter_map(Value::as_str).collect();
            fields.retain(|field, _| keep.contains(field.as_str()));
        }
        if let Some(new_fields) = args.get("new_fields").and_then(Value::as_array) {
            for (index, new_field) in new_fields.iter().enumerate() {
                let name = new_field
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("new field");
                fields.insert(format!("1{index:05}"), FieldInfo::new(name, Optype::Categorical));
            }
        }

        let objective_field = origin
            .objective_field
            .filter(|objective| fields.contains_key(&objective.id));
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} (derived)", origin.name));

        let dataset = DatasetDocument {
            resource: id.clone(),
            name,
            rows,
            fields,
            objective_field,
        };
        let mut document = serde_json::to_value(&dataset)?;
        document["origin_dataset"] = json!(origin_id);
        Ok(document)
    }

    fn train(&self, kind: ResourceKind, args: &Map<String, Value>) -> Result<Value, PlatformError> {
        let references: Vec<Value> = match (args.get("datasets"), args.get("dataset")) {
            (Some(Value::Array(datasets)), _) => datasets.clone(),
            (_, Some(dataset)) => vec![dataset.clone()],
            _ => {
                return Err(PlatformError::Malformed(format!(
                    "{kind} needs a dataset or datasets argument"
                )))
            }
        };

        let mut datasets = Vec::with_capacity(references.len());
        for reference in &references {
            let id = self.resolve(Some(reference), &[ResourceKind::Dataset])?;
            datasets.push(self.dataset(&id)?);
        }
        let first = datasets
            .first()
            .ok_or_else(|| PlatformError::Malformed(format!("{kind} needs at least one dataset")))?;
        let rows: u64 = datasets.iter().map(|dataset| dataset.rows).sum();

        let objective = args.get("objective_field").and_then(Value::as_str);
        let is_objective = |field: &str| {
            objective.is_some_and(|objective| {
                objective == field || first.field_name(field) == Some(objective)
            })
        };

        let mut document = json!({
            "name": args.get("name").cloned().unwrap_or(Value::Null),
            "datasets": datasets.iter().map(|d| d.resource.to_string()).collect::<Vec<_>>(),
            "rows": rows,
            "objective_field": objective,
            "input_fields": args.get("input_fields").cloned().unwrap_or(Value::Null),
        });
        if kind == ResourceKind::Ensemble {
            let importance: Map<String, Value> = self
                .importance
                .iter()
                .filter(|(field, _)| {
                    first.fields.contains_key(field.as_str()) && !is_objective(field.as_str())
                })
                .map(|(field, score)| (field.clone(), json!(score)))
                .collect();
            document["importance"] = Value::Object(importance);
        }
        Ok(document)
    }

    fn evaluate(&self, args: &Map<String, Value>, scorer: &Scorer) -> Result<Value, PlatformError> {
        if let Some(Value::Array(evaluations)) = args.get("evaluations") {
            let mut scores = Vec::with_capacity(evaluations.len());
            for reference in evaluations {
                let id = self.resolve(Some(reference), &[ResourceKind::Evaluation])?;
                scores.push(performance_score(&self.resources[&id].document)?);
            }
            if scores.is_empty() {
                return Err(PlatformError::Malformed("no evaluations to average".to_string()));
            }
            let average = scores.iter().sum::<f64>() / scores.len() as f64;
            return Ok(json!({
                "evaluations": evaluations,
                "result": {"model": {"average_phi": average}},
            }));
        }

        let dataset_id = self.resolve(args.get("dataset"), &[ResourceKind::Dataset])?;
        let holdout = &self.resources[&dataset_id];
        let holdout_rows = holdout.document.get("rows").and_then(Value::as_u64).unwrap_or(0);
        let holdout_offset = holdout.args.get("row_offset").and_then(Value::as_u64);

        let predictive: Vec<ResourceKind> = ResourceKind::ALL
            .into_iter()
            .filter(ResourceKind::is_predictive)
            .collect();
        let model_ref = predictive
            .iter()
            .find_map(|kind| args.get(kind.as_str()))
            .ok_or_else(|| PlatformError::Malformed("evaluation needs a model".to_string()))?;
        let model_id = self.resolve(Some(model_ref), &predictive)?;
        let model_args = &self.resources[&model_id].args;

        let input_fields = model_args
            .get("input_fields")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let context = EvaluationContext {
            model_kind: model_id.kind(),
            model_args,
            input_fields,
            holdout_offset,
            holdout_rows,
        };
        let score = scorer(&context);

        Ok(json!({
            "dataset": dataset_id,
            "model": model_id,
            "result": {"model": {"average_phi": score}},
        }))
    }
}

fn with_status(mut document: Value, faulty: bool) -> Value {
    let code = if faulty { STATUS_FAULTY } else { STATUS_FINISHED };
    if let Value::Object(map) = &mut document {
        map.insert("status".to_string(), json!({"code": code}));
    }
    document
}

#[async_trait]
impl ModelingPlatform for InMemoryPlatform {
    async fn create(
        &self,
        kind: ResourceKind,
        args: &Map<String, Value>,
    ) -> Result<ResourceId, PlatformError> {
        let mut state = self.state.write();

        if let Some(remaining) = state.pending_failures.get_mut(&kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PlatformError::Status {
                    status: 503,
                    body: format!("injected {kind} creation failure"),
                });
            }
        }

        let id = state.next_id(kind);
        let document = match kind {
            ResourceKind::Source => Value::Object(args.clone()),
            ResourceKind::Dataset => state.derive_dataset(&id, args)?,
            ResourceKind::Model | ResourceKind::Ensemble | ResourceKind::LogisticRegression => {
                state.train(kind, args)?
            }
            ResourceKind::Evaluation => state.evaluate(args, self.scorer.as_ref())?,
        };

        let faulty = state.faulty_kinds.contains(&kind);
        let mut document = with_status(document, faulty);
        document["resource"] = json!(id);

        state.resources.insert(
            id.clone(),
            StoredResource {
                args: args.clone(),
                document,
                faulty,
            },
        );
        state.created.push(id.clone());
        tracing::debug!("stub created {}", id);
        Ok(id)
    }

    async fn fetch(&self, id: &ResourceId) -> Result<Value, PlatformError> {
        self.document(id)
            .ok_or_else(|| PlatformError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &ResourceId) -> Result<(), PlatformError> {
        match self.state.write().resources.remove(id) {
            Some(_) => Ok(()),
            None => Err(PlatformError::NotFound(id.to_string())),
        }
    }

    async fn wait(&self, id: &ResourceId) -> Result<(), PlatformError> {
        tokio::task::yield_now().await;
        let state = self.state.read();
        let stored = state
            .resources
            .get(id)
            .ok_or_else(|| PlatformError::NotFound(id.to_string()))?;
        if stored.faulty {
            return Err(PlatformError::Faulty {
                id: id.to_string(),
                message: "injected fault".to_string(),
            });
        }
        Ok(())
    }
}
