//! Top-level entry points
//!
//! Each entry point validates its configuration record before touching the
//! platform, then checks the fetched dataset for degenerate input before any
//! resource is created.

use crossfold_platform::{DatasetDocument, FieldId, ModelingPlatform, ResourceId, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{CrossValidationConfig, FeatureSelectionConfig};
use crate::errors::{CrossfoldError, Result};
use crate::evaluator::{CrossValidationRequest, CrossValidationScore, CrossValidator};
use crate::folds::{create_k_folds, pair_k_folds};
use crate::lifecycle::ResourceLifecycle;
use crate::options::project;
use crate::selector::{BestFirstSelector, SearchLimits, SelectionReport, SelectionSettings};
use crate::validation;

/// What a cross-validation run would create, checked without the platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossValidationPlan {
    pub dataset: ResourceId,
    pub k_folds: u64,
    pub model_kind: ResourceKind,
    pub model_options: Map<String, Value>,
    pub evaluation_options: Map<String, Value>,
}

/// What a best-first search would run, checked without the platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionPlan {
    pub dataset: ResourceId,
    pub k_folds: u64,
    pub limits: SearchLimits,
    pub model_kind: ResourceKind,
    pub model_options: Map<String, Value>,
    pub evaluation_options: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrossValidationOutcome {
    /// Evaluation averaging the per-fold evaluations
    pub evaluation: ResourceId,
    #[serde(flatten)]
    pub score: CrossValidationScore,
    pub fold_evaluations: Vec<ResourceId>,
    /// Models kept because intermediate deletion was off
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ResourceId>,
    /// Fold partitions kept because intermediate deletion was off
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub folds: Vec<ResourceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SelectionOutcome {
    /// Dataset restricted to the selected fields and the objective
    pub dataset: ResourceId,
    #[serde(flatten)]
    pub report: SelectionReport,
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Validate the record's ids and numbers and project its options.
pub fn plan_cross_validation(config: &CrossValidationConfig) -> Result<CrossValidationPlan> {
    let dataset = validation::resource_id("dataset_id", &config.dataset_id, ResourceKind::Dataset)?;
    let k_folds = validation::fold_count(config.k_folds, None)?;
    validation::integer("number_of_models", config.number_of_models, 1, None)?;
    validation::rate("sample_rate", config.sample_rate)?;
    if let Some(threshold) = config.node_threshold {
        validation::integer("node_threshold", threshold, 1, None)?;
    }
    for (_, weight) in &config.objective_weights {
        validation::number("objective_weights", *weight, 0.0, None)?;
    }

    let projection = project(config.family, &config.model_options(), &config.evaluation_options);
    Ok(CrossValidationPlan {
        dataset,
        k_folds,
        model_kind: projection.kind,
        model_options: projection.model_options,
        evaluation_options: projection.evaluation_options,
    })
}

/// Validate the record's ids and numbers and project its options.
pub fn plan_best_first(config: &FeatureSelectionConfig) -> Result<SelectionPlan> {
    let dataset = validation::resource_id("dataset_id", &config.dataset_id, ResourceKind::Dataset)?;
    let k_folds = validation::fold_count(config.k_folds, None)?;
    let target_count = validation::integer("max_features", config.max_features, 1, None)?;
    let max_bad = validation::integer("max_low_perf_iterations", config.max_low_perf_iterations, 1, None)?;
    let early_stop_threshold = validation::number(
        "early_stop_performance",
        config.early_stop_performance,
        f64::MIN,
        Some(f64::MAX),
    )?;

    let projection = project(config.family, &config.model_options, &config.evaluation_options);
    Ok(SelectionPlan {
        dataset,
        k_folds,
        limits: SearchLimits {
            target_count: target_count as usize,
            max_bad: max_bad as usize,
            early_stop_threshold,
        },
        model_kind: projection.kind,
        model_options: projection.model_options,
        evaluation_options: projection.evaluation_options,
    })
}

/// Fetch `dataset` and reject inputs no fold can be cut from.
async fn load_dataset(lifecycle: &ResourceLifecycle, dataset: &ResourceId, k_folds: f64) -> Result<DatasetDocument> {
    let document = DatasetDocument::from_value(lifecycle.fetch(dataset).await?)?;
    validation::non_empty(&document)?;
    validation::fold_count(k_folds, Some(document.rows))?;
    Ok(document)
}

/// Cross-validate the configured model on the configured dataset.
pub async fn run_cross_validation(
    platform: Arc<dyn ModelingPlatform>,
    config: &CrossValidationConfig,
) -> Result<CrossValidationOutcome> {
    let plan = plan_cross_validation(config)?;
    let lifecycle = ResourceLifecycle::new(platform);

    let dataset = load_dataset(&lifecycle, &plan.dataset, config.k_folds).await?;
    let objective = validation::objective_field(&dataset, &config.objective_id)?;
    if !config.weight_field.is_empty() {
        validation::known_field("weight_field", &dataset, &config.weight_field)?;
    }
    info!(
        "cross-validating {} {} models on {} ({} rows), objective {}",
        plan.k_folds, plan.model_kind, dataset.name, dataset.rows, objective
    );

    let folds = create_k_folds(&lifecycle, &dataset.resource, &dataset.name, config.k_folds).await?;
    let outcome = evaluate_folds(&lifecycle, &dataset, &objective, &folds, config).await;

    if config.delete_intermediate || outcome.is_err() {
        lifecycle.delete_all(&folds).await;
    }
    outcome
}

async fn evaluate_folds(
    lifecycle: &ResourceLifecycle,
    dataset: &DatasetDocument,
    objective: &FieldId,
    folds: &[ResourceId],
    config: &CrossValidationConfig,
) -> Result<CrossValidationOutcome> {
    let request = CrossValidationRequest {
        objective: objective.clone(),
        dataset_name: dataset.name.clone(),
        family: config.family,
        model_options: config.model_options(),
        evaluation_options: config.evaluation_options.clone(),
        input_fields: None,
        delete_models: config.delete_intermediate,
    };
    let result = CrossValidator::new(lifecycle.clone())
        .cross_validate(&pair_k_folds(folds), &request)
        .await?;

    let args = object(json!({
        "evaluations": result.evaluations,
        "name": format!("{} - {}-fold cross-validation", dataset.name, folds.len()),
    }));
    let averaged = match lifecycle.create_all(ResourceKind::Evaluation, &[args]).await {
        Ok(averaged) => averaged,
        Err(err) => {
            lifecycle.delete_all(&result.evaluations).await;
            lifecycle.delete_all(&result.models).await;
            return Err(err);
        }
    };
    let evaluation = averaged
        .into_iter()
        .next()
        .ok_or_else(|| CrossfoldError::Aggregation("averaged evaluation was not created".to_string()))?;

    info!("cross-validation of {} stored as {}", dataset.name, evaluation);
    Ok(CrossValidationOutcome {
        evaluation,
        score: result.score,
        fold_evaluations: result.evaluations,
        models: result.models,
        folds: if config.delete_intermediate {
            Vec::new()
        } else {
            folds.to_vec()
        },
    })
}

/// Resolve the pre-selected fields: the objective is skipped, unknown
/// fields are rejected and duplicates collapse.
fn pre_selected_fields(
    dataset: &DatasetDocument,
    objective: &FieldId,
    requested: &[String],
) -> Result<Vec<FieldId>> {
    let mut fields: Vec<FieldId> = Vec::with_capacity(requested.len());
    for field in requested {
        let field = field.trim();
        if field == objective.as_str() {
            warn!("objective field {} cannot be pre-selected, skipping it", field);
            continue;
        }
        let field = validation::known_field("pre_selected", dataset, field)?;
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    Ok(fields)
}

/// Run a best-first search and store the selection as a new dataset.
pub async fn run_best_first(
    platform: Arc<dyn ModelingPlatform>,
    config: &FeatureSelectionConfig,
) -> Result<SelectionOutcome> {
    let plan = plan_best_first(config)?;
    let lifecycle = ResourceLifecycle::new(platform);

    let dataset = load_dataset(&lifecycle, &plan.dataset, config.k_folds).await?;
    let objective = validation::objective_field(&dataset, &config.objective_id)?;
    let pre_selected = pre_selected_fields(&dataset, &objective, &config.pre_selected)?;
    info!(
        "best-first search on {} ({} rows): up to {} features, objective {}",
        dataset.name, dataset.rows, plan.limits.target_count, objective
    );

    let settings = SelectionSettings {
        k_folds: plan.k_folds,
        limits: plan.limits,
        family: config.family,
        model_options: config.model_options.clone(),
        evaluation_options: config.evaluation_options.clone(),
        pre_selected,
        delete_intermediate: config.delete_intermediate,
    };
    let report = BestFirstSelector::new(lifecycle.clone(), settings)
        .run(&dataset, &objective)
        .await?;

    let mut input_fields = report.selected_ids.clone();
    input_fields.push(objective);
    let args = object(json!({
        "origin_dataset": dataset.resource,
        "input_fields": input_fields,
        "name": format!("{} - selected features", dataset.name),
    }));
    let derived = lifecycle
        .create_all(ResourceKind::Dataset, &[args])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| CrossfoldError::Aggregation("selected-features dataset was not created".to_string()))?;

    info!(
        "selected {:?} ({:?}), stored as {}",
        report.selected_fields, report.stop_reason, derived
    );
    Ok(SelectionOutcome {
        dataset: derived,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ModelFamily;

    const DATASET: &str = "dataset/5af59f9cc7736e6b33005697";

    #[test]
    fn plan_projects_boosted_ensembles_by_default() {
        let config = CrossValidationConfig {
            dataset_id: DATASET.to_string(),
            randomize: true,
            ..Default::default()
        };
        let plan = plan_cross_validation(&config).unwrap();

        assert_eq!(plan.k_folds, 5);
        assert_eq!(plan.model_kind, ResourceKind::Ensemble);
        assert_eq!(plan.model_options["boosting"], json!({"iterations": 10}));
        assert_eq!(plan.model_options["randomize"], json!(true));
    }

    #[test]
    fn empty_boosting_plans_single_models() {
        let config = CrossValidationConfig {
            dataset_id: DATASET.to_string(),
            boosting: Map::new(),
            ..Default::default()
        };
        let plan = plan_cross_validation(&config).unwrap();

        assert_eq!(plan.model_kind, ResourceKind::Model);
        assert!(!plan.model_options.contains_key("boosting"));
    }

    #[test]
    fn plan_rejects_bad_numbers() {
        let base = CrossValidationConfig {
            dataset_id: DATASET.to_string(),
            ..Default::default()
        };
        let cases = [
            (CrossValidationConfig { k_folds: 2.5, ..base.clone() }, "not-an-integer"),
            (CrossValidationConfig { k_folds: 1.0, ..base.clone() }, "below-minimum"),
            (CrossValidationConfig { number_of_models: 0.0, ..base.clone() }, "below-minimum"),
            (CrossValidationConfig { sample_rate: 1.2, ..base.clone() }, "above-maximum"),
            (CrossValidationConfig { node_threshold: Some(3.5), ..base.clone() }, "not-an-integer"),
            (
                CrossValidationConfig {
                    dataset_id: "model/5af59f9cc7736e6b33005697".to_string(),
                    ..base.clone()
                },
                "wrong-resource-type",
            ),
            (CrossValidationConfig { dataset_id: String::new(), ..base.clone() }, "not-a-resource-id"),
        ];

        for (config, code) in cases {
            let err = plan_cross_validation(&config).unwrap_err();
            assert_eq!(err.validation_code(), Some(code), "{config:?}");
        }
    }

    #[test]
    fn selection_plan_limits() {
        let config = FeatureSelectionConfig {
            dataset_id: DATASET.to_string(),
            max_features: 4.0,
            family: ModelFamily::Logistic,
            ..Default::default()
        };
        let plan = plan_best_first(&config).unwrap();
        assert_eq!(plan.limits.target_count, 4);
        assert_eq!(plan.limits.max_bad, 4);
        assert_eq!(plan.limits.early_stop_threshold, 1.0);
        assert_eq!(plan.model_kind, ResourceKind::LogisticRegression);

        let zero = FeatureSelectionConfig {
            max_low_perf_iterations: 0.0,
            ..config
        };
        assert_eq!(plan_best_first(&zero).unwrap_err().validation_code(), Some("below-minimum"));
    }
}
