//! Cross-validation over fold pairs
//!
//! One model is trained per fold on the complementary partitions, evaluated
//! on the holdout, and the k performance scores are folded into a single
//! `{phi, stdev, phi-stdev}` aggregate.

use crossfold_platform::{performance_score, FieldId, ResourceId, ResourceKind};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::errors::{CrossfoldError, Result};
use crate::folds::FoldPair;
use crate::lifecycle::ResourceLifecycle;
use crate::options::{project, ModelFamily, Projection};

/// Mean and spread of the per-fold performance scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationScore {
    pub phi: f64,
    pub stdev: f64,
    #[serde(rename = "phi-stdev")]
    pub phi_stdev: f64,
}

/// Aggregate plus the evaluations it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationResult {
    #[serde(flatten)]
    pub score: CrossValidationScore,
    /// Per-fold evaluations; the caller decides whether to keep them
    pub evaluations: Vec<ResourceId>,
    /// Models that were not deleted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ResourceId>,
}

/// What to train and how to evaluate it.
#[derive(Debug, Clone, Default)]
pub struct CrossValidationRequest {
    /// Objective field, by name or id
    pub objective: String,
    pub dataset_name: String,
    pub family: ModelFamily,
    pub model_options: Map<String, Value>,
    pub evaluation_options: Map<String, Value>,
    /// Restrict the models to these input fields
    pub input_fields: Option<Vec<FieldId>>,
    pub delete_models: bool,
}

/// `phi = mean`, `stdev = sqrt(mean((x - phi)^2))`, `phi-stdev = phi - stdev`.
pub fn aggregate(scores: &[f64]) -> Result<CrossValidationScore> {
    if scores.len() < 2 {
        return Err(CrossfoldError::Aggregation(format!(
            "need at least 2 evaluations, got {}",
            scores.len()
        )));
    }
    if let Some(bad) = scores.iter().find(|score| !score.is_finite()) {
        return Err(CrossfoldError::Aggregation(format!(
            "evaluation score {bad} is not finite"
        )));
    }

    let n = scores.len() as f64;
    let phi = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|score| (score - phi).powi(2)).sum::<f64>() / n;
    let stdev = variance.sqrt();

    Ok(CrossValidationScore {
        phi,
        stdev,
        phi_stdev: phi - stdev,
    })
}

fn model_args(pair: &FoldPair, request: &CrossValidationRequest, projection: &Projection) -> Map<String, Value> {
    let mut args = projection.model_options.clone();
    args.insert("datasets".to_string(), json!(pair.training));
    args.insert("objective_field".to_string(), json!(request.objective));
    args.insert(
        "name".to_string(),
        json!(format!("{} - fold {} model", request.dataset_name, pair.index)),
    );
    if let Some(fields) = &request.input_fields {
        args.insert("input_fields".to_string(), json!(fields));
    }
    args
}

fn evaluation_args(
    pair: &FoldPair,
    model: &ResourceId,
    request: &CrossValidationRequest,
    projection: &Projection,
) -> Map<String, Value> {
    let mut args = projection.evaluation_options.clone();
    args.insert("dataset".to_string(), json!(pair.holdout));
    args.insert(model.kind().as_str().to_string(), json!(model));
    args.insert(
        "name".to_string(),
        json!(format!(
            "Evaluation tested with subset {} of {}",
            pair.index, request.dataset_name
        )),
    );
    args
}

/// Runs cross-validations against the platform behind a [`ResourceLifecycle`].
#[derive(Clone)]
pub struct CrossValidator {
    lifecycle: ResourceLifecycle,
}

impl CrossValidator {
    pub fn new(lifecycle: ResourceLifecycle) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &ResourceLifecycle {
        &self.lifecycle
    }

    /// Train, evaluate and aggregate one model per fold pair.
    pub async fn cross_validate(
        &self,
        pairs: &[FoldPair],
        request: &CrossValidationRequest,
    ) -> Result<CrossValidationResult> {
        let projection = project(request.family, &request.model_options, &request.evaluation_options);
        debug!(
            "cross-validating {} {} models on {}",
            pairs.len(),
            projection.kind,
            request.dataset_name
        );

        let model_requests: Vec<_> = pairs
            .iter()
            .map(|pair| model_args(pair, request, &projection))
            .collect();
        let models = self.lifecycle.create_all(projection.kind, &model_requests).await?;

        // a failed run leaves no models behind, whatever `delete_models` says
        let outcome = self.evaluate(pairs, &models, request, &projection).await;
        if request.delete_models || outcome.is_err() {
            self.lifecycle.delete_all(&models).await;
        }
        let (evaluations, score) = outcome?;
        let models = if request.delete_models { Vec::new() } else { models };

        info!(
            "{}: phi {:.4}, stdev {:.4}, phi-stdev {:.4}",
            request.dataset_name, score.phi, score.stdev, score.phi_stdev
        );
        Ok(CrossValidationResult {
            score,
            evaluations,
            models,
        })
    }

    /// Evaluate every model on its holdout and aggregate the scores.
    async fn evaluate(
        &self,
        pairs: &[FoldPair],
        models: &[ResourceId],
        request: &CrossValidationRequest,
        projection: &Projection,
    ) -> Result<(Vec<ResourceId>, CrossValidationScore)> {
        let evaluation_requests: Vec<_> = pairs
            .iter()
            .zip(models)
            .map(|(pair, model)| evaluation_args(pair, model, request, projection))
            .collect();
        let evaluations = self
            .lifecycle
            .create_all(ResourceKind::Evaluation, &evaluation_requests)
            .await?;

        match self.score(&evaluations).await {
            Ok(score) => Ok((evaluations, score)),
            Err(err) => {
                self.lifecycle.delete_all(&evaluations).await;
                Err(err)
            }
        }
    }

    async fn score(&self, evaluations: &[ResourceId]) -> Result<CrossValidationScore> {
        let documents = try_join_all(evaluations.iter().map(|id| self.lifecycle.fetch(id))).await?;
        let scores = documents
            .iter()
            .map(performance_score)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        aggregate(&scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folds::{create_k_folds, pair_k_folds};
    use crossfold_platform::{FieldInfo, InMemoryPlatform, Optype};
    use std::sync::Arc;

    #[test]
    fn aggregate_matches_population_statistics() {
        let score = aggregate(&[0.8, 0.9, 0.7]).unwrap();
        assert!((score.phi - 0.8).abs() < 1e-12);
        assert!((score.stdev - 0.081_649_658).abs() < 1e-8);
        assert!((score.phi_stdev - 0.718_350_342).abs() < 1e-8);
    }

    #[test]
    fn aggregate_of_identical_scores_has_no_spread() {
        let score = aggregate(&[0.6, 0.6, 0.6, 0.6]).unwrap();
        assert_eq!(score.stdev, 0.0);
        assert_eq!(score.phi_stdev, score.phi);
    }

    #[test]
    fn aggregate_rejects_degenerate_input() {
        assert!(aggregate(&[]).is_err());
        assert!(aggregate(&[0.5]).is_err());
        assert!(aggregate(&[0.5, f64::NAN]).is_err());
    }

    #[test]
    fn score_serializes_with_dashed_key() {
        let score = aggregate(&[0.5, 0.7]).unwrap();
        let json = serde_json::to_value(score).unwrap();
        assert!(json.get("phi-stdev").is_some());
    }

    async fn setup(platform: &InMemoryPlatform, k: f64) -> (CrossValidator, Vec<FoldPair>) {
        let dataset = platform.register_dataset(
            "diabetes",
            90,
            [
                ("000000", FieldInfo::new("plasma glucose", Optype::Numeric)),
                ("000001", FieldInfo::new("diabetes", Optype::Categorical)),
            ],
            Some("000001"),
        );
        let lifecycle = ResourceLifecycle::new(Arc::new(platform.clone()));
        let folds = create_k_folds(&lifecycle, &dataset, "diabetes", k).await.unwrap();
        (CrossValidator::new(lifecycle), pair_k_folds(&folds))
    }

    #[tokio::test]
    async fn evaluates_every_fold_and_deletes_models() {
        let platform = InMemoryPlatform::new()
            .with_scorer(|ctx| [0.8, 0.9, 0.7][ctx.holdout_offset.unwrap_or(0) as usize]);
        let (validator, pairs) = setup(&platform, 3.0).await;

        let request = CrossValidationRequest {
            objective: "diabetes".to_string(),
            dataset_name: "diabetes".to_string(),
            delete_models: true,
            ..Default::default()
        };
        let result = validator.cross_validate(&pairs, &request).await.unwrap();

        assert!((result.score.phi - 0.8).abs() < 1e-12);
        assert!((result.score.phi_stdev - 0.718_350_342).abs() < 1e-8);
        assert_eq!(result.evaluations.len(), 3);
        assert!(result.models.is_empty());
        assert_eq!(platform.created(ResourceKind::Model).len(), 3);
        assert!(platform.live(ResourceKind::Model).is_empty());
        assert_eq!(platform.live(ResourceKind::Evaluation).len(), 3);

        for (index, evaluation) in result.evaluations.iter().enumerate() {
            let args = platform.args(evaluation).unwrap();
            assert_eq!(args["dataset"], json!(pairs[index].holdout));
            assert_eq!(
                args["name"],
                json!(format!("Evaluation tested with subset {index} of diabetes"))
            );
        }
    }

    #[tokio::test]
    async fn models_train_on_the_complement_with_projected_options() {
        let platform = InMemoryPlatform::new();
        let (validator, pairs) = setup(&platform, 4.0).await;

        let request = CrossValidationRequest {
            objective: "000001".to_string(),
            dataset_name: "diabetes".to_string(),
            model_options: json!({"number_of_models": 5, "unknown": 1})
                .as_object()
                .cloned()
                .unwrap(),
            input_fields: Some(vec!["000000".to_string()]),
            delete_models: false,
            ..Default::default()
        };
        let result = validator.cross_validate(&pairs, &request).await.unwrap();

        assert_eq!(result.models.len(), 4);
        for (pair, model) in pairs.iter().zip(&result.models) {
            assert_eq!(model.kind(), ResourceKind::Ensemble);
            let args = platform.args(model).unwrap();
            assert_eq!(args["datasets"], json!(pair.training));
            assert_eq!(args["number_of_models"], json!(5));
            assert_eq!(args["input_fields"], json!(["000000"]));
            assert!(!args.contains_key("unknown"));
        }
    }

    #[tokio::test]
    async fn failed_evaluations_abort_without_partial_result() {
        let platform = InMemoryPlatform::new();
        let (validator, pairs) = setup(&platform, 3.0).await;
        platform.fail_next_creates(ResourceKind::Evaluation, 2);

        let request = CrossValidationRequest {
            objective: "diabetes".to_string(),
            dataset_name: "diabetes".to_string(),
            ..Default::default()
        };
        assert!(validator.cross_validate(&pairs, &request).await.is_err());
        assert_eq!(platform.created(ResourceKind::Model).len(), 3);
        assert!(platform.live(ResourceKind::Model).is_empty());
        assert!(platform.live(ResourceKind::Evaluation).is_empty());
    }

    #[tokio::test]
    async fn retained_models_are_deleted_when_scoring_fails() {
        let platform = InMemoryPlatform::new();
        let (validator, pairs) = setup(&platform, 3.0).await;
        platform.mark_kind_faulty(ResourceKind::Evaluation);

        let request = CrossValidationRequest {
            objective: "diabetes".to_string(),
            dataset_name: "diabetes".to_string(),
            delete_models: false,
            ..Default::default()
        };
        let err = validator.cross_validate(&pairs, &request).await.unwrap_err();

        assert!(matches!(err, CrossfoldError::Platform(_)));
        assert!(platform.live(ResourceKind::Model).is_empty());
        assert!(platform.live(ResourceKind::Evaluation).is_empty());
        assert_eq!(platform.live(ResourceKind::Dataset).len(), 4);
    }
}
