//! Best-first feature selection
//!
//! Greedy search over feature subsets. Every iteration cross-validates the
//! current selection extended by each remaining candidate, keeps the best
//! one and tracks how many consecutive iterations failed to improve on the
//! last good score by the configured percentage. The search stops when the
//! target size is reached, the candidates run out, or the losing streak hits
//! its limit; in the last case the features picked during the streak are
//! dropped from the result.
//!
//! [`SelectionState`] is the pure state machine; [`BestFirstSelector`]
//! drives it against the platform.

use crossfold_platform::{ensemble_importance, DatasetDocument, FieldId, ResourceId, ResourceKind};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::errors::{CrossfoldError, Result};
use crate::evaluator::{CrossValidationRequest, CrossValidationResult, CrossValidationScore, CrossValidator};
use crate::folds::{create_k_folds, pair_k_folds, FoldPair};
use crate::lifecycle::ResourceLifecycle;
use crate::options::ModelFamily;

/// Trees in the forest used to rank features.
pub const IMPORTANCE_FOREST_SIZE: u64 = 10;

/// A dataset field as seen by the search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FieldId,
    pub name: String,
}

impl Feature {
    pub fn new(id: impl Into<FieldId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A feature that has not been selected yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Potential {
    pub feature: Feature,
    pub importance: f64,
}

/// Outcome of one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Feature added in this iteration
    pub added: String,
    /// Selected feature names after the iteration, oldest first
    pub features: Vec<String>,
    #[serde(flatten)]
    pub score: CrossValidationScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    TargetReached,
    CandidatesExhausted,
    EarlyStop,
}

/// Termination parameters of the search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchLimits {
    /// Stop once this many features are selected
    pub target_count: usize,
    /// Consecutive bad iterations tolerated
    pub max_bad: usize,
    /// Minimum relative improvement, in percent
    pub early_stop_threshold: f64,
}

/// Final answer of a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SelectionReport {
    /// Selected feature names, oldest first
    pub selected_fields: Vec<String>,
    pub selected_ids: Vec<FieldId>,
    /// Per-iteration records, most recent first
    pub iterations_info: Vec<IterationRecord>,
    pub stop_reason: StopReason,
}

/// Index of the first maximum.
pub fn select_winner(scores: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, &score) in scores.iter().enumerate() {
        match best {
            Some((_, current)) if score <= current => {}
            _ => best = Some((index, score)),
        }
    }
    best.map(|(index, _)| index)
}

/// `(winner / reference) * 100 - 100`, saturated to ±∞ when the ratio is
/// undefined.
pub fn relative_improvement(winner: f64, reference: f64) -> f64 {
    let improvement = (winner / reference) * 100.0 - 100.0;
    if improvement.is_finite() {
        improvement
    } else if winner > reference {
        f64::INFINITY
    } else {
        f64::NEG_INFINITY
    }
}

/// Mutable state of the search.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionState {
    /// Most recent first
    pub selected: Vec<Feature>,
    pub potentials: Vec<Potential>,
    /// Most recent first
    pub queue: Vec<IterationRecord>,
    pub bad_count: usize,
}

impl SelectionState {
    /// `pre_selected` is given oldest first.
    pub fn new(pre_selected: Vec<Feature>, potentials: Vec<Potential>) -> Self {
        let mut selected = pre_selected;
        selected.reverse();
        Self {
            selected,
            potentials,
            queue: Vec::new(),
            bad_count: 0,
        }
    }

    pub fn stop_reason(&self, limits: &SearchLimits) -> Option<StopReason> {
        if self.bad_count == limits.max_bad {
            Some(StopReason::EarlyStop)
        } else if self.selected.len() >= limits.target_count {
            Some(StopReason::TargetReached)
        } else if self.potentials.is_empty() {
            Some(StopReason::CandidatesExhausted)
        } else {
            None
        }
    }

    /// One feature subset per potential: the potential, then the selection.
    pub fn candidates(&self) -> Vec<Vec<FieldId>> {
        self.potentials
            .iter()
            .map(|potential| {
                std::iter::once(&potential.feature)
                    .chain(&self.selected)
                    .map(|feature| feature.id.clone())
                    .collect()
            })
            .collect()
    }

    /// Score of the last iteration that was not bad.
    pub fn reference_score(&self) -> Option<f64> {
        self.queue
            .get(self.bad_count)
            .map(|record| record.score.phi_stdev)
    }

    /// Apply the scores of [`Self::candidates`] and return the winner index.
    pub fn advance(&mut self, scores: &[CrossValidationScore], threshold: f64) -> Result<usize> {
        if scores.len() != self.potentials.len() {
            return Err(CrossfoldError::Aggregation(format!(
                "{} scores for {} candidates",
                scores.len(),
                self.potentials.len()
            )));
        }
        let ranking: Vec<f64> = scores.iter().map(|score| score.phi_stdev).collect();
        let winner = select_winner(&ranking)
            .ok_or_else(|| CrossfoldError::Aggregation("no candidates to choose from".to_string()))?;
        let score = scores[winner];

        match self.reference_score() {
            Some(reference) if relative_improvement(score.phi_stdev, reference) < threshold => {
                self.bad_count += 1;
            }
            _ => self.bad_count = 0,
        }

        let chosen = self.potentials.remove(winner).feature;
        self.selected.insert(0, chosen.clone());
        self.queue.insert(
            0,
            IterationRecord {
                added: chosen.name,
                features: self.selected.iter().rev().map(|f| f.name.clone()).collect(),
                score,
            },
        );
        Ok(winner)
    }

    /// Build the report; an early stop discards the losing streak.
    pub fn finish(self, reason: StopReason) -> SelectionReport {
        let mut selected = self.selected;
        if reason == StopReason::EarlyStop {
            let streak = self.bad_count.min(selected.len());
            selected.drain(..streak);
        }
        selected.reverse();

        SelectionReport {
            selected_fields: selected.iter().map(|f| f.name.clone()).collect(),
            selected_ids: selected.into_iter().map(|f| f.id).collect(),
            iterations_info: self.queue,
            stop_reason: reason,
        }
    }
}

/// Settings of one best-first search.
#[derive(Debug, Clone)]
pub struct SelectionSettings {
    pub k_folds: u64,
    pub limits: SearchLimits,
    pub family: ModelFamily,
    pub model_options: Map<String, Value>,
    pub evaluation_options: Map<String, Value>,
    /// Field ids selected before the search starts, oldest first
    pub pre_selected: Vec<FieldId>,
    pub delete_intermediate: bool,
}

/// Drives [`SelectionState`] with cross-validations on the platform.
pub struct BestFirstSelector {
    validator: CrossValidator,
    settings: SelectionSettings,
}

impl BestFirstSelector {
    pub fn new(lifecycle: ResourceLifecycle, settings: SelectionSettings) -> Self {
        Self {
            validator: CrossValidator::new(lifecycle),
            settings,
        }
    }

    fn lifecycle(&self) -> &ResourceLifecycle {
        self.validator.lifecycle()
    }

    /// Non-objective preferred fields, most important first.
    pub async fn rank_features(&self, dataset: &DatasetDocument, objective: &FieldId) -> Result<Vec<Potential>> {
        let mut potentials: Vec<Potential> = dataset
            .input_candidates(objective)
            .filter(|field| !self.settings.pre_selected.contains(*field))
            .map(|field| Potential {
                feature: Feature::new(field.clone(), dataset.field_name(field).unwrap_or(field.as_str())),
                importance: 0.0,
            })
            .collect();
        if potentials.is_empty() {
            return Ok(potentials);
        }

        let mut args = json!({
            "dataset": dataset.resource,
            "objective_field": objective,
            "randomize": true,
            "number_of_models": IMPORTANCE_FOREST_SIZE,
            "name": format!("{} - feature importance", dataset.name),
        });
        if let Some(seed) = self.settings.model_options.get("seed") {
            args["seed"] = seed.clone();
        }
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let forest = self.lifecycle().safe_create(ResourceKind::Ensemble, &args).await?;
        let document = match self.lifecycle().wait_all(vec![forest.clone()]).await {
            Ok(_) => self.lifecycle().fetch(&forest).await.map_err(CrossfoldError::from),
            Err(err) => Err(err),
        };
        self.lifecycle().safe_delete(&forest).await;
        let importance = ensemble_importance(&document?)?;

        for potential in &mut potentials {
            potential.importance = importance.get(&potential.feature.id).copied().unwrap_or(0.0);
        }
        potentials.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        debug!(
            "feature ranking: {:?}",
            potentials.iter().map(|p| &p.feature.name).collect::<Vec<_>>()
        );
        Ok(potentials)
    }

    /// Run the whole search on `dataset` predicting `objective`.
    pub async fn run(&self, dataset: &DatasetDocument, objective: &FieldId) -> Result<SelectionReport> {
        let limits = self.settings.limits;
        let pre_selected = self
            .settings
            .pre_selected
            .iter()
            .map(|id| Feature::new(id.clone(), dataset.field_name(id).unwrap_or(id.as_str())))
            .collect::<Vec<_>>();
        if pre_selected.len() >= limits.target_count {
            info!("{} pre-selected features already meet the target", pre_selected.len());
            return Ok(SelectionState::new(pre_selected, Vec::new()).finish(StopReason::TargetReached));
        }

        let potentials = self.rank_features(dataset, objective).await?;
        let state = SelectionState::new(pre_selected, potentials);

        if let Some(reason) = state.stop_reason(&limits) {
            info!("nothing to search: {:?}", reason);
            return Ok(state.finish(reason));
        }

        let folds = create_k_folds(
            self.lifecycle(),
            &dataset.resource,
            &dataset.name,
            self.settings.k_folds as f64,
        )
        .await?;
        let outcome = self.search(dataset, objective, &pair_k_folds(&folds), state).await;

        let deleted = self.lifecycle().delete_all(&folds).await;
        debug!("deleted {}/{} fold partitions", deleted, folds.len());
        outcome
    }

    async fn search(
        &self,
        dataset: &DatasetDocument,
        objective: &FieldId,
        pairs: &[FoldPair],
        mut state: SelectionState,
    ) -> Result<SelectionReport> {
        let limits = self.settings.limits;
        let mut iteration = 0;

        loop {
            if let Some(reason) = state.stop_reason(&limits) {
                info!("search stopped after {} iterations: {:?}", iteration, reason);
                return Ok(state.finish(reason));
            }
            iteration += 1;

            let requests: Vec<_> = state
                .candidates()
                .into_iter()
                .map(|fields| CrossValidationRequest {
                    objective: objective.clone(),
                    dataset_name: dataset.name.clone(),
                    family: self.settings.family,
                    model_options: self.settings.model_options.clone(),
                    evaluation_options: self.settings.evaluation_options.clone(),
                    input_fields: Some(fields),
                    delete_models: self.settings.delete_intermediate,
                })
                .collect();
            debug!("iteration {}: {} candidates", iteration, requests.len());

            // every candidate runs to completion so that a failure leaves no
            // finished candidate's resources behind
            let outcomes = join_all(
                requests
                    .iter()
                    .map(|request| self.validator.cross_validate(pairs, request)),
            )
            .await;
            let results = self.collect_results(outcomes).await?;

            if self.settings.delete_intermediate {
                let evaluations: Vec<ResourceId> = results
                    .iter()
                    .flat_map(|result| result.evaluations.iter().cloned())
                    .collect();
                self.lifecycle().delete_all(&evaluations).await;
            }

            let scores: Vec<_> = results.iter().map(|result| result.score).collect();
            state.advance(&scores, limits.early_stop_threshold)?;

            if let Some(record) = state.queue.first() {
                info!(
                    "iteration {}: added {} (phi-stdev {:.4}, bad iterations {})",
                    iteration, record.added, record.score.phi_stdev, state.bad_count
                );
            }
        }
    }

    /// All results, or the first error once the finished candidates'
    /// evaluations and retained models are deleted.
    async fn collect_results(
        &self,
        outcomes: Vec<Result<CrossValidationResult>>,
    ) -> Result<Vec<CrossValidationResult>> {
        let mut results = Vec::with_capacity(outcomes.len());
        let mut failure = None;
        for outcome in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        let Some(err) = failure else {
            return Ok(results);
        };

        let leftovers: Vec<ResourceId> = results
            .into_iter()
            .flat_map(|result| result.evaluations.into_iter().chain(result.models))
            .collect();
        let deleted = self.lifecycle().delete_all(&leftovers).await;
        debug!("candidate failed, deleted {}/{} finished resources", deleted, leftovers.len());
        Err(err)
    }
}
