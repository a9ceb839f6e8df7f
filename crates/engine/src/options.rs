//! Option projection
//!
//! Callers hand over one flat option map; only the keys the target resource
//! accepts are forwarded. Unknown keys are dropped, never rejected.

use crossfold_platform::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Family of model the caller asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// Decision tree, or a bagged / boosted ensemble of them
    #[default]
    Tree,
    /// Regularized logistic regression
    Logistic,
}

/// Allow-list a map is projected onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionTarget {
    Model,
    Ensemble,
    Boosted,
    Logistic,
    Evaluation,
}

const MODEL_OPTIONS: &[&str] = &[
    "balance_objective",
    "missing_splits",
    "node_threshold",
    "objective_weights",
    "pruning",
    "random_candidates",
    "replacement",
    "sample_rate",
    "seed",
    "split_candidates",
    "weight_field",
];

const ENSEMBLE_OPTIONS: &[&str] = &[
    "balance_objective",
    "ensemble_sample",
    "missing_splits",
    "node_threshold",
    "number_of_models",
    "objective_weights",
    "pruning",
    "random_candidates",
    "randomize",
    "replacement",
    "sample_rate",
    "seed",
    "split_candidates",
    "weight_field",
];

const BOOSTED_OPTIONS: &[&str] = &[
    "boosting",
    "ensemble_sample",
    "missing_splits",
    "node_threshold",
    "objective_weights",
    "random_candidates",
    "randomize",
    "replacement",
    "sample_rate",
    "seed",
    "split_candidates",
    "weight_field",
];

const LOGISTIC_OPTIONS: &[&str] = &[
    "balance_fields",
    "balance_objective",
    "bias",
    "c",
    "default_numeric_value",
    "eps",
    "field_codings",
    "missing_numerics",
    "normalize",
    "objective_weights",
    "regularization",
    "replacement",
    "sample_rate",
    "seed",
    "weight_field",
];

const EVALUATION_OPTIONS: &[&str] = &[
    "combiner",
    "missing_strategy",
    "operating_kind",
    "operating_point",
    "out_of_bag",
    "range",
    "replacement",
    "sample_rate",
    "seed",
    "threshold",
];

impl OptionTarget {
    pub fn allowed_keys(&self) -> &'static [&'static str] {
        match self {
            OptionTarget::Model => MODEL_OPTIONS,
            OptionTarget::Ensemble => ENSEMBLE_OPTIONS,
            OptionTarget::Boosted => BOOSTED_OPTIONS,
            OptionTarget::Logistic => LOGISTIC_OPTIONS,
            OptionTarget::Evaluation => EVALUATION_OPTIONS,
        }
    }

    pub fn accepts(&self, key: &str) -> bool {
        self.allowed_keys().contains(&key)
    }

    /// Copy of `options` restricted to this target's keys, nulls removed.
    pub fn filter(&self, options: &Map<String, Value>) -> Map<String, Value> {
        options
            .iter()
            .filter(|(key, value)| {
                let keep = self.accepts(key) && !value.is_null();
                if !keep {
                    debug!("dropping option {} for {:?}", key, self);
                }
                keep
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Options ready to be forwarded to the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub kind: ResourceKind,
    pub target: OptionTarget,
    pub model_options: Map<String, Value>,
    pub evaluation_options: Map<String, Value>,
}

/// A non-empty `boosting` object.
pub fn has_boosting(options: &Map<String, Value>) -> bool {
    options
        .get("boosting")
        .and_then(Value::as_object)
        .is_some_and(|boosting| !boosting.is_empty())
}

fn number_of_models(options: &Map<String, Value>) -> f64 {
    options
        .get("number_of_models")
        .and_then(Value::as_f64)
        .unwrap_or(1.0)
}

/// Decide the resource kind and project both option maps.
pub fn project(
    family: ModelFamily,
    model_options: &Map<String, Value>,
    evaluation_options: &Map<String, Value>,
) -> Projection {
    let (kind, target) = match family {
        ModelFamily::Logistic => (ResourceKind::LogisticRegression, OptionTarget::Logistic),
        ModelFamily::Tree if has_boosting(model_options) => {
            (ResourceKind::Ensemble, OptionTarget::Boosted)
        }
        ModelFamily::Tree if number_of_models(model_options) > 1.0 => {
            (ResourceKind::Ensemble, OptionTarget::Ensemble)
        }
        ModelFamily::Tree => (ResourceKind::Model, OptionTarget::Model),
    };

    Projection {
        kind,
        target,
        model_options: target.filter(model_options),
        evaluation_options: OptionTarget::Evaluation.filter(evaluation_options),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn boosting_routes_to_boosted_ensembles() {
        let options = map(json!({
            "boosting": {"iterations": 10},
            "number_of_models": 20,
            "sample_rate": 0.8,
            "balance_objective": true,
        }));
        let projection = project(ModelFamily::Tree, &options, &Map::new());

        assert_eq!(projection.kind, ResourceKind::Ensemble);
        assert_eq!(projection.target, OptionTarget::Boosted);
        assert_eq!(projection.model_options["boosting"], json!({"iterations": 10}));
        assert_eq!(projection.model_options["sample_rate"], json!(0.8));
        assert!(!projection.model_options.contains_key("number_of_models"));
        assert!(!projection.model_options.contains_key("balance_objective"));
    }

    #[test]
    fn single_model_without_boosting_is_a_model() {
        let options = map(json!({"number_of_models": 1, "randomize": true, "seed": "abc"}));
        let projection = project(ModelFamily::Tree, &options, &Map::new());

        assert_eq!(projection.kind, ResourceKind::Model);
        assert_eq!(projection.target, OptionTarget::Model);
        assert_eq!(projection.model_options, map(json!({"seed": "abc"})));
    }

    #[test]
    fn empty_boosting_does_not_count() {
        let options = map(json!({"boosting": {}, "number_of_models": 10, "randomize": true}));
        let projection = project(ModelFamily::Tree, &options, &Map::new());

        assert_eq!(projection.kind, ResourceKind::Ensemble);
        assert_eq!(projection.target, OptionTarget::Ensemble);
        assert_eq!(
            projection.model_options,
            map(json!({"number_of_models": 10, "randomize": true}))
        );
    }

    #[test]
    fn logistic_family_uses_logistic_keys() {
        let options = map(json!({"c": 1.5, "regularization": "l2", "boosting": {"iterations": 3}}));
        let projection = project(ModelFamily::Logistic, &options, &Map::new());

        assert_eq!(projection.kind, ResourceKind::LogisticRegression);
        assert_eq!(
            projection.model_options,
            map(json!({"c": 1.5, "regularization": "l2"}))
        );
    }

    #[test]
    fn unknown_and_null_keys_are_dropped() {
        let evaluation = map(json!({
            "out_of_bag": true,
            "missing_strategy": null,
            "favourite_colour": "green",
        }));
        let projection = project(ModelFamily::Tree, &Map::new(), &evaluation);
        assert_eq!(projection.evaluation_options, map(json!({"out_of_bag": true})));
    }
}
