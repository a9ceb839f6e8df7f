//! Configuration records
//!
//! The script-level inputs of both entry points are plain serde records so
//! they can come from a TOML file, from CLI flags, or be built in code.
//! Numeric inputs are kept as `f64` until validation so that a fractional
//! fold count is reported as `not-an-integer` instead of a parse failure.

use crossfold_platform::HttpPlatformConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::info;

use crate::errors::Result;
use crate::options::ModelFamily;

/// Environment variable overriding the platform URL.
pub const ENV_URL: &str = "CROSSFOLD_URL";
/// Environment variable overriding the platform username.
pub const ENV_USERNAME: &str = "CROSSFOLD_USERNAME";
/// Environment variable overriding the platform API key.
pub const ENV_API_KEY: &str = "CROSSFOLD_API_KEY";

/// Inputs of the cross-validation entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossValidationConfig {
    pub dataset_id: String,
    pub k_folds: f64,
    /// Empty selects the dataset's default objective
    pub objective_id: String,
    pub family: ModelFamily,
    pub number_of_models: f64,
    /// Boosting parameters, `{"iterations": 10}` unless set; an empty
    /// object turns boosting off and trains single models
    pub boosting: Map<String, Value>,
    /// Extra options forwarded to single models
    pub model_options: Map<String, Value>,
    /// Extra options forwarded to ensembles
    pub ensemble_options: Map<String, Value>,
    pub evaluation_options: Map<String, Value>,
    /// Empty means unweighted
    pub weight_field: String,
    /// `(class, weight)` pairs
    pub objective_weights: Vec<(String, f64)>,
    pub node_threshold: Option<f64>,
    pub sample_rate: f64,
    pub replacement: bool,
    pub randomize: bool,
    /// Empty means unseeded sampling
    pub seed: String,
    pub delete_intermediate: bool,
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self {
            dataset_id: String::new(),
            k_folds: 5.0,
            objective_id: String::new(),
            family: ModelFamily::Tree,
            number_of_models: 1.0,
            boosting: default_boosting(),
            model_options: Map::new(),
            ensemble_options: Map::new(),
            evaluation_options: Map::new(),
            weight_field: String::new(),
            objective_weights: Vec::new(),
            node_threshold: None,
            sample_rate: 1.0,
            replacement: false,
            randomize: false,
            seed: String::new(),
            delete_intermediate: true,
        }
    }
}

fn default_boosting() -> Map<String, Value> {
    let mut boosting = Map::new();
    boosting.insert("iterations".to_string(), json!(10));
    boosting
}

impl CrossValidationConfig {
    /// Flat option map assembled from every model-related input.
    ///
    /// Later sources win: extra model options, then ensemble options, then
    /// the dedicated inputs. Projection decides what is forwarded.
    pub fn model_options(&self) -> Map<String, Value> {
        let mut options = self.model_options.clone();
        options.extend(self.ensemble_options.clone());

        if self.number_of_models != 1.0 {
            options.insert("number_of_models".to_string(), json!(self.number_of_models));
        }
        if !self.boosting.is_empty() {
            options.insert("boosting".to_string(), Value::Object(self.boosting.clone()));
        }
        if !self.weight_field.is_empty() {
            options.insert("weight_field".to_string(), json!(self.weight_field));
        }
        if !self.objective_weights.is_empty() {
            options.insert("objective_weights".to_string(), json!(self.objective_weights));
        }
        if let Some(threshold) = self.node_threshold {
            options.insert("node_threshold".to_string(), json!(threshold));
        }
        if self.sample_rate != 1.0 {
            options.insert("sample_rate".to_string(), json!(self.sample_rate));
        }
        if self.replacement {
            options.insert("replacement".to_string(), json!(true));
        }
        if self.randomize {
            options.insert("randomize".to_string(), json!(true));
        }
        if !self.seed.is_empty() {
            options.insert("seed".to_string(), json!(self.seed));
        }
        options
    }
}

/// Inputs of the best-first feature selection entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSelectionConfig {
    pub dataset_id: String,
    /// Empty selects the dataset's default objective
    pub objective_id: String,
    pub k_folds: f64,
    /// Number of features to select, pre-selected ones included
    pub max_features: f64,
    /// Minimum relative improvement per iteration, in percent
    pub early_stop_performance: f64,
    /// Consecutive iterations below that improvement before stopping
    pub max_low_perf_iterations: f64,
    /// Field ids that start out selected
    pub pre_selected: Vec<String>,
    pub family: ModelFamily,
    pub model_options: Map<String, Value>,
    pub evaluation_options: Map<String, Value>,
    pub delete_intermediate: bool,
}

impl Default for FeatureSelectionConfig {
    fn default() -> Self {
        Self {
            dataset_id: String::new(),
            objective_id: String::new(),
            k_folds: 5.0,
            max_features: 3.0,
            early_stop_performance: 1.0,
            max_low_perf_iterations: 4.0,
            pre_selected: Vec::new(),
            family: ModelFamily::Tree,
            model_options: Map::new(),
            evaluation_options: Map::new(),
            delete_intermediate: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Everything a `crossfold` run reads from its configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub platform: HttpPlatformConfig,
    pub logging: LoggingConfig,
    pub cross_validation: CrossValidationConfig,
    pub feature_selection: FeatureSelectionConfig,
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Override platform credentials with whatever `lookup` provides.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_URL) {
            self.platform.url = url;
        }
        if let Some(username) = lookup(ENV_USERNAME) {
            self.platform.username = username;
        }
        if let Some(api_key) = lookup(ENV_API_KEY) {
            self.platform.api_key = api_key;
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CrossfoldError;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[platform]
url = "https://platform.example.com/andromeda"
username = "alice"

[logging]
level = "debug"

[cross_validation]
dataset_id = "dataset/5af59f9cc7736e6b33005697"
k_folds = 10
seed = "crossfold"
objective_weights = [["yes", 3.0], ["no", 1.0]]

[cross_validation.boosting]
iterations = 10
learning_rate = 0.1

[feature_selection]
max_features = 5
pre_selected = ["000003"]
"#;

    #[test]
    fn parses_a_full_file() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();

        assert_eq!(settings.platform.username, "alice");
        assert_eq!(settings.platform.poll_interval_ms, 1_000);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.cross_validation.k_folds, 10.0);
        assert_eq!(settings.cross_validation.boosting["iterations"], json!(10));
        assert!(settings.cross_validation.delete_intermediate);
        assert_eq!(settings.feature_selection.max_features, 5.0);
        assert_eq!(settings.feature_selection.k_folds, 5.0);
        assert_eq!(settings.feature_selection.pre_selected, vec!["000003"]);
    }

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Settings::from_toml_str("").unwrap(), Settings::default());
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = Settings::from_toml_str("[cross_validation\nk_folds = ").unwrap_err();
        assert!(matches!(err, CrossfoldError::Config(_)));
    }

    #[test]
    fn loads_from_file() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut file = NamedTempFile::new()?;
        write!(file, "{SAMPLE}")?;
        file.flush()?;

        let settings = Settings::from_file(file.path())?;
        assert_eq!(settings.cross_validation.seed, "crossfold");
        Ok(())
    }

    #[test]
    fn overrides_replace_credentials() {
        let mut settings = Settings::from_toml_str(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = [(ENV_API_KEY, "secret"), (ENV_URL, "http://localhost:9000")]
            .into_iter()
            .collect();
        settings.apply_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(settings.platform.username, "alice");
        assert_eq!(settings.platform.api_key, "secret");
        assert_eq!(settings.platform.url, "http://localhost:9000");
    }

    #[test]
    fn model_options_collect_dedicated_inputs() {
        let config = CrossValidationConfig {
            number_of_models: 10.0,
            randomize: true,
            seed: "s".to_string(),
            sample_rate: 0.8,
            weight_field: "000002".to_string(),
            model_options: json!({"missing_splits": true}).as_object().cloned().unwrap(),
            ..CrossValidationConfig::default()
        };
        let options = config.model_options();

        assert_eq!(options["number_of_models"], json!(10.0));
        assert_eq!(options["randomize"], json!(true));
        assert_eq!(options["seed"], json!("s"));
        assert_eq!(options["sample_rate"], json!(0.8));
        assert_eq!(options["weight_field"], json!("000002"));
        assert_eq!(options["missing_splits"], json!(true));
        assert_eq!(options["boosting"], json!({"iterations": 10}));
        assert!(!options.contains_key("replacement"));
    }

    #[test]
    fn empty_boosting_table_turns_boosting_off() {
        let settings = Settings::from_toml_str(
            r#"
[cross_validation]
k_folds = 3

[cross_validation.boosting]
"#,
        )
        .unwrap();
        assert!(settings.cross_validation.boosting.is_empty());
        assert!(!settings.cross_validation.model_options().contains_key("boosting"));

        let defaults = Settings::from_toml_str("[cross_validation]\nk_folds = 3\n").unwrap();
        assert_eq!(defaults.cross_validation.boosting["iterations"], json!(10));
    }
}
