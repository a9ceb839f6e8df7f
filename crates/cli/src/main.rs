//! Crossfold command line interface
//!
//! Runs k-fold cross-validations and best-first feature selections against a
//! remote modeling platform and prints the outcome as JSON.

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use crossfold_engine::{
    plan_best_first, plan_cross_validation, run_best_first, run_cross_validation, CrossValidationConfig,
    CrossfoldError, FeatureSelectionConfig, ModelFamily, Settings,
};
use crossfold_platform::{HttpPlatform, HttpPlatformConfig, ModelingPlatform};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "crossfold")]
#[command(about = "K-fold cross-validation and best-first feature selection", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Platform base URL (overrides CROSSFOLD_URL)
    #[arg(long)]
    url: Option<String>,

    /// Platform username (overrides CROSSFOLD_USERNAME)
    #[arg(long)]
    username: Option<String>,

    /// Platform API key (overrides CROSSFOLD_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Validate the inputs and print the plan without contacting the platform
    #[arg(long)]
    dry_run: bool,

    /// More output: -v for debug, -vv for trace
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cross-validate a model on a dataset
    CrossValidate(CrossValidateArgs),
    /// Select the best input fields with a greedy best-first search
    BestFirst(BestFirstArgs),
}

#[derive(Args)]
struct CrossValidateArgs {
    /// Dataset id, e.g. dataset/5af59f9cc7736e6b33005697
    #[arg(long)]
    dataset: Option<String>,
    /// Number of folds
    #[arg(long, short)]
    k_folds: Option<f64>,
    /// Objective field id; the dataset default when omitted
    #[arg(long)]
    objective: Option<String>,
    /// Model family: tree or logistic
    #[arg(long, value_parser = parse_family)]
    family: Option<ModelFamily>,
    /// Models per ensemble
    #[arg(long)]
    number_of_models: Option<f64>,
    /// Boosting iterations (default 10)
    #[arg(long)]
    boosting_iterations: Option<u64>,
    /// Train single models instead of boosted ensembles
    #[arg(long, conflicts_with = "boosting_iterations")]
    no_boosting: bool,
    #[arg(long)]
    sample_rate: Option<f64>,
    #[arg(long)]
    seed: Option<String>,
    #[arg(long)]
    randomize: bool,
    #[arg(long)]
    replacement: bool,
    #[arg(long)]
    weight_field: Option<String>,
    /// Keep models and fold partitions
    #[arg(long)]
    keep_intermediate: bool,
}

impl CrossValidateArgs {
    fn apply(self, config: &mut CrossValidationConfig) {
        if let Some(dataset) = self.dataset {
            config.dataset_id = dataset;
        }
        if let Some(k) = self.k_folds {
            config.k_folds = k;
        }
        if let Some(objective) = self.objective {
            config.objective_id = objective;
        }
        if let Some(family) = self.family {
            config.family = family;
        }
        if let Some(models) = self.number_of_models {
            config.number_of_models = models;
        }
        if let Some(iterations) = self.boosting_iterations {
            config.boosting.insert("iterations".to_string(), json!(iterations));
        }
        if self.no_boosting {
            config.boosting.clear();
        }
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(field) = self.weight_field {
            config.weight_field = field;
        }
        config.randomize |= self.randomize;
        config.replacement |= self.replacement;
        if self.keep_intermediate {
            config.delete_intermediate = false;
        }
    }
}

#[derive(Args)]
struct BestFirstArgs {
    /// Dataset id, e.g. dataset/5af59f9cc7736e6b33005697
    #[arg(long)]
    dataset: Option<String>,
    /// Objective field id; the dataset default when omitted
    #[arg(long)]
    objective: Option<String>,
    /// Number of folds per cross-validation
    #[arg(long, short)]
    k_folds: Option<f64>,
    /// Number of features to select
    #[arg(long)]
    max_features: Option<f64>,
    /// Minimum improvement per iteration, in percent
    #[arg(long)]
    early_stop_performance: Option<f64>,
    /// Iterations below that improvement before stopping
    #[arg(long)]
    max_low_perf_iterations: Option<f64>,
    /// Field ids selected from the start, comma separated
    #[arg(long, value_delimiter = ',')]
    pre_selected: Vec<String>,
    /// Model family: tree or logistic
    #[arg(long, value_parser = parse_family)]
    family: Option<ModelFamily>,
    /// Keep per-candidate models and evaluations
    #[arg(long)]
    keep_intermediate: bool,
}

impl BestFirstArgs {
    fn apply(self, config: &mut FeatureSelectionConfig) {
        if let Some(dataset) = self.dataset {
            config.dataset_id = dataset;
        }
        if let Some(objective) = self.objective {
            config.objective_id = objective;
        }
        if let Some(k) = self.k_folds {
            config.k_folds = k;
        }
        if let Some(max) = self.max_features {
            config.max_features = max;
        }
        if let Some(threshold) = self.early_stop_performance {
            config.early_stop_performance = threshold;
        }
        if let Some(max_bad) = self.max_low_perf_iterations {
            config.max_low_perf_iterations = max_bad;
        }
        if !self.pre_selected.is_empty() {
            config.pre_selected = self.pre_selected;
        }
        if let Some(family) = self.family {
            config.family = family;
        }
        if self.keep_intermediate {
            config.delete_intermediate = false;
        }
    }
}

fn parse_family(value: &str) -> Result<ModelFamily, String> {
    serde_json::from_value(Value::String(value.to_lowercase()))
        .map_err(|_| format!("unknown model family {value:?}, expected tree or logistic"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => Settings::default(),
    };
    settings.apply_env_overrides();
    if let Some(url) = cli.url {
        settings.platform.url = url;
    }
    if let Some(username) = cli.username {
        settings.platform.username = username;
    }
    if let Some(api_key) = cli.api_key {
        settings.platform.api_key = api_key;
    }

    init_logging(&settings.logging.level, cli.verbose);
    debug!("platform at {}", settings.platform.url);

    match cli.command {
        Commands::CrossValidate(args) => {
            let mut config = settings.cross_validation.clone();
            args.apply(&mut config);
            handle_cross_validate(&settings.platform, &config, cli.dry_run).await
        }
        Commands::BestFirst(args) => {
            let mut config = settings.feature_selection.clone();
            args.apply(&mut config);
            handle_best_first(&settings.platform, &config, cli.dry_run).await
        }
    }
}

fn init_logging(default_level: &str, verbose: u8) {
    let level = match verbose {
        0 => default_level,
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn connect(config: &HttpPlatformConfig) -> Result<Arc<dyn ModelingPlatform>> {
    if config.username.is_empty() || config.api_key.is_empty() {
        anyhow::bail!(
            "platform credentials missing: set CROSSFOLD_USERNAME and CROSSFOLD_API_KEY or the [platform] section"
        );
    }
    let platform = HttpPlatform::new(config.clone()).context("failed to build the platform client")?;
    Ok(Arc::new(platform))
}

/// Surface validation codes next to the message.
fn failure(err: CrossfoldError) -> anyhow::Error {
    match err.validation_code() {
        Some(code) => anyhow::anyhow!("{err} [{code}]"),
        None => err.into(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn handle_cross_validate(
    platform: &HttpPlatformConfig,
    config: &CrossValidationConfig,
    dry_run: bool,
) -> Result<()> {
    if dry_run {
        let plan = plan_cross_validation(config).map_err(failure)?;
        info!("dry run: nothing was created");
        return print_json(&plan);
    }

    let outcome = run_cross_validation(connect(platform)?, config)
        .await
        .map_err(failure)
        .context("cross-validation failed")?;
    print_json(&outcome)
}

async fn handle_best_first(
    platform: &HttpPlatformConfig,
    config: &FeatureSelectionConfig,
    dry_run: bool,
) -> Result<()> {
    if dry_run {
        let plan = plan_best_first(config).map_err(failure)?;
        info!("dry run: nothing was created");
        return print_json(&plan);
    }

    let outcome = run_best_first(connect(platform)?, config)
        .await
        .map_err(failure)
        .context("best-first feature selection failed")?;
    print_json(&outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use crossfold_platform::ResourceKind;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cross_validate_flags_override_the_file() {
        let cli = Cli::try_parse_from([
            "crossfold",
            "--dry-run",
            "cross-validate",
            "--dataset",
            "dataset/5af59f9cc7736e6b33005697",
            "-k",
            "10",
            "--boosting-iterations",
            "20",
            "--family",
            "Tree",
            "--keep-intermediate",
        ])
        .unwrap();
        assert!(cli.dry_run);

        let mut config = CrossValidationConfig {
            seed: "from file".to_string(),
            ..Default::default()
        };
        match cli.command {
            Commands::CrossValidate(args) => args.apply(&mut config),
            Commands::BestFirst(_) => panic!("wrong subcommand"),
        }

        assert_eq!(config.k_folds, 10.0);
        assert_eq!(config.boosting["iterations"], json!(20));
        assert_eq!(config.seed, "from file");
        assert!(!config.delete_intermediate);
        assert_eq!(plan_cross_validation(&config).unwrap().k_folds, 10);
    }

    #[test]
    fn no_boosting_plans_single_models() {
        let cli = Cli::try_parse_from([
            "crossfold",
            "cross-validate",
            "--dataset",
            "dataset/5af59f9cc7736e6b33005697",
            "--no-boosting",
        ])
        .unwrap();

        let mut config = CrossValidationConfig::default();
        match cli.command {
            Commands::CrossValidate(args) => args.apply(&mut config),
            Commands::BestFirst(_) => panic!("wrong subcommand"),
        }
        assert!(config.boosting.is_empty());
        assert_eq!(plan_cross_validation(&config).unwrap().model_kind, ResourceKind::Model);

        assert!(Cli::try_parse_from([
            "crossfold",
            "cross-validate",
            "--no-boosting",
            "--boosting-iterations",
            "5",
        ])
        .is_err());
    }

    #[test]
    fn best_first_splits_pre_selected_fields() {
        let cli = Cli::try_parse_from([
            "crossfold",
            "-vv",
            "best-first",
            "--pre-selected",
            "000001,000004",
            "--max-features",
            "4",
            "--family",
            "logistic",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);

        let mut config = FeatureSelectionConfig::default();
        match cli.command {
            Commands::BestFirst(args) => args.apply(&mut config),
            Commands::CrossValidate(_) => panic!("wrong subcommand"),
        }
        assert_eq!(config.pre_selected, vec!["000001", "000004"]);
        assert_eq!(config.max_features, 4.0);
        assert_eq!(config.family, ModelFamily::Logistic);
    }

    #[test]
    fn unknown_family_is_rejected() {
        assert!(parse_family("forest").is_err());
        assert!(Cli::try_parse_from(["crossfold", "best-first", "--family", "svm"]).is_err());
    }

    #[test]
    fn missing_credentials_are_reported() {
        let err = connect(&HttpPlatformConfig::default()).err().map(|err| err.to_string());
        assert!(err.is_some_and(|message| message.contains("CROSSFOLD_USERNAME")));
    }
}
