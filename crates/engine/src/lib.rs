//! Crossfold engine - k-fold cross-validation and best-first feature selection
//!
//! Decides what to train and evaluate on a remote modeling platform and how
//! to combine the results. No model is ever trained locally.

pub mod config;
pub mod errors;
pub mod evaluator;
pub mod folds;
pub mod lifecycle;
pub mod options;
pub mod scripts;
pub mod selector;
pub mod validation;

pub use config::{CrossValidationConfig, FeatureSelectionConfig, LoggingConfig, Settings};
pub use errors::{CrossfoldError, Result};
pub use evaluator::{aggregate, CrossValidationRequest, CrossValidationResult, CrossValidationScore, CrossValidator};
pub use folds::{create_k_folds, fold_membership, pair_k_folds, FoldPair, FOLD_FIELD};
pub use lifecycle::ResourceLifecycle;
pub use options::{project, ModelFamily, OptionTarget, Projection};
pub use scripts::{
    plan_best_first, plan_cross_validation, run_best_first, run_cross_validation, CrossValidationOutcome,
    CrossValidationPlan, SelectionOutcome, SelectionPlan,
};
pub use selector::{
    BestFirstSelector, Feature, IterationRecord, Potential, SearchLimits, SelectionReport, SelectionSettings,
    SelectionState, StopReason,
};
pub use validation::{ValidationError, MAX_FOLDS};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
