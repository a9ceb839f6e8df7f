//! Crossfold remote platform layer
//!
//! Everything the control algorithms need to know about the remote modeling
//! platform lives here:
//! - typed resource identifiers (`dataset/…`, `model/…`, `evaluation/…`)
//! - the [`ModelingPlatform`] trait (create / fetch / delete / wait)
//! - typed views over the JSON documents the platform returns
//! - an HTTP client for a REST platform and an in-memory stub

pub mod api;
pub mod documents;
pub mod errors;
pub mod http;
pub mod stub;
pub mod types;

pub use api::ModelingPlatform;
pub use documents::{
    ensemble_importance, performance_score, status_code, DatasetDocument, FieldId, FieldInfo,
    ObjectiveField, Optype, AVERAGE_PHI_PATH,
};
pub use errors::{PlatformError, ResourceIdError};
pub use http::{HttpPlatform, HttpPlatformConfig};
pub use stub::{EvaluationContext, InMemoryPlatform};
pub use types::{ResourceId, ResourceKind};

/// Platform layer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
