//! Input validation
//!
//! Every check here runs before any remote resource is created. Each
//! rejection carries a stable code so callers can surface it verbatim.

use crossfold_platform::{DatasetDocument, FieldId, Optype, ResourceId, ResourceIdError, ResourceKind};
use thiserror::Error;

/// Largest accepted fold count.
pub const MAX_FOLDS: u64 = 1_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{name}: {value:?} is not a resource id")]
    NotAResourceId { name: String, value: String },

    #[error("{name}: expected a {expected} id, got {value}")]
    WrongResourceType {
        name: String,
        expected: String,
        value: String,
    },

    #[error("{name}: {value} is not an integer")]
    NotAnInteger { name: String, value: f64 },

    #[error("{name}: {value} is below the minimum {min}")]
    BelowMinimum { name: String, value: f64, min: f64 },

    #[error("{name}: {value} is above the maximum {max}")]
    AboveMaximum { name: String, value: f64, max: f64 },

    #[error("objective field {field:?} cannot be selected: {reason}")]
    ObjectiveFieldNotSelectable { field: String, reason: String },

    #[error("{name}: field {field:?} is not in the dataset")]
    UnknownField { name: String, field: String },

    #[error("dataset {dataset} has no rows")]
    EmptyDataset { dataset: String },

    #[error("cannot split {rows} rows into {folds} folds")]
    TooManyFolds { folds: u64, rows: u64 },

    #[error("objective field {field:?} is {optype:?}, a categorical field is required")]
    ObjectiveNotCategorical { field: String, optype: Optype },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::NotAResourceId { .. } => "not-a-resource-id",
            ValidationError::WrongResourceType { .. } => "wrong-resource-type",
            ValidationError::NotAnInteger { .. } => "not-an-integer",
            ValidationError::BelowMinimum { .. } => "below-minimum",
            ValidationError::AboveMaximum { .. } => "above-maximum",
            ValidationError::ObjectiveFieldNotSelectable { .. } => "objective-field-not-selectable",
            ValidationError::UnknownField { .. } => "unknown-field",
            ValidationError::EmptyDataset { .. } => "empty-dataset",
            ValidationError::TooManyFolds { .. } => "too-many-folds",
            ValidationError::ObjectiveNotCategorical { .. } => "objective-not-categorical",
        }
    }
}

/// Parse `value` as an id of `kind`.
pub fn resource_id(name: &str, value: &str, kind: ResourceKind) -> Result<ResourceId, ValidationError> {
    ResourceId::parse_kind(value.trim(), kind).map_err(|err| match err {
        ResourceIdError::NotAResourceId(value) => ValidationError::NotAResourceId {
            name: name.to_string(),
            value,
        },
        ResourceIdError::WrongResourceType { expected, found } => {
            ValidationError::WrongResourceType {
                name: name.to_string(),
                expected,
                value: found,
            }
        }
    })
}

/// Require `value` to be a whole number within `[min, max]`.
pub fn integer(name: &str, value: f64, min: u64, max: Option<u64>) -> Result<u64, ValidationError> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(ValidationError::NotAnInteger {
            name: name.to_string(),
            value,
        });
    }
    number(name, value, min as f64, max.map(|max| max as f64))?;
    Ok(value as u64)
}

/// Require `value` to be within `[min, max]`.
pub fn number(name: &str, value: f64, min: f64, max: Option<f64>) -> Result<f64, ValidationError> {
    if value.is_nan() || value < min {
        return Err(ValidationError::BelowMinimum {
            name: name.to_string(),
            value,
            min,
        });
    }
    if let Some(max) = max {
        if value > max {
            return Err(ValidationError::AboveMaximum {
                name: name.to_string(),
                value,
                max,
            });
        }
    }
    Ok(value)
}

/// A sampling rate in `(0, 1]`.
pub fn rate(name: &str, value: f64) -> Result<f64, ValidationError> {
    number(name, value, 0.0, Some(1.0))?;
    if value == 0.0 {
        return Err(ValidationError::BelowMinimum {
            name: name.to_string(),
            value,
            min: f64::MIN_POSITIVE,
        });
    }
    Ok(value)
}

/// Fold count accepted for a dataset with `rows` rows.
pub fn fold_count(value: f64, rows: Option<u64>) -> Result<u64, ValidationError> {
    let folds = integer("k_folds", value, 2, Some(MAX_FOLDS))?;
    if let Some(rows) = rows {
        if folds > rows {
            return Err(ValidationError::TooManyFolds { folds, rows });
        }
    }
    Ok(folds)
}

/// Reject datasets no fold can be cut from.
pub fn non_empty(dataset: &DatasetDocument) -> Result<(), ValidationError> {
    if dataset.rows == 0 {
        return Err(ValidationError::EmptyDataset {
            dataset: dataset.resource.to_string(),
        });
    }
    Ok(())
}

/// Resolve the objective field: an empty `requested` means the dataset's
/// default objective. The field must be preferred and categorical.
pub fn objective_field(dataset: &DatasetDocument, requested: &str) -> Result<FieldId, ValidationError> {
    let requested = requested.trim();
    let field_id = if requested.is_empty() {
        dataset
            .default_objective()
            .cloned()
            .ok_or_else(|| ValidationError::ObjectiveFieldNotSelectable {
                field: String::new(),
                reason: "the dataset has no default objective field".to_string(),
            })?
    } else {
        requested.to_string()
    };

    let field = dataset
        .field(&field_id)
        .ok_or_else(|| ValidationError::ObjectiveFieldNotSelectable {
            field: field_id.clone(),
            reason: "no such field".to_string(),
        })?;
    if !field.preferred {
        return Err(ValidationError::ObjectiveFieldNotSelectable {
            field: field_id,
            reason: "the field is not preferred".to_string(),
        });
    }
    if field.optype != Optype::Categorical {
        return Err(ValidationError::ObjectiveNotCategorical {
            field: field_id,
            optype: field.optype,
        });
    }
    Ok(field_id)
}

/// Require `field` to exist in `dataset`.
pub fn known_field(name: &str, dataset: &DatasetDocument, field: &str) -> Result<FieldId, ValidationError> {
    if dataset.field(field).is_some() {
        Ok(field.to_string())
    } else {
        Err(ValidationError::UnknownField {
            name: name.to_string(),
            field: field.to_string(),
        })
    }
}
