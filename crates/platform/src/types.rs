//! Resource identifiers and kinds

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ResourceIdError;

/// Length of the hexadecimal suffix of every resource id.
pub const RESOURCE_HASH_LEN: usize = 24;

/// Kinds of remote resources this system creates or reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Source,
    Dataset,
    Model,
    Ensemble,
    LogisticRegression,
    Evaluation,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Source,
        ResourceKind::Dataset,
        ResourceKind::Model,
        ResourceKind::Ensemble,
        ResourceKind::LogisticRegression,
        ResourceKind::Evaluation,
    ];

    /// Path segment / id prefix used by the platform.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Source => "source",
            ResourceKind::Dataset => "dataset",
            ResourceKind::Model => "model",
            ResourceKind::Ensemble => "ensemble",
            ResourceKind::LogisticRegression => "logisticregression",
            ResourceKind::Evaluation => "evaluation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Kinds that can be evaluated against a dataset.
    pub fn is_predictive(&self) -> bool {
        matches!(
            self,
            ResourceKind::Model | ResourceKind::Ensemble | ResourceKind::LogisticRegression
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a remote resource, e.g. `dataset/5af59f9cc7736e6b33005697`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    kind: ResourceKind,
    hash: String,
}

impl ResourceId {
    /// Parse any resource id.
    pub fn parse(value: &str) -> Result<Self, ResourceIdError> {
        let not_an_id = || ResourceIdError::NotAResourceId(value.to_string());

        let (prefix, hash) = value.split_once('/').ok_or_else(not_an_id)?;
        let kind = ResourceKind::parse(prefix).ok_or_else(not_an_id)?;

        let well_formed = hash.len() == RESOURCE_HASH_LEN
            && hash
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !well_formed {
            return Err(not_an_id());
        }

        Ok(Self {
            kind,
            hash: hash.to_string(),
        })
    }

    /// Parse an id and require it to be of `expected` kind.
    pub fn parse_kind(value: &str, expected: ResourceKind) -> Result<Self, ResourceIdError> {
        let id = Self::parse(value)?;
        id.require_kind(expected)?;
        Ok(id)
    }

    pub fn require_kind(&self, expected: ResourceKind) -> Result<(), ResourceIdError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(ResourceIdError::WrongResourceType {
                expected: expected.to_string(),
                found: self.to_string(),
            })
        }
    }

    /// Build an id from a sequence number. Used by the in-memory platform.
    pub(crate) fn from_sequence(kind: ResourceKind, sequence: u64) -> Self {
        Self {
            kind,
            hash: format!("{sequence:0width$x}", width = RESOURCE_HASH_LEN),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.hash)
    }
}

impl FromStr for ResourceId {
    type Err = ResourceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = ResourceIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceId> for String {
    fn from(value: ResourceId) -> Self {
        value.to_string()
    }
}
