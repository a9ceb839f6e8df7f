//! K-fold partitioning
//!
//! A dataset is cut into k row partitions by round-robin assignment: row `r`
//! lands in fold `r mod k`. Each partition is a derived dataset created with
//! `row_offset = i` and `row_step = k`, so the k partitions are pairwise
//! disjoint and together cover every row.

use crossfold_platform::{ResourceId, ResourceKind};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::errors::Result;
use crate::lifecycle::ResourceLifecycle;
use crate::validation;

/// Name of the constant field tagging each partition with its fold index.
pub const FOLD_FIELD: &str = "k_fold";

/// A holdout partition and the partitions that train against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldPair {
    pub index: usize,
    pub holdout: ResourceId,
    pub training: Vec<ResourceId>,
}

/// Fold a row index belongs to.
pub fn fold_membership(row: u64, k: u64) -> u64 {
    row % k
}

/// Creation arguments of partition `index` out of `k`.
pub fn partition_args(dataset: &ResourceId, dataset_name: &str, index: u64, k: u64) -> Map<String, Value> {
    let args = json!({
        "origin_dataset": dataset,
        "row_offset": index,
        "row_step": k,
        "new_fields": [{"name": FOLD_FIELD, "field": index.to_string()}],
        "name": format!("{dataset_name} - fold {index}"),
    });
    match args {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Create the k partitions of `dataset` and wait for all of them.
///
/// `k` must be an integer of at least 2; anything else is rejected before
/// any resource is created.
pub async fn create_k_folds(
    lifecycle: &ResourceLifecycle,
    dataset: &ResourceId,
    dataset_name: &str,
    k: f64,
) -> Result<Vec<ResourceId>> {
    let k = validation::fold_count(k, None)?;
    info!("creating {} folds of {}", k, dataset);

    let requests: Vec<_> = (0..k)
        .map(|index| partition_args(dataset, dataset_name, index, k))
        .collect();
    lifecycle.create_all(ResourceKind::Dataset, &requests).await
}

/// Pair each partition with the concatenation of all the others.
pub fn pair_k_folds(partitions: &[ResourceId]) -> Vec<FoldPair> {
    partitions
        .iter()
        .enumerate()
        .map(|(index, holdout)| FoldPair {
            index,
            holdout: holdout.clone(),
            training: partitions
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != index)
                .map(|(_, partition)| partition.clone())
                .collect(),
        })
        .collect()
}
