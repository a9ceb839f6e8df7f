//! Remote resource lifecycle
//!
//! Creation is retried once, deletion never fails the caller, and
//! [`ResourceLifecycle::wait_all`] is the fan-in point between stages.

use crossfold_platform::{ModelingPlatform, PlatformError, ResourceId, ResourceKind};
use futures::future::{join_all, try_join_all};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::Result;

/// Wraps a [`ModelingPlatform`] with the retry and cleanup policy.
#[derive(Clone)]
pub struct ResourceLifecycle {
    platform: Arc<dyn ModelingPlatform>,
}

impl ResourceLifecycle {
    pub fn new(platform: Arc<dyn ModelingPlatform>) -> Self {
        Self { platform }
    }

    /// Create a resource, retrying exactly once with the same arguments.
    pub async fn safe_create(&self, kind: ResourceKind, args: &Map<String, Value>) -> Result<ResourceId> {
        match self.platform.create(kind, args).await {
            Ok(id) => {
                debug!("created {}", id);
                Ok(id)
            }
            Err(first) => {
                warn!("creating {} failed, retrying once: {}", kind, first);
                let id = self.platform.create(kind, args).await?;
                debug!("created {} on retry", id);
                Ok(id)
            }
        }
    }

    /// Delete a resource. Failures are logged and reported as `false`.
    pub async fn safe_delete(&self, id: &ResourceId) -> bool {
        match self.platform.delete(id).await {
            Ok(()) => {
                debug!("deleted {}", id);
                true
            }
            Err(err) => {
                warn!("could not delete {}: {}", id, err);
                false
            }
        }
    }

    /// Wait until every resource is finished and hand the ids back in order.
    pub async fn wait_all(&self, ids: Vec<ResourceId>) -> Result<Vec<ResourceId>> {
        try_join_all(ids.iter().map(|id| self.platform.wait(id))).await?;
        Ok(ids)
    }

    /// Issue every creation without waiting in between, then wait for all.
    ///
    /// The batch is all or nothing: if any creation or wait fails, the
    /// resources that were created are deleted before the error is returned.
    pub async fn create_all(&self, kind: ResourceKind, requests: &[Map<String, Value>]) -> Result<Vec<ResourceId>> {
        let mut ids = Vec::with_capacity(requests.len());
        let mut failure = None;
        for outcome in join_all(requests.iter().map(|args| self.safe_create(kind, args))).await {
            match outcome {
                Ok(id) => ids.push(id),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        let failure = match failure {
            Some(err) => err,
            None => match self.wait_all(ids.clone()).await {
                Ok(ids) => return Ok(ids),
                Err(err) => err,
            },
        };
        let deleted = self.delete_all(&ids).await;
        warn!("{} batch failed, deleted {} of {} created", kind, deleted, ids.len());
        Err(failure)
    }

    /// Best-effort deletion of `ids`; returns how many were deleted.
    pub async fn delete_all(&self, ids: &[ResourceId]) -> usize {
        join_all(ids.iter().map(|id| self.safe_delete(id)))
            .await
            .into_iter()
            .filter(|deleted| *deleted)
            .count()
    }

    pub async fn fetch(&self, id: &ResourceId) -> std::result::Result<Value, PlatformError> {
        self.platform.fetch(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CrossfoldError;
    use crossfold_platform::{FieldInfo, InMemoryPlatform, Optype};
    use serde_json::json;

    fn setup() -> (InMemoryPlatform, ResourceLifecycle, ResourceId) {
        let platform = InMemoryPlatform::new();
        let dataset = platform.register_dataset(
            "toy",
            10,
            [("000000", FieldInfo::new("label", Optype::Categorical))],
            Some("000000"),
        );
        let lifecycle = ResourceLifecycle::new(Arc::new(platform.clone()));
        (platform, lifecycle, dataset)
    }

    fn derive(dataset: &ResourceId) -> Map<String, Value> {
        json!({"origin_dataset": dataset}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn create_retries_once() {
        let (platform, lifecycle, dataset) = setup();
        platform.fail_next_creates(ResourceKind::Dataset, 1);

        let id = lifecycle.safe_create(ResourceKind::Dataset, &derive(&dataset)).await.unwrap();
        assert!(platform.contains(&id));
        assert_eq!(platform.created(ResourceKind::Dataset), vec![id]);
    }

    #[tokio::test]
    async fn second_failure_propagates() {
        let (platform, lifecycle, dataset) = setup();
        platform.fail_next_creates(ResourceKind::Dataset, 2);

        let err = lifecycle
            .safe_create(ResourceKind::Dataset, &derive(&dataset))
            .await
            .unwrap_err();
        assert!(matches!(err, CrossfoldError::Platform(PlatformError::Status { .. })));
        assert!(platform.created(ResourceKind::Dataset).is_empty());
    }

    #[tokio::test]
    async fn deleting_missing_resources_returns_false() {
        let (_platform, lifecycle, dataset) = setup();
        let id = lifecycle.safe_create(ResourceKind::Dataset, &derive(&dataset)).await.unwrap();

        assert!(lifecycle.safe_delete(&id).await);
        assert!(!lifecycle.safe_delete(&id).await);
        let never_created = ResourceId::parse("model/00000000000000000000ffff").unwrap();
        assert!(!lifecycle.safe_delete(&never_created).await);
    }

    #[tokio::test]
    async fn create_all_preserves_request_order() {
        let (platform, lifecycle, dataset) = setup();
        let requests: Vec<_> = (0..3)
            .map(|offset| {
                json!({"origin_dataset": dataset, "row_offset": offset, "row_step": 3})
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect();

        let ids = lifecycle.create_all(ResourceKind::Dataset, &requests).await.unwrap();
        assert_eq!(ids.len(), 3);
        for (offset, id) in ids.iter().enumerate() {
            assert_eq!(platform.args(id).unwrap()["row_offset"], json!(offset));
        }
        assert_eq!(lifecycle.delete_all(&ids).await, 3);
        assert_eq!(lifecycle.delete_all(&ids).await, 0);
    }

    #[tokio::test]
    async fn wait_all_propagates_faulty_resources() {
        let (platform, lifecycle, dataset) = setup();
        platform.mark_kind_faulty(ResourceKind::Dataset);

        let err = lifecycle
            .create_all(ResourceKind::Dataset, &[derive(&dataset)])
            .await
            .unwrap_err();
        assert!(matches!(err, CrossfoldError::Platform(PlatformError::Faulty { .. })));
        assert_eq!(platform.created(ResourceKind::Dataset).len(), 1);
        assert_eq!(platform.live(ResourceKind::Dataset), vec![dataset]);
    }

    #[tokio::test]
    async fn failed_batches_delete_what_was_created() {
        let (platform, lifecycle, dataset) = setup();
        platform.fail_next_creates(ResourceKind::Dataset, 2);
        let requests = vec![derive(&dataset); 4];

        let err = lifecycle
            .create_all(ResourceKind::Dataset, &requests)
            .await
            .unwrap_err();
        assert!(matches!(err, CrossfoldError::Platform(PlatformError::Status { .. })));
        assert_eq!(platform.created(ResourceKind::Dataset).len(), 3);
        assert_eq!(platform.live(ResourceKind::Dataset), vec![dataset]);
    }
}
