//! The remote modeling platform seam

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::PlatformError;
use crate::types::{ResourceId, ResourceKind};

/// Remote platform operations consumed by the control algorithms.
///
/// Creation is asynchronous on the platform side: `create` returns as soon as
/// the resource is accepted and `wait` resolves once it is finished. A
/// resource that ends up faulty makes `wait` return [`PlatformError::Faulty`].
#[async_trait]
pub trait ModelingPlatform: Send + Sync {
    async fn create(
        &self,
        kind: ResourceKind,
        args: &Map<String, Value>,
    ) -> Result<ResourceId, PlatformError>;

    async fn fetch(&self, id: &ResourceId) -> Result<Value, PlatformError>;

    async fn delete(&self, id: &ResourceId) -> Result<(), PlatformError>;

    async fn wait(&self, id: &ResourceId) -> Result<(), PlatformError>;
}
