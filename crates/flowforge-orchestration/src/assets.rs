//! Org asset cache (spec.md §5): read-through, single-flight cache of the
//! per-org data the flow runner needs (flow definitions, channel config),
//! keyed by `(org_id, version)` so a version bump invalidates by simply
//! missing the cache rather than requiring an explicit eviction pass.

use crate::session_runner::OrgAssets;
use flowforge_shared::error::FlowforgeResult;
use flowforge_shared::ids::OrgId;
use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;

/// Loads the current version number and asset payload for an org. The
/// concrete source (database read, config service) is out of scope per
/// spec.md §1; this is only the seam the cache loads through.
#[async_trait::async_trait]
pub trait OrgAssetLoader: Send + Sync {
    async fn current_version(&self, org_id: OrgId) -> FlowforgeResult<i64>;
    async fn load(&self, org_id: OrgId, version: i64) -> FlowforgeResult<OrgAssets>;
}

pub struct OrgAssetCache {
    loader: Arc<dyn OrgAssetLoader>,
    cache: Cache<(OrgId, i64), Arc<OrgAssets>>,
}

impl OrgAssetCache {
    pub fn new(loader: Arc<dyn OrgAssetLoader>, max_capacity: u64) -> Self {
        Self {
            loader,
            cache: Cache::builder().max_capacity(max_capacity).build(),
        }
    }

    /// Returns the org's current assets, loading and caching them on a
    /// miss. Concurrent callers for the same `(org_id, version)` share one
    /// load (`try_get_with`'s single-flight guarantee) rather than each
    /// issuing their own fetch.
    pub async fn get(&self, org_id: OrgId) -> FlowforgeResult<Arc<OrgAssets>> {
        let version = self.loader.current_version(org_id).await?;
        let key = (org_id, version);
        let loader = self.loader.clone();
        self.cache
            .try_get_with(key, async move {
                loader.load(org_id, version).await.map(Arc::new)
            })
            .await
            .map_err(|e| flowforge_shared::error::FlowforgeError::orchestration(e.to_string()))
    }

    pub fn invalidate(&self, org_id: OrgId, version: i64) {
        self.cache.invalidate(&(org_id, version));
    }
}

/// Loader that never changes version and returns empty assets, for
/// deployments running without a real flow-library collaborator wired in.
#[derive(Debug, Default)]
pub struct NullOrgAssetLoader;

#[async_trait::async_trait]
impl OrgAssetLoader for NullOrgAssetLoader {
    async fn current_version(&self, _org_id: OrgId) -> FlowforgeResult<i64> {
        Ok(1)
    }

    async fn load(&self, _org_id: OrgId, version: i64) -> FlowforgeResult<OrgAssets> {
        Ok(OrgAssets { version, data: Value::Null })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        version: i64,
        loads: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl OrgAssetLoader for CountingLoader {
        async fn current_version(&self, _org_id: OrgId) -> FlowforgeResult<i64> {
            Ok(self.version)
        }

        async fn load(&self, _org_id: OrgId, version: i64) -> FlowforgeResult<OrgAssets> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(OrgAssets { version, data: Value::Null })
        }
    }

    #[tokio::test]
    async fn repeated_gets_at_the_same_version_load_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = Arc::new(CountingLoader { version: 1, loads: loads.clone() });
        let cache = OrgAssetCache::new(loader, 100);

        for _ in 0..5 {
            cache.get(OrgId::new(1)).await.unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_orgs_load_independently() {
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = Arc::new(CountingLoader { version: 1, loads: loads.clone() });
        let cache = OrgAssetCache::new(loader, 100);

        cache.get(OrgId::new(1)).await.unwrap();
        cache.get(OrgId::new(2)).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }
}
