use std::rc::Rc;

use serde::Serialize;

use crate::{
    config::FxConfig,
    gpu::SharedGpu,
    pool::{PoolHealth, PoolManager, PoolStats, SharedPools},
    shader::{CacheStats, ShaderCacheManager, SharedCache},
    timeline::SharedClock,
};

/// Everything a render loop shares with the other loops on the page.
///
/// Built once and cloned into each loop; clones point at the same cache and
/// pools.
#[derive(Clone)]
pub struct FxServices {
    pub config: Rc<FxConfig>,
    pub gpu: SharedGpu,
    pub cache: SharedCache,
    pub pools: SharedPools,
    pub clock: SharedClock,
}

/// Snapshot returned by [`FxServices::diagnostics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub pool: PoolStats,
    pub cache: CacheStats,
    pub health: PoolHealth,
}

impl FxServices {
    pub fn new(config: FxConfig, gpu: SharedGpu, clock: SharedClock) -> Self {
        let pools = PoolManager::shared(&config.pool);
        Self::with_pools(config, gpu, clock, pools)
    }

    /// Like [`FxServices::new`] but joins an existing set of pools. Used when
    /// each surface needs its own GPU context and program cache.
    pub fn with_pools(
        config: FxConfig,
        gpu: SharedGpu,
        clock: SharedClock,
        pools: SharedPools,
    ) -> Self {
        let cache = ShaderCacheManager::shared(&config.cache, gpu.clone(), clock.clone());
        tracing::debug!(
            max_entries = config.cache.max_entries,
            ttl_secs = config.cache.ttl_secs,
            "effect services ready"
        );
        Self {
            config: Rc::new(config),
            gpu,
            cache,
            pools,
            clock,
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pools.borrow().stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.borrow().stats()
    }

    pub fn health_status(&self) -> PoolHealth {
        self.pools.borrow().health()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            pool: self.pool_stats(),
            cache: self.cache_stats(),
            health: self.health_status(),
        }
    }
}

impl std::fmt::Debug for FxServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FxServices")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("pools", &self.pools)
            .finish_non_exhaustive()
    }
}
