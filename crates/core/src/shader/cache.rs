use std::{cell::RefCell, collections::HashMap, rc::Rc};

use serde::{Deserialize, Serialize};

use crate::{
    config::CacheConfig,
    device::{DeviceProfile, QualityTier},
    gpu::{GpuBackend, ProgramId, SharedGpu},
    timeline::SharedClock,
    uniforms::Uniforms,
    FxError, Result,
};

use super::{generate, uniform_defaults, ShaderSource, ShaderVariant};

pub type SharedCache = Rc<RefCell<ShaderCacheManager>>;

/// Composite cache key: `variant:device:tier`.
pub fn cache_key(variant: ShaderVariant, profile: &DeviceProfile, tier: QualityTier) -> String {
    format!("{variant}:{}:{tier}", profile.cache_key())
}

/// A compiled program plus the uniforms of one user of it.
///
/// Cloning shares the program; only the uniform set is copied.
#[derive(Debug, Clone)]
pub struct ShaderMaterial {
    key: String,
    variant: ShaderVariant,
    tier: QualityTier,
    program: Rc<ProgramId>,
    uniforms: Uniforms,
}

impl ShaderMaterial {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn variant(&self) -> ShaderVariant {
        self.variant
    }

    pub fn tier(&self) -> QualityTier {
        self.tier
    }

    pub fn program_id(&self) -> ProgramId {
        *self.program
    }

    pub fn uniforms(&self) -> &Uniforms {
        &self.uniforms
    }

    pub fn uniforms_mut(&mut self) -> &mut Uniforms {
        &mut self.uniforms
    }
}

#[derive(Debug)]
struct ShaderCacheEntry {
    source: ShaderSource,
    program: Rc<ProgramId>,
    uniform_defaults: Uniforms,
    variant: ShaderVariant,
    profile: DeviceProfile,
    tier: QualityTier,
    created_at: f64,
    seq: u64,
    hit_count: u64,
}

impl ShaderCacheEntry {
    fn material(&self, key: &str) -> ShaderMaterial {
        ShaderMaterial {
            key: key.to_string(),
            variant: self.variant,
            tier: self.tier,
            program: Rc::clone(&self.program),
            uniforms: self.uniform_defaults.clone(),
        }
    }
}

/// Read-only view of one cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntryInfo {
    pub key: String,
    pub variant: ShaderVariant,
    pub tier: QualityTier,
    pub profile: DeviceProfile,
    pub created_at: f64,
    pub hit_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub compile_failures: u64,
    /// Programs dropped from the map but still referenced by a material.
    pub retired: usize,
}

/// Compiles each `(variant, device, tier)` program once and hands out
/// materials that share it.
///
/// Entries expire `ttl_secs` after creation; expiry is checked when a key is
/// looked up and by [`ShaderCacheManager::maybe_cleanup`]. When the map is
/// full the entry with the oldest `created_at` is evicted. A program leaves
/// the GPU only once no material references it anymore.
pub struct ShaderCacheManager {
    entries: HashMap<String, ShaderCacheEntry>,
    retired: Vec<Rc<ProgramId>>,
    gpu: SharedGpu,
    clock: SharedClock,
    max_entries: usize,
    ttl_ms: f64,
    cleanup_interval_ms: f64,
    last_cleanup: f64,
    next_seq: u64,
    stats: CacheStats,
}

impl ShaderCacheManager {
    pub fn new(config: &CacheConfig, gpu: SharedGpu, clock: SharedClock) -> Self {
        let last_cleanup = clock.now_ms();
        Self {
            entries: HashMap::new(),
            retired: Vec::new(),
            gpu,
            clock,
            max_entries: config.max_entries,
            ttl_ms: config.ttl_secs as f64 * 1000.0,
            cleanup_interval_ms: config.cleanup_interval_secs as f64 * 1000.0,
            last_cleanup,
            next_seq: 0,
            stats: CacheStats::default(),
        }
    }

    pub fn shared(config: &CacheConfig, gpu: SharedGpu, clock: SharedClock) -> SharedCache {
        Rc::new(RefCell::new(Self::new(config, gpu, clock)))
    }

    /// Returns a material for the key, compiling only on a miss.
    ///
    /// `overrides` are applied on top of the program's default uniforms of the
    /// returned material; the cached defaults are never modified.
    pub fn get_material(
        &mut self,
        variant: ShaderVariant,
        profile: &DeviceProfile,
        tier: QualityTier,
        overrides: Option<&Uniforms>,
    ) -> Result<ShaderMaterial> {
        let key = cache_key(variant, profile, tier);
        let now = self.clock.now_ms();
        self.maybe_cleanup_at(now);

        let expired = self
            .entries
            .get(&key)
            .map(|entry| self.is_expired(entry, now))
            .unwrap_or(false);
        if expired {
            tracing::debug!(%key, "shader cache entry expired");
            self.stats.expirations += 1;
            self.remove_entry(&key);
        }

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.hit_count += 1;
            self.stats.hits += 1;
            tracing::debug!(%key, hits = entry.hit_count, "shader cache hit");
            let mut material = entry.material(&key);
            if let Some(overrides) = overrides {
                material.uniforms.merge(overrides);
            }
            return Ok(material);
        }

        self.stats.misses += 1;
        let source = generate(variant, tier);
        let program = match self.compile(&source) {
            Ok(program) => program,
            Err(err) => {
                self.stats.compile_failures += 1;
                tracing::warn!(%key, error = %err, "shader compilation failed; not caching");
                return Err(FxError::ShaderCompile {
                    key,
                    reason: err.to_string(),
                });
            }
        };
        tracing::debug!(%key, lines = source.line_count(), "shader compiled");

        let entry = ShaderCacheEntry {
            source,
            program: Rc::new(program),
            uniform_defaults: uniform_defaults(variant, tier),
            variant,
            profile: *profile,
            tier,
            created_at: now,
            seq: self.next_seq,
            hit_count: 0,
        };
        self.next_seq += 1;

        let mut material = entry.material(&key);
        if let Some(overrides) = overrides {
            material.uniforms.merge(overrides);
        }

        if self.max_entries == 0 {
            // Caching disabled: the program lives exactly as long as its materials.
            self.retired.push(entry.program);
        } else {
            if self.entries.len() >= self.max_entries {
                self.evict_oldest();
            }
            self.entries.insert(key, entry);
        }
        self.release_unused();
        Ok(material)
    }

    /// Removes every entry older than the TTL. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        self.purge_expired_at(now)
    }

    /// Runs [`Self::purge_expired`] if the cleanup interval has elapsed.
    pub fn maybe_cleanup(&mut self) -> usize {
        let now = self.clock.now_ms();
        self.maybe_cleanup_at(now)
    }

    /// Drops every entry and frees all unreferenced programs. Safe to call
    /// repeatedly.
    pub fn clear_cache(&mut self) {
        let keys: Vec<String> = self.entries.keys().cloned().collect();
        for key in keys {
            self.remove_entry(&key);
        }
        self.release_unused();
    }

    /// Deletes retired programs that no material references anymore.
    pub fn release_unused(&mut self) -> usize {
        let (free, still_used): (Vec<_>, Vec<_>) = self
            .retired
            .drain(..)
            .partition(|program| Rc::strong_count(program) == 1);
        self.retired = still_used;

        if !free.is_empty() {
            match self.gpu.try_borrow_mut() {
                Ok(mut gpu) => {
                    for program in &free {
                        gpu.delete_program(**program);
                    }
                }
                Err(_) => {
                    tracing::warn!(count = free.len(), "gpu busy; deferring program deletion");
                    self.retired.extend(free);
                    return 0;
                }
            }
        }
        free.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntryInfo> {
        self.entries.get(key).map(|entry| CacheEntryInfo {
            key: key.to_string(),
            variant: entry.variant,
            tier: entry.tier,
            profile: entry.profile,
            created_at: entry.created_at,
            hit_count: entry.hit_count,
        })
    }

    /// Generated source behind a cached program.
    pub fn source(&self, key: &str) -> Option<&ShaderSource> {
        self.entries.get(key).map(|entry| &entry.source)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            retired: self.retired.len(),
            ..self.stats.clone()
        }
    }

    fn compile(&self, source: &ShaderSource) -> Result<ProgramId> {
        let mut gpu = self
            .gpu
            .try_borrow_mut()
            .map_err(|_| FxError::ContextUnavailable("gpu backend is busy".into()))?;
        gpu.compile(source)
    }

    fn is_expired(&self, entry: &ShaderCacheEntry, now: f64) -> bool {
        now - entry.created_at > self.ttl_ms
    }

    fn maybe_cleanup_at(&mut self, now: f64) -> usize {
        if now - self.last_cleanup < self.cleanup_interval_ms {
            return 0;
        }
        self.last_cleanup = now;
        self.purge_expired_at(now)
    }

    fn purge_expired_at(&mut self, now: f64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove_entry(key);
        }
        if !expired.is_empty() {
            self.stats.expirations += expired.len() as u64;
            tracing::debug!(count = expired.len(), "purged expired shader programs");
        }
        self.release_unused();
        expired.len()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by(|(_, a), (_, b)| {
                a.created_at
                    .total_cmp(&b.created_at)
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            tracing::debug!(%key, "evicting oldest shader program");
            self.stats.evictions += 1;
            self.remove_entry(&key);
        }
    }

    fn remove_entry(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.retired.push(entry.program);
        }
    }
}

impl Drop for ShaderCacheManager {
    fn drop(&mut self) {
        let (free, in_use): (Vec<_>, Vec<_>) = self
            .entries
            .drain()
            .map(|(_, entry)| entry.program)
            .chain(self.retired.drain(..))
            .partition(|program| Rc::strong_count(program) == 1);
        if !in_use.is_empty() {
            tracing::debug!(
                count = in_use.len(),
                "shader cache dropped while materials hold programs; leaving them to the backend"
            );
        }
        if let Ok(mut gpu) = self.gpu.try_borrow_mut() {
            for program in free {
                gpu.delete_program(*program);
            }
        }
    }
}

impl std::fmt::Debug for ShaderCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderCacheManager")
            .field("entries", &self.entries.len())
            .field("retired", &self.retired.len())
            .field("max_entries", &self.max_entries)
            .field("ttl_ms", &self.ttl_ms)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gpu::{self, HeadlessBackend},
        timeline::ManualClock,
    };

    struct Fixture {
        gpu: Rc<RefCell<HeadlessBackend>>,
        clock: ManualClock,
        cache: ShaderCacheManager,
    }

    fn fixture_with(config: CacheConfig, backend: HeadlessBackend) -> Fixture {
        let (gpu, shared) = gpu::shared(backend);
        let clock = ManualClock::new();
        let cache = ShaderCacheManager::new(&config, shared, Rc::new(clock.clone()));
        Fixture { gpu, clock, cache }
    }

    fn fixture() -> Fixture {
        fixture_with(CacheConfig::default(), HeadlessBackend::new())
    }

    fn desktop() -> DeviceProfile {
        DeviceProfile::new(8, Some(16.0), false)
    }

    #[test]
    fn second_lookup_is_a_hit_without_compiling() {
        let mut fx = fixture();
        let profile = desktop();
        let first = fx
            .cache
            .get_material(ShaderVariant::Dither, &profile, QualityTier::High, None)
            .unwrap();
        let second = fx
            .cache
            .get_material(ShaderVariant::Dither, &profile, QualityTier::High, None)
            .unwrap();

        assert_eq!(fx.gpu.borrow().compile_calls(), 1);
        assert_eq!(first.program_id(), second.program_id());
        let info = fx.cache.entry(first.key()).unwrap();
        assert_eq!(info.hit_count, 1);
        assert_eq!(fx.cache.stats().hits, 1);
        assert_eq!(fx.cache.stats().misses, 1);
        assert!(fx.cache.source(first.key()).unwrap().fragment.contains("bayer[16]"));
    }

    #[test]
    fn overrides_apply_to_the_clone_only() {
        let mut fx = fixture();
        let profile = desktop();
        let overrides = Uniforms::new().with("uWaveSpeed", 0.5_f32);
        let custom = fx
            .cache
            .get_material(ShaderVariant::Dither, &profile, QualityTier::Low, Some(&overrides))
            .unwrap();
        let plain = fx
            .cache
            .get_material(ShaderVariant::Dither, &profile, QualityTier::Low, None)
            .unwrap();

        assert_eq!(custom.uniforms().float("uWaveSpeed"), Some(0.5));
        assert_eq!(plain.uniforms().float("uWaveSpeed"), Some(0.05));
    }

    #[test]
    fn evicts_the_oldest_entry_when_full() {
        let mut fx = fixture();
        let mut first_key = String::new();
        for cores in 0..50 {
            let profile = DeviceProfile::new(cores, None, false);
            let material = fx
                .cache
                .get_material(ShaderVariant::Metaballs, &profile, QualityTier::Low, None)
                .unwrap();
            if cores == 0 {
                first_key = material.key().to_string();
            }
            fx.clock.advance(10.0);
        }
        assert_eq!(fx.cache.len(), 50);

        let extra = DeviceProfile::new(99, None, false);
        fx.cache
            .get_material(ShaderVariant::Metaballs, &extra, QualityTier::Low, None)
            .unwrap();

        assert_eq!(fx.cache.len(), 50);
        assert!(!fx.cache.contains(&first_key));
        assert_eq!(fx.cache.stats().evictions, 1);
        // Nothing references the evicted program, so it left the GPU.
        assert_eq!(fx.gpu.borrow().delete_calls(), 1);
        assert_eq!(fx.gpu.borrow().live_programs(), 50);
    }

    #[test]
    fn expired_entries_recompile_on_lookup() {
        let mut fx = fixture();
        let profile = desktop();
        fx.cache
            .get_material(ShaderVariant::DataNetwork, &profile, QualityTier::Medium, None)
            .unwrap();

        fx.clock.advance(29.0 * 60.0 * 1000.0);
        fx.cache
            .get_material(ShaderVariant::DataNetwork, &profile, QualityTier::Medium, None)
            .unwrap();
        assert_eq!(fx.gpu.borrow().compile_calls(), 1);

        fx.clock.advance(2.0 * 60.0 * 1000.0);
        let fresh = fx
            .cache
            .get_material(ShaderVariant::DataNetwork, &profile, QualityTier::Medium, None)
            .unwrap();
        assert_eq!(fx.gpu.borrow().compile_calls(), 2);
        assert_eq!(fx.cache.stats().expirations, 1);
        assert_eq!(fx.cache.entry(fresh.key()).unwrap().hit_count, 0);
    }

    #[test]
    fn periodic_cleanup_purges_without_lookup() {
        let config = CacheConfig {
            ttl_secs: 60,
            cleanup_interval_secs: 30,
            ..CacheConfig::default()
        };
        let mut fx = fixture_with(config, HeadlessBackend::new());
        fx.cache
            .get_material(ShaderVariant::Dither, &desktop(), QualityTier::High, None)
            .unwrap();

        fx.clock.advance(20_000.0);
        assert_eq!(fx.cache.maybe_cleanup(), 0);
        fx.clock.advance(50_000.0);
        assert_eq!(fx.cache.maybe_cleanup(), 1);
        assert!(fx.cache.is_empty());
    }

    #[test]
    fn compile_failures_are_not_cached() {
        let backend = HeadlessBackend::new().fail_compiles_containing("backdrop metaballs");
        let mut fx = fixture_with(CacheConfig::default(), backend);
        let profile = desktop();

        let err = fx
            .cache
            .get_material(ShaderVariant::Metaballs, &profile, QualityTier::High, None)
            .unwrap_err();
        assert!(matches!(err, FxError::ShaderCompile { .. }));
        assert!(fx.cache.is_empty());
        assert_eq!(fx.cache.stats().compile_failures, 1);

        // Other variants are unaffected.
        assert!(fx
            .cache
            .get_material(ShaderVariant::Dither, &profile, QualityTier::High, None)
            .is_ok());
        assert_eq!(fx.cache.len(), 1);
    }

    #[test]
    fn programs_in_use_outlive_clear() {
        let mut fx = fixture();
        let material = fx
            .cache
            .get_material(ShaderVariant::Dither, &desktop(), QualityTier::Medium, None)
            .unwrap();

        fx.cache.clear_cache();
        fx.cache.clear_cache();
        assert!(fx.cache.is_empty());
        assert!(fx.gpu.borrow().is_live(material.program_id()));
        assert_eq!(fx.cache.stats().retired, 1);

        let id = material.program_id();
        drop(material);
        assert_eq!(fx.cache.release_unused(), 1);
        assert!(!fx.gpu.borrow().is_live(id));
    }

    #[test]
    fn zero_capacity_returns_uncached_programs() {
        let config = CacheConfig {
            max_entries: 0,
            ..CacheConfig::default()
        };
        let mut fx = fixture_with(config, HeadlessBackend::new());
        let profile = desktop();
        let a = fx
            .cache
            .get_material(ShaderVariant::Dither, &profile, QualityTier::Low, None)
            .unwrap();
        let b = fx
            .cache
            .get_material(ShaderVariant::Dither, &profile, QualityTier::Low, None)
            .unwrap();

        assert!(fx.cache.is_empty());
        assert_ne!(a.program_id(), b.program_id());
        assert_eq!(fx.gpu.borrow().compile_calls(), 2);
    }

    #[test]
    fn dropping_the_manager_frees_every_program() {
        let fx = fixture();
        let Fixture { gpu, mut cache, .. } = fx;
        for variant in ShaderVariant::ALL {
            cache
                .get_material(variant, &desktop(), QualityTier::High, None)
                .unwrap();
        }
        assert_eq!(gpu.borrow().live_programs(), 3);
        drop(cache);
        assert_eq!(gpu.borrow().live_programs(), 0);
    }

    #[test]
    fn dropping_the_manager_keeps_programs_materials_still_use() {
        let Fixture { gpu, mut cache, .. } = fixture();
        let kept = cache
            .get_material(ShaderVariant::Metaballs, &desktop(), QualityTier::High, None)
            .unwrap();
        let retired = cache
            .get_material(ShaderVariant::Dither, &desktop(), QualityTier::High, None)
            .unwrap();
        cache
            .get_material(ShaderVariant::DataNetwork, &desktop(), QualityTier::High, None)
            .unwrap();
        cache.clear_cache();
        let unused = cache
            .get_material(ShaderVariant::DataNetwork, &desktop(), QualityTier::Low, None)
            .unwrap()
            .program_id();

        drop(cache);
        assert!(gpu.borrow().is_live(kept.program_id()));
        assert!(gpu.borrow().is_live(retired.program_id()));
        assert!(!gpu.borrow().is_live(unused));
    }
}
