use super::{Held, Poolable, ReturnQueue, SharedPools};

/// Scoped acquisition: every object handed out by the batch goes back to the
/// pools when the batch is disposed or dropped, whichever comes first.
pub struct PoolBatch {
    pools: SharedPools,
    returns: Option<ReturnQueue>,
    held: Vec<Held>,
}

impl PoolBatch {
    pub fn new(pools: SharedPools) -> Self {
        Self {
            pools,
            returns: None,
            held: Vec::new(),
        }
    }

    /// Acquires an object initialised to `init`. The reference is valid until
    /// the next call on this batch; copy values out if they must live longer.
    pub fn acquire<T: Poolable>(&mut self, init: T) -> &mut T {
        let boxed = {
            let mut pools = self.pools.borrow_mut();
            if self.returns.is_none() {
                self.returns = Some(pools.returns());
            }
            pools.acquire(init)
        };
        self.held.push(T::into_held(boxed));
        let slot = self.held.last_mut().expect("batch slot was just pushed");
        T::held_mut(slot).expect("held slot matches the acquired kind")
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Releases everything acquired so far.
    pub fn dispose(mut self) {
        self.release_all();
    }

    fn release_all(&mut self) {
        if self.held.is_empty() {
            return;
        }
        // Anything held was acquired, so the queue handle is set.
        if let Some(returns) = &self.returns {
            returns.release(&self.pools, self.held.drain(..));
        }
    }
}

impl Drop for PoolBatch {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for PoolBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBatch")
            .field("held", &self.held.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PoolConfig,
        pool::{Color, PoolManager, Vec2, Vec3},
    };

    fn sum_with_early_exit(batch: &mut PoolBatch, stop_at: usize) -> f32 {
        let mut total = 0.0;
        for i in 0..10 {
            if i == stop_at {
                return total;
            }
            let v = batch.acquire(Vec3::new(i as f32, 0.0, 0.0));
            total += v.x;
        }
        total
    }

    #[test]
    fn dispose_returns_every_object() {
        let pools = PoolManager::shared(&PoolConfig::default());
        let mut batch = PoolBatch::new(pools.clone());
        batch.acquire(Vec2::new(1.0, 2.0)).x += 1.0;
        batch.acquire(Color::new(1.0, 1.0, 1.0));
        batch.acquire(Vec3::ZERO);
        assert_eq!(pools.borrow().stats().total_active, 3);

        batch.dispose();
        let stats = pools.borrow().stats();
        assert_eq!(stats.total_active, 0);
        assert_eq!(pools.borrow().pool::<Vec2>().free_len(), 1);
    }

    #[test]
    fn drop_releases_after_early_return() {
        let pools = PoolManager::shared(&PoolConfig::default());
        {
            let mut batch = PoolBatch::new(pools.clone());
            let total = sum_with_early_exit(&mut batch, 4);
            assert_eq!(total, 6.0);
            assert_eq!(batch.len(), 4);
        }
        assert_eq!(pools.borrow().stats().total_active, 0);
    }

    #[test]
    fn drop_while_manager_is_borrowed_still_returns_objects() {
        let pools = PoolManager::shared(&PoolConfig::default());
        let mut batch = PoolBatch::new(pools.clone());
        batch.acquire(Vec2::ZERO);
        batch.acquire(Vec3::ZERO);

        let guard = pools.borrow_mut();
        drop(batch);
        drop(guard);

        assert_eq!(pools.borrow().stats().total_active, 0);
        assert!(pools.borrow().health().healthy);

        // The next mutable call puts them on the free lists.
        let reused = pools.borrow_mut().acquire(Vec2::new(3.0, 4.0));
        assert_eq!(pools.borrow().pool::<Vec2>().stats().recycled, 1);
        assert_eq!(pools.borrow().pool::<Vec3>().free_len(), 1);
        pools.borrow_mut().release(reused);
        assert_eq!(pools.borrow().stats().total_active, 0);
    }
}
