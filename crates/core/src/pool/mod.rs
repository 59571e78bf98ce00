//! Free-list pools for the value objects touched every animation frame.
//!
//! Objects live in `Box`es so that recycling saves a heap allocation.
//! Ownership is the contract: [`PoolManager::acquire`] hands the box to the
//! caller and [`PoolManager::release`] takes it back, so nothing can write to
//! an object between its release and the next acquire.

mod batch;
mod math;

pub use batch::PoolBatch;
pub use math::{Color, Euler, Mat4, Quat, Vec2, Vec3};

use std::{cell::RefCell, fmt, rc::Rc};

use serde::{Deserialize, Serialize};

use crate::config::PoolConfig;

pub type SharedPools = Rc<RefCell<PoolManager>>;

/// Pooled value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    Vector2,
    Vector3,
    Color,
    Matrix4,
    Quaternion,
    Euler,
}

impl PoolKind {
    pub const ALL: [PoolKind; 6] = [
        PoolKind::Vector2,
        PoolKind::Vector3,
        PoolKind::Color,
        PoolKind::Matrix4,
        PoolKind::Quaternion,
        PoolKind::Euler,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vector2 => "vector2",
            Self::Vector3 => "vector3",
            Self::Color => "color",
            Self::Matrix4 => "matrix4",
            Self::Quaternion => "quaternion",
            Self::Euler => "euler",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value type that has a pool inside [`PoolManager`].
pub trait Poolable: Copy + fmt::Debug + 'static {
    const KIND: PoolKind;

    /// Zero or identity value written into released objects.
    fn reset_value() -> Self;

    fn pool(manager: &PoolManager) -> &Pool<Self>;

    fn pool_mut(manager: &mut PoolManager) -> &mut Pool<Self>;

    #[doc(hidden)]
    fn into_held(boxed: Box<Self>) -> Held;

    #[doc(hidden)]
    fn held_mut(held: &mut Held) -> Option<&mut Self>;
}

/// Type-erased pooled object, used by [`PoolBatch`] to track mixed kinds.
#[derive(Debug)]
pub enum Held {
    Vector2(Box<Vec2>),
    Vector3(Box<Vec3>),
    Color(Box<Color>),
    Matrix4(Box<Mat4>),
    Quaternion(Box<Quat>),
    Euler(Box<Euler>),
}

impl Held {
    pub fn kind(&self) -> PoolKind {
        match self {
            Self::Vector2(_) => PoolKind::Vector2,
            Self::Vector3(_) => PoolKind::Vector3,
            Self::Color(_) => PoolKind::Color,
            Self::Matrix4(_) => PoolKind::Matrix4,
            Self::Quaternion(_) => PoolKind::Quaternion,
            Self::Euler(_) => PoolKind::Euler,
        }
    }

    fn release_into(self, manager: &mut PoolManager) {
        match self {
            Self::Vector2(obj) => manager.vector2.release(obj),
            Self::Vector3(obj) => manager.vector3.release(obj),
            Self::Color(obj) => manager.color.release(obj),
            Self::Matrix4(obj) => manager.matrix4.release(obj),
            Self::Quaternion(obj) => manager.quaternion.release(obj),
            Self::Euler(obj) => manager.euler.release(obj),
        }
    }
}

/// Objects handed back while their [`PoolManager`] was already borrowed.
///
/// The manager takes them on its next mutable call. Until then its
/// [`PoolManager::stats`] already counts them as returned.
#[derive(Debug, Clone, Default)]
pub struct ReturnQueue(Rc<RefCell<Vec<Held>>>);

impl ReturnQueue {
    /// Gives `held` back to `pools`, queueing whatever cannot be released
    /// right now.
    pub fn release(&self, pools: &SharedPools, held: impl IntoIterator<Item = Held>) {
        match pools.try_borrow_mut() {
            Ok(mut pools) => {
                for object in held {
                    pools.release_held(object);
                }
            }
            Err(_) => {
                let mut queue = self.0.borrow_mut();
                let before = queue.len();
                queue.extend(held);
                tracing::debug!(count = queue.len() - before, "pool manager busy; queueing release");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    fn pending(&self, kind: PoolKind) -> usize {
        self.0.borrow().iter().filter(|held| held.kind() == kind).count()
    }

    fn take(&self) -> Vec<Held> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

impl<T: Poolable> From<Box<T>> for Held {
    fn from(boxed: Box<T>) -> Self {
        T::into_held(boxed)
    }
}

macro_rules! poolable {
    ($ty:ty, $kind:ident, $field:ident, $reset:expr) => {
        impl Poolable for $ty {
            const KIND: PoolKind = PoolKind::$kind;

            fn reset_value() -> Self {
                $reset
            }

            fn pool(manager: &PoolManager) -> &Pool<Self> {
                &manager.$field
            }

            fn pool_mut(manager: &mut PoolManager) -> &mut Pool<Self> {
                &mut manager.$field
            }

            fn into_held(boxed: Box<Self>) -> Held {
                Held::$kind(boxed)
            }

            fn held_mut(held: &mut Held) -> Option<&mut Self> {
                match held {
                    Held::$kind(obj) => Some(&mut **obj),
                    _ => None,
                }
            }
        }
    };
}

poolable!(Vec2, Vector2, vector2, Vec2::ZERO);
poolable!(Vec3, Vector3, vector3, Vec3::ZERO);
poolable!(Color, Color, color, Color::BLACK);
poolable!(Mat4, Matrix4, matrix4, Mat4::IDENTITY);
poolable!(Quat, Quaternion, quaternion, Quat::IDENTITY);
poolable!(Euler, Euler, euler, Euler::default());

/// Free list for one value type.
#[derive(Debug)]
pub struct Pool<T> {
    free: Vec<Box<T>>,
    max_size: usize,
    created: u64,
    recycled: u64,
    dropped: u64,
    active: usize,
}

impl<T: Poolable> Pool<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            free: Vec::new(),
            max_size,
            created: 0,
            recycled: 0,
            dropped: 0,
            active: 0,
        }
    }

    /// Pops a recycled object or allocates a fresh one, then writes `init`.
    pub fn acquire(&mut self, init: T) -> Box<T> {
        let mut obj = match self.free.pop() {
            Some(obj) => {
                self.recycled += 1;
                obj
            }
            None => {
                self.created += 1;
                Box::new(T::reset_value())
            }
        };
        *obj = init;
        self.active += 1;
        obj
    }

    /// Resets and keeps the object while the free list has room; otherwise
    /// lets it drop.
    pub fn release(&mut self, mut obj: Box<T>) {
        self.active = self.active.saturating_sub(1);
        if self.free.len() < self.max_size {
            *obj = T::reset_value();
            self.free.push(obj);
        } else {
            self.dropped += 1;
        }
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn clear(&mut self) {
        self.free.clear();
    }

    pub fn stats(&self) -> KindStats {
        KindStats {
            kind: T::KIND,
            created: self.created,
            recycled: self.recycled,
            dropped: self.dropped,
            active: self.active,
            free: self.free.len(),
            max_size: self.max_size,
        }
    }
}

/// Counters for one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindStats {
    pub kind: PoolKind,
    pub created: u64,
    pub recycled: u64,
    pub dropped: u64,
    pub active: usize,
    pub free: usize,
    pub max_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub kinds: Vec<KindStats>,
    pub total_active: usize,
    pub total_created: u64,
    pub total_recycled: u64,
}

impl PoolStats {
    pub fn kind(&self, kind: PoolKind) -> Option<&KindStats> {
        self.kinds.iter().find(|stats| stats.kind == kind)
    }
}

/// Advisory health signal. Never used for correctness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolHealth {
    pub healthy: bool,
    pub warnings: Vec<String>,
}

/// Owns one pool per [`PoolKind`].
#[derive(Debug)]
pub struct PoolManager {
    vector2: Pool<Vec2>,
    vector3: Pool<Vec3>,
    color: Pool<Color>,
    matrix4: Pool<Mat4>,
    quaternion: Pool<Quat>,
    euler: Pool<Euler>,
    active_warning_threshold: usize,
    low_free_threshold: usize,
    returns: ReturnQueue,
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new(&PoolConfig::default())
    }
}

impl PoolManager {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            vector2: Pool::new(config.vector2_max),
            vector3: Pool::new(config.vector3_max),
            color: Pool::new(config.color_max),
            matrix4: Pool::new(config.matrix4_max),
            quaternion: Pool::new(config.quaternion_max),
            euler: Pool::new(config.euler_max),
            active_warning_threshold: config.active_warning_threshold,
            low_free_threshold: config.low_free_threshold,
            returns: ReturnQueue::default(),
        }
    }

    pub fn shared(config: &PoolConfig) -> SharedPools {
        Rc::new(RefCell::new(Self::new(config)))
    }

    pub fn acquire<T: Poolable>(&mut self, init: T) -> Box<T> {
        self.reclaim();
        T::pool_mut(self).acquire(init)
    }

    pub fn release<T: Poolable>(&mut self, obj: Box<T>) {
        self.reclaim();
        T::pool_mut(self).release(obj);
    }

    /// Returns a type-erased object, as collected by [`PoolBatch`] or an effect.
    pub fn release_held(&mut self, held: Held) {
        self.reclaim();
        held.release_into(self);
    }

    /// Handle for returning objects while this manager is borrowed.
    pub fn returns(&self) -> ReturnQueue {
        self.returns.clone()
    }

    /// Releases everything queued on [`PoolManager::returns`].
    pub fn reclaim(&mut self) -> usize {
        let queued = self.returns.take();
        let count = queued.len();
        for held in queued {
            held.release_into(self);
        }
        count
    }

    pub fn pool<T: Poolable>(&self) -> &Pool<T> {
        T::pool(self)
    }

    /// Drops every idle object. Outstanding objects are unaffected.
    pub fn clear(&mut self) {
        self.reclaim();
        self.vector2.clear();
        self.vector3.clear();
        self.color.clear();
        self.matrix4.clear();
        self.quaternion.clear();
        self.euler.clear();
    }

    pub fn stats(&self) -> PoolStats {
        let mut kinds = vec![
            self.vector2.stats(),
            self.vector3.stats(),
            self.color.stats(),
            self.matrix4.stats(),
            self.quaternion.stats(),
            self.euler.stats(),
        ];
        if !self.returns.is_empty() {
            for kind in &mut kinds {
                kind.active = kind.active.saturating_sub(self.returns.pending(kind.kind));
            }
        }
        PoolStats {
            total_active: kinds.iter().map(|k| k.active).sum(),
            total_created: kinds.iter().map(|k| k.created).sum(),
            total_recycled: kinds.iter().map(|k| k.recycled).sum(),
            kinds,
        }
    }

    pub fn health(&self) -> PoolHealth {
        let stats = self.stats();
        let mut warnings = Vec::new();

        if stats.total_active > self.active_warning_threshold {
            warnings.push(format!(
                "{} pooled objects outstanding (threshold {})",
                stats.total_active, self.active_warning_threshold
            ));
        }
        for kind in &stats.kinds {
            if kind.active > 0 && kind.free < self.low_free_threshold {
                warnings.push(format!(
                    "{} free list near empty ({} free, {} active)",
                    kind.kind, kind.free, kind.active
                ));
            }
        }

        if !warnings.is_empty() {
            tracing::warn!(?warnings, "object pools degraded");
        }
        PoolHealth {
            healthy: warnings.is_empty(),
            warnings,
        }
    }
}
