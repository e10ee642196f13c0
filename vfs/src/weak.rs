//! Lifetime notification without shared ownership.
//!
//! A [`LifetimeRegistry`] tracks *subjects* (mounts, in this crate) by
//! arena index. Any number of holders register an invalidation hook against
//! a subject; when the subject's owner destroys it, it calls
//! [`LifetimeRegistry::notify_destroyed`] and every hook still registered
//! runs exactly once. Registering never extends the subject's lifetime.
//!
//! # Example
//!
//! ```
//! use lilium_vfs::weak::{LifetimeRegistry, Liveness};
//!
//! let registry = LifetimeRegistry::new();
//! let subject = registry.create_subject();
//!
//! let alive = Liveness::new();
//! let token = registry.register(subject, alive.invalidator()).unwrap();
//!
//! assert_eq!(registry.notify_destroyed(subject), 1);
//! assert!(!alive.is_alive());
//! drop(token); // unregistering after notification is a no-op
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::VfsError;

/// Identity of a tracked subject.
///
/// Slots are reused after destruction with a bumped generation, so an id
/// for a destroyed subject never aliases a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubjectId {
    index: u32,
    generation: u32,
}

impl SubjectId {
    /// Slot index in the registry arena.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this subject was created.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Invalidation hook invoked once when the subject is destroyed.
pub type InvalidateFn = Box<dyn FnOnce(SubjectId) + Send>;

struct Hook {
    key: u64,
    callback: InvalidateFn,
}

struct Slot {
    generation: u32,
    alive: bool,
    hooks: Vec<Hook>,
}

struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    next_key: u64,
}

struct RegistryInner {
    arena: Mutex<Arena>,
}

impl RegistryInner {
    fn unregister(&self, subject: SubjectId, key: u64) {
        let mut arena = self.arena.lock();
        if let Some(slot) = arena.slots.get_mut(subject.index as usize)
            && slot.generation == subject.generation
        {
            slot.hooks.retain(|hook| hook.key != key);
        }
    }
}

/// Registry of subjects and the hooks interested in their lifetime.
///
/// `Clone` is cheap (shared `Arc`). Thread-safe.
#[derive(Clone)]
pub struct LifetimeRegistry {
    inner: Arc<RegistryInner>,
}

impl LifetimeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                arena: Mutex::new(Arena {
                    slots: Vec::new(),
                    free: Vec::new(),
                    next_key: 0,
                }),
            }),
        }
    }

    /// Start tracking a new subject.
    pub fn create_subject(&self) -> SubjectId {
        let mut arena = self.inner.arena.lock();
        if let Some(index) = arena.free.pop() {
            let slot = &mut arena.slots[index as usize];
            slot.alive = true;
            return SubjectId {
                index,
                generation: slot.generation,
            };
        }
        let index = arena.slots.len() as u32;
        arena.slots.push(Slot {
            generation: 0,
            alive: true,
            hooks: Vec::new(),
        });
        SubjectId {
            index,
            generation: 0,
        }
    }

    /// Whether the subject has not been destroyed yet.
    pub fn is_alive(&self, subject: SubjectId) -> bool {
        let arena = self.inner.arena.lock();
        arena
            .slots
            .get(subject.index as usize)
            .is_some_and(|slot| slot.generation == subject.generation && slot.alive)
    }

    /// Register interest in `subject`'s lifetime.
    ///
    /// Fails with [`VfsError::Stale`] if the subject is already destroyed,
    /// including while its notification pass is still running. The returned
    /// token unregisters the hook when dropped.
    pub fn register(
        &self,
        subject: SubjectId,
        hook: impl FnOnce(SubjectId) + Send + 'static,
    ) -> Result<WeakToken, VfsError> {
        let mut arena = self.inner.arena.lock();
        let key = arena.next_key;
        arena.next_key += 1;
        match arena.slots.get_mut(subject.index as usize) {
            Some(slot) if slot.generation == subject.generation && slot.alive => {
                slot.hooks.push(Hook {
                    key,
                    callback: Box::new(hook),
                });
            }
            _ => {
                return Err(VfsError::Stale(format!("subject {subject} already destroyed")));
            }
        }
        Ok(WeakToken {
            registry: Arc::downgrade(&self.inner),
            subject,
            key,
        })
    }

    /// Remove a registration. Equivalent to dropping the token.
    pub fn unregister(&self, token: WeakToken) {
        drop(token);
    }

    /// Number of hooks currently registered against `subject`.
    pub fn holder_count(&self, subject: SubjectId) -> usize {
        let arena = self.inner.arena.lock();
        arena
            .slots
            .get(subject.index as usize)
            .filter(|slot| slot.generation == subject.generation)
            .map_or(0, |slot| slot.hooks.len())
    }

    /// Mark `subject` destroyed and run every registered hook once.
    ///
    /// Hooks are taken out of the registry before any of them runs and are
    /// invoked with the lock released, so a hook may itself call back into
    /// the registry. Returns the number of hooks invoked; a subject that was
    /// already destroyed yields 0.
    pub fn notify_destroyed(&self, subject: SubjectId) -> usize {
        let hooks = {
            let mut arena = self.inner.arena.lock();
            let Some(slot) = arena.slots.get_mut(subject.index as usize) else {
                return 0;
            };
            if slot.generation != subject.generation || !slot.alive {
                return 0;
            }
            slot.alive = false;
            slot.generation = slot.generation.wrapping_add(1);
            let hooks = std::mem::take(&mut slot.hooks);
            arena.free.push(subject.index);
            hooks
        };

        let count = hooks.len();
        for hook in hooks {
            (hook.callback)(subject);
        }
        log::debug!("LifetimeRegistry: subject {subject} destroyed, notified {count} holders");
        count
    }
}

impl Default for LifetimeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Receipt for a registered hook. Dropping it unregisters the hook.
pub struct WeakToken {
    registry: Weak<RegistryInner>,
    subject: SubjectId,
    key: u64,
}

impl WeakToken {
    /// The subject this token is registered against.
    pub fn subject(&self) -> SubjectId {
        self.subject
    }
}

impl Drop for WeakToken {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.subject, self.key);
        }
    }
}

impl fmt::Debug for WeakToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakToken")
            .field("subject", &self.subject)
            .field("key", &self.key)
            .finish()
    }
}

/// Shared alive flag flipped by an invalidation hook.
///
/// Handles poll this instead of dereferencing the subject.
#[derive(Debug, Clone)]
pub struct Liveness {
    alive: Arc<AtomicBool>,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Flip the flag. Idempotent.
    pub fn invalidate(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// A hook suitable for [`LifetimeRegistry::register`].
    pub fn invalidator(&self) -> impl FnOnce(SubjectId) + Send + 'static {
        let alive = self.alive.clone();
        move |_| alive.store(false, Ordering::Release)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}
