use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::fix::LocationFix;

pub type FixCallback = Box<dyn FnMut(LocationFix) + Send>;
pub type TickCallback = Box<dyn FnMut() + Send>;

/// Handle returned by a source; `cancel` stops further callbacks.
/// Calling it twice is harmless.
pub trait Subscription: Send {
    fn cancel(&mut self);
}

/// Source of position fixes (platform location provider, log replay, ...)
pub trait LocationFeed: Send {
    fn subscribe(&mut self, on_fix: FixCallback) -> Box<dyn Subscription>;
}

/// Periodic clock driving elapsed time
pub trait TickSource: Send {
    fn subscribe(&mut self, interval: Duration, on_tick: TickCallback) -> Box<dyn Subscription>;
}

/// Single-subscriber callback holder shared between a source and its subscription
struct Slot<C> {
    current: Mutex<Option<(u64, C)>>,
    next_id: AtomicU64,
}

impl<C> Slot<C> {
    fn new() -> Self {
        Self {
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<(u64, C)>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn install(&self, callback: C) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *self.lock() = Some((id, callback));
        id
    }

    fn remove(&self, id: u64) {
        let mut current = self.lock();
        if matches!(current.as_ref(), Some((active, _)) if *active == id) {
            *current = None;
        }
    }

    fn is_active(&self) -> bool {
        self.lock().is_some()
    }
}

struct SlotSubscription<C: Send> {
    slot: Arc<Slot<C>>,
    id: u64,
}

impl<C: Send> Subscription for SlotSubscription<C> {
    fn cancel(&mut self) {
        self.slot.remove(self.id);
    }
}

/// Push-style feed: the host forwards each platform location callback to
/// [`ManualFeed::push`]. Clones share the same subscriber.
#[derive(Clone)]
pub struct ManualFeed {
    slot: Arc<Slot<FixCallback>>,
}

impl ManualFeed {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Slot::new()),
        }
    }

    /// Deliver a fix. Returns false when nobody is subscribed.
    pub fn push(&self, fix: LocationFix) -> bool {
        let mut current = self.slot.lock();
        match current.as_mut() {
            Some((_, on_fix)) => {
                on_fix(fix);
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.slot.is_active()
    }
}

impl Default for ManualFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationFeed for ManualFeed {
    fn subscribe(&mut self, on_fix: FixCallback) -> Box<dyn Subscription> {
        let id = self.slot.install(on_fix);
        Box::new(SlotSubscription {
            slot: self.slot.clone(),
            id,
        })
    }
}

/// Push-style clock; every [`ManualClock::tick`] is one period
#[derive(Clone)]
pub struct ManualClock {
    slot: Arc<Slot<TickCallback>>,
    interval: Arc<Mutex<Option<Duration>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Slot::new()),
            interval: Arc::new(Mutex::new(None)),
        }
    }

    pub fn tick(&self) -> bool {
        let mut current = self.slot.lock();
        match current.as_mut() {
            Some((_, on_tick)) => {
                on_tick();
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.slot.is_active()
    }

    /// Interval requested by the most recent subscriber
    pub fn interval(&self) -> Option<Duration> {
        *self.interval.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for ManualClock {
    fn subscribe(&mut self, interval: Duration, on_tick: TickCallback) -> Box<dyn Subscription> {
        *self.interval.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(interval);
        let id = self.slot.install(on_tick);
        Box::new(SlotSubscription {
            slot: self.slot.clone(),
            id,
        })
    }
}
