use std::any::Any;
use std::collections::BTreeMap;
use std::marker::PhantomData;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BbKey<T: 'static> {
    id: u64,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: 'static> Copy for BbKey<T> {}

impl<T: 'static> Clone for BbKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> BbKey<T> {
    pub const fn new(id: u64) -> Self {
        Self {
            id,
            _phantom: PhantomData,
        }
    }

    pub fn id(self) -> u64 {
        self.id
    }
}

/// Answer of an observer after it was told that a key changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BlackboardNotificationResult {
    RemoveObserver,
    ContinueObserving,
}

/// Registration handle returned by [`Blackboard::register_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverHandle(u64);

impl ObserverHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Typed key-value store shared by everything running on one agent.
///
/// Observation is pull based: writes mark observed keys dirty and the owner collects them with
/// [`Blackboard::drain_notifications`], so observers never run re-entrantly inside `set`.
#[derive(Default)]
pub struct Blackboard {
    values: BTreeMap<u64, Box<dyn Any>>,
    observers: BTreeMap<u64, Vec<ObserverHandle>>,
    dirty: Vec<u64>,
    next_observer: u64,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        let keys: Vec<u64> = self.values.keys().copied().collect();
        self.values.clear();
        for key in keys {
            self.mark_dirty(key);
        }
    }

    pub fn contains<T: 'static>(&self, key: BbKey<T>) -> bool {
        self.values.contains_key(&key.id)
    }

    pub fn set<T: 'static>(&mut self, key: BbKey<T>, value: T) {
        self.values.insert(key.id, Box::new(value));
        self.mark_dirty(key.id);
    }

    /// Stores `value` and reports whether the stored value actually changed.
    ///
    /// Observers are only notified on an actual change.
    pub fn set_if_changed<T: PartialEq + 'static>(&mut self, key: BbKey<T>, value: T) -> bool {
        if self.get(key) == Some(&value) {
            return false;
        }
        self.set(key, value);
        true
    }

    pub fn get<T: 'static>(&self, key: BbKey<T>) -> Option<&T> {
        let value = self.values.get(&key.id)?;
        value.downcast_ref::<T>().or_else(|| {
            panic!(
                "blackboard type mismatch for key id={} (stored type differs from requested)",
                key.id
            )
        })
    }

    /// Mutable access does not notify; call [`Blackboard::notify_changed`] after in-place edits
    /// that observers should see.
    pub fn get_mut<T: 'static>(&mut self, key: BbKey<T>) -> Option<&mut T> {
        let value = self.values.get_mut(&key.id)?;
        value.downcast_mut::<T>().or_else(|| {
            panic!(
                "blackboard type mismatch for key id={} (stored type differs from requested)",
                key.id
            )
        })
    }

    pub fn remove<T: 'static>(&mut self, key: BbKey<T>) -> Option<T> {
        let value = self.values.remove(&key.id)?;
        self.mark_dirty(key.id);
        value.downcast::<T>().map(|b| *b).ok().or_else(|| {
            panic!(
                "blackboard type mismatch for key id={} (stored type differs from requested)",
                key.id
            )
        })
    }

    pub fn notify_changed(&mut self, key_id: u64) {
        self.mark_dirty(key_id);
    }

    pub fn register_observer(&mut self, key_id: u64) -> ObserverHandle {
        let handle = ObserverHandle(self.next_observer);
        self.next_observer += 1;
        self.observers.entry(key_id).or_default().push(handle);
        handle
    }

    pub fn unregister_observer(&mut self, handle: ObserverHandle) -> bool {
        let mut removed = false;
        self.observers.retain(|_, handles| {
            let before = handles.len();
            handles.retain(|h| *h != handle);
            removed |= handles.len() != before;
            !handles.is_empty()
        });
        removed
    }

    pub fn observer_count(&self, key_id: u64) -> usize {
        self.observers.get(&key_id).map_or(0, Vec::len)
    }

    /// Pending `(observer, key id)` pairs in the order the keys changed.
    ///
    /// Keys changed several times since the last drain are reported once.
    pub fn drain_notifications(&mut self) -> Vec<(ObserverHandle, u64)> {
        let dirty = std::mem::take(&mut self.dirty);
        let mut out = Vec::new();
        for key in dirty {
            if let Some(handles) = self.observers.get(&key) {
                out.extend(handles.iter().map(|h| (*h, key)));
            }
        }
        out
    }

    fn mark_dirty(&mut self, key_id: u64) {
        if self.observers.contains_key(&key_id) && !self.dirty.contains(&key_id) {
            self.dirty.push(key_id);
        }
    }
}
