//! Typed listener registries.
//!
//! Each socket event (read, sent, disconnected, accepted) owns one
//! `Listeners<F>` where `F` is the boxed callback type for that event.
//! Fan-out is synchronous and ordered: listeners run on the caller's stack
//! in registration order, one after the other, with no isolation between
//! them.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(0);

/// Token returned by listener registration, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Ordered collection of listeners for one event.
///
/// Listeners added while the event is being dispatched only run from the
/// next emission; likewise, removing a listener from inside its own event's
/// dispatch takes effect on the next emission.
pub struct Listeners<F> {
    entries: Vec<(ListenerId, F)>,
}

impl<F> Listeners<F> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds a listener, returning a token that can later remove it.
    pub fn add(&mut self, listener: F) -> ListenerId {
        let id = ListenerId::next();
        self.entries.push((id, listener));
        id
    }

    /// Removes a listener by token. Returns true if it was present.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates the listeners in registration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut F> {
        self.entries.iter_mut().map(|(_, f)| f)
    }

    /// Reinstalls a listener set that was taken out for dispatch.
    ///
    /// Listeners registered while `taken` was out (they landed in `self`)
    /// are appended after the original ones.
    pub(crate) fn restore(&mut self, mut taken: Self) {
        taken.entries.append(&mut self.entries);
        self.entries = taken.entries;
    }
}

impl<F> Default for Listeners<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_in_registration_order() {
        let mut listeners: Listeners<Box<dyn FnMut(&mut Vec<u32>)>> = Listeners::new();
        listeners.add(Box::new(|log| log.push(1)));
        listeners.add(Box::new(|log| log.push(2)));
        listeners.add(Box::new(|log| log.push(3)));

        let mut log = Vec::new();
        for f in listeners.iter_mut() {
            f(&mut log);
        }
        assert_eq!(log, vec![1, 2, 3]);
    }

    #[test]
    fn removal_by_token() {
        let mut listeners: Listeners<Box<dyn FnMut(&mut Vec<u32>)>> = Listeners::new();
        let first = listeners.add(Box::new(|log| log.push(1)));
        listeners.add(Box::new(|log| log.push(2)));

        assert!(listeners.remove(first));
        assert!(!listeners.remove(first));

        let mut log = Vec::new();
        for f in listeners.iter_mut() {
            f(&mut log);
        }
        assert_eq!(log, vec![2]);
    }

    #[test]
    fn restore_keeps_originals_first() {
        let mut listeners: Listeners<u32> = Listeners::new();
        listeners.add(10);
        listeners.add(20);

        let taken = std::mem::take(&mut listeners);
        // Listener added mid-dispatch lands in the fresh set.
        listeners.add(30);
        listeners.restore(taken);

        let order: Vec<u32> = listeners.iter_mut().map(|v| *v).collect();
        assert_eq!(order, vec![10, 20, 30]);
    }
}
