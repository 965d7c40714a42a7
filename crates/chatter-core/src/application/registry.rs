//! Keyed handler registry with replace-not-append semantics.

use std::sync::Mutex;

/// Ordered map from a purpose key to exactly one handler.
///
/// Re-registering a key swaps the handler in place and keeps its original
/// position, so dispatch order is first-registration order.
pub struct HandlerRegistry<K, H> {
    entries: Mutex<Vec<(K, H)>>,
}

impl<K: PartialEq, H: Clone> HandlerRegistry<K, H> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, key: K, handler: H) {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = handler,
            None => entries.push((key, handler)),
        }
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handlers in dispatch order. Cloned out so a handler may re-register
    /// without deadlocking.
    pub fn snapshot(&self) -> Vec<H> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, h)| h.clone())
            .collect()
    }
}

impl<K: PartialEq, H: Clone> Default for HandlerRegistry<K, H> {
    fn default() -> Self {
        Self::new()
    }
}
