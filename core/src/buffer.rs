use std::collections::{HashMap, VecDeque};

/// Fixed capacity, insertion ordered store keyed by event id.
///
/// Pushing at capacity evicts the oldest entry. Replacing an entry in place
/// never changes its position and never evicts.
#[derive(Debug, Clone)]
pub struct EventBuffer<V> {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, V>,
}

impl<V> EventBuffer<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Append `value` under `id`, evicting the oldest entry when full.
    ///
    /// Returns the id of the evicted entry, if any. Pushing an id that is
    /// already buffered overwrites the value at its original position.
    pub fn push(&mut self, id: impl Into<String>, value: V) -> Option<String> {
        let id = id.into();
        if let Some(existing) = self.entries.get_mut(&id) {
            *existing = value;
            return None;
        }
        if self.capacity == 0 {
            return None;
        }
        let mut evicted = None;
        if self.order.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.entries.remove(&old);
                evicted = Some(old);
            }
        }
        self.order.push_back(id.clone());
        self.entries.insert(id, value);
        evicted
    }

    pub fn get(&self, id: &str) -> Option<&V> {
        self.entries.get(id)
    }

    /// Mutate the entry stored under `id` in place. Returns false when the
    /// id is not (or no longer) buffered.
    pub fn replace<F>(&mut self, id: &str, mutator: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        match self.entries.get_mut(id) {
            Some(value) => {
                mutator(value);
                true
            }
            None => false,
        }
    }

    /// Entries in insertion order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> + '_ {
        self.order.iter().filter_map(move |id| {
            self.entries.get(id).map(|value| (id.as_str(), value))
        })
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, value)| value)
    }
}
