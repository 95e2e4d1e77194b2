//! Entity registry
//!
//! Concurrent map of uid to [`Item`]. Each entry is updated atomically under its
//! shard lock; scans are weakly consistent and unordered.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::model::Item;

#[derive(Debug, Default)]
pub struct EntityRegistry {
    items: DashMap<String, Item>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `uid`, returning the previous one
    pub fn upsert(&self, uid: impl Into<String>, item: Item) -> Option<Item> {
        self.items.insert(uid.into(), item)
    }

    /// Update the entry in place if present, otherwise insert `create()`.
    ///
    /// Returns true when a new entry was created.
    pub fn upsert_with<C, U>(&self, uid: &str, create: C, update: U) -> bool
    where
        C: FnOnce() -> Item,
        U: FnOnce(&mut Item),
    {
        match self.items.entry(uid.to_string()) {
            Entry::Occupied(mut entry) => {
                update(entry.get_mut());
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(create());
                true
            }
        }
    }

    /// Run `f` on the entry for `uid`, if any
    pub fn update<R>(&self, uid: &str, f: impl FnOnce(&mut Item) -> R) -> Option<R> {
        self.items.get_mut(uid).map(|mut item| f(item.value_mut()))
    }

    pub fn get(&self, uid: &str) -> Option<Item> {
        self.items.get(uid).map(|item| item.value().clone())
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.items.contains_key(uid)
    }

    pub fn remove(&self, uid: &str) -> Option<Item> {
        self.items.remove(uid).map(|(_, item)| item)
    }

    /// Visit every entry. Must not call back into the registry.
    pub fn for_each(&self, mut visitor: impl FnMut(&Item)) {
        for item in self.items.iter() {
            visitor(item.value());
        }
    }

    /// Keep only entries for which `f` returns true; `f` may mutate the entry
    pub fn retain(&self, mut f: impl FnMut(&mut Item) -> bool) {
        self.items.retain(|_, item| f(item));
    }

    /// Cloned copy of every entry
    pub fn snapshot(&self) -> Vec<Item> {
        let mut items = Vec::with_capacity(self.items.len());
        self.for_each(|item| items.push(item.clone()));
        items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
