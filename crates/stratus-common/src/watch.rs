//! Added/Updated/Deleted view over a kube-rs watcher stream
//!
//! `kube::runtime::watcher` only reports the latest state of an object. Route
//! and crash handling need the previous state as well, so [`WatchCache`] keeps
//! the last seen copy of every object and turns watcher events into
//! [`ObjectEvent`]s. A relist (`Init` .. `InitDone`) is diffed against the
//! cache so objects removed while the watch was down still produce `Deleted`.

use std::collections::BTreeMap;

use kube::runtime::watcher::Event;
use kube::{Resource, ResourceExt};

/// Change notification carrying the previous state for updates
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectEvent<K> {
    /// Object seen for the first time
    Added(K),
    /// Object changed
    Updated {
        /// Last cached state
        old: K,
        /// Current state
        new: K,
    },
    /// Object removed
    Deleted(K),
}

/// Last-seen state of watched objects keyed by `namespace/name`
#[derive(Debug)]
pub struct WatchCache<K> {
    objects: BTreeMap<String, K>,
    relist: Option<BTreeMap<String, K>>,
}

impl<K> Default for WatchCache<K> {
    fn default() -> Self {
        Self {
            objects: BTreeMap::new(),
            relist: None,
        }
    }
}

fn cache_key<K: Resource>(obj: &K) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

fn same_revision<K: Resource>(a: &K, b: &K) -> bool {
    match (a.resource_version(), b.resource_version()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

impl<K: Resource + Clone> WatchCache<K> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Feed one watcher event, returning the resulting object events
    pub fn apply(&mut self, event: Event<K>) -> Vec<ObjectEvent<K>> {
        match event {
            Event::Apply(obj) => self.upsert(obj).into_iter().collect(),
            Event::Delete(obj) => {
                let cached = self.objects.remove(&cache_key(&obj));
                vec![ObjectEvent::Deleted(cached.unwrap_or(obj))]
            }
            Event::Init => {
                self.relist = Some(BTreeMap::new());
                Vec::new()
            }
            Event::InitApply(obj) => {
                self.relist
                    .get_or_insert_with(BTreeMap::new)
                    .insert(cache_key(&obj), obj);
                Vec::new()
            }
            Event::InitDone => self.finish_relist(),
        }
    }

    fn upsert(&mut self, obj: K) -> Option<ObjectEvent<K>> {
        match self.objects.insert(cache_key(&obj), obj.clone()) {
            None => Some(ObjectEvent::Added(obj)),
            Some(old) if same_revision(&old, &obj) => None,
            Some(old) => Some(ObjectEvent::Updated { old, new: obj }),
        }
    }

    fn finish_relist(&mut self) -> Vec<ObjectEvent<K>> {
        let fresh = self.relist.take().unwrap_or_default();
        let mut events = Vec::new();

        let stale: Vec<String> = self
            .objects
            .keys()
            .filter(|key| !fresh.contains_key(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(old) = self.objects.remove(&key) {
                events.push(ObjectEvent::Deleted(old));
            }
        }

        for obj in fresh.into_values() {
            events.extend(self.upsert(obj));
        }
        events
    }
}
