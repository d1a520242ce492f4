use std::collections::btree_map::{BTreeMap, Entry};
use std::collections::BTreeSet;

use crate::azure::ClientSet;
use crate::types::{ClientSetConfig, ClusterIdentity};

#[derive(Debug, Clone)]
pub struct CacheEntry<S> {
    /// Identity whose credential was seen first for this subscription.
    pub identity: ClusterIdentity,
    pub config: ClientSetConfig,
    pub client_set: S,
}

/// Client sets of one scrape, at most one per subscription. First seen
/// wins, later ones for the same subscription are dropped.
///
/// Lives for one scrape only. Credentials are resolved again on the next
/// one so rotated secrets get picked up.
#[derive(Debug, Clone)]
pub struct ClientSetCache<S = ClientSet> {
    entries: BTreeMap<String, CacheEntry<S>>,
}

impl<S> Default for ClientSetCache<S> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<S> ClientSetCache<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (ClusterIdentity, ClientSetConfig, S)>,
    {
        let mut cache = Self::new();
        for (identity, config, client_set) in entries {
            cache.insert(identity, config, client_set);
        }
        cache
    }

    /// Returns false, and drops the triple, if the subscription is taken.
    pub fn insert(&mut self, identity: ClusterIdentity, config: ClientSetConfig, client_set: S) -> bool {
        match self.entries.entry(config.dedup_key().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(CacheEntry {
                    identity,
                    config,
                    client_set,
                });
                true
            }
        }
    }

    pub fn contains(&self, subscription_id: &str) -> bool {
        self.entries.contains_key(subscription_id)
    }

    pub fn get(&self, subscription_id: &str) -> Option<&CacheEntry<S>> {
        self.entries.get(subscription_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry<S>> {
        self.entries.values()
    }
}

/// Keep the first item per key, preserving order. Used to drop duplicate
/// subscriptions before any client is built for them.
pub fn dedup_first_seen<T, K, F>(items: impl IntoIterator<Item = T>, key: F) -> Vec<T>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut seen = BTreeSet::new();
    items.into_iter().filter(|item| seen.insert(key(item))).collect()
}
