/// Per-scope indexed collections.
///
/// A [`ScopeMemory`] holds one [`StratumStore`] per tier plus a locator index
/// (`id → stratum`) so lookups by id never scan tiers. Each store keeps a tag
/// index next to its entries. All invariants about tier membership live here:
/// an id is present in exactly one store, and the locator always agrees.
use std::collections::{HashMap, HashSet};

use crate::types::{MemoryEntry, MemoryId, Stratum};

/// Entries of one stratum with a tag index.
#[derive(Debug, Default, Clone)]
pub struct StratumStore {
    entries: HashMap<MemoryId, MemoryEntry>,
    tag_index: HashMap<String, HashSet<MemoryId>>,
}

impl StratumStore {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&MemoryEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.entries.values()
    }

    /// Ids carrying `tag`.
    pub fn ids_with_tag(&self, tag: &str) -> Option<&HashSet<MemoryId>> {
        self.tag_index.get(tag)
    }

    fn insert(&mut self, entry: MemoryEntry) {
        for tag in &entry.tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(entry.id.clone());
        }
        self.entries.insert(entry.id.clone(), entry);
    }

    fn remove(&mut self, id: &str) -> Option<MemoryEntry> {
        let entry = self.entries.remove(id)?;
        self.unindex(&entry);
        Some(entry)
    }

    fn unindex(&mut self, entry: &MemoryEntry) {
        for tag in &entry.tags {
            if let Some(ids) = self.tag_index.get_mut(tag) {
                ids.remove(&entry.id);
                if ids.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
    }

    /// Mutate an entry in place, re-indexing its tags afterwards.
    fn update<R>(&mut self, id: &str, f: impl FnOnce(&mut MemoryEntry) -> R) -> Option<R> {
        let mut entry = self.remove(id)?;
        let result = f(&mut entry);
        self.insert(entry);
        Some(result)
    }

    /// Mutate an entry whose tags are known not to change.
    fn touch<R>(&mut self, id: &str, f: impl FnOnce(&mut MemoryEntry) -> R) -> Option<R> {
        self.entries.get_mut(id).map(f)
    }
}

/// All memory owned by one scope.
#[derive(Debug, Clone)]
pub struct ScopeMemory {
    strata: [StratumStore; 5],
    locator: HashMap<MemoryId, Stratum>,

    /// Cycles seen by this scope
    pub(crate) cycle_count: u64,

    /// Cycle number of the last maintenance pass per stratum
    pub(crate) last_updated: [u64; 5],
}

impl Default for ScopeMemory {
    fn default() -> Self {
        Self {
            strata: Default::default(),
            locator: HashMap::new(),
            cycle_count: 0,
            last_updated: [0; 5],
        }
    }
}

impl ScopeMemory {
    pub fn stratum(&self, stratum: Stratum) -> &StratumStore {
        &self.strata[stratum.index()]
    }

    pub fn len(&self) -> usize {
        self.locator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locator.is_empty()
    }

    /// Which stratum holds `id`, if any.
    pub fn locate(&self, id: &str) -> Option<Stratum> {
        self.locator.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&MemoryEntry> {
        let stratum = self.locate(id)?;
        self.stratum(stratum).get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.strata.iter().flat_map(|s| s.iter())
    }

    /// Insert into the stratum named by `entry.stratum`. Replaces any entry
    /// with the same id, wherever it lives.
    pub fn insert(&mut self, entry: MemoryEntry) {
        self.remove(&entry.id);
        self.locator.insert(entry.id.clone(), entry.stratum);
        self.strata[entry.stratum.index()].insert(entry);
    }

    pub fn remove(&mut self, id: &str) -> Option<MemoryEntry> {
        let stratum = self.locator.remove(id)?;
        self.strata[stratum.index()].remove(id)
    }

    /// Move `id` from `from` to `to`, applying `f` to the entry on the way.
    ///
    /// Returns `None` and changes nothing when the entry is not in `from`.
    pub fn relocate(
        &mut self,
        id: &str,
        from: Stratum,
        to: Stratum,
        f: impl FnOnce(&mut MemoryEntry),
    ) -> Option<&MemoryEntry> {
        if self.locate(id) != Some(from) {
            return None;
        }
        let mut entry = self.strata[from.index()].remove(id)?;
        f(&mut entry);
        entry.stratum = to;
        self.locator.insert(entry.id.clone(), to);
        let key = entry.id.clone();
        self.strata[to.index()].insert(entry);
        self.strata[to.index()].get(&key)
    }

    /// Mutate an entry, re-indexing tags.
    pub fn update<R>(&mut self, id: &str, f: impl FnOnce(&mut MemoryEntry) -> R) -> Option<R> {
        let stratum = self.locate(id)?;
        self.strata[stratum.index()].update(id, f)
    }

    /// Mutate an entry without touching its tags (counters, links).
    pub fn touch<R>(&mut self, id: &str, f: impl FnOnce(&mut MemoryEntry) -> R) -> Option<R> {
        let stratum = self.locate(id)?;
        self.strata[stratum.index()].touch(id, f)
    }
}
