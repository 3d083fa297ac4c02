// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Query descriptors and the archetype-list cache.
//!
//! A query selects archetypes by component composition: an archetype matches
//! iff its mask contains every required id and intersects no excluded id.
//! Optional ids only affect accessors. Resolved archetype lists are cached
//! keyed by the three masks; an entry is valid while the captured structure
//! version matches the world's and, for out-of-frame callers, while it is
//! younger than the TTL. Predicates and change filters are applied at
//! iteration time, never cached.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::archetype::Archetype;
use crate::entity::Entity;
use crate::mask::ComponentMask;

/// Bound on distinct cached query shapes.
const QUERY_CACHE_CAPACITY: usize = 256;

/// Iteration-time predicate over candidate entities.
pub type QueryPredicate = Arc<dyn Fn(Entity, &Archetype) -> bool + Send + Sync>;

/// Declarative entity selector.
#[derive(Clone, Default)]
pub struct QueryDescriptor {
    pub required: ComponentMask,
    pub excluded: ComponentMask,
    pub optional: ComponentMask,
    /// Yield only entities with a change newer than this version.
    ///
    /// When several components are in the change filter the semantics are
    /// union: an entity passes if *any* filtered component changed.
    pub changed_since: Option<u64>,
    /// Components participating in the change filter; empty means every
    /// required component participates.
    pub change_filter: ComponentMask,
    pub predicate: Option<QueryPredicate>,
    /// Slice size for batched iteration
    pub batch_size: usize,
}

impl QueryDescriptor {
    pub fn new() -> Self {
        Self {
            batch_size: 256,
            ..Self::default()
        }
    }

    /// Require a component.
    pub fn with(mut self, type_id: u32) -> Self {
        self.required.set(type_id as usize);
        self
    }

    /// Exclude archetypes containing this component.
    pub fn without(mut self, type_id: u32) -> Self {
        self.excluded.set(type_id as usize);
        self
    }

    /// Optional component: matching is unaffected; accessors may miss.
    pub fn optional(mut self, type_id: u32) -> Self {
        self.optional.set(type_id as usize);
        self
    }

    pub fn changed_since(mut self, version: u64) -> Self {
        self.changed_since = Some(version);
        self
    }

    /// Restrict the change filter to this component (repeatable).
    pub fn filter_changed(mut self, type_id: u32) -> Self {
        self.change_filter.set(type_id as usize);
        self
    }

    pub fn filter(mut self, predicate: impl Fn(Entity, &Archetype) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Composition test against an archetype mask.
    pub fn matches(&self, mask: &ComponentMask) -> bool {
        mask.contains_all(&self.required) && !mask.intersects(&self.excluded)
    }

    pub(crate) fn cache_key(&self) -> QueryKey {
        QueryKey {
            required: self.required.clone(),
            excluded: self.excluded.clone(),
            optional: self.optional.clone(),
        }
    }

    /// The mask whose columns drive the change filter.
    pub(crate) fn effective_change_filter(&self) -> &ComponentMask {
        if self.change_filter.is_empty() {
            &self.required
        } else {
            &self.change_filter
        }
    }
}

/// Cache key: the three masks. Change filters and predicates never key the
/// cache because they do not affect which archetypes match.
#[derive(Clone, PartialEq, Eq, Hash)]
pub(crate) struct QueryKey {
    required: ComponentMask,
    excluded: ComponentMask,
    optional: ComponentMask,
}

struct CachedQuery {
    archetypes: Vec<u32>,
    structure_version: u64,
    built_at: Instant,
}

/// Bounded archetype-list cache, pinned to the structure version.
pub(crate) struct QueryCache {
    entries: LruCache<QueryKey, CachedQuery>,
    ttl: Option<Duration>,
    hits: u64,
    misses: u64,
}

impl QueryCache {
    /// `ttl_ms == 0` disables the age check.
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(QUERY_CACHE_CAPACITY).unwrap()),
            ttl: (ttl_ms > 0).then(|| Duration::from_millis(ttl_ms)),
            hits: 0,
            misses: 0,
        }
    }

    /// Valid cached archetype list, if any. `pinned` is true while the
    /// scheduler drives a frame; versions are authoritative then and the TTL
    /// does not apply.
    pub fn get(&mut self, key: &QueryKey, structure_version: u64, pinned: bool) -> Option<Vec<u32>> {
        let entry = self.entries.get(key)?;
        if entry.structure_version != structure_version {
            self.misses += 1;
            return None;
        }
        if !pinned {
            if let Some(ttl) = self.ttl {
                if entry.built_at.elapsed() > ttl {
                    self.misses += 1;
                    return None;
                }
            }
        }
        self.hits += 1;
        Some(entry.archetypes.clone())
    }

    pub fn insert(&mut self, key: QueryKey, archetypes: Vec<u32>, structure_version: u64) {
        self.misses += 1;
        self.entries.put(
            key,
            CachedQuery {
                archetypes,
                structure_version,
                built_at: Instant::now(),
            },
        );
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> QueryCacheStats {
        QueryCacheStats {
            num_cached_queries: self.entries.len(),
            total_cached_archetypes: self.entries.iter().map(|(_, e)| e.archetypes.len()).sum(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

/// Statistics about the query cache
#[derive(Debug, Clone, Copy)]
pub struct QueryCacheStats {
    pub num_cached_queries: usize,
    pub total_cached_archetypes: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Union change test: did any filtered component of `entity` change after
/// `version`? Tag components carry no column and never report changes.
pub(crate) fn entity_changed(
    archetype: &Archetype,
    slot: u32,
    filter: &ComponentMask,
    version: u64,
) -> bool {
    for type_id in filter.ones() {
        if let Some(column) = archetype.column(type_id as u32) {
            if let Some(v) = column.version_of(slot) {
                if v > version {
                    return true;
                }
            }
        }
    }
    false
}
