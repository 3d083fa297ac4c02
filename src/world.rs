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

//! World: the top-level owner.
//!
//! Owns the entity store, archetype graph, query cache, deferred command
//! queue, relation graph and scheduler. All structural mutation goes through
//! the world's `&mut` API; during a frame, systems defer structural changes
//! to the command buffer, which the world drains between phases.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::archetype::Archetype;
use crate::column::GpuSyncSink;
use crate::command::{CommandQueue, CommandSender, DeferredCommand};
use crate::component::{TypeInfo, TypeRegistry};
use crate::entity::{Entity, EntityFlags, EntityStore, NO_ARCHETYPE};
use crate::error::{EcsError, Result};
use crate::event::{EcsEvent, EventBus, EventSubscriber};
use crate::executor::{SafeExecutor, SystemStats, WorkerPool};
use crate::graph::ArchetypeGraph;
use crate::mask::ComponentMask;
use crate::query::{entity_changed, QueryCache, QueryCacheStats, QueryDescriptor};
use crate::relation::RelationGraph;
use crate::schedule::{FrameParams, ScheduleDebugInfo, Scheduler};
use crate::snapshot::{SnapshotArchetype, SnapshotEntity, SnapshotType, WorldSnapshot};
use crate::system::{BoxedSystem, FrameScratch, Phase, SystemContext, SystemDescriptor, SystemId, SystemState};

/// World configuration, enumerated and serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub max_entities: usize,
    /// Dedicated worker threads; 0 runs everything inline
    pub worker_count: usize,
    pub deferred_buffer_capacity: usize,
    /// 0 disables the TTL; versions alone govern cache validity
    pub query_cache_ttl_ms: u64,
    pub track_changes: bool,
    pub enable_events: bool,
    /// Pre-allocate column buffers at archetype creation
    pub off_heap_storage: bool,
    /// 0 disables frame-budget gating
    pub frame_budget_ns: u64,
    /// 0 disables the per-system budget
    pub per_system_budget_ns: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            max_entities: 1_000_000,
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(0),
            deferred_buffer_capacity: 16_384,
            query_cache_ttl_ms: 100,
            track_changes: true,
            enable_events: false,
            off_heap_storage: true,
            frame_budget_ns: 0,
            per_system_budget_ns: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorldState {
    Running,
    Paused,
    Shutdown,
}

/// Central ECS world.
pub struct World {
    config: WorldConfig,
    registry: Arc<TypeRegistry>,
    entities: EntityStore,
    graph: ArchetypeGraph,
    query_cache: Mutex<QueryCache>,
    commands: CommandQueue,
    relations: RelationGraph,
    events: Option<EventBus>,
    scheduler: Scheduler,
    pool: Option<Arc<WorkerPool>>,
    executor: SafeExecutor,
    scratch: FrameScratch,

    /// Bumped on every structural change, before queries can observe it
    structure_version: AtomicU64,
    /// Strictly increasing stamp for component writes
    change_version: AtomicU64,
    /// True while the scheduler drives a frame; pins the query cache to
    /// versions and disables the TTL check
    in_frame: AtomicBool,

    frame_number: u64,
    total_seconds: f64,
    state: WorldState,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    pub fn with_config(config: WorldConfig) -> Self {
        Self::with_registry(config, Arc::new(TypeRegistry::new()))
    }

    /// Build a world sharing an existing registry (several worlds may share
    /// one registry; type ids are then interchangeable between them).
    pub fn with_registry(config: WorldConfig, registry: Arc<TypeRegistry>) -> Self {
        let pool = Self::build_pool(&config);
        let executor = SafeExecutor::new(pool.clone());

        let mut world = Self {
            entities: EntityStore::new(config.max_entities),
            graph: ArchetypeGraph::new(config.track_changes),
            query_cache: Mutex::new(QueryCache::new(config.query_cache_ttl_ms)),
            commands: CommandQueue::new(config.deferred_buffer_capacity),
            relations: RelationGraph::new(),
            events: config.enable_events.then(EventBus::new),
            scheduler: Scheduler::new(),
            pool,
            executor,
            scratch: FrameScratch::new(),
            structure_version: AtomicU64::new(0),
            change_version: AtomicU64::new(0),
            in_frame: AtomicBool::new(false),
            frame_number: 0,
            total_seconds: 0.0,
            state: WorldState::Running,
            registry,
            config,
        };
        world.publish(EcsEvent::WorldInitialized);
        world
    }

    #[cfg(feature = "parallel")]
    fn build_pool(config: &WorldConfig) -> Option<Arc<WorkerPool>> {
        (config.worker_count > 0).then(|| Arc::new(WorkerPool::new(config.worker_count)))
    }

    #[cfg(not(feature = "parallel"))]
    fn build_pool(_config: &WorldConfig) -> Option<Arc<WorkerPool>> {
        None
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Convenience passthrough to the shared registry.
    pub fn register_component(&self, info: TypeInfo) -> Result<u32> {
        self.registry.register(info)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == WorldState::Shutdown {
            return Err(EcsError::ResourceClosed);
        }
        Ok(())
    }

    fn publish(&mut self, event: EcsEvent) {
        if let Some(bus) = &mut self.events {
            bus.publish(event);
        }
    }

    /// Subscribe to lifecycle events. No-op storage unless
    /// `enable_events` was set in the config.
    pub fn subscribe(&mut self, subscriber: Box<dyn EventSubscriber>) {
        if let Some(bus) = &mut self.events {
            bus.subscribe(subscriber);
        } else {
            tracing::warn!("subscriber registered but events are disabled in the world config");
        }
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.events.as_ref()
    }

    fn bump_structure_version(&self) {
        self.structure_version.fetch_add(1, Ordering::AcqRel);
    }

    pub fn structure_version(&self) -> u64 {
        self.structure_version.load(Ordering::Acquire)
    }

    /// Current write stamp; `changed_since` filters compare against values
    /// observed here.
    pub fn change_version(&self) -> u64 {
        self.change_version.load(Ordering::Acquire)
    }

    fn next_change_version(&self) -> u64 {
        self.change_version.fetch_add(1, Ordering::AcqRel) + 1
    }

    // ========== Entity lifecycle ==========

    pub fn create_entity(&mut self) -> Result<Entity> {
        self.ensure_open()?;
        let entity = self.entities.create()?;
        self.bump_structure_version();
        self.publish(EcsEvent::EntityCreated(entity));
        Ok(entity)
    }

    /// Create an entity already placed in the archetype for `type_ids`.
    /// Component data is not initialized; write it with `add_component`.
    pub fn create_entity_with(&mut self, type_ids: &[u32]) -> Result<Entity> {
        self.ensure_open()?;
        let mask = self.registry.compute_mask(type_ids)?;
        let entity = self.entities.create()?;

        let archetype_id = self.get_or_create_archetype(&mask)?;
        let archetype = self.graph.get_mut(archetype_id).expect("just created");
        let row = archetype.push_entity(entity);
        self.entities.set_archetype_id(entity.slot(), archetype_id as i32);
        self.entities.set_row(entity.slot(), row as u32);

        self.bump_structure_version();
        self.publish(EcsEvent::EntityCreated(entity));
        for &type_id in type_ids {
            self.publish(EcsEvent::ComponentAdded(entity, type_id));
        }
        Ok(entity)
    }

    /// Create `count` entities in one archetype with one lookup.
    pub fn create_entities_with(&mut self, type_ids: &[u32], count: usize) -> Result<Vec<Entity>> {
        self.ensure_open()?;
        if count > 10_000_000 {
            return Err(EcsError::BatchTooLarge);
        }

        #[cfg(feature = "profiling")]
        let span = info_span!("world.create_batch", count, components = type_ids.len());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let mask = self.registry.compute_mask(type_ids)?;
        let archetype_id = self.get_or_create_archetype(&mask)?;

        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            let entity = self.entities.create()?;
            let archetype = self.graph.get_mut(archetype_id).expect("exists");
            let row = archetype.push_entity(entity);
            self.entities.set_archetype_id(entity.slot(), archetype_id as i32);
            self.entities.set_row(entity.slot(), row as u32);
            created.push(entity);
        }

        self.bump_structure_version();
        for &entity in &created {
            self.publish(EcsEvent::EntityCreated(entity));
        }
        Ok(created)
    }

    /// Destroy an entity. Invalid handles are a no-op. Children are
    /// detached, not destroyed.
    pub fn destroy(&mut self, entity: Entity) {
        if !self.entities.is_valid(entity) {
            return;
        }
        self.publish(EcsEvent::EntityDestroying(entity));

        let archetype_id = self.entities.archetype_id(entity.slot());
        if archetype_id != NO_ARCHETYPE {
            let row = self.entities.row(entity.slot());
            let archetype = self
                .graph
                .get_mut(archetype_id as u32)
                .expect("entity archetype exists");
            if let Some(swapped) = archetype.remove_entity(row as usize) {
                self.entities.set_row(swapped.slot(), row);
            }
        }

        self.relations.detach(entity.slot());
        self.entities.release(entity);
        self.bump_structure_version();
        self.publish(EcsEvent::EntityDestroyed(entity));
    }

    /// Destroy an entity and its whole child subtree.
    pub fn destroy_recursive(&mut self, entity: Entity) {
        let children = self.get_children(entity);
        for child in children {
            self.destroy_recursive(child);
        }
        self.destroy(entity);
    }

    pub fn is_valid(&self, entity: Entity) -> bool {
        self.entities.is_valid(entity)
    }

    /// Explicit validity check for callers that want the error instead of
    /// the mutators' silent no-op.
    pub fn validate(&self, entity: Entity) -> Result<()> {
        if self.entities.is_valid(entity) {
            Ok(())
        } else {
            Err(EcsError::InvalidEntity(entity))
        }
    }

    pub fn set_flag(&self, entity: Entity, flag: EntityFlags, value: bool) {
        self.entities.set_flag(entity, flag, value);
    }

    pub fn has_flag(&self, entity: Entity, flag: EntityFlags) -> bool {
        self.entities.has_flag(entity, flag)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    pub fn recycled_entity_count(&self) -> usize {
        self.entities.recycled_count()
    }

    // ========== Components & migration ==========

    fn get_or_create_archetype(&mut self, mask: &ComponentMask) -> Result<u32> {
        let entry = self.graph.get_or_create(mask, &self.registry)?;
        if entry.created {
            if self.config.off_heap_storage {
                let archetype = self.graph.get_mut(entry.archetype_id).expect("exists");
                for column in archetype.columns_mut() {
                    column.reserve(crate::column::INITIAL_CAPACITY);
                }
            }
            self.bump_structure_version();
            self.publish(EcsEvent::ArchetypeCreated(entry.archetype_id));
        }
        Ok(entry.archetype_id)
    }

    /// Add (or overwrite) a component on an entity.
    ///
    /// Adding a type the entity lacks migrates it to the neighboring
    /// archetype, copying every other component byte-for-byte. Writing a
    /// type it already has is an in-place overwrite with no structural
    /// effect. Invalid entities are a no-op.
    pub fn add_component(&mut self, entity: Entity, type_id: u32, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let descriptor = self.registry.get(type_id)?;
        if !self.entities.is_valid(entity) {
            return Ok(());
        }

        #[cfg(feature = "profiling")]
        let span = info_span!("world.add_component", type_id);
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let slot = entity.slot();
        let source_id = self.entities.archetype_id(slot);

        // Overwrite in place when the composition already includes the type.
        if source_id != NO_ARCHETYPE {
            let source = self.graph.get_mut(source_id as u32).expect("exists");
            if source.contains_type(type_id) {
                if !descriptor.is_tag() {
                    let version = self.change_version.fetch_add(1, Ordering::AcqRel) + 1;
                    source
                        .column_mut(type_id)
                        .expect("non-tag member column")
                        .insert(slot, bytes, version)?;
                }
                source.bump_version();
                return Ok(());
            }
        }

        if !descriptor.is_tag() && bytes.len() < descriptor.size as usize {
            return Err(EcsError::BufferTooSmall {
                expected: descriptor.size as usize,
                actual: bytes.len(),
            });
        }

        // Cached edge first; fall back to the graph by mask on a miss.
        let cached_edge = match source_id {
            NO_ARCHETYPE => None,
            id => self.graph.get(id as u32).expect("exists").add_edge(type_id),
        };
        let destination_id = match cached_edge {
            Some(id) => id,
            None => {
                let mut new_mask = match source_id {
                    NO_ARCHETYPE => ComponentMask::new(),
                    id => self.graph.get(id as u32).expect("exists").mask().clone(),
                };
                new_mask.set(type_id as usize);
                self.get_or_create_archetype(&new_mask)?
            }
        };
        let version = self.next_change_version();

        if source_id == NO_ARCHETYPE {
            let destination = self.graph.get_mut(destination_id).expect("exists");
            let row = destination.push_entity(entity);
            if !descriptor.is_tag() {
                destination
                    .column_mut(type_id)
                    .expect("non-tag member column")
                    .insert(slot, bytes, version)?;
            }
            self.entities.set_archetype_id(slot, destination_id as i32);
            self.entities.set_row(slot, row as u32);
        } else {
            let old_row = self.entities.row(slot);
            let (source, destination) = self
                .graph
                .get_pair_mut(source_id as u32, destination_id)
                .expect("distinct archetypes");

            // Record the migration edge both ways.
            source.set_add_edge(type_id, destination_id);
            destination.set_remove_edge(type_id, source_id as u32);

            let row = destination.push_entity(entity);
            for &member in source.signature() {
                let Some(source_column) = source.column(member) else {
                    continue; // tag
                };
                if let Some(data) = source_column.get(slot) {
                    destination
                        .column_mut(member)
                        .expect("shared member column")
                        .insert(slot, data, version)?;
                }
            }
            if !descriptor.is_tag() {
                destination
                    .column_mut(type_id)
                    .expect("non-tag member column")
                    .insert(slot, bytes, version)?;
            }

            if let Some(swapped) = source.remove_entity(old_row as usize) {
                self.entities.set_row(swapped.slot(), old_row);
            }
            self.entities.set_archetype_id(slot, destination_id as i32);
            self.entities.set_row(slot, row as u32);
        }

        self.bump_structure_version();
        self.publish(EcsEvent::ComponentAdded(entity, type_id));
        Ok(())
    }

    /// Remove a component, migrating the entity to the neighboring
    /// archetype. Missing components and invalid entities are a no-op.
    pub fn remove_component(&mut self, entity: Entity, type_id: u32) -> Result<()> {
        self.ensure_open()?;
        self.registry.get(type_id)?;
        if !self.entities.is_valid(entity) {
            return Ok(());
        }

        let slot = entity.slot();
        let source_id = self.entities.archetype_id(slot);
        if source_id == NO_ARCHETYPE {
            return Ok(());
        }
        if !self
            .graph
            .get(source_id as u32)
            .expect("exists")
            .contains_type(type_id)
        {
            return Ok(());
        }

        self.publish(EcsEvent::ComponentRemoving(entity, type_id));

        let mut new_mask = self.graph.get(source_id as u32).expect("exists").mask().clone();
        new_mask.clear(type_id as usize);
        let old_row = self.entities.row(slot);

        if new_mask.is_empty() {
            let source = self.graph.get_mut(source_id as u32).expect("exists");
            if let Some(swapped) = source.remove_entity(old_row as usize) {
                self.entities.set_row(swapped.slot(), old_row);
            }
            self.entities.set_archetype_id(slot, NO_ARCHETYPE);
            self.entities.set_row(slot, 0);
        } else {
            let cached_edge = self
                .graph
                .get(source_id as u32)
                .expect("exists")
                .remove_edge(type_id);
            let destination_id = match cached_edge {
                Some(id) => id,
                None => self.get_or_create_archetype(&new_mask)?,
            };
            let version = self.next_change_version();
            let (source, destination) = self
                .graph
                .get_pair_mut(source_id as u32, destination_id)
                .expect("distinct archetypes");

            source.set_remove_edge(type_id, destination_id);
            destination.set_add_edge(type_id, source_id as u32);

            let row = destination.push_entity(entity);
            for &member in source.signature() {
                if member == type_id {
                    continue;
                }
                let Some(source_column) = source.column(member) else {
                    continue; // tag
                };
                if let Some(data) = source_column.get(slot) {
                    destination
                        .column_mut(member)
                        .expect("shared member column")
                        .insert(slot, data, version)?;
                }
            }

            if let Some(swapped) = source.remove_entity(old_row as usize) {
                self.entities.set_row(swapped.slot(), old_row);
            }
            self.entities.set_archetype_id(slot, destination_id as i32);
            self.entities.set_row(slot, row as u32);
        }

        self.bump_structure_version();
        self.publish(EcsEvent::ComponentRemoved(entity, type_id));
        Ok(())
    }

    pub fn has_component(&self, entity: Entity, type_id: u32) -> bool {
        if !self.entities.is_valid(entity) {
            return false;
        }
        match self.entities.archetype_id(entity.slot()) {
            NO_ARCHETYPE => false,
            id => self
                .graph
                .get(id as u32)
                .is_some_and(|a| a.contains_type(type_id)),
        }
    }

    /// Borrow the raw component bytes. `None` for invalid entities, absent
    /// components and tags.
    pub fn get_component(&self, entity: Entity, type_id: u32) -> Option<&[u8]> {
        if !self.entities.is_valid(entity) {
            return None;
        }
        let archetype_id = self.entities.archetype_id(entity.slot());
        if archetype_id == NO_ARCHETYPE {
            return None;
        }
        self.graph
            .get(archetype_id as u32)?
            .column(type_id)?
            .get(entity.slot())
    }

    /// Mutable component bytes; stamps the change version and extends the
    /// column's dirty range.
    pub fn get_component_mut(&mut self, entity: Entity, type_id: u32) -> Option<&mut [u8]> {
        if !self.entities.is_valid(entity) {
            return None;
        }
        let archetype_id = self.entities.archetype_id(entity.slot());
        if archetype_id == NO_ARCHETYPE {
            return None;
        }
        let version = self.change_version.fetch_add(1, Ordering::AcqRel) + 1;
        let archetype = self.graph.get_mut(archetype_id as u32)?;
        archetype.bump_version();
        archetype.column_mut(type_id)?.get_mut(entity.slot(), version)
    }

    // ========== Relations ==========

    /// Link `child` under `parent`; `None` detaches. Cycles are refused.
    /// Invalid handles are a no-op.
    pub fn set_parent(&mut self, child: Entity, parent: Option<Entity>) -> Result<()> {
        self.ensure_open()?;
        if !self.entities.is_valid(child) {
            return Ok(());
        }
        match parent {
            Some(p) => {
                if !self.entities.is_valid(p) {
                    return Ok(());
                }
                if self.relations.is_ancestor(child.slot(), p.slot()) {
                    return Err(EcsError::RelationCycle { parent: p, child });
                }
                self.relations.set_parent(child.slot(), Some(p.slot()));
            }
            None => self.relations.set_parent(child.slot(), None),
        }
        Ok(())
    }

    pub fn get_parent(&self, entity: Entity) -> Option<Entity> {
        if !self.entities.is_valid(entity) {
            return None;
        }
        let parent_slot = self.relations.parent_of(entity.slot())?;
        self.entities.entity_at(parent_slot)
    }

    /// Live children of an entity. Stale slots are filtered out.
    pub fn get_children(&self, entity: Entity) -> Vec<Entity> {
        if !self.entities.is_valid(entity) {
            return Vec::new();
        }
        self.relations
            .children_of(entity.slot())
            .iter()
            .filter_map(|&slot| self.entities.entity_at(slot))
            .collect()
    }

    pub fn add_relation(&mut self, from: Entity, relation_id: u32, to: Entity) {
        if self.entities.is_valid(from) && self.entities.is_valid(to) {
            self.relations.add_relation(from.slot(), relation_id, to.slot());
        }
    }

    pub fn remove_relation(&mut self, from: Entity, relation_id: u32, to: Entity) -> bool {
        self.relations.remove_relation(from.slot(), relation_id, to.slot())
    }

    pub fn get_related(&self, from: Entity, relation_id: u32) -> Vec<Entity> {
        if !self.entities.is_valid(from) {
            return Vec::new();
        }
        self.relations
            .related(from.slot(), relation_id)
            .iter()
            .filter_map(|&slot| self.entities.entity_at(slot))
            .collect()
    }

    // ========== Queries ==========

    /// Resolve a query to its (cached) archetype id list.
    pub fn query_archetypes(&self, query: &QueryDescriptor) -> Vec<u32> {
        let pinned = self.in_frame.load(Ordering::Acquire);
        self.resolve_query(query, pinned)
    }

    pub(crate) fn query_archetypes_pinned(&self, query: &QueryDescriptor) -> Vec<u32> {
        self.resolve_query(query, true)
    }

    fn resolve_query(&self, query: &QueryDescriptor, pinned: bool) -> Vec<u32> {
        let key = query.cache_key();
        let version = self.structure_version();

        let mut cache = self.query_cache.lock();
        if let Some(hit) = cache.get(&key, version, pinned) {
            return hit;
        }

        let matches: Vec<u32> = self
            .graph
            .iter()
            .filter(|archetype| query.matches(archetype.mask()))
            .map(|archetype| archetype.id())
            .collect();
        cache.insert(key, matches.clone(), version);
        matches
    }

    /// Entities matched by a query, after change filters and predicates.
    pub fn count(&self, query: &QueryDescriptor) -> usize {
        let mut n = 0;
        self.for_each_entity(query, |_| n += 1);
        n
    }

    /// Fastest mode: hand whole archetypes to the caller.
    pub fn for_each_archetype(&self, query: &QueryDescriptor, mut f: impl FnMut(&Archetype)) {
        for id in self.query_archetypes(query) {
            if let Some(archetype) = self.graph.get(id) {
                f(archetype);
            }
        }
    }

    fn entity_passes(&self, query: &QueryDescriptor, archetype: &Archetype, entity: Entity) -> bool {
        if let Some(version) = query.changed_since {
            if !entity_changed(archetype, entity.slot(), query.effective_change_filter(), version) {
                return false;
            }
        }
        if let Some(predicate) = &query.predicate {
            if !predicate(entity, archetype) {
                return false;
            }
        }
        true
    }

    /// Sequential per-entity iteration.
    pub fn for_each_entity(&self, query: &QueryDescriptor, mut f: impl FnMut(Entity)) {
        for id in self.query_archetypes(query) {
            let Some(archetype) = self.graph.get(id) else {
                continue;
            };
            for &entity in archetype.entities() {
                if self.entity_passes(query, archetype, entity) {
                    f(entity);
                }
            }
        }
    }

    /// Parallel per-entity iteration over the scheduler's worker pool.
    /// Falls back to sequential execution without workers.
    pub fn par_for_each_entity(
        &self,
        query: &QueryDescriptor,
        f: impl Fn(Entity) + Send + Sync,
    ) {
        let ids = self.query_archetypes(query);
        if !self.executor.has_workers() {
            for id in ids {
                if let Some(archetype) = self.graph.get(id) {
                    for &entity in archetype.entities() {
                        if self.entity_passes(query, archetype, entity) {
                            f(entity);
                        }
                    }
                }
            }
            return;
        }

        let batch = query.batch_size.max(1);
        let f = &f;
        let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
        for id in ids {
            let Some(archetype) = self.graph.get(id) else {
                continue;
            };
            let mut start = 0;
            while start < archetype.len() {
                let end = (start + batch).min(archetype.len());
                tasks.push(Box::new(move || {
                    for &entity in &archetype.entities()[start..end] {
                        if self.entity_passes(query, archetype, entity) {
                            f(entity);
                        }
                    }
                }));
                start = end;
            }
        }
        self.executor.run_scoped(tasks);
    }

    /// One-column accessor: `(entity, bytes)` per matching entity.
    pub fn for_each_1(
        &self,
        query: &QueryDescriptor,
        type_id: u32,
        mut f: impl FnMut(Entity, &[u8]),
    ) {
        for id in self.query_archetypes(query) {
            let Some(archetype) = self.graph.get(id) else {
                continue;
            };
            let Some(column) = archetype.column(type_id) else {
                continue;
            };
            for &entity in archetype.entities() {
                if !self.entity_passes(query, archetype, entity) {
                    continue;
                }
                if let Some(bytes) = column.get(entity.slot()) {
                    f(entity, bytes);
                }
            }
        }
    }

    /// Two-column accessor; both components must be present on the entity.
    pub fn for_each_2(
        &self,
        query: &QueryDescriptor,
        type_ids: [u32; 2],
        mut f: impl FnMut(Entity, &[u8], &[u8]),
    ) {
        for id in self.query_archetypes(query) {
            let Some(archetype) = self.graph.get(id) else {
                continue;
            };
            let (Some(c0), Some(c1)) = (archetype.column(type_ids[0]), archetype.column(type_ids[1]))
            else {
                continue;
            };
            for &entity in archetype.entities() {
                if !self.entity_passes(query, archetype, entity) {
                    continue;
                }
                if let (Some(b0), Some(b1)) = (c0.get(entity.slot()), c1.get(entity.slot())) {
                    f(entity, b0, b1);
                }
            }
        }
    }

    /// Three-column accessor.
    pub fn for_each_3(
        &self,
        query: &QueryDescriptor,
        type_ids: [u32; 3],
        mut f: impl FnMut(Entity, &[u8], &[u8], &[u8]),
    ) {
        for id in self.query_archetypes(query) {
            let Some(archetype) = self.graph.get(id) else {
                continue;
            };
            let (Some(c0), Some(c1), Some(c2)) = (
                archetype.column(type_ids[0]),
                archetype.column(type_ids[1]),
                archetype.column(type_ids[2]),
            ) else {
                continue;
            };
            for &entity in archetype.entities() {
                if !self.entity_passes(query, archetype, entity) {
                    continue;
                }
                if let (Some(b0), Some(b1), Some(b2)) = (
                    c0.get(entity.slot()),
                    c1.get(entity.slot()),
                    c2.get(entity.slot()),
                ) {
                    f(entity, b0, b1, b2);
                }
            }
        }
    }

    /// Mutable one-column accessor for use inside systems.
    ///
    /// The caller must hold write access to `type_id` (declared on the
    /// system); the scheduler's conflict predicate keeps concurrent writers
    /// off this column.
    pub fn for_each_1_mut(
        &self,
        query: &QueryDescriptor,
        type_id: u32,
        mut f: impl FnMut(Entity, &mut [u8]),
    ) {
        let version = self.next_change_version();
        for id in self.query_archetypes(query) {
            let Some(archetype) = self.graph.get(id) else {
                continue;
            };
            let Some(column) = archetype.column(type_id) else {
                continue;
            };
            for &entity in archetype.entities() {
                if !self.entity_passes(query, archetype, entity) {
                    continue;
                }
                // SAFETY: exclusive write access per the declared system
                // masks; structural changes are deferred during iteration.
                if let Some(bytes) = unsafe { column.get_mut_unsync(entity.slot(), version) } {
                    f(entity, bytes);
                }
            }
        }
    }

    /// Read one column, write another, at the same entity.
    pub fn for_each_2_mut(
        &self,
        query: &QueryDescriptor,
        read_id: u32,
        write_id: u32,
        mut f: impl FnMut(Entity, &[u8], &mut [u8]),
    ) {
        let version = self.next_change_version();
        for id in self.query_archetypes(query) {
            let Some(archetype) = self.graph.get(id) else {
                continue;
            };
            let (Some(read), Some(write)) =
                (archetype.column(read_id), archetype.column(write_id))
            else {
                continue;
            };
            for &entity in archetype.entities() {
                if !self.entity_passes(query, archetype, entity) {
                    continue;
                }
                let Some(input) = read.get(entity.slot()) else {
                    continue;
                };
                // SAFETY: as in `for_each_1_mut`.
                if let Some(output) = unsafe { write.get_mut_unsync(entity.slot(), version) } {
                    f(entity, input, output);
                }
            }
        }
    }

    /// Batched iteration: contiguous dense slices of one column, at most
    /// `query.batch_size` entries each, with the parallel entity slots.
    pub fn for_each_batched(
        &self,
        query: &QueryDescriptor,
        type_id: u32,
        mut f: impl FnMut(&[u32], &[u8]),
    ) {
        let batch = query.batch_size.max(1);
        for id in self.query_archetypes(query) {
            let Some(archetype) = self.graph.get(id) else {
                continue;
            };
            let Some(column) = archetype.column(type_id) else {
                continue;
            };
            let mut start = 0;
            while start < column.len() {
                let end = (start + batch).min(column.len());
                let slots: Vec<u32> = (start..end).map(|d| column.entity_at(d)).collect();
                f(&slots, column.bytes_range(start, end));
                start = end;
            }
        }
    }

    pub fn archetype(&self, id: u32) -> Option<&Archetype> {
        self.graph.get(id)
    }

    pub fn archetypes(&self) -> impl Iterator<Item = &Archetype> {
        self.graph.iter()
    }

    pub fn archetype_count(&self) -> usize {
        self.graph.len()
    }

    pub fn query_cache_stats(&self) -> QueryCacheStats {
        self.query_cache.lock().stats()
    }

    pub fn clear_query_cache(&self) {
        self.query_cache.lock().clear();
    }

    // ========== Deferred commands ==========

    /// Producer handle usable from any thread.
    pub fn command_sender(&self) -> CommandSender {
        self.commands.sender()
    }

    pub fn defer_destroy(&self, entity: Entity) -> Result<()> {
        self.commands.sender().destroy(entity)?;
        self.entities.set_flag(entity, EntityFlags::PENDING_DESTROY, true);
        Ok(())
    }

    pub fn defer_add(&self, entity: Entity, type_id: u32, bytes: &[u8]) -> Result<()> {
        self.commands.sender().add_component(entity, type_id, bytes)
    }

    pub fn defer_remove(&self, entity: Entity, type_id: u32) -> Result<()> {
        self.commands.sender().remove_component(entity, type_id)
    }

    /// Drain and apply queued commands in submission order. Commands whose
    /// target died earlier in the drain fall through the usual
    /// invalid-entity no-ops; hard failures are logged and skipped.
    pub fn drain_deferred(&mut self) -> Result<()> {
        let commands = self.commands.drain();
        if commands.is_empty() {
            return Ok(());
        }

        #[cfg(feature = "profiling")]
        let span = info_span!("world.drain_deferred", queued = commands.len());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        for command in commands {
            let result = match command {
                DeferredCommand::Destroy(entity) => {
                    self.destroy(entity);
                    Ok(())
                }
                DeferredCommand::AddComponent {
                    entity,
                    type_id,
                    bytes,
                } => self.add_component(entity, type_id, &bytes),
                DeferredCommand::RemoveComponent { entity, type_id } => {
                    self.remove_component(entity, type_id)
                }
                DeferredCommand::SetParent { child, parent } => self.set_parent(child, parent),
            };
            if let Err(err) = result {
                tracing::warn!(%err, "deferred command failed; skipping");
            }
        }
        Ok(())
    }

    // ========== Systems & frame loop ==========

    pub fn register_system(&mut self, descriptor: SystemDescriptor, system: BoxedSystem) -> SystemId {
        self.scheduler.register(descriptor, system)
    }

    pub fn pause_system(&mut self, name: &str) -> bool {
        self.scheduler.pause_system(name)
    }

    pub fn resume_system(&mut self, name: &str) -> bool {
        self.scheduler.resume_system(name)
    }

    pub fn system_state(&self, name: &str) -> Option<SystemState> {
        self.scheduler.system_state(name)
    }

    pub fn system_stats(&self, id: SystemId) -> Option<SystemStats> {
        self.scheduler.get_stats(id)
    }

    pub fn dependency_cycles(&mut self, phase: Phase) -> Vec<Vec<String>> {
        self.scheduler.dependency_cycles(phase)
    }

    pub fn schedule_debug_info(&mut self) -> ScheduleDebugInfo {
        self.scheduler.debug_info()
    }

    /// Disable the conservative read/write conflict predicate. Systems then
    /// run concurrently whenever dependencies allow; the caller vouches that
    /// their writes touch disjoint data.
    pub fn set_unsafe_allow_concurrent_writes(&mut self, allow: bool) {
        self.scheduler.set_unsafe_allow_concurrent_writes(allow);
    }

    pub(crate) fn executor(&self) -> &SafeExecutor {
        &self.executor
    }

    pub(crate) fn system_context<'w>(
        &'w self,
        delta_seconds: f32,
        frame_number: u64,
        frame_start: Instant,
    ) -> SystemContext<'w> {
        SystemContext {
            world: self,
            delta_seconds,
            frame_number,
            frame_start,
            executor: &self.executor,
            commands: self.commands.sender(),
            scratch: &self.scratch,
        }
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn total_seconds(&self) -> f64 {
        self.total_seconds
    }

    /// Run one frame: all phases in order, draining deferred commands after
    /// each. Paused worlds do nothing.
    pub fn step_frame(&mut self, delta_seconds: f32) -> Result<()> {
        self.ensure_open()?;
        if self.state == WorldState::Paused {
            return Ok(());
        }

        self.frame_number += 1;
        self.total_seconds += delta_seconds as f64;
        self.scratch.clear();

        #[cfg(feature = "profiling")]
        let span = info_span!("world.step_frame", frame = self.frame_number);
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let params = FrameParams {
            delta_seconds,
            frame_number: self.frame_number,
            frame_start: Instant::now(),
            frame_budget_ns: self.config.frame_budget_ns,
            per_system_budget_ns: self.config.per_system_budget_ns,
        };

        self.in_frame.store(true, Ordering::Release);
        let mut scheduler = std::mem::take(&mut self.scheduler);
        let result = scheduler.run_frame(self, &params);
        self.scheduler = scheduler;
        self.in_frame.store(false, Ordering::Release);

        result
    }

    pub fn pause(&mut self) {
        if self.state == WorldState::Running {
            self.state = WorldState::Paused;
            self.publish(EcsEvent::WorldPaused);
        }
    }

    pub fn resume(&mut self) {
        if self.state == WorldState::Paused {
            self.state = WorldState::Running;
            self.publish(EcsEvent::WorldResumed);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state == WorldState::Paused
    }

    /// Shut the world down: stop accepting work, join workers with a
    /// bounded timeout, then tear storage down in reverse creation order.
    /// Further API calls surface `ResourceClosed`.
    pub fn shutdown(&mut self) {
        if self.state == WorldState::Shutdown {
            return;
        }
        self.publish(EcsEvent::WorldShuttingDown);
        self.state = WorldState::Shutdown;

        self.scheduler.shutdown();
        self.executor = SafeExecutor::new(None);
        if let Some(pool) = self.pool.take() {
            if let Ok(mut pool) = Arc::try_unwrap(pool) {
                pool.shutdown(Duration::from_millis(500));
            }
        }

        let _ = self.commands.drain();
        self.relations.clear();
        self.query_cache.lock().clear();
        self.graph.clear();
        self.entities.clear();
    }

    /// Drop all entities and archetypes but keep the registry, systems and
    /// configuration.
    pub fn clear(&mut self) {
        self.relations.clear();
        self.query_cache.lock().clear();
        self.graph.clear();
        self.entities.clear();
        self.bump_structure_version();
    }

    // ========== GPU sync ==========

    /// Push dirty GPU-visible columns to the sink.
    pub fn sync_gpu(&mut self, sink: &mut dyn GpuSyncSink) {
        let gpu_visible = self.registry.gpu_visible_mask();
        if gpu_visible.is_empty() {
            return;
        }
        for id in 0..self.graph.len() as u32 {
            let archetype = self.graph.get_mut(id).expect("iterating by index");
            if !archetype.mask().intersects(&gpu_visible) {
                continue;
            }
            for type_id in gpu_visible.ones() {
                if let Some(column) = archetype.column_mut(type_id as u32) {
                    column.sync_to_gpu(sink);
                }
            }
        }
    }

    // ========== Snapshot ==========

    /// Capture an in-process snapshot of all live entities and their bytes.
    pub fn snapshot(&self) -> WorldSnapshot {
        let mut snapshot = WorldSnapshot::default();

        for id in 0..self.registry.len() as u32 {
            if let Ok(descriptor) = self.registry.get(id) {
                snapshot.schema.push(SnapshotType {
                    id,
                    key: descriptor.key.clone(),
                    size: descriptor.size,
                    schema_version: descriptor.schema_version,
                });
            }
        }

        for archetype in self.graph.iter() {
            let component_ids: Vec<u32> = archetype.signature().to_vec();
            let mut entities = Vec::with_capacity(archetype.len());
            for &entity in archetype.entities() {
                let components = component_ids
                    .iter()
                    .map(|&type_id| {
                        archetype
                            .column(type_id)
                            .and_then(|c| c.get(entity.slot()))
                            .map(|b| b.to_vec())
                            .unwrap_or_default()
                    })
                    .collect();
                entities.push(SnapshotEntity {
                    slot: entity.slot(),
                    generation: entity.generation(),
                    components,
                });
            }
            snapshot.archetypes.push(SnapshotArchetype {
                archetype_id: archetype.id(),
                component_ids,
                entities,
            });
        }

        snapshot
    }

    /// Restore a snapshot captured in this process. Refused unless the
    /// registered component ids and sizes match the captured schema.
    pub fn restore(&mut self, snapshot: &WorldSnapshot) -> Result<()> {
        self.ensure_open()?;
        snapshot.validate_against(&self.registry)?;

        self.clear();

        for captured in &snapshot.archetypes {
            let mask = self.registry.compute_mask(&captured.component_ids)?;
            let archetype_id = self.get_or_create_archetype(&mask)?;
            let version = self.next_change_version();

            for entity_snapshot in &captured.entities {
                self.entities
                    .restore_slot(entity_snapshot.slot, entity_snapshot.generation);
                let entity = Entity::new(entity_snapshot.slot, entity_snapshot.generation);

                let archetype = self.graph.get_mut(archetype_id).expect("exists");
                let row = archetype.push_entity(entity);
                for (position, &type_id) in captured.component_ids.iter().enumerate() {
                    let bytes = &entity_snapshot.components[position];
                    if bytes.is_empty() {
                        continue; // tag or never-written component
                    }
                    archetype
                        .column_mut(type_id)
                        .expect("validated member column")
                        .insert(entity.slot(), bytes, version)?;
                }

                self.entities
                    .set_archetype_id(entity.slot(), archetype_id as i32);
                self.entities.set_row(entity.slot(), row as u32);
            }
        }

        self.entities.rebuild_freelist();
        self.bump_structure_version();
        Ok(())
    }

    // ========== Diagnostics ==========

    pub fn memory_stats(&self) -> MemoryStats {
        let archetype_memory: usize = self.graph.iter().map(|a| a.storage_bytes()).sum();
        let entity_index_memory = self.entities.slot_capacity()
            * (std::mem::size_of::<u32>() * 2 + std::mem::size_of::<i32>() + 1);

        MemoryStats {
            entity_index_memory,
            archetype_memory,
            total_memory: entity_index_memory + archetype_memory,
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        if self.state != WorldState::Shutdown {
            self.shutdown();
        }
    }
}

/// Memory statistics for the world
#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub entity_index_memory: usize,
    pub archetype_memory: usize,
    pub total_memory: usize,
}
