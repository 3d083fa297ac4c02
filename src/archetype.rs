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

//! Archetype storage: one unique component-set, its columns and its roster.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::column::Column;
use crate::component::TypeDescriptor;
use crate::entity::Entity;
use crate::mask::ComponentMask;

/// Sorted component-id signature of an archetype.
pub type ArchetypeSignature = SmallVec<[u32; 8]>;

/// Canonical storage for all entities sharing one component set.
///
/// Tag types (size 0) appear in the mask and signature but own no column.
pub struct Archetype {
    id: u32,
    mask: ComponentMask,
    signature: ArchetypeSignature,
    columns: Vec<Column>,
    column_indices: FxHashMap<u32, usize>,
    entities: Vec<Entity>,

    /// Cached destination after adding a component of the keyed type.
    /// Pure cache; the world falls back to the graph on a miss.
    add_edges: FxHashMap<u32, u32>,
    /// Cached destination after removing a component of the keyed type
    remove_edges: FxHashMap<u32, u32>,

    /// Bumped on any column write
    version: u64,
    /// Bumped on roster membership changes
    entity_version: u64,
}

impl Archetype {
    /// Create an archetype for the given descriptors. `descriptors` must be
    /// exactly the member types of `mask`, sorted by id.
    pub fn new(id: u32, mask: ComponentMask, descriptors: &[std::sync::Arc<TypeDescriptor>], track_changes: bool) -> Self {
        let mut signature = ArchetypeSignature::new();
        let mut columns = Vec::new();
        let mut column_indices = FxHashMap::default();

        for descriptor in descriptors {
            signature.push(descriptor.id);
            if !descriptor.is_tag() {
                column_indices.insert(descriptor.id, columns.len());
                columns.push(Column::new(descriptor, track_changes));
            }
        }

        debug_assert!(signature.windows(2).all(|w| w[0] < w[1]));

        Self {
            id,
            mask,
            signature,
            columns,
            column_indices,
            entities: Vec::new(),
            add_edges: FxHashMap::default(),
            remove_edges: FxHashMap::default(),
            version: 0,
            entity_version: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn mask(&self) -> &ComponentMask {
        &self.mask
    }

    /// Sorted component-id array.
    pub fn signature(&self) -> &[u32] {
        &self.signature
    }

    pub fn contains_type(&self, type_id: u32) -> bool {
        self.mask.contains(type_id as usize)
    }

    /// Append an entity to the roster. Columns get no automatic entry;
    /// component data is written separately.
    pub fn push_entity(&mut self, entity: Entity) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        self.entity_version += 1;
        row
    }

    /// Swap-remove the roster entry at `row` and drop the entity's bytes
    /// from every column. Returns the entity that was swapped into `row`,
    /// if any.
    pub fn remove_entity(&mut self, row: usize) -> Option<Entity> {
        if row >= self.entities.len() {
            return None;
        }

        let removed = self.entities.swap_remove(row);
        for column in &mut self.columns {
            column.remove(removed.slot());
        }
        self.entity_version += 1;

        (row < self.entities.len()).then(|| self.entities[row])
    }

    /// Roster position of `entity`, if present.
    pub fn position_of(&self, entity: Entity) -> Option<usize> {
        self.entities.iter().position(|&e| e == entity)
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn column(&self, type_id: u32) -> Option<&Column> {
        let idx = *self.column_indices.get(&type_id)?;
        self.columns.get(idx)
    }

    pub fn column_mut(&mut self, type_id: u32) -> Option<&mut Column> {
        let idx = *self.column_indices.get(&type_id)?;
        self.columns.get_mut(idx)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    /// Record a write for change observers.
    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn entity_version(&self) -> u64 {
        self.entity_version
    }

    pub fn add_edge(&self, type_id: u32) -> Option<u32> {
        self.add_edges.get(&type_id).copied()
    }

    pub fn set_add_edge(&mut self, type_id: u32, destination: u32) {
        self.add_edges.insert(type_id, destination);
    }

    pub fn remove_edge(&self, type_id: u32) -> Option<u32> {
        self.remove_edges.get(&type_id).copied()
    }

    pub fn set_remove_edge(&mut self, type_id: u32, destination: u32) {
        self.remove_edges.insert(type_id, destination);
    }

    /// Total bytes owned by the column buffers.
    pub fn storage_bytes(&self) -> usize {
        self.columns.iter().map(|c| c.capacity_bytes()).sum()
    }
}
