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

//! Entity identifiers and the generational entity store.
//!
//! An entity is a `(slot, generation)` pair. Slots are recycled on destroy
//! and the generation is bumped, so stale handles fail validation instead of
//! aliasing the new occupant. Slot 0 is the null sentinel.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{EcsError, Result};

/// Per-slot flag bits. Manipulated atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityFlags(pub u8);

impl EntityFlags {
    pub const ACTIVE: Self = Self(1 << 0);
    pub const PREFAB: Self = Self(1 << 1);
    pub const DISABLED: Self = Self(1 << 2);
    pub const PENDING_DESTROY: Self = Self(1 << 3);
}

/// Entity handle: slot index plus the generation it was issued with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entity {
    slot: u32,
    generation: u32,
}

impl Entity {
    /// The reserved null handle (slot 0 is never allocated).
    pub const NULL: Entity = Entity {
        slot: 0,
        generation: 0,
    };

    pub(crate) fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn is_null(&self) -> bool {
        self.slot == 0
    }
}

/// No archetype assigned (entity holds no components).
pub(crate) const NO_ARCHETYPE: i32 = -1;

/// Dense entity metadata: parallel arrays indexed by slot, plus a freelist
/// of recycled slots.
pub struct EntityStore {
    generations: Vec<u32>,
    archetype_ids: Vec<i32>,
    /// Roster position within the current archetype
    rows: Vec<u32>,
    flags: Vec<AtomicU8>,
    freelist: Vec<u32>,
    alive: usize,
    max_entities: usize,
}

impl EntityStore {
    pub fn new(max_entities: usize) -> Self {
        let mut store = Self {
            generations: Vec::with_capacity(1024),
            archetype_ids: Vec::with_capacity(1024),
            rows: Vec::with_capacity(1024),
            flags: Vec::with_capacity(1024),
            freelist: Vec::new(),
            alive: 0,
            max_entities,
        };
        // Slot 0 is the null sentinel and is never handed out.
        store.generations.push(0);
        store.archetype_ids.push(NO_ARCHETYPE);
        store.rows.push(0);
        store.flags.push(AtomicU8::new(0));
        store
    }

    /// Allocate an entity. Recycled slots are preferred; their generation was
    /// already bumped when the previous occupant was destroyed.
    pub fn create(&mut self) -> Result<Entity> {
        if self.alive >= self.max_entities {
            return Err(EcsError::EntityLimitExceeded {
                limit: self.max_entities,
            });
        }

        let slot = if let Some(slot) = self.freelist.pop() {
            slot
        } else {
            let slot = self.generations.len() as u32;
            self.generations.push(1);
            self.archetype_ids.push(NO_ARCHETYPE);
            self.rows.push(0);
            self.flags.push(AtomicU8::new(0));
            slot
        };

        self.flags[slot as usize].store(EntityFlags::ACTIVE.0, Ordering::Release);
        self.archetype_ids[slot as usize] = NO_ARCHETYPE;
        self.alive += 1;

        Ok(Entity::new(slot, self.generations[slot as usize]))
    }

    /// Release a slot: bump its generation, clear flags, push onto the
    /// freelist. The caller has already detached the entity from storage.
    pub fn release(&mut self, entity: Entity) {
        let slot = entity.slot as usize;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.archetype_ids[slot] = NO_ARCHETYPE;
        self.flags[slot].store(0, Ordering::Release);
        self.freelist.push(entity.slot);
        self.alive -= 1;
    }

    /// Valid iff the stored generation matches and the slot is ACTIVE.
    pub fn is_valid(&self, entity: Entity) -> bool {
        let slot = entity.slot as usize;
        if entity.slot == 0 || slot >= self.generations.len() {
            return false;
        }
        self.generations[slot] == entity.generation
            && self.flags[slot].load(Ordering::Acquire) & EntityFlags::ACTIVE.0 != 0
    }

    pub fn set_flag(&self, entity: Entity, flag: EntityFlags, value: bool) {
        if !self.is_valid(entity) {
            return;
        }
        let cell = &self.flags[entity.slot as usize];
        if value {
            cell.fetch_or(flag.0, Ordering::AcqRel);
        } else {
            cell.fetch_and(!flag.0, Ordering::AcqRel);
        }
    }

    pub fn has_flag(&self, entity: Entity, flag: EntityFlags) -> bool {
        self.is_valid(entity)
            && self.flags[entity.slot as usize].load(Ordering::Acquire) & flag.0 != 0
    }

    pub fn archetype_id(&self, slot: u32) -> i32 {
        self.archetype_ids
            .get(slot as usize)
            .copied()
            .unwrap_or(NO_ARCHETYPE)
    }

    pub fn set_archetype_id(&mut self, slot: u32, archetype_id: i32) {
        self.archetype_ids[slot as usize] = archetype_id;
    }

    pub fn row(&self, slot: u32) -> u32 {
        self.rows[slot as usize]
    }

    pub fn set_row(&mut self, slot: u32, row: u32) {
        self.rows[slot as usize] = row;
    }

    /// Re-occupy a specific slot with a specific generation (snapshot
    /// restore). The store must have been cleared first.
    pub fn restore_slot(&mut self, slot: u32, generation: u32) {
        let needed = slot as usize + 1;
        if self.generations.len() < needed {
            self.generations.resize(needed, 1);
            self.archetype_ids.resize(needed, NO_ARCHETYPE);
            self.rows.resize(needed, 0);
            while self.flags.len() < needed {
                self.flags.push(AtomicU8::new(0));
            }
        }
        self.generations[slot as usize] = generation;
        self.flags[slot as usize].store(EntityFlags::ACTIVE.0, Ordering::Release);
        self.alive += 1;
    }

    /// Rebuild the freelist from unoccupied slots after a restore.
    pub fn rebuild_freelist(&mut self) {
        self.freelist.clear();
        for slot in (1..self.generations.len() as u32).rev() {
            if self.flags[slot as usize].load(Ordering::Acquire) & EntityFlags::ACTIVE.0 == 0 {
                self.freelist.push(slot);
            }
        }
    }

    /// Reconstruct the live handle for a slot, if it is active.
    pub fn entity_at(&self, slot: u32) -> Option<Entity> {
        let entity = Entity::new(slot, *self.generations.get(slot as usize)?);
        self.is_valid(entity).then_some(entity)
    }

    pub fn generation(&self, slot: u32) -> u32 {
        self.generations.get(slot as usize).copied().unwrap_or(0)
    }

    pub fn alive_count(&self) -> usize {
        self.alive
    }

    pub fn recycled_count(&self) -> usize {
        self.freelist.len()
    }

    /// Highest slot index ever allocated (inclusive).
    pub fn slot_capacity(&self) -> usize {
        self.generations.len()
    }

    pub fn max_entities(&self) -> usize {
        self.max_entities
    }

    /// Drop all entities and recycled slots, keeping the null sentinel.
    pub fn clear(&mut self) {
        self.generations.truncate(1);
        self.archetype_ids.truncate(1);
        self.rows.truncate(1);
        self.flags.truncate(1);
        self.freelist.clear();
        self.alive = 0;
    }
}
