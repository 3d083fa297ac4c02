//! Archetype graph: content-addressed map from component mask to archetype.
//!
//! Archetypes are created lazily and iterated in insertion order so runs are
//! reproducible. The world bumps its structure version and invalidates the
//! query cache after every creation.

use ahash::AHashMap;

use crate::archetype::Archetype;
use crate::component::TypeRegistry;
use crate::error::Result;
use crate::mask::ComponentMask;

pub struct ArchetypeGraph {
    archetypes: Vec<Archetype>,
    by_mask: AHashMap<ComponentMask, u32>,
    track_changes: bool,
}

/// Outcome of a get-or-create lookup.
pub struct GraphEntry {
    pub archetype_id: u32,
    pub created: bool,
}

impl ArchetypeGraph {
    pub fn new(track_changes: bool) -> Self {
        Self {
            archetypes: Vec::with_capacity(64),
            by_mask: AHashMap::with_capacity(64),
            track_changes,
        }
    }

    /// Look up the archetype for `mask`, creating it if absent.
    ///
    /// Creation resolves every member type through the registry first, so an
    /// unregistered id fails before anything is inserted.
    pub fn get_or_create(&mut self, mask: &ComponentMask, registry: &TypeRegistry) -> Result<GraphEntry> {
        // Double-checked: the common path is a plain lookup.
        if let Some(&id) = self.by_mask.get(mask) {
            return Ok(GraphEntry {
                archetype_id: id,
                created: false,
            });
        }

        let mut descriptors = Vec::with_capacity(mask.count_ones());
        for type_id in mask.ones() {
            descriptors.push(registry.get(type_id as u32)?);
        }

        if let Some(&id) = self.by_mask.get(mask) {
            return Ok(GraphEntry {
                archetype_id: id,
                created: false,
            });
        }

        let id = self.archetypes.len() as u32;
        self.archetypes
            .push(Archetype::new(id, mask.clone(), &descriptors, self.track_changes));
        self.by_mask.insert(mask.clone(), id);

        Ok(GraphEntry {
            archetype_id: id,
            created: true,
        })
    }

    pub fn get_by_mask(&self, mask: &ComponentMask) -> Option<&Archetype> {
        self.by_mask
            .get(mask)
            .map(|&id| &self.archetypes[id as usize])
    }

    pub fn get(&self, id: u32) -> Option<&Archetype> {
        self.archetypes.get(id as usize)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id as usize)
    }

    /// Archetypes in stable insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// Split mutable access to two distinct archetypes (migration source and
    /// destination).
    pub fn get_pair_mut(&mut self, a: u32, b: u32) -> Option<(&mut Archetype, &mut Archetype)> {
        if a == b {
            return None;
        }
        let (a, b) = (a as usize, b as usize);
        if a < b {
            let (left, right) = self.archetypes.split_at_mut(b);
            Some((&mut left[a], &mut right[0]))
        } else {
            let (left, right) = self.archetypes.split_at_mut(a);
            Some((&mut right[0], &mut left[b]))
        }
    }

    pub fn clear(&mut self) {
        self.archetypes.clear();
        self.by_mask.clear();
    }
}
