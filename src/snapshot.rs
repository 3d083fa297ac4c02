//! In-process world snapshots.
//!
//! A snapshot captures the registry schema plus, per archetype, the sorted
//! component-id array and every entity's `(slot, generation, raw bytes)`.
//! Restore refuses to proceed unless the registered component ids and sizes
//! match the captured schema exactly; nothing here is a stable wire format.

use crate::component::TypeRegistry;
use crate::error::{EcsError, Result};

/// Captured schema entry for one component type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotType {
    pub id: u32,
    pub key: String,
    pub size: u32,
    pub schema_version: u32,
}

/// One entity's captured state inside an archetype.
#[derive(Debug, Clone)]
pub struct SnapshotEntity {
    pub slot: u32,
    pub generation: u32,
    /// Raw bytes per component, parallel to the archetype's component-id
    /// array; empty for tag components.
    pub components: Vec<Vec<u8>>,
}

/// Captured state of one archetype.
#[derive(Debug, Clone)]
pub struct SnapshotArchetype {
    pub archetype_id: u32,
    pub component_ids: Vec<u32>,
    pub entities: Vec<SnapshotEntity>,
}

/// Full in-process world snapshot.
#[derive(Debug, Clone, Default)]
pub struct WorldSnapshot {
    pub schema: Vec<SnapshotType>,
    pub archetypes: Vec<SnapshotArchetype>,
}

impl WorldSnapshot {
    pub fn entity_count(&self) -> usize {
        self.archetypes.iter().map(|a| a.entities.len()).sum()
    }

    /// Check the captured schema against a registry. Every captured type
    /// must exist with the same id and size.
    pub fn validate_against(&self, registry: &TypeRegistry) -> Result<()> {
        for captured in &self.schema {
            let descriptor = registry
                .get(captured.id)
                .map_err(|_| EcsError::SnapshotMismatch {
                    type_id: captured.id,
                    expected_size: captured.size,
                    actual_size: 0,
                })?;
            if descriptor.size != captured.size || descriptor.key != captured.key {
                return Err(EcsError::SnapshotMismatch {
                    type_id: captured.id,
                    expected_size: captured.size,
                    actual_size: descriptor.size,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::TypeInfo;

    #[test]
    fn validation_checks_id_and_size() {
        let registry = TypeRegistry::new();
        let id = registry.register(TypeInfo::new("position", 12, 4)).unwrap();

        let mut snapshot = WorldSnapshot::default();
        snapshot.schema.push(SnapshotType {
            id,
            key: "position".to_string(),
            size: 12,
            schema_version: 1,
        });
        assert!(snapshot.validate_against(&registry).is_ok());

        snapshot.schema[0].size = 16;
        assert!(matches!(
            snapshot.validate_against(&registry),
            Err(EcsError::SnapshotMismatch {
                expected_size: 16,
                actual_size: 12,
                ..
            })
        ));

        // A type missing from the registry entirely also refuses.
        snapshot.schema[0] = SnapshotType {
            id: 42,
            key: "ghost".to_string(),
            size: 4,
            schema_version: 1,
        };
        assert!(snapshot.validate_against(&registry).is_err());
    }
}
