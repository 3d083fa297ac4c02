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

//! Component type registry
//!
//! Components are fixed-size byte records described at registration time.
//! The registry assigns dense, stable integer ids and records layout,
//! flags, and requires/excludes constraints.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::error::{EcsError, Result};
use crate::mask::{AtomicMask, ComponentMask};

/// Maximum number of registerable component types
pub const MAX_COMPONENT_TYPES: usize = 4096;

/// Maximum declared component size in bytes
pub const MAX_COMPONENT_SIZE: u32 = 1 << 20;

/// Component behavior flags. Unknown bits are ignored at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComponentFlags(u32);

impl ComponentFlags {
    pub const NONE: Self = Self(0);
    /// Zero-size marker; presence lives only in the archetype mask
    pub const TAG: Self = Self(1 << 0);
    pub const SINGLETON: Self = Self(1 << 1);
    pub const GPU_VISIBLE: Self = Self(1 << 2);
    pub const DYNAMIC_UPDATE: Self = Self(1 << 3);
    pub const POOLED: Self = Self(1 << 4);
    pub const NETWORKED: Self = Self(1 << 5);
    pub const PERSISTENT: Self = Self(1 << 6);
    pub const TRANSIENT: Self = Self(1 << 7);

    const KNOWN: u32 = 0xff;

    /// Build from raw bits, dropping unrecognized flags.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits & Self::KNOWN)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ComponentFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Registration input for a component type.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    /// Stable logical key; registering the same key twice returns the
    /// original id.
    pub key: String,
    pub size: u32,
    pub alignment: u32,
    pub flags: ComponentFlags,
    pub schema_version: u32,
    /// Type ids that must accompany this type on an entity
    pub requires: SmallVec<[u32; 4]>,
    /// Type ids that must not accompany this type on an entity
    pub excludes: SmallVec<[u32; 4]>,
}

impl TypeInfo {
    pub fn new(key: impl Into<String>, size: u32, alignment: u32) -> Self {
        Self {
            key: key.into(),
            size,
            alignment,
            flags: ComponentFlags::NONE,
            schema_version: 1,
            requires: SmallVec::new(),
            excludes: SmallVec::new(),
        }
    }

    pub fn with_flags(mut self, flags: ComponentFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    pub fn requires(mut self, ids: &[u32]) -> Self {
        self.requires.extend_from_slice(ids);
        self
    }

    pub fn excludes(mut self, ids: &[u32]) -> Self {
        self.excludes.extend_from_slice(ids);
        self
    }

    /// Convenience constructor for a zero-size tag type.
    pub fn tag(key: impl Into<String>) -> Self {
        Self::new(key, 0, 1).with_flags(ComponentFlags::TAG)
    }
}

/// Immutable descriptor for a registered component type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub id: u32,
    pub key: String,
    pub size: u32,
    pub alignment: u32,
    pub flags: ComponentFlags,
    pub schema_version: u32,
    pub required_set: ComponentMask,
    pub excluded_set: ComponentMask,
}

impl TypeDescriptor {
    /// Tag types have no storage.
    pub fn is_tag(&self) -> bool {
        self.size == 0
    }
}

/// One violated constraint from `validate_combination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombinationDiagnostic {
    MissingRequired { type_id: u32, requires: u32 },
    ExcludedPresent { type_id: u32, excludes: u32 },
}

struct RegistryInner {
    types: Vec<Arc<TypeDescriptor>>,
    by_key: AHashMap<String, u32>,
}

/// Thread-safe component type registry.
///
/// An explicit value owned by (or shared between) worlds; nothing here is
/// process-wide. Once registered, a descriptor is immutable for the process
/// lifetime.
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
    /// Ids flagged GPU_VISIBLE, maintained lock-free for the sync pass
    gpu_visible: AtomicMask,
    /// Ids with no storage (size 0)
    tags: AtomicMask,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                types: Vec::with_capacity(64),
                by_key: AHashMap::with_capacity(64),
            }),
            gpu_visible: AtomicMask::new(),
            tags: AtomicMask::new(),
        }
    }

    /// Register a component type and return its dense id.
    ///
    /// Idempotent per logical key: registering the same key twice returns
    /// the original id. A layout that differs from the first registration is
    /// ignored and logged.
    pub fn register(&self, info: TypeInfo) -> Result<u32> {
        if info.size > 0 && !info.alignment.is_power_of_two() {
            return Err(EcsError::InvalidLayout {
                key: info.key,
                size: info.size,
                alignment: info.alignment,
            });
        }
        if info.size > MAX_COMPONENT_SIZE {
            return Err(EcsError::InvalidLayout {
                key: info.key,
                size: info.size,
                alignment: info.alignment,
            });
        }

        let mut inner = self.inner.write();

        if let Some(&id) = inner.by_key.get(&info.key) {
            let existing = &inner.types[id as usize];
            if existing.size != info.size || existing.alignment != info.alignment {
                tracing::warn!(
                    key = %info.key,
                    registered_size = existing.size,
                    requested_size = info.size,
                    "duplicate registration with mismatched layout; keeping original"
                );
            }
            return Ok(id);
        }

        if inner.types.len() >= MAX_COMPONENT_TYPES {
            return Err(EcsError::ComponentLimitExceeded {
                limit: MAX_COMPONENT_TYPES,
            });
        }

        let id = inner.types.len() as u32;
        let descriptor = Arc::new(TypeDescriptor {
            id,
            key: info.key.clone(),
            size: info.size,
            alignment: info.alignment.max(1),
            flags: info.flags,
            schema_version: info.schema_version,
            required_set: ComponentMask::from_ids(&info.requires),
            excluded_set: ComponentMask::from_ids(&info.excludes),
        });

        inner.by_key.insert(info.key, id);
        inner.types.push(descriptor);
        drop(inner);

        if info.flags.contains(ComponentFlags::GPU_VISIBLE) {
            self.gpu_visible.set(id as usize);
        }
        if info.size == 0 {
            self.tags.set(id as usize);
        }

        Ok(id)
    }

    /// Resolve a stable key to its type id.
    pub fn lookup(&self, key: &str) -> Result<u32> {
        self.inner
            .read()
            .by_key
            .get(key)
            .copied()
            .ok_or_else(|| EcsError::ComponentKeyNotRegistered(key.to_string()))
    }

    /// Get the descriptor for a type id.
    pub fn get(&self, type_id: u32) -> Result<Arc<TypeDescriptor>> {
        self.inner
            .read()
            .types
            .get(type_id as usize)
            .cloned()
            .ok_or(EcsError::ComponentNotRegistered { type_id })
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.inner.read().types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a mask from a set of type ids, failing on unknown ids.
    pub fn compute_mask(&self, type_ids: &[u32]) -> Result<ComponentMask> {
        let inner = self.inner.read();
        let mut mask = ComponentMask::new();
        for &id in type_ids {
            if id as usize >= inner.types.len() {
                return Err(EcsError::ComponentNotRegistered { type_id: id });
            }
            mask.set(id as usize);
        }
        Ok(mask)
    }

    /// Check requires/excludes constraints over a combination of types.
    ///
    /// Returns a diagnostic list; an empty list means the combination is
    /// valid. This never runs implicitly on component add.
    pub fn validate_combination(&self, type_ids: &[u32]) -> Vec<CombinationDiagnostic> {
        let inner = self.inner.read();
        let present = ComponentMask::from_ids(type_ids);
        let mut diagnostics = Vec::new();

        for &id in type_ids {
            let Some(descriptor) = inner.types.get(id as usize) else {
                continue;
            };
            for required in descriptor.required_set.ones() {
                if !present.contains(required) {
                    diagnostics.push(CombinationDiagnostic::MissingRequired {
                        type_id: id,
                        requires: required as u32,
                    });
                }
            }
            for excluded in descriptor.excluded_set.ones() {
                if present.contains(excluded) {
                    diagnostics.push(CombinationDiagnostic::ExcludedPresent {
                        type_id: id,
                        excludes: excluded as u32,
                    });
                }
            }
        }

        diagnostics
    }

    /// Mask of GPU_VISIBLE type ids (for the per-frame sync pass).
    pub fn gpu_visible_mask(&self) -> ComponentMask {
        self.gpu_visible.snapshot()
    }

    /// Mask of zero-size tag type ids.
    pub fn tag_mask(&self) -> ComponentMask {
        self.tags.snapshot()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_dense_ids() {
        let registry = TypeRegistry::new();
        let a = registry.register(TypeInfo::new("position", 12, 4)).unwrap();
        let b = registry.register(TypeInfo::new("velocity", 12, 4)).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(registry.lookup("velocity").unwrap(), 1);
    }

    #[test]
    fn registration_is_idempotent() {
        let registry = TypeRegistry::new();
        let first = registry.register(TypeInfo::new("health", 4, 4)).unwrap();
        let second = registry.register(TypeInfo::new("health", 4, 4)).unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);

        let descriptor = registry.get(first).unwrap();
        assert_eq!(descriptor.key, "health");
        assert_eq!(descriptor.size, 4);
    }

    #[test]
    fn rejects_bad_alignment() {
        let registry = TypeRegistry::new();
        let result = registry.register(TypeInfo::new("broken", 8, 3));
        assert!(matches!(result, Err(EcsError::InvalidLayout { .. })));
    }

    #[test]
    fn unknown_lookups_surface() {
        let registry = TypeRegistry::new();
        assert!(registry.lookup("missing").is_err());
        assert!(matches!(
            registry.get(7),
            Err(EcsError::ComponentNotRegistered { type_id: 7 })
        ));
        assert!(registry.compute_mask(&[0]).is_err());
    }

    #[test]
    fn unknown_flags_are_ignored() {
        let flags = ComponentFlags::from_bits(0xdead_ff00 | ComponentFlags::TAG.bits());
        assert!(flags.contains(ComponentFlags::TAG));
        assert_eq!(flags.bits() & !ComponentFlags::KNOWN, 0);
    }

    #[test]
    fn validate_combination_reports_constraints() {
        let registry = TypeRegistry::new();
        let body = registry.register(TypeInfo::new("body", 16, 8)).unwrap();
        let ghost = registry.register(TypeInfo::new("ghost", 1, 1)).unwrap();
        let collider = registry
            .register(
                TypeInfo::new("collider", 24, 8)
                    .requires(&[body])
                    .excludes(&[ghost]),
            )
            .unwrap();

        assert!(registry.validate_combination(&[body, collider]).is_empty());

        let diagnostics = registry.validate_combination(&[collider, ghost]);
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.contains(&CombinationDiagnostic::MissingRequired {
            type_id: collider,
            requires: body,
        }));
        assert!(diagnostics.contains(&CombinationDiagnostic::ExcludedPresent {
            type_id: collider,
            excludes: ghost,
        }));
    }

    #[test]
    fn gpu_and_tag_masks_track_registration() {
        let registry = TypeRegistry::new();
        let mesh = registry
            .register(TypeInfo::new("mesh", 64, 16).with_flags(ComponentFlags::GPU_VISIBLE))
            .unwrap();
        let frozen = registry.register(TypeInfo::tag("frozen")).unwrap();

        assert!(registry.gpu_visible_mask().contains(mesh as usize));
        assert!(registry.tag_mask().contains(frozen as usize));
        assert!(registry.get(frozen).unwrap().is_tag());
    }
}
