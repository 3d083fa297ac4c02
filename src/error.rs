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

//! Error types

use std::fmt;

use crate::entity::Entity;

/// ECS error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// Entity creation refused: the configured entity cap is reached
    EntityLimitExceeded { limit: usize },

    /// Operation targeted an entity whose generation mismatches or that is
    /// not active. Mutators treat this as a no-op; accessors return `None`.
    /// Only surfaced where the caller explicitly asked for validation.
    InvalidEntity(Entity),

    /// A type id or stable key with no registration was used
    ComponentNotRegistered { type_id: u32 },

    /// A stable key with no registration was used
    ComponentKeyNotRegistered(String),

    /// Registration would exceed the supported component type cap
    ComponentLimitExceeded { limit: usize },

    /// Descriptor validation failed at registration
    InvalidLayout {
        key: String,
        size: u32,
        alignment: u32,
    },

    /// Required/excluded constraints violated. Only produced by explicit
    /// `validate_combination`; component add never validates implicitly.
    InvalidCombination { diagnostics: usize },

    /// Byte payload shorter than the declared component size
    BufferTooSmall { expected: usize, actual: usize },

    /// Deferred command buffer is at capacity; the command was not enqueued
    DeferredQueueOverflow { capacity: usize },

    /// Scheduler found a dependency cycle between the named systems.
    /// Reported for diagnostics; the cycle is broken and execution continues.
    DependencyCycle { members: Vec<String> },

    /// A system raised during update; phase execution halted
    SystemError { system: String, message: String },

    /// API called on a world or archetype after shutdown
    ResourceClosed,

    /// Setting a parent would create a cycle in the relation graph
    RelationCycle { parent: Entity, child: Entity },

    /// Snapshot restore refused: registered component ids/sizes differ
    SnapshotMismatch {
        type_id: u32,
        expected_size: u32,
        actual_size: u32,
    },

    /// Batch creation request exceeded the sanity cap
    BatchTooLarge,
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::EntityLimitExceeded { limit } => {
                write!(f, "Entity limit exceeded (max {limit})")
            }
            EcsError::InvalidEntity(e) => {
                write!(f, "Invalid entity (slot {}, generation {})", e.slot(), e.generation())
            }
            EcsError::ComponentNotRegistered { type_id } => {
                write!(f, "Component type {type_id} is not registered")
            }
            EcsError::ComponentKeyNotRegistered(key) => {
                write!(f, "Component key {key:?} is not registered")
            }
            EcsError::ComponentLimitExceeded { limit } => {
                write!(f, "Component type limit exceeded (max {limit})")
            }
            EcsError::InvalidLayout { key, size, alignment } => {
                write!(f, "Invalid layout for {key:?}: size {size}, alignment {alignment}")
            }
            EcsError::InvalidCombination { diagnostics } => {
                write!(f, "Component combination violates {diagnostics} constraint(s)")
            }
            EcsError::BufferTooSmall { expected, actual } => {
                write!(f, "Component payload too small: expected {expected} bytes, got {actual}")
            }
            EcsError::DeferredQueueOverflow { capacity } => {
                write!(f, "Deferred command queue overflow (capacity {capacity})")
            }
            EcsError::DependencyCycle { members } => {
                write!(f, "System dependency cycle: {}", members.join(" -> "))
            }
            EcsError::SystemError { system, message } => {
                write!(f, "System {system:?} failed: {message}")
            }
            EcsError::ResourceClosed => write!(f, "World has been shut down"),
            EcsError::RelationCycle { parent, child } => {
                write!(
                    f,
                    "Relation cycle: slot {} cannot become parent of slot {}",
                    parent.slot(),
                    child.slot()
                )
            }
            EcsError::SnapshotMismatch { type_id, expected_size, actual_size } => {
                write!(
                    f,
                    "Snapshot mismatch for type {type_id}: snapshot size {expected_size}, registered size {actual_size}"
                )
            }
            EcsError::BatchTooLarge => write!(f, "Batch size too large"),
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
