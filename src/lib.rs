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

//! Flux ECS - archetype-based Entity Component System runtime
//!
//! Data-oriented storage for large entity populations: a generational
//! entity allocator, an explicit byte-layout component registry, sparse-set
//! archetype columns with change tracking, a cached query engine and a
//! phased, dependency-ordered, optionally parallel system scheduler.

pub mod archetype;
pub mod column;
pub mod command;
pub mod component;
pub mod entity;
pub mod error;
pub mod event;
pub mod graph;
pub mod mask;
pub mod query;
pub mod relation;
pub mod snapshot;
pub mod world;

// Scheduler and execution
pub mod executor;
pub mod schedule;
pub mod system;

#[cfg(feature = "profiling")]
pub mod profiling;

pub mod prelude;

// Re-exports for convenience
pub use archetype::Archetype;
pub use column::{Column, GpuSyncSink};
pub use command::{CommandSender, DeferredCommand};
pub use component::{ComponentFlags, TypeDescriptor, TypeInfo, TypeRegistry};
pub use entity::{Entity, EntityFlags};
pub use error::{EcsError, Result};
pub use event::{EcsEvent, EventBus, EventSubscriber};
pub use mask::ComponentMask;
pub use query::QueryDescriptor;
pub use snapshot::WorldSnapshot;
pub use world::{World, WorldConfig};

// Scheduler exports
pub use executor::{SafeExecutor, SystemProfiler, SystemStats, WorkerPool};
pub use schedule::{ScheduleDebugInfo, Scheduler};
pub use system::{
    AccessMode, BoxedSystem, ParallelStrategy, Phase, System, SystemAccess, SystemContext,
    SystemDescriptor, SystemId, SystemState, TickInterval,
};
