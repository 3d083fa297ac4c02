//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use flux_ecs::prelude::*;
//! ```

pub use crate::component::{ComponentFlags, TypeInfo, TypeRegistry};
pub use crate::entity::{Entity, EntityFlags};
pub use crate::error::{EcsError, Result};
pub use crate::event::{EcsEvent, EventSubscriber};
pub use crate::query::QueryDescriptor;
pub use crate::system::{
    AccessMode, ParallelStrategy, Phase, System, SystemContext, SystemDescriptor,
};
pub use crate::world::{World, WorldConfig};
