use std::sync::Arc;

use flux_ecs::component::TypeRegistry;
use flux_ecs::prelude::*;

fn test_world() -> World {
    World::with_config(WorldConfig {
        worker_count: 0,
        ..WorldConfig::default()
    })
}

#[test]
fn snapshot_round_trips_entities_and_bytes() {
    let mut world = test_world();
    let position = world
        .register_component(TypeInfo::new("position", 12, 4))
        .unwrap();
    let tag = world.register_component(TypeInfo::tag("marker")).unwrap();

    let plain = world.create_entity().unwrap();
    world.add_component(plain, position, &[1u8; 12]).unwrap();
    let tagged = world.create_entity().unwrap();
    world.add_component(tagged, position, &[2u8; 12]).unwrap();
    world.add_component(tagged, tag, &[]).unwrap();

    let snapshot = world.snapshot();
    assert_eq!(snapshot.entity_count(), 2);

    // Mutate past the capture point, then roll back.
    world.get_component_mut(plain, position).unwrap()[0] = 99;
    world.destroy(tagged);
    world.create_entity().unwrap();

    world.restore(&snapshot).unwrap();

    assert_eq!(world.entity_count(), 2);
    assert!(world.is_valid(plain));
    assert!(world.is_valid(tagged));
    assert_eq!(world.get_component(plain, position).unwrap(), &[1u8; 12]);
    assert_eq!(world.get_component(tagged, position).unwrap(), &[2u8; 12]);
    assert!(world.has_component(tagged, tag));
    assert_eq!(world.count(&QueryDescriptor::new().with(position)), 2);
}

#[test]
fn restore_recycles_the_untouched_slots() {
    let mut world = test_world();
    let a = world.register_component(TypeInfo::new("a", 4, 4)).unwrap();

    let keep = world.create_entity().unwrap();
    world.add_component(keep, a, &[1u8; 4]).unwrap();
    let hole = world.create_entity().unwrap();
    world.destroy(hole);

    let snapshot = world.snapshot();
    world.restore(&snapshot).unwrap();

    // The destroyed slot is free again after the restore.
    let reborn = world.create_entity().unwrap();
    assert_eq!(reborn.slot(), hole.slot());
    assert!(world.is_valid(keep));
}

#[test]
fn restore_refuses_mismatched_schema() {
    let mut world = test_world();
    world
        .register_component(TypeInfo::new("position", 12, 4))
        .unwrap();
    let e = world.create_entity().unwrap();
    world.add_component(e, 0, &[3u8; 12]).unwrap();
    let snapshot = world.snapshot();

    // A registry where id 0 has a different size refuses the restore.
    let registry = Arc::new(TypeRegistry::new());
    registry
        .register(TypeInfo::new("position", 16, 4))
        .unwrap();
    let mut other = World::with_registry(
        WorldConfig {
            worker_count: 0,
            ..WorldConfig::default()
        },
        registry,
    );

    assert!(matches!(
        other.restore(&snapshot),
        Err(EcsError::SnapshotMismatch { type_id: 0, .. })
    ));
    // Refusal leaves the target world untouched (still empty).
    assert_eq!(other.entity_count(), 0);
}

#[test]
fn restore_into_a_shared_registry_world_succeeds() {
    let registry = Arc::new(TypeRegistry::new());
    let config = WorldConfig {
        worker_count: 0,
        ..WorldConfig::default()
    };

    let mut source = World::with_registry(config.clone(), registry.clone());
    let position = source
        .register_component(TypeInfo::new("position", 12, 4))
        .unwrap();
    let e = source.create_entity().unwrap();
    source.add_component(e, position, &[7u8; 12]).unwrap();

    let snapshot = source.snapshot();

    let mut clone = World::with_registry(config, registry);
    clone.restore(&snapshot).unwrap();
    assert_eq!(clone.entity_count(), 1);
    assert_eq!(clone.get_component(e, position).unwrap(), &[7u8; 12]);
}
