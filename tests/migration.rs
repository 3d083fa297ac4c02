use flux_ecs::prelude::*;

fn test_world() -> World {
    World::with_config(WorldConfig {
        worker_count: 0,
        ..WorldConfig::default()
    })
}

#[test]
fn adding_a_component_migrates_and_preserves_bytes() {
    let mut world = test_world();
    let position = world
        .register_component(TypeInfo::new("position", 12, 4))
        .unwrap();
    let velocity = world
        .register_component(TypeInfo::new("velocity", 12, 4))
        .unwrap();

    let entity = world.create_entity().unwrap();
    let payload: Vec<u8> = (0..12u8).collect();
    world.add_component(entity, position, &payload).unwrap();

    let old_archetypes = world.query_archetypes(&QueryDescriptor::new().with(position).without(velocity));
    assert_eq!(old_archetypes.len(), 1);

    world.add_component(entity, velocity, &[0u8; 12]).unwrap();

    // The entity now lives in the {position, velocity} archetype and the old
    // archetype no longer holds it.
    let both = world.query_archetypes(&QueryDescriptor::new().with(position).with(velocity));
    assert_eq!(both.len(), 1);
    let destination = world.archetype(both[0]).unwrap();
    assert_eq!(destination.entities(), &[entity]);
    let source = world.archetype(old_archetypes[0]).unwrap();
    assert!(source.is_empty());

    // Byte-for-byte preservation across the migration.
    assert_eq!(world.get_component(entity, position).unwrap(), &payload[..]);
}

#[test]
fn removing_a_component_mirrors_the_migration() {
    let mut world = test_world();
    let a = world.register_component(TypeInfo::new("a", 8, 8)).unwrap();
    let b = world.register_component(TypeInfo::new("b", 8, 8)).unwrap();

    let entity = world.create_entity().unwrap();
    world.add_component(entity, a, &7u64.to_ne_bytes()).unwrap();
    world.add_component(entity, b, &9u64.to_ne_bytes()).unwrap();

    world.remove_component(entity, b).unwrap();
    assert!(world.has_component(entity, a));
    assert!(!world.has_component(entity, b));
    assert_eq!(world.get_component(entity, a).unwrap(), &7u64.to_ne_bytes());

    // Removing the last component leaves the entity archetype-less but alive.
    world.remove_component(entity, a).unwrap();
    assert!(world.is_valid(entity));
    assert!(!world.has_component(entity, a));
    assert_eq!(world.count(&QueryDescriptor::new().with(a)), 0);

    // Removing a component the entity lacks is a no-op.
    world.remove_component(entity, b).unwrap();
    assert!(world.is_valid(entity));
}

#[test]
fn swap_remove_keeps_other_bindings_intact() {
    let mut world = test_world();
    let value = world
        .register_component(TypeInfo::new("value", 4, 4))
        .unwrap();

    // Roster [a, b, c, d], with distinct payloads.
    let mut entities = Vec::new();
    for i in 0..4u32 {
        let e = world.create_entity().unwrap();
        world
            .add_component(e, value, &(i * 10).to_ne_bytes())
            .unwrap();
        entities.push(e);
    }
    let (a, b, c, d) = (entities[0], entities[1], entities[2], entities[3]);

    world.destroy(b);

    // The last entity was swapped into b's roster position.
    let ids = world.query_archetypes(&QueryDescriptor::new().with(value));
    let archetype = world.archetype(ids[0]).unwrap();
    assert_eq!(archetype.entities(), &[a, d, c]);

    // d's bytes moved with it; c's binding is untouched.
    let column = archetype.column(value).unwrap();
    assert_eq!(column.bytes_at(1), &30u32.to_ne_bytes());
    assert_eq!(column.get(d.slot()).unwrap(), &30u32.to_ne_bytes());
    assert_eq!(column.get(c.slot()).unwrap(), &20u32.to_ne_bytes());
    assert!(column.get(b.slot()).is_none());
    assert_eq!(world.get_component(a, value).unwrap(), &0u32.to_ne_bytes());
}

#[test]
fn migration_edges_are_cached_on_the_archetypes() {
    let mut world = test_world();
    let a = world.register_component(TypeInfo::new("a", 4, 4)).unwrap();
    let b = world.register_component(TypeInfo::new("b", 4, 4)).unwrap();

    let first = world.create_entity().unwrap();
    world.add_component(first, a, &[0u8; 4]).unwrap();
    world.add_component(first, b, &[0u8; 4]).unwrap();

    let only_a = world.query_archetypes(&QueryDescriptor::new().with(a).without(b))[0];
    let both = world.query_archetypes(&QueryDescriptor::new().with(a).with(b))[0];

    assert_eq!(world.archetype(only_a).unwrap().add_edge(b), Some(both));
    assert_eq!(world.archetype(both).unwrap().remove_edge(b), Some(only_a));
}

#[test]
fn overwriting_an_existing_component_does_not_migrate() {
    let mut world = test_world();
    let a = world.register_component(TypeInfo::new("a", 4, 4)).unwrap();

    let entity = world.create_entity().unwrap();
    world.add_component(entity, a, &1u32.to_ne_bytes()).unwrap();
    let version = world.structure_version();
    let archetype_count = world.archetype_count();

    world.add_component(entity, a, &2u32.to_ne_bytes()).unwrap();
    assert_eq!(world.get_component(entity, a).unwrap(), &2u32.to_ne_bytes());
    assert_eq!(world.archetype_count(), archetype_count);
    assert_eq!(world.structure_version(), version);
}

#[test]
fn tag_components_join_the_mask_without_storage() {
    let mut world = test_world();
    let body = world.register_component(TypeInfo::new("body", 4, 4)).unwrap();
    let frozen = world.register_component(TypeInfo::tag("frozen")).unwrap();

    let entity = world.create_entity().unwrap();
    world.add_component(entity, body, &[1u8; 4]).unwrap();
    world.add_component(entity, frozen, &[]).unwrap();

    assert!(world.has_component(entity, frozen));
    assert!(world.get_component(entity, frozen).is_none());
    assert_eq!(
        world.count(&QueryDescriptor::new().with(body).with(frozen)),
        1
    );

    world.remove_component(entity, frozen).unwrap();
    assert!(!world.has_component(entity, frozen));
    assert_eq!(world.get_component(entity, body).unwrap(), &[1u8; 4]);
}
