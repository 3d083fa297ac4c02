use flux_ecs::prelude::*;

fn test_world() -> World {
    World::with_config(WorldConfig {
        worker_count: 0,
        ..WorldConfig::default()
    })
}

#[test]
fn parent_and_children_round_trip() {
    let mut world = test_world();
    let parent = world.create_entity().unwrap();
    let child_a = world.create_entity().unwrap();
    let child_b = world.create_entity().unwrap();

    world.set_parent(child_a, Some(parent)).unwrap();
    world.set_parent(child_b, Some(parent)).unwrap();

    assert_eq!(world.get_parent(child_a), Some(parent));
    assert_eq!(world.get_children(parent), vec![child_a, child_b]);

    // Reparenting moves the child between sibling lists.
    let other = world.create_entity().unwrap();
    world.set_parent(child_a, Some(other)).unwrap();
    assert_eq!(world.get_children(parent), vec![child_b]);
    assert_eq!(world.get_children(other), vec![child_a]);

    // Detach.
    world.set_parent(child_b, None).unwrap();
    assert_eq!(world.get_parent(child_b), None);
    assert!(world.get_children(parent).is_empty());
}

#[test]
fn cycles_are_refused() {
    let mut world = test_world();
    let grandparent = world.create_entity().unwrap();
    let parent = world.create_entity().unwrap();
    let child = world.create_entity().unwrap();

    world.set_parent(parent, Some(grandparent)).unwrap();
    world.set_parent(child, Some(parent)).unwrap();

    // Attaching an ancestor under its descendant would loop.
    assert!(matches!(
        world.set_parent(grandparent, Some(child)),
        Err(EcsError::RelationCycle { .. })
    ));
    // Self-parenting is the degenerate cycle.
    assert!(world.set_parent(parent, Some(parent)).is_err());
}

#[test]
fn destroying_a_parent_detaches_children_without_destroying_them() {
    let mut world = test_world();
    let parent = world.create_entity().unwrap();
    let child = world.create_entity().unwrap();
    world.set_parent(child, Some(parent)).unwrap();

    world.destroy(parent);

    assert!(!world.is_valid(parent));
    assert!(world.is_valid(child));
    assert_eq!(world.get_parent(child), None);
}

#[test]
fn destroy_recursive_takes_the_subtree() {
    let mut world = test_world();
    let root = world.create_entity().unwrap();
    let mid = world.create_entity().unwrap();
    let leaf = world.create_entity().unwrap();
    let bystander = world.create_entity().unwrap();

    world.set_parent(mid, Some(root)).unwrap();
    world.set_parent(leaf, Some(mid)).unwrap();

    world.destroy_recursive(root);

    assert!(!world.is_valid(root));
    assert!(!world.is_valid(mid));
    assert!(!world.is_valid(leaf));
    assert!(world.is_valid(bystander));
    assert_eq!(world.entity_count(), 1);
}

#[test]
fn stale_handles_fall_out_of_child_lists() {
    let mut world = test_world();
    let parent = world.create_entity().unwrap();
    let child = world.create_entity().unwrap();
    world.set_parent(child, Some(parent)).unwrap();

    world.destroy(child);
    assert!(world.get_children(parent).is_empty());

    // Invalid handles are no-ops for the relation mutators too.
    world.set_parent(child, Some(parent)).unwrap();
    assert!(world.get_children(parent).is_empty());
}

#[test]
fn typed_relations_track_their_own_keys() {
    let mut world = test_world();
    const TARGETS: u32 = 1;
    const ALLIES: u32 = 2;

    let a = world.create_entity().unwrap();
    let b = world.create_entity().unwrap();
    let c = world.create_entity().unwrap();

    world.add_relation(a, TARGETS, b);
    world.add_relation(a, TARGETS, c);
    world.add_relation(a, ALLIES, c);

    assert_eq!(world.get_related(a, TARGETS), vec![b, c]);
    assert_eq!(world.get_related(a, ALLIES), vec![c]);

    assert!(world.remove_relation(a, TARGETS, b));
    assert_eq!(world.get_related(a, TARGETS), vec![c]);

    // Destroying a target filters it from lookups.
    world.destroy(c);
    assert!(world.get_related(a, TARGETS).is_empty());
}
