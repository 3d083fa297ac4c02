use std::sync::{Arc, Mutex};

use flux_ecs::prelude::*;

type Log = Arc<Mutex<Vec<&'static str>>>;

struct RecordingSystem {
    name: &'static str,
    log: Log,
}

impl System for RecordingSystem {
    fn update(&self, _ctx: &SystemContext<'_>, _archetype: &flux_ecs::Archetype) -> Result<()> {
        self.log.lock().unwrap().push(self.name);
        Ok(())
    }
}

#[test]
fn a_cycle_is_reported_broken_and_still_executes() {
    let mut world = World::new();
    let anchor = world
        .register_component(TypeInfo::new("anchor", 4, 4))
        .unwrap();
    let e = world.create_entity().unwrap();
    world.add_component(e, anchor, &[0u8; 4]).unwrap();

    let log: Log = Arc::new(Mutex::new(Vec::new()));

    // a -> b -> c -> a
    world.register_system(
        SystemDescriptor::new("a", Phase::Update)
            .component(anchor, AccessMode::Read)
            .depends_on("b"),
        Box::new(RecordingSystem { name: "a", log: log.clone() }),
    );
    world.register_system(
        SystemDescriptor::new("b", Phase::Update)
            .component(anchor, AccessMode::Read)
            .depends_on("c"),
        Box::new(RecordingSystem { name: "b", log: log.clone() }),
    );
    world.register_system(
        SystemDescriptor::new("c", Phase::Update)
            .component(anchor, AccessMode::Read)
            .depends_on("a"),
        Box::new(RecordingSystem { name: "c", log: log.clone() }),
    );

    // The cycle contains exactly the three members.
    let cycles = world.dependency_cycles(Phase::Update);
    assert_eq!(cycles.len(), 1);
    let mut members = cycles[0].clone();
    members.sort();
    assert_eq!(members, vec!["a", "b", "c"]);

    // Broken deterministically by priority then name: every frame runs each
    // system exactly once, in the same order.
    for _ in 0..10 {
        log.lock().unwrap().clear();
        world.step_frame(0.016).unwrap();
        assert_eq!(log.lock().unwrap().as_slice(), &["a", "b", "c"]);
    }
}

#[test]
fn cycle_break_prefers_lower_priority() {
    let mut world = World::new();
    let anchor = world
        .register_component(TypeInfo::new("anchor", 4, 4))
        .unwrap();
    let e = world.create_entity().unwrap();
    world.add_component(e, anchor, &[0u8; 4]).unwrap();

    let log: Log = Arc::new(Mutex::new(Vec::new()));

    // Two-member cycle; "zulu" has the lower priority and must lead.
    world.register_system(
        SystemDescriptor::new("alpha", Phase::Update)
            .component(anchor, AccessMode::Read)
            .priority(5)
            .depends_on("zulu"),
        Box::new(RecordingSystem { name: "alpha", log: log.clone() }),
    );
    world.register_system(
        SystemDescriptor::new("zulu", Phase::Update)
            .component(anchor, AccessMode::Read)
            .priority(-5)
            .depends_on("alpha"),
        Box::new(RecordingSystem { name: "zulu", log: log.clone() }),
    );

    world.step_frame(0.016).unwrap();
    assert_eq!(log.lock().unwrap().as_slice(), &["zulu", "alpha"]);

    let cycles = world.dependency_cycles(Phase::Update);
    assert_eq!(cycles, vec![vec!["zulu".to_string(), "alpha".to_string()]]);
}

#[test]
fn acyclic_phases_report_no_cycles() {
    let mut world = World::new();
    let anchor = world
        .register_component(TypeInfo::new("anchor", 4, 4))
        .unwrap();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    world.register_system(
        SystemDescriptor::new("first", Phase::Update).component(anchor, AccessMode::Read),
        Box::new(RecordingSystem { name: "first", log: log.clone() }),
    );
    world.register_system(
        SystemDescriptor::new("second", Phase::Update)
            .component(anchor, AccessMode::Read)
            .runs_before("first"),
        Box::new(RecordingSystem { name: "second", log }),
    );

    assert!(world.dependency_cycles(Phase::Update).is_empty());
}
