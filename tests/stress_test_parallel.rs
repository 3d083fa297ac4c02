use flux_ecs::prelude::*;

struct Incrementer {
    type_id: u32,
}

impl System for Incrementer {
    fn update(&self, ctx: &SystemContext<'_>, _archetype: &flux_ecs::Archetype) -> Result<()> {
        let query = QueryDescriptor::new().with(self.type_id);
        ctx.world.for_each_1_mut(&query, self.type_id, |_, bytes| {
            let value = u64::from_ne_bytes(bytes.try_into().unwrap());
            bytes.copy_from_slice(&(value + 1).to_ne_bytes());
        });
        Ok(())
    }
}

#[test]
fn disjoint_writers_make_progress_over_many_frames() {
    let mut world = World::new();
    let counter_a = world
        .register_component(TypeInfo::new("counter_a", 8, 8))
        .unwrap();
    let counter_b = world
        .register_component(TypeInfo::new("counter_b", 8, 8))
        .unwrap();

    let entities = world
        .create_entities_with(&[counter_a, counter_b], 256)
        .unwrap();
    for &e in &entities {
        world.add_component(e, counter_a, &0u64.to_ne_bytes()).unwrap();
        world.add_component(e, counter_b, &0u64.to_ne_bytes()).unwrap();
    }

    // Disjoint writes: both may run concurrently within the phase.
    world.register_system(
        SystemDescriptor::new("inc_a", Phase::Update)
            .component(counter_a, AccessMode::Write)
            .parallel(ParallelStrategy::Entities),
        Box::new(Incrementer { type_id: counter_a }),
    );
    world.register_system(
        SystemDescriptor::new("inc_b", Phase::Update)
            .component(counter_b, AccessMode::Write)
            .parallel(ParallelStrategy::Entities),
        Box::new(Incrementer { type_id: counter_b }),
    );

    for _ in 0..10 {
        world.step_frame(0.016).unwrap();
    }

    for &e in &entities {
        let a = u64::from_ne_bytes(
            world
                .get_component(e, counter_a)
                .unwrap()
                .try_into()
                .unwrap(),
        );
        let b = u64::from_ne_bytes(
            world
                .get_component(e, counter_b)
                .unwrap()
                .try_into()
                .unwrap(),
        );
        assert_eq!(a, 10);
        assert_eq!(b, 10);
    }
}

#[test]
fn parallel_entity_iteration_visits_everything_once() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let mut world = World::new();
    let mass = world.register_component(TypeInfo::new("mass", 4, 4)).unwrap();
    for i in 0..1000u32 {
        let e = world.create_entity().unwrap();
        world.add_component(e, mass, &i.to_ne_bytes()).unwrap();
    }

    let visits = AtomicUsize::new(0);
    let query = QueryDescriptor::new().with(mass).batch_size(64);
    world.par_for_each_entity(&query, |_| {
        visits.fetch_add(1, Ordering::AcqRel);
    });
    assert_eq!(visits.load(Ordering::Acquire), 1000);
}
