//! World lifecycle events and the synchronous event bus.
//!
//! Subscribers run on the publishing thread, inside the operation that
//! raised the event. The bus is disabled unless the world config opts in.

use crate::entity::Entity;

/// Lifecycle event raised by the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcsEvent {
    EntityCreated(Entity),
    EntityDestroying(Entity),
    EntityDestroyed(Entity),
    ComponentAdded(Entity, u32),
    ComponentRemoving(Entity, u32),
    ComponentRemoved(Entity, u32),
    ArchetypeCreated(u32),
    WorldInitialized,
    WorldPaused,
    WorldResumed,
    WorldShuttingDown,
}

/// Subscriber that listens for world events.
pub trait EventSubscriber: Send + Sync {
    /// Called synchronously when an event is published.
    fn on_event(&mut self, event: &EcsEvent);

    /// Subscriber name for diagnostics.
    fn name(&self) -> &str {
        "UnnamedSubscriber"
    }
}

/// Central pub/sub bus for world lifecycle events.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Box<dyn EventSubscriber>>,
    published: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn EventSubscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Dispatch an event to every subscriber, on the calling thread.
    pub fn publish(&mut self, event: EcsEvent) {
        self.published += 1;
        for subscriber in &mut self.subscribers {
            subscriber.on_event(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Total events published over the bus lifetime.
    pub fn published_count(&self) -> u64 {
        self.published
    }

    pub fn clear_subscribers(&mut self) {
        self.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        seen: Arc<Mutex<Vec<EcsEvent>>>,
    }

    impl EventSubscriber for Recorder {
        fn on_event(&mut self, event: &EcsEvent) {
            self.seen.lock().unwrap().push(*event);
        }

        fn name(&self) -> &str {
            "Recorder"
        }
    }

    #[test]
    fn publish_reaches_every_subscriber() {
        let mut bus = EventBus::new();
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(Box::new(Recorder { seen: first.clone() }));
        bus.subscribe(Box::new(Recorder {
            seen: second.clone(),
        }));

        bus.publish(EcsEvent::WorldInitialized);
        bus.publish(EcsEvent::WorldPaused);

        assert_eq!(first.lock().unwrap().len(), 2);
        assert_eq!(
            second.lock().unwrap().as_slice(),
            &[EcsEvent::WorldInitialized, EcsEvent::WorldPaused]
        );
        assert_eq!(bus.published_count(), 2);
        assert_eq!(bus.subscriber_count(), 2);
    }
}
