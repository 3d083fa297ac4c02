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

//! Deferred structural commands.
//!
//! Structural mutation is forbidden while systems iterate, so systems queue
//! commands here instead. Any thread may enqueue; the world drains the queue
//! between phases on the main thread, in submission order.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::entity::Entity;
use crate::error::{EcsError, Result};

/// One queued structural mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredCommand {
    Destroy(Entity),
    AddComponent {
        entity: Entity,
        type_id: u32,
        bytes: Vec<u8>,
    },
    RemoveComponent {
        entity: Entity,
        type_id: u32,
    },
    SetParent {
        child: Entity,
        parent: Option<Entity>,
    },
}

/// Clonable producer handle. Enqueueing past capacity surfaces
/// `DeferredQueueOverflow` to the submitting thread; the command is dropped.
#[derive(Clone)]
pub struct CommandSender {
    sender: Sender<DeferredCommand>,
    capacity: usize,
}

impl CommandSender {
    pub fn send(&self, command: DeferredCommand) -> Result<()> {
        self.sender.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) | TrySendError::Disconnected(_) => {
                EcsError::DeferredQueueOverflow {
                    capacity: self.capacity,
                }
            }
        })
    }

    pub fn destroy(&self, entity: Entity) -> Result<()> {
        self.send(DeferredCommand::Destroy(entity))
    }

    pub fn add_component(&self, entity: Entity, type_id: u32, bytes: &[u8]) -> Result<()> {
        self.send(DeferredCommand::AddComponent {
            entity,
            type_id,
            bytes: bytes.to_vec(),
        })
    }

    pub fn remove_component(&self, entity: Entity, type_id: u32) -> Result<()> {
        self.send(DeferredCommand::RemoveComponent { entity, type_id })
    }

    pub fn set_parent(&self, child: Entity, parent: Option<Entity>) -> Result<()> {
        self.send(DeferredCommand::SetParent { child, parent })
    }
}

/// Multi-producer, single-consumer command buffer.
pub struct CommandQueue {
    sender: Sender<DeferredCommand>,
    receiver: Receiver<DeferredCommand>,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// A producer handle for systems and external threads.
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            sender: self.sender.clone(),
            capacity: self.capacity,
        }
    }

    /// Dequeue everything currently buffered, in submission order.
    pub fn drain(&self) -> Vec<DeferredCommand> {
        self.receiver.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_drain_in_submission_order() {
        let queue = CommandQueue::new(8);
        let sender = queue.sender();

        let e1 = Entity::new(1, 1);
        let e2 = Entity::new(2, 1);
        sender.destroy(e1).unwrap();
        sender.add_component(e2, 0, &[1, 2, 3, 4]).unwrap();
        sender.remove_component(e2, 1).unwrap();

        let drained = queue.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0], DeferredCommand::Destroy(e1));
        assert!(matches!(
            &drained[1],
            DeferredCommand::AddComponent { entity, type_id: 0, bytes } if *entity == e2 && bytes == &[1, 2, 3, 4]
        ));
        assert_eq!(
            drained[2],
            DeferredCommand::RemoveComponent {
                entity: e2,
                type_id: 1
            }
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_surfaces_and_drops_the_command() {
        let queue = CommandQueue::new(2);
        let sender = queue.sender();
        let entity = Entity::new(1, 1);

        sender.destroy(entity).unwrap();
        sender.destroy(entity).unwrap();
        let err = sender.destroy(entity).unwrap_err();
        assert_eq!(err, EcsError::DeferredQueueOverflow { capacity: 2 });
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn producers_can_enqueue_from_other_threads() {
        let queue = CommandQueue::new(64);
        let mut handles = Vec::new();
        for t in 0..4u32 {
            let sender = queue.sender();
            handles.push(std::thread::spawn(move || {
                for i in 0..8 {
                    sender.destroy(Entity::new(t * 8 + i + 1, 1)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.drain().len(), 32);
    }
}
