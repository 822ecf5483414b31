//! Event handling.
//!
//! This library exposes an event-based interface for observing running nodes in real-time.
//! [EventListeners](EventListener) can be registered on a [Node](crate::node::Node) with the
//! [add_listener](crate::node::Node::add_listener) method. Listeners are called from the node's
//! own thread, and may register further listeners on the same node while handling an event.
//!
//! A blanket implementation of [EventListener] for all `Fn(&Event) + Send` is provided.

use std::sync::{Arc, Mutex};

use crate::channel::lock;
use crate::error::Fault;
use crate::instruction::OpCode;

/// Represents an event that occurred while a node was running.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// The node executed the top-level instruction at `position`.
    Executed {
        position: usize,
        opcode: OpCode,
    },

    /// The node passed over a run-once instruction that had already run.
    Skipped {
        position: usize,
    },

    /// The node stopped without a fault.
    Stopped,

    /// The node stopped because of a fault.
    Faulted(Fault),
}

/// Trait for consuming events.
pub trait EventListener: Send {
    /// Called whenever a new event has been created.
    fn event(&mut self, event: &Event);
}

impl<F> EventListener for F where F: Fn(&Event) + Send {
    fn event(&mut self, event: &Event) {
        self(event)
    }
}

type SharedListener = Arc<Mutex<Box<dyn EventListener>>>;

pub(crate) struct EventDispatcher {
    listeners: Mutex<Vec<SharedListener>>,
}

impl EventDispatcher {
    pub fn new() -> EventDispatcher {
        EventDispatcher {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn add_listener<L: EventListener + 'static>(&self, listener: L) {
        let listener = Box::new(listener) as Box<dyn EventListener>;
        lock(&self.listeners).push(Arc::new(Mutex::new(listener)))
    }

    /// Delivers `event` to the listeners registered so far. The listener list is not locked
    /// while they run.
    pub fn dispatch(&self, event: Event) {
        let listeners = lock(&self.listeners).clone();

        for listener in listeners {
            lock(&*listener).event(&event);
        }
    }
}
