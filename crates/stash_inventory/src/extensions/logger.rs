//! Records every completed event

use std::any::Any;

use crossbeam_channel::{Receiver, Sender};

use stash_core::{ContainerId, ExtensionId};

use crate::container::ItemContainer;
use crate::event::EventLog;
use crate::extension::Extension;

/// An event together with the container it happened in
#[derive(Debug, Clone)]
pub struct LoggedEvent {
    pub container: ContainerId,
    pub event: EventLog,
}

/// Keeps a history of additions, removals and edits
#[derive(Debug, Default)]
pub struct LoggerExtension {
    events: Vec<LoggedEvent>,
    listeners: Vec<Sender<LoggedEvent>>,
}

impl LoggerExtension {
    pub fn extension_id() -> ExtensionId {
        ExtensionId::from_name("stash.logger")
    }

    pub fn new() -> Self {
        Self::default()
    }

    /// Every logged event, oldest first
    pub fn events(&self) -> &[LoggedEvent] {
        &self.events
    }

    /// Up to `count` events, ending `offset` events before the newest. Oldest first.
    pub fn recent_events(&self, count: usize, offset: usize) -> &[LoggedEvent] {
        let end = self.events.len().saturating_sub(offset);
        let start = end.saturating_sub(count);
        &self.events[start..end]
    }

    /// Receive each event as it is logged
    pub fn listen(&mut self) -> Receiver<LoggedEvent> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.listeners.push(sender);
        receiver
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn handle_new_event(&mut self, container: &dyn ItemContainer, event: &EventLog) {
        let logged = LoggedEvent {
            container: container.container_id(),
            event: event.clone(),
        };

        self.listeners.retain(|sender| sender.send(logged.clone()).is_ok());
        self.events.push(logged);
    }
}

impl Extension for LoggerExtension {
    fn identifier(&self) -> ExtensionId {
        Self::extension_id()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn post_addition(&mut self, container: &dyn ItemContainer, event: &EventLog) {
        self.handle_new_event(container, event);
    }

    fn post_removal(&mut self, container: &dyn ItemContainer, event: &EventLog) {
        self.handle_new_event(container, event);
    }

    fn post_entry_changed(&mut self, container: &dyn ItemContainer, event: &EventLog) {
        self.handle_new_event(container, event);
    }
}
