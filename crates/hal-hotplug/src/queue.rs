//! FIFO event queue gated to a single in-flight event

use std::collections::VecDeque;

use crate::event::{EventId, HotplugEvent};

#[derive(Debug, Default)]
pub struct EventQueue {
    pending: VecDeque<HotplugEvent>,
    in_flight: Option<EventId>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail
    pub fn push(&mut self, event: HotplugEvent) {
        self.pending.push_back(event);
    }

    /// Pop the head and close the gate, unless an event is already in flight
    pub fn try_begin(&mut self) -> Option<HotplugEvent> {
        if self.in_flight.is_some() {
            return None;
        }
        let event = self.pending.pop_front()?;
        self.in_flight = Some(event.id);
        Some(event)
    }

    /// Open the gate for the event that holds it.
    ///
    /// Returns false (and changes nothing) if `id` is not the in-flight event.
    pub fn finish(&mut self, id: EventId) -> bool {
        if self.in_flight == Some(id) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    pub fn in_flight(&self) -> Option<EventId> {
        self.in_flight
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Nothing queued and nothing in flight
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal_core::DeviceKind;

    #[test]
    fn test_single_flight_fifo() {
        let mut queue = EventQueue::new();
        let a = HotplugEvent::add(DeviceKind::Bus, "/a");
        let b = HotplugEvent::add(DeviceKind::Bus, "/b");
        let (a_id, b_id) = (a.id, b.id);
        queue.push(a);
        queue.push(b);

        let first = queue.try_begin().unwrap();
        assert_eq!(first.id, a_id);
        assert!(queue.try_begin().is_none());
        assert_eq!(queue.pending(), 1);

        assert!(!queue.finish(b_id));
        assert!(queue.finish(a_id));
        assert!(!queue.finish(a_id));

        assert_eq!(queue.try_begin().unwrap().id, b_id);
        assert!(queue.finish(b_id));
        assert!(queue.is_idle());
        assert!(queue.try_begin().is_none());
    }
}
