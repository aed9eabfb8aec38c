//! Notifications fired by the annotation service.

use crate::annotation::{AnnotationId, AnnotationRecord};
use std::cell::RefCell;
use std::rc::Rc;

/// Typed callbacks for collaborators (drawing layer, UI, persistence).
///
/// Every method has an empty default so listeners only implement what they need.
pub trait AnnotationListener {
    fn on_annotation_added(&mut self, _id: &str, _record: &AnnotationRecord) {}
    fn on_annotation_removed(&mut self, _id: &str) {}
    fn on_annotation_changed(&mut self, _id: &str, _record: &AnnotationRecord) {}
    fn on_annotations_batch_changed(&mut self, _changes: &[(AnnotationId, AnnotationRecord)]) {}
    fn on_annotations_batch_removed(&mut self, _ids: &[AnnotationId]) {}
    fn on_request_redraw(&mut self) {}
}

/// A notification as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationEvent {
    Added { id: AnnotationId, record: AnnotationRecord },
    Removed { id: AnnotationId },
    Changed { id: AnnotationId, record: AnnotationRecord },
    BatchChanged { changes: Vec<(AnnotationId, AnnotationRecord)> },
    BatchRemoved { ids: Vec<AnnotationId> },
    Redraw,
}

/// Listener that collects events for later polling.
///
/// Clones share the same buffer: register one clone and keep another to read.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Rc<RefCell<Vec<AnnotationEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain collected events.
    pub fn take(&self) -> Vec<AnnotationEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    fn push(&self, event: AnnotationEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl AnnotationListener for EventRecorder {
    fn on_annotation_added(&mut self, id: &str, record: &AnnotationRecord) {
        self.push(AnnotationEvent::Added {
            id: id.to_string(),
            record: record.clone(),
        });
    }

    fn on_annotation_removed(&mut self, id: &str) {
        self.push(AnnotationEvent::Removed { id: id.to_string() });
    }

    fn on_annotation_changed(&mut self, id: &str, record: &AnnotationRecord) {
        self.push(AnnotationEvent::Changed {
            id: id.to_string(),
            record: record.clone(),
        });
    }

    fn on_annotations_batch_changed(&mut self, changes: &[(AnnotationId, AnnotationRecord)]) {
        self.push(AnnotationEvent::BatchChanged {
            changes: changes.to_vec(),
        });
    }

    fn on_annotations_batch_removed(&mut self, ids: &[AnnotationId]) {
        self.push(AnnotationEvent::BatchRemoved { ids: ids.to_vec() });
    }

    fn on_request_redraw(&mut self) {
        self.push(AnnotationEvent::Redraw);
    }
}

/// Registered listeners, notified in registration order.
#[derive(Default)]
pub struct Listeners {
    listeners: Vec<Box<dyn AnnotationListener>>,
}

impl Listeners {
    pub fn register(&mut self, listener: Box<dyn AnnotationListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn added(&mut self, record: &AnnotationRecord) {
        for l in &mut self.listeners {
            l.on_annotation_added(record.id(), record);
        }
    }

    pub fn removed(&mut self, id: &str) {
        for l in &mut self.listeners {
            l.on_annotation_removed(id);
        }
    }

    pub fn changed(&mut self, record: &AnnotationRecord) {
        for l in &mut self.listeners {
            l.on_annotation_changed(record.id(), record);
        }
    }

    pub fn batch_changed(&mut self, changes: &[(AnnotationId, AnnotationRecord)]) {
        if changes.is_empty() {
            return;
        }
        for l in &mut self.listeners {
            l.on_annotations_batch_changed(changes);
        }
    }

    pub fn batch_removed(&mut self, ids: &[AnnotationId]) {
        if ids.is_empty() {
            return;
        }
        for l in &mut self.listeners {
            l.on_annotations_batch_removed(ids);
        }
    }

    pub fn redraw(&mut self) {
        for l in &mut self.listeners {
            l.on_request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_clones_share_buffer() {
        let recorder = EventRecorder::new();
        let mut listeners = Listeners::default();
        listeners.register(Box::new(recorder.clone()));

        listeners.removed("a");
        listeners.redraw();
        listeners.batch_removed(&[]);

        assert_eq!(
            recorder.take(),
            vec![
                AnnotationEvent::Removed { id: "a".to_string() },
                AnnotationEvent::Redraw,
            ]
        );
        assert!(recorder.is_empty());
    }
}
