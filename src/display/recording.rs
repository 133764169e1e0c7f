//! In-memory display backend that records every call.
//!
//! Used headless (no renderer attached) and by tests, which keep a
//! [`DisplayLog`] handle to inspect the calls after the backend has been moved
//! into a running session.

use std::sync::{Arc, Mutex, PoisonError};

use crate::core::page::{FlipAnimation, PageBuffer, Resolution};
use crate::core::timing::Timestamp;
use crate::display::{DisplayBackend, DisplayObject, DisplayParent};
use crate::error::{FlipbookError, FlipbookResult};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    Created { object: u64, parent: String },
    Presented {
        object: u64,
        start: Timestamp,
        speed: f32,
        revision: u64,
    },
    Released { object: u64 },
}

/// Shared, cloneable view of the recorded events.
#[derive(Debug, Clone, Default)]
pub struct DisplayLog {
    events: Arc<Mutex<Vec<DisplayEvent>>>,
}

impl DisplayLog {
    fn push(&self, event: DisplayEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<DisplayEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Object ids in creation order.
    pub fn created(&self) -> Vec<u64> {
        self.filter(|event| match event {
            DisplayEvent::Created { object, .. } => Some(*object),
            _ => None,
        })
    }

    /// Object ids in the order their flips were presented.
    pub fn presented(&self) -> Vec<u64> {
        self.filter(|event| match event {
            DisplayEvent::Presented { object, .. } => Some(*object),
            _ => None,
        })
    }

    /// Object ids in release order.
    pub fn released(&self) -> Vec<u64> {
        self.filter(|event| match event {
            DisplayEvent::Released { object } => Some(*object),
            _ => None,
        })
    }

    /// Objects created and not yet released.
    pub fn live(&self) -> usize {
        self.created().len() - self.released().len()
    }

    fn filter<F>(&self, select: F) -> Vec<u64>
    where
        F: Fn(&DisplayEvent) -> Option<u64>,
    {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(select)
            .collect()
    }
}

/// Display backend that only records.
#[derive(Debug, Default)]
pub struct RecordingDisplay {
    next_id: u64,
    log: DisplayLog,
    fail_after: Option<usize>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every creation after the first `count` fail with an allocation error.
    pub fn fail_creation_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    pub fn log(&self) -> DisplayLog {
        self.log.clone()
    }
}

impl DisplayBackend for RecordingDisplay {
    fn create(
        &mut self,
        parent: &DisplayParent,
        resolution: Resolution,
    ) -> FlipbookResult<DisplayObject> {
        if let Some(limit) = self.fail_after {
            if self.next_id as usize >= limit {
                return Err(FlipbookError::allocation(
                    "display object",
                    format!("creation limit of {} reached", limit),
                )
                .with_metadata("resolution", resolution.to_string()));
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.log.push(DisplayEvent::Created {
            object: id,
            parent: parent.name.clone(),
        });
        Ok(DisplayObject::new(id))
    }

    fn present(&mut self, object: &DisplayObject, animation: &FlipAnimation, _buffer: &PageBuffer) {
        self.log.push(DisplayEvent::Presented {
            object: object.id(),
            start: animation.start,
            speed: animation.speed.get(),
            revision: animation.revision,
        });
    }

    fn release(&mut self, object: DisplayObject) {
        self.log.push(DisplayEvent::Released {
            object: object.id(),
        });
    }
}
