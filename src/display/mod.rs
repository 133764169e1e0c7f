//! # Display Module
//!
//! Boundary with the renderer that draws page flips. The orchestration core
//! only ever creates a display object per page, presents a flip on it, and
//! releases it at teardown; everything about meshes and shaders stays on the
//! other side of [`DisplayBackend`].

pub mod recording;
pub mod snapshot;

use serde::{Deserialize, Serialize};

use crate::core::page::{FlipAnimation, PageBuffer, Resolution};
use crate::error::FlipbookResult;

/// Opaque handle to one display object.
///
/// Deliberately neither `Clone` nor `Copy`: a page owns its object exclusively
/// and [`DisplayBackend::release`] consumes it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DisplayObject(u64);

impl DisplayObject {
    /// Backends mint handles with their own ids.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Where new display objects are attached in the renderer's scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayParent {
    pub name: String,
    pub layer: u32,
}

impl Default for DisplayParent {
    fn default() -> Self {
        Self {
            name: "flipbook".to_string(),
            layer: 0,
        }
    }
}

/// Renderer side of the carousel.
pub trait DisplayBackend: Send {
    /// Create a display object for a page of `resolution` under `parent`.
    fn create(
        &mut self,
        parent: &DisplayParent,
        resolution: Resolution,
    ) -> FlipbookResult<DisplayObject>;

    /// Start the flip described by `animation` using `buffer` as its texture.
    fn present(&mut self, object: &DisplayObject, animation: &FlipAnimation, buffer: &PageBuffer);

    /// Destroy a display object.
    fn release(&mut self, object: DisplayObject);
}
