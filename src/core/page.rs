//! # Pages
//!
//! A page is one carousel slot: an exclusively owned display object, an RGBA
//! buffer of fixed resolution and the animation state of its last flip.
//!
//! Pages are created once by [`Page::allocate`], rewritten in place for as long
//! as the carousel runs, and destroyed exactly once by [`Page::deallocate`],
//! which consumes the page so a second release cannot be written.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::core::blit::blit;
use crate::core::timing::{FlipSpeed, Timestamp};
use crate::display::{DisplayBackend, DisplayObject, DisplayParent};
use crate::error::{FlipbookError, FlipbookResult};

/// Pixel dimensions of a page buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of an RGBA8 buffer at this resolution, `None` on overflow.
    pub fn byte_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(4)
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(512, 512)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// RGBA8 pixel buffer whose resolution is fixed at allocation.
///
/// Every mutable access bumps `revision`, which is how a flip records which
/// write it is showing.
#[derive(Debug)]
pub struct PageBuffer {
    image: RgbaImage,
    revision: u64,
}

impl PageBuffer {
    /// Allocate a zeroed buffer. Allocation failure is reported, not aborted on.
    pub fn new(resolution: Resolution) -> FlipbookResult<Self> {
        if resolution.width == 0 || resolution.height == 0 {
            return Err(FlipbookError::allocation(
                "page buffer",
                format!("resolution {} has a zero dimension", resolution),
            ));
        }
        let len = resolution.byte_len().ok_or_else(|| {
            FlipbookError::allocation(
                "page buffer",
                format!("resolution {} overflows the address space", resolution),
            )
        })?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| FlipbookError::allocation("page buffer", e.to_string()))?;
        data.resize(len, 0);

        let image = RgbaImage::from_raw(resolution.width, resolution.height, data)
            .ok_or_else(|| FlipbookError::allocation("page buffer", "buffer size mismatch"))?;

        Ok(Self { image, revision: 0 })
    }

    pub fn resolution(&self) -> Resolution {
        let (width, height) = self.image.dimensions();
        Resolution { width, height }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Number of writes this buffer has received.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Raw RGBA bytes for in-place writes.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        self.revision += 1;
        &mut self.image
    }

    /// Replace the contents with `src`, scaled to this buffer's resolution.
    pub fn write_image(&mut self, src: &RgbaImage) -> FlipbookResult<()> {
        self.revision += 1;
        blit(src, &mut self.image)
    }
}

/// Animation state stamped onto a page by [`Page::start_flipping`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlipAnimation {
    /// Process time at which the flip starts.
    pub start: Timestamp,
    pub speed: FlipSpeed,
    /// Buffer revision bound as the flip's texture.
    pub revision: u64,
}

/// One carousel slot.
#[derive(Debug)]
pub struct Page {
    object: DisplayObject,
    buffer: PageBuffer,
    animation: Option<FlipAnimation>,
}

impl Page {
    /// Create a page bound to a new display object under `parent`.
    pub fn allocate(
        display: &mut dyn DisplayBackend,
        parent: &DisplayParent,
        resolution: Resolution,
    ) -> FlipbookResult<Self> {
        // Buffer first: if it fails no display object exists yet to leak.
        let buffer = PageBuffer::new(resolution)?;
        let object = display.create(parent, resolution)?;
        Ok(Self {
            object,
            buffer,
            animation: None,
        })
    }

    /// Release the display object and free the buffer.
    pub fn deallocate(self, display: &mut dyn DisplayBackend) {
        display.release(self.object);
    }

    pub fn object(&self) -> &DisplayObject {
        &self.object
    }

    pub fn buffer(&self) -> &PageBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut PageBuffer {
        &mut self.buffer
    }

    /// `None` until the page has flipped once.
    pub fn animation(&self) -> Option<&FlipAnimation> {
        self.animation.as_ref()
    }

    /// Stamp start time, speed and the current buffer onto the page and hand
    /// the triple to the display. The new content is visible from `now`.
    pub fn start_flipping(
        &mut self,
        speed: FlipSpeed,
        now: Timestamp,
        display: &mut dyn DisplayBackend,
    ) -> FlipAnimation {
        let animation = FlipAnimation {
            start: now,
            speed,
            revision: self.buffer.revision(),
        };
        self.animation = Some(animation);
        display.present(&self.object, &animation, &self.buffer);
        animation
    }
}
