//! Display backend that writes every presented flip to a PNG file.
//!
//! Each display object maps to `<dir>/page-NN.png`, overwritten whenever that
//! page flips, so the directory always mirrors the carousel's current content.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::page::{FlipAnimation, PageBuffer, Resolution};
use crate::display::{DisplayBackend, DisplayObject, DisplayParent};
use crate::error::{FlipbookError, FlipbookResult};

#[derive(Debug)]
pub struct SnapshotDisplay {
    dir: PathBuf,
    next_id: u64,
    written: u64,
}

impl SnapshotDisplay {
    /// Creates `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> FlipbookResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| FlipbookError::io_at("create snapshot dir", dir.display().to_string(), e))?;
        Ok(Self {
            dir,
            next_id: 0,
            written: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a display object's flips are written to.
    pub fn path_for(&self, object: &DisplayObject) -> PathBuf {
        self.dir.join(format!("page-{:02}.png", object.id()))
    }

    /// Number of PNG files written so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl DisplayBackend for SnapshotDisplay {
    fn create(
        &mut self,
        parent: &DisplayParent,
        resolution: Resolution,
    ) -> FlipbookResult<DisplayObject> {
        let object = DisplayObject::new(self.next_id);
        self.next_id += 1;
        debug!(
            "created snapshot page {} ({}) under '{}'",
            object.id(),
            resolution,
            parent.name
        );
        Ok(object)
    }

    fn present(&mut self, object: &DisplayObject, animation: &FlipAnimation, buffer: &PageBuffer) {
        let path = self.path_for(object);
        match buffer.image().save(&path) {
            Ok(()) => {
                self.written += 1;
                debug!("page {} flipped at {} -> {}", object.id(), animation.start, path.display());
            }
            Err(e) => warn!("failed to write snapshot {}: {}", path.display(), e),
        }
    }

    fn release(&mut self, object: DisplayObject) {
        debug!("released snapshot page {}", object.id());
    }
}
