//! # Page Pool Module
//!
//! A fixed-capacity FIFO of carousel pages. Once the pool is full, pages are
//! never reallocated: the oldest page is handed out again and its buffer is
//! rewritten in place.
//!
//! ## Overview
//!
//! - **Fill phase**: while fewer than `capacity` pages exist, every acquisition
//!   allocates a new page
//! - **Rotation phase**: afterwards, acquisition takes the page at the head of
//!   the queue, the one that has had the longest to finish its last flip
//! - **Teardown**: [`PagePool::drain_and_destroy`] consumes the pool and
//!   releases every page exactly once
//!
//! ## Architecture
//!
//! ```text
//!                    ┌───────────────────────────────┐
//!   acquire() ◀──────│ head  [p3] [p4] ... [p2]  tail│◀────── requeue()
//!                    └───────────────────────────────┘
//!                          ids into the page arena
//!                    ┌───────────────────────────────┐
//!                    │ p0  p1  p2  p3  p4  ...  pN-1 │
//!                    └───────────────────────────────┘
//! ```
//!
//! The queue holds [`PageId`]s into an arena of pages rather than the pages
//! themselves, so a page keeps a stable address while it is being rewritten
//! and the queue order can be inspected without borrowing any page.
//!
//! The pool has a single producer and no internal locking.
//!
//! ## Example
//!
//! ```rust
//! use flipbook::core::page::{Page, Resolution};
//! use flipbook::core::page_pool::PagePool;
//! use flipbook::display::DisplayParent;
//! use flipbook::display::recording::RecordingDisplay;
//!
//! let mut display = RecordingDisplay::new();
//! let parent = DisplayParent::default();
//! let mut pool = PagePool::new(2).unwrap();
//!
//! for _ in 0..3 {
//!     let acquired = pool
//!         .acquire(&parent, |parent| {
//!             Page::allocate(&mut display, parent, Resolution::new(4, 4))
//!         })
//!         .unwrap();
//!     pool.requeue(acquired.id()).unwrap();
//! }
//!
//! assert_eq!(pool.live_count(), 2);
//! assert_eq!(pool.drain_and_destroy(&mut display), 2);
//! ```

use std::collections::VecDeque;
use std::fmt;

use crate::core::page::Page;
use crate::display::{DisplayBackend, DisplayParent};
use crate::error::{FlipbookError, FlipbookResult};

/// Handle to a page in a [`PagePool`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(usize);

impl PageId {
    /// Allocation order of the page, starting at zero.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page-{}", self.0)
    }
}

/// How an acquisition was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// A new page was created because the pool was below capacity.
    Allocated(PageId),
    /// The oldest queued page was handed out again.
    Reused(PageId),
}

impl Acquired {
    pub fn id(self) -> PageId {
        match self {
            Acquired::Allocated(id) | Acquired::Reused(id) => id,
        }
    }
}

/// Fixed-capacity FIFO of pages.
///
/// # Invariants
///
/// - `live_count() <= capacity()` at all times
/// - a page id is in the queue at most once
/// - a page handed out by [`acquire`](Self::acquire) is absent from the queue
///   until it is passed to [`requeue`](Self::requeue)
#[derive(Debug)]
pub struct PagePool {
    /// Page arena, indexed by `PageId`. Only grows, up to `capacity`.
    pages: Vec<Page>,
    /// Whether each arena slot is currently in `order`.
    queued: Vec<bool>,
    /// Display and reuse order, head is the oldest.
    order: VecDeque<PageId>,
    capacity: usize,
}

impl PagePool {
    /// Creates an empty pool holding at most `capacity` pages.
    ///
    /// The capacity is fixed for the pool's lifetime.
    pub fn new(capacity: usize) -> FlipbookResult<Self> {
        if capacity == 0 {
            return Err(FlipbookError::config(
                "page_count",
                "0",
                "the pool needs at least one page",
            ));
        }
        Ok(Self {
            pages: Vec::with_capacity(capacity),
            queued: Vec::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pages that exist, queued or handed out.
    pub fn live_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of pages currently in the FIFO.
    pub fn queued_count(&self) -> usize {
        self.order.len()
    }

    pub fn is_full(&self) -> bool {
        self.pages.len() >= self.capacity
    }

    /// Hands out a page ready to receive new content.
    ///
    /// Below capacity, `allocate` is called to create a new page under
    /// `parent`. At capacity, the head of the queue is removed and returned
    /// with its buffer and display object intact. Either way the caller must
    /// [`requeue`](Self::requeue) the page before the pool can reuse it.
    ///
    /// # Errors
    ///
    /// - whatever `allocate` returns; the pool is left unchanged
    /// - a state error when the pool is full and every page is handed out
    pub fn acquire<F>(&mut self, parent: &DisplayParent, allocate: F) -> FlipbookResult<Acquired>
    where
        F: FnOnce(&DisplayParent) -> FlipbookResult<Page>,
    {
        if !self.is_full() {
            let page = allocate(parent)?;
            let id = PageId(self.pages.len());
            self.pages.push(page);
            self.queued.push(false);
            return Ok(Acquired::Allocated(id));
        }

        let id = self.order.pop_front().ok_or_else(|| {
            FlipbookError::state(
                "full",
                "acquire",
                format!("all {} pages are handed out", self.capacity),
            )
        })?;
        self.queued[id.0] = false;
        Ok(Acquired::Reused(id))
    }

    /// Appends a previously acquired page to the tail.
    ///
    /// Rejects ids the pool never issued and ids already in the queue, so the
    /// FIFO can neither lose nor duplicate a page.
    pub fn requeue(&mut self, id: PageId) -> FlipbookResult<()> {
        match self.queued.get_mut(id.0) {
            None => Err(FlipbookError::state(
                "pool",
                "requeue",
                format!("{} was not issued by this pool", id),
            )),
            Some(true) => Err(FlipbookError::state(
                "queued",
                "requeue",
                format!("{} is already in the queue", id),
            )),
            Some(queued) => {
                *queued = true;
                self.order.push_back(id);
                Ok(())
            }
        }
    }

    pub fn page(&self, id: PageId) -> Option<&Page> {
        self.pages.get(id.0)
    }

    pub fn page_mut(&mut self, id: PageId) -> Option<&mut Page> {
        self.pages.get_mut(id.0)
    }

    /// Queued page ids from head (next to be reused) to tail.
    pub fn order(&self) -> impl Iterator<Item = PageId> + '_ {
        self.order.iter().copied()
    }

    /// Queued pages in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Page> + '_ {
        self.order.iter().map(|id| &self.pages[id.0])
    }

    /// Destroys every page exactly once and returns how many were destroyed.
    ///
    /// Queued pages go first, in queue order, followed by any page that was
    /// acquired but never requeued. Consuming the pool rules out a second
    /// drain; callers must only drain once nothing is writing into a page.
    pub fn drain_and_destroy(self, display: &mut dyn DisplayBackend) -> usize {
        let unqueued = self
            .queued
            .iter()
            .enumerate()
            .filter(|(_, queued)| !**queued)
            .map(|(index, _)| PageId(index))
            .collect::<Vec<_>>();
        let teardown_order = self.order.iter().copied().chain(unqueued).collect::<Vec<_>>();

        let mut slots = self.pages.into_iter().map(Some).collect::<Vec<_>>();
        let mut destroyed = 0;
        for id in teardown_order {
            if let Some(page) = slots[id.0].take() {
                page.deallocate(display);
                destroyed += 1;
            }
        }
        destroyed
    }
}
