//! # Core Module
//!
//! Page lifecycle and the primitives shared by the generation loop: the page
//! pool, cancellation, process time and image blitting.

pub mod blit;
pub mod cancel;
pub mod page;
pub mod page_pool;
pub mod timing;
