//! Quarry: positional full-text search core.
//!
//! A GCL-style extent algebra over a single token address space:
//! - paged file-in-a-file store with an LRU/FIFO page cache
//! - delta + vbyte posting codec with segmented lists
//! - lexicon and index-to-text map
//! - extent-list iterators and their combinators (AND, OR, containment,
//!   from-to, ordered combination, range, one-element, empty)
//! - query compilation and a streaming executor with cooperative
//!   cancellation and security rewrites

pub mod codec;
pub mod config;
pub mod error;
pub mod extent;
pub mod index;
pub mod input;
pub mod query;
pub mod store;
pub mod sync;

pub use crate::config::Config;
pub use crate::error::{QuarryError, Result};
pub use crate::extent::{Extent, ExtentList, Offset, MAX_OFFSET};
