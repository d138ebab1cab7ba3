//! Buffer pool management for bramble storage.
//!
//! This crate provides in-memory page caching with:
//! - A fixed set of frames holding page bytes, with pool bookkeeping
//!   (residency, pins, dirty and referenced bits) under a single lock
//! - Pin counting: a pinned page keeps its frame
//! - Clock eviction with second chances for recently touched pages
//! - Dirty-page hand-back on eviction, so write-back stays with the caller
//!   that knows the page's file

mod frame;
mod pool;
mod replacer;

pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats, EvictedPage, FrameView};
