//! Core engine: balance sync, allocation, and handing sheets to the executor.

pub mod sync;
pub mod allocator;
pub mod executor;
