//! L1 in-process cache engine: store, coalescer, and pattern matcher (C1-C3).

pub mod coalescer;
pub mod pattern;
pub mod store;

pub use coalescer::Coalescer;
pub use pattern::PatternMatcher;
pub use store::{CacheEntry, L1Store};
