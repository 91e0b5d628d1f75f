//! The fast storage tier and the tool result cache.
//!
//! [`FastTier`] is the ephemeral key/value store shared by the result cache
//! and the agent state layer. [`ResultCache`] sits in front of remote tool
//! execution and maps `(tool, params)` to a previously returned result.

pub mod fast_tier;
pub mod key;
pub mod result;

pub use fast_tier::{CacheError, FastTier, MemoryFastTier};
pub use key::{cache_key, canonical_json};
pub use result::{CacheEntry, CacheStats, ResultCache};
