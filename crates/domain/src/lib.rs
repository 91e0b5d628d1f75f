//! Shared types for the toolbridge crates: configuration, the common error
//! type, the injectable clock and structured trace events.

pub mod capability;
pub mod clock;
pub mod config;
pub mod error;
pub mod trace;

pub use capability::Capability;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{Error, Result};
