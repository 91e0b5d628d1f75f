//! Persistent connections to tool-provider servers.
//!
//! The [`ConnectionManager`] owns one connection per registered server and
//! drives its lifecycle; the [`RequestCorrelator`] matches `tool_response`
//! frames to waiting callers; the [`ReconnectScheduler`] brings dropped
//! connections back with jittered exponential back-off.

pub mod backoff;
pub mod correlator;
pub mod error;
pub mod manager;
pub mod memory;
pub mod scheduler;
pub mod transport;

pub use backoff::ReconnectBackoff;
pub use correlator::{MessageLink, PendingLimits, RequestCorrelator};
pub use error::ToolError;
pub use manager::{
    ConnectionManager, LifecycleState, ManagerSettings, Notice, RemoteTool, ServerStatus,
};
pub use memory::{MemoryConnector, ServerEnd};
pub use scheduler::ReconnectScheduler;
pub use transport::{Connector, Transport, TransportError, WebSocketConnector};
