//! Event Bus
//!
//! One typed emitter shared by the registry, the plugins, the transports and the
//! client. Transports receive it at construction time.

pub mod emitter;
pub mod types;

pub use emitter::{Event, EventEmitter, ListenerId};
pub use types::{EventKind, McpEvent, McpEventEmitter};
