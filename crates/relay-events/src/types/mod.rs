//! Public API types for events and presence records.

pub mod event;
pub mod event_type;
pub mod session;

pub use event::{FetchOptions, NewEvent, WorkspaceEvent};
pub use event_type::{ALL_EVENT_TYPES, EventAction, EventType, UnknownEventType};
pub use session::{ConnectOutcome, DeviceSession, DeviceStatus, HeartbeatOutcome, NewSession};
