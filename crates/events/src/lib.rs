//! Import lifecycle events and the pub/sub bus that carries them from the
//! import worker to the webhook dispatcher.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::{ImportEvent, ImportEventType};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
