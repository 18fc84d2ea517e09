pub mod hub;
pub mod relay;
pub mod sse;

pub use hub::{JobGate, JobStatusStore, StatusHub, SubscribeError, Subscription};
pub use relay::{EventRelay, InMemoryRelay, RedisRelay, RelayEnvelope, RelayError};
pub use sse::StatusStream;
