pub mod bloom;
pub mod gzip;
pub mod l1;
pub mod l2;
pub mod policy;
pub mod redis;
pub mod tiered;

pub use l1::{EvictionCause, LocalCache};
pub use l2::{profile_ttl, DistributedStore, InMemoryStore, StoreError};
pub use policy::{AdaptiveExpiry, EntryStats, ExpiryPolicy, FixedExpiry};
pub use crate::redis::RedisStore;
pub use tiered::TieredCache;
