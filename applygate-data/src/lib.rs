pub mod error;
pub mod jobs;
pub mod page;
pub mod routing;
pub mod subscriptions;
pub mod users;

pub use error::DataError;
pub use jobs::{JobFilter, JobRecord, JobRepository, JobStore, NewJob, TransitionPatch};
pub use page::{Page, Pageable};
pub use routing::{ReadStrategy, RoutedPool};
pub use subscriptions::{SubscriptionLedger, SubscriptionRecord, SubscriptionStore};
pub use users::{UserDirectory, UserRecord, UserStore};
