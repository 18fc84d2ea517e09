pub mod dispatcher;
pub mod glue;
pub mod middleware;
pub mod lifecycle;
pub mod quota;
pub mod router;
pub mod routes;
pub mod state;
pub mod uploads;

pub use router::build_router;
pub use state::AppState;
