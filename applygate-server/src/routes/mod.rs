pub mod applications;
pub mod auth;
pub mod dashboard;
pub mod internal;
pub mod stream;
pub mod uploads;
