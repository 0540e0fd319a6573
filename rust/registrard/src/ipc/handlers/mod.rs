pub mod core;
pub mod grades;
pub mod outbox;
pub mod planner;
pub mod queries;
pub mod records;
pub mod registrations;
pub mod snapshot;
