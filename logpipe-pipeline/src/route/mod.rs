//! Routing of event groups to flushers.

mod condition;
mod router;

pub use condition::Condition;
pub use router::Router;
