pub mod run;
pub mod stored_interval;

pub use run::{Run, RunMode};
pub use stored_interval::StoredInterval;
