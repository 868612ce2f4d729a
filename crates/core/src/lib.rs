#![forbid(unsafe_code)]

pub mod model;
pub mod scheduler;
pub mod time;

pub use scheduler::{NextQuestion, Scheduler, SchedulerError, Verdict};
pub use time::Clock;
