mod service;

pub use service::{run_scheduled_refresh, validate_schedule, RefreshScheduler, SchedulerError};
