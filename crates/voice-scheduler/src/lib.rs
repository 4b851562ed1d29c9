//! Durable delayed-job queue (C6): scheduled outbound calls and retry
//! dispatch, business-hours due-time adjustment, recurrence.

mod business_hours;
mod error;
mod recurrence;
mod scheduler;

pub use business_hours::adjust_for_business_hours;
pub use error::{Result, SchedulerError};
pub use recurrence::next_run;
pub use scheduler::{JobDispatchHandler, ScheduleOptions, Scheduler, SchedulerStats};
pub use voice_types::JobId;
