//! Shared domain types for the voice calling platform.
//!
//! This crate has no I/O of its own: it is the vocabulary every other crate
//! in the workspace shares (§3 data model, §6 configuration keys).

pub mod agent;
pub mod call;
pub mod config;
pub mod error;
pub mod phone;
pub mod retry_attempt;
pub mod scheduled_job;
pub mod transcript;

pub use agent::{Agent, LlmSelection, VoiceSelection};
pub use call::{Call, CallDirection, CallId, CallStatus, FailureReason, OutboundSubStatus};
pub use config::PlatformConfig;
pub use error::InputError;
pub use phone::PhoneNumber;
pub use retry_attempt::{RetryAttempt, RetryAttemptStatus};
pub use scheduled_job::{
    BusinessHoursPolicy, JobId, JobKind, JobStatus, Recurrence, RecurrenceFrequency, ScheduledJob,
};
pub use transcript::{Speaker, TranscriptTurn};
