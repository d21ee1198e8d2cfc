//! Event model, trigger registry, and action execution for Strim.
//!
//! Ingestion adapters normalize platform-native messages into
//! [`NormalizedEvent`]s; the [`TriggerRegistry`] evaluates every registered
//! trigger against each event in registration order; the [`ActionExecutor`]
//! routes resulting action descriptors to platform senders or the clip-job
//! dispatcher without ever unwinding into the caller.

pub mod action;
pub mod clip_command;
pub mod event;
pub mod executor;
pub mod platform;
pub mod trigger;

pub use action::{ActionDescriptor, ActionKind, ActionOutcome, ActionStatus};
pub use clip_command::ClipCommandTrigger;
pub use event::{EventAuthor, NormalizedEvent};
pub use executor::{ActionExecutor, ChatSender, JobDispatcher, TenantContext, CLIP_JOB_TYPE};
pub use platform::Platform;
pub use trigger::{Trigger, TriggerRegistry};
