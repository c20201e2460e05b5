//! Background maintenance for peerlease.
//!
//! One loop runs immediately and then once per period until shutdown. Each
//! run has three independent passes:
//! 1. the subscription status sweep
//! 2. expiry and grace-period notifications
//! 3. ledger cleanup of devices whose subscription expired long ago

mod error;
mod notifier;
mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use notifier::{LogNotifier, Notice, Notifier, notice_for};
pub use scheduler::{Pass, RunReport, Scheduler, SchedulerConfig};
