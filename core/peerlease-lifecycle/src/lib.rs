//! Subscription lifecycle for peerlease.
//!
//! A subscription moves Active → Expiring → Paused → Expired as time passes;
//! an approval returns any live subscription to Active. The access gate
//! decides whether a user may provision another device.
//!
//! Time-driven transitions never look at the wall clock themselves: every
//! entry point takes `now`, so the scheduler and tests control time.

mod access;
mod approval;
mod error;
mod transition;

pub use access::{AccessDecision, AccessGate, DenyReason};
pub use approval::{Approval, ApprovalOutcome, approve};
pub use error::{LifecycleError, LifecycleResult};
pub use transition::{
    AppliedTransition, SweepReport, Transition, expiring_window, grace_period, next_transition,
    sweep,
};
