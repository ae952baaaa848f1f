//! Calendar core for the sealcal client.
//!
//! This crate holds the calendar logic that sits between the UI and the
//! worker doing network and crypto work:
//! - `recurrence` expands events into the day buckets of a visible month
//! - `alarm` schedules local reminder notifications
//! - `view_model` holds the draft of an event being edited
//! - `invite` applies inbound invites and replies to stored events
//! - `model` ties these together per session

pub mod alarm;
pub mod config;
pub mod error;
pub mod event;
pub mod ics;
pub mod invite;
pub mod model;
pub mod recurrence;
pub mod time_zone;
pub mod view_model;
pub mod worker;

#[cfg(test)]
mod test_support;

// Re-export entity types at crate root for convenience
pub use error::{CalendarError, CalendarResult, ValidationError};
pub use event::*;
