//! Calendar file parsing and generation.
//!
//! Invites and replies travel as RFC 5545 files attached to mails. The core
//! reads the ones it receives and can produce the ones it sends.

mod generate;
mod parse;

pub use generate::make_invitation_file;
pub use parse::{ParsedCalendarData, ParsedEvent, parse_calendar_file};

/// The iTIP METHOD of a calendar file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarMethod {
    Publish,
    Request,
    Reply,
    Add,
    Cancel,
    Refresh,
    Counter,
    DeclineCounter,
}

impl CalendarMethod {
    pub fn as_ics_str(&self) -> &'static str {
        match self {
            CalendarMethod::Publish => "PUBLISH",
            CalendarMethod::Request => "REQUEST",
            CalendarMethod::Reply => "REPLY",
            CalendarMethod::Add => "ADD",
            CalendarMethod::Cancel => "CANCEL",
            CalendarMethod::Refresh => "REFRESH",
            CalendarMethod::Counter => "COUNTER",
            CalendarMethod::DeclineCounter => "DECLINECOUNTER",
        }
    }

    pub fn from_ics_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PUBLISH" => Some(CalendarMethod::Publish),
            "REQUEST" => Some(CalendarMethod::Request),
            "REPLY" => Some(CalendarMethod::Reply),
            "ADD" => Some(CalendarMethod::Add),
            "CANCEL" => Some(CalendarMethod::Cancel),
            "REFRESH" => Some(CalendarMethod::Refresh),
            "COUNTER" => Some(CalendarMethod::Counter),
            "DECLINECOUNTER" => Some(CalendarMethod::DeclineCounter),
            _ => None,
        }
    }
}
