//! Error types for the sealcal calendar core.

use thiserror::Error;

/// Errors that can occur in calendar operations.
#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("ICS parse error: {0}")]
    IcsParse(String),

    #[error("ICS generation error: {0}")]
    IcsGenerate(String),

    #[error("Ran into an infinite loop: {0}")]
    InfiniteLoop(String),

    #[error("Invalid event: {0}")]
    Validation(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CalendarError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CalendarError::NotFound(_))
    }
}

/// Reasons an event draft cannot be committed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("time of day could not be parsed")]
    InvalidTimeFormat,

    #[error("event must end after it starts")]
    EndBeforeStart,

    #[error("repeat end date is before the event start")]
    RepeatEndBeforeStart,
}

/// Result type alias for calendar operations.
pub type CalendarResult<T> = Result<T, CalendarError>;
