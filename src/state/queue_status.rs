/// Queue entry status definitions
///
/// A queue entry's status column is nullable: `NULL` marks an entry eligible for
/// claiming, a sentinel marks it as claimed by some crawler instance, and any
/// other value is the terminal HTTP (or generic error) status of its resource.
use std::fmt;

/// Sentinel stored while an entry is claimed and being scraped
pub const IN_PROGRESS_STATUS: u16 = 1;

/// Status recorded for resources that failed without an HTTP status
pub const GENERIC_ERROR_STATUS: u16 = 500;

/// Status recorded for successfully scraped resources that carry no fetch status
pub const SCRAPED_STATUS: u16 = 200;

/// Represents the lifecycle state of a work queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueStatus {
    /// Entry may be claimed by any crawler instance
    Eligible,

    /// Entry has been claimed and is buffered or being scraped
    InProgress,

    /// Entry finished scraping (successfully or not); never reclaimed
    Terminal(u16),
}

impl QueueStatus {
    /// Generic terminal error status
    pub fn failed() -> Self {
        Self::Terminal(GENERIC_ERROR_STATUS)
    }

    /// Terminal status for a scraped resource, defaulting to 200
    pub fn scraped(status: Option<u16>) -> Self {
        Self::Terminal(status.unwrap_or(SCRAPED_STATUS))
    }

    /// Returns true if the entry will never be claimed again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    /// Returns true if the entry may be claimed
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }

    /// Converts the status to its nullable database column value
    pub fn to_db_value(&self) -> Option<i64> {
        match self {
            Self::Eligible => None,
            Self::InProgress => Some(IN_PROGRESS_STATUS as i64),
            Self::Terminal(status) => Some(*status as i64),
        }
    }

    /// Parses a status from its nullable database column value
    pub fn from_db_value(value: Option<i64>) -> Self {
        match value {
            None => Self::Eligible,
            Some(v) if v == IN_PROGRESS_STATUS as i64 => Self::InProgress,
            Some(v) => Self::Terminal(u16::try_from(v).unwrap_or(GENERIC_ERROR_STATUS)),
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eligible => write!(f, "eligible"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Terminal(status) => write!(f, "terminal({})", status),
        }
    }
}
