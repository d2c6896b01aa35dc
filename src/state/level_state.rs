use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// One of the four independent rate-limit scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdmissionLevel {
    /// Single entry covering the whole scrape run
    Project,
    /// Keyed by outbound proxy
    Proxy,
    /// Keyed by target hostname
    Domain,
    /// Keyed by (proxy, hostname) pair
    Session,
}

impl fmt::Display for AdmissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Project => "project",
            Self::Proxy => "proxy",
            Self::Domain => "domain",
            Self::Session => "session",
        };
        write!(f, "{}", name)
    }
}

/// Resolved limits for one admission level
///
/// A level with neither limit set always admits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelLimits {
    /// Maximum number of in-flight resources
    pub max_requests: Option<u32>,

    /// Minimum time between two resource starts
    pub delay: Option<Duration>,
}

impl LevelLimits {
    pub fn new(max_requests: Option<u32>, delay: Option<Duration>) -> Self {
        Self {
            max_requests,
            delay,
        }
    }

    /// Returns true if neither limit is configured
    pub fn is_unbounded(&self) -> bool {
        self.max_requests.is_none() && self.delay.is_none()
    }
}

/// Tracks the concurrency status of one admission level key
///
/// Holds the number of in-flight resources and the time the latest one started.
/// Never persisted: discarded with the run that created it.
#[derive(Debug, Clone, Default)]
pub struct LevelState {
    /// Number of resources currently being scraped under this key
    pub requests: u32,

    /// Timestamp of the last resource start under this key
    pub last_start_time: Option<Instant>,
}

impl LevelState {
    /// Creates a new LevelState with nothing in flight
    pub fn new() -> Self {
        Self {
            requests: 0,
            last_start_time: None,
        }
    }

    /// Checks if another resource can start under this key
    ///
    /// Both conditions must hold:
    /// - the in-flight count is below `max_requests` (when configured)
    /// - at least `delay` has elapsed since the last start (when configured)
    pub fn can_request(&self, limits: &LevelLimits, now: Instant) -> bool {
        if let Some(max) = limits.max_requests {
            if self.requests >= max {
                return false;
            }
        }

        self.time_until_next_request(limits, now).is_none()
    }

    /// Records the start of a resource
    pub fn record_start(&mut self, now: Instant) {
        self.requests += 1;
        self.last_start_time = Some(now);
    }

    /// Records the end of a resource
    pub fn record_end(&mut self, now: Instant) {
        self.requests = self.requests.saturating_sub(1);
        self.last_start_time = Some(now);
    }

    /// Calculates the time until the delay condition is met
    ///
    /// Returns None if the delay condition is met now.
    pub fn time_until_next_request(&self, limits: &LevelLimits, now: Instant) -> Option<Duration> {
        let (Some(last), Some(delay)) = (self.last_start_time, limits.delay) else {
            return None;
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed < delay {
            Some(delay - elapsed)
        } else {
            None
        }
    }
}
