//! System resource back-pressure
//!
//! The orchestrator skips a scheduling tick while a usage check fails.

use crate::config::UsageConfig;
use thiserror::Error;

/// A resource threshold that is currently exceeded
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{resource} usage {current} exceeds limit {limit}")]
pub struct UsageExceeded {
    pub resource: &'static str,
    pub current: u64,
    pub limit: u64,
}

/// Checks whether system resource usage allows starting more work
pub trait UsageCheck: Send + Sync {
    fn check(&self) -> Result<(), UsageExceeded>;
}

/// Never reports back-pressure
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUsageLimit;

impl UsageCheck for NoUsageLimit {
    fn check(&self) -> Result<(), UsageExceeded> {
        Ok(())
    }
}

/// Fails while the process resident set size is above a limit
///
/// Reads `VmRSS` from `/proc/self/status`, which the kernel reports in kB
/// whatever the page size. Where that is unavailable usage is treated as
/// within bounds.
#[derive(Debug, Clone, Copy)]
pub struct MemoryUsageCheck {
    max_rss_bytes: u64,
}

impl MemoryUsageCheck {
    pub fn new(max_rss_bytes: u64) -> Self {
        Self { max_rss_bytes }
    }

    pub fn from_megabytes(megabytes: u64) -> Self {
        Self::new(megabytes.saturating_mul(1024 * 1024))
    }

    fn current_rss() -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_status_rss(&status)
    }
}

impl UsageCheck for MemoryUsageCheck {
    fn check(&self) -> Result<(), UsageExceeded> {
        match Self::current_rss() {
            Some(rss) if rss > self.max_rss_bytes => Err(UsageExceeded {
                resource: "memory",
                current: rss,
                limit: self.max_rss_bytes,
            }),
            _ => Ok(()),
        }
    }
}

/// Resident set size in bytes from the contents of `/proc/<pid>/status`
fn parse_status_rss(status: &str) -> Option<u64> {
    let line = status.lines().find_map(|line| line.strip_prefix("VmRSS:"))?;
    let mut fields = line.split_whitespace();
    let kilobytes: u64 = fields.next()?.parse().ok()?;
    match fields.next() {
        Some("kB") => Some(kilobytes.saturating_mul(1024)),
        _ => None,
    }
}

/// Builds the usage check described by a project config
pub fn usage_check_from_config(config: &UsageConfig) -> Box<dyn UsageCheck> {
    match config.max_memory_mb {
        Some(mb) => Box::new(MemoryUsageCheck::from_megabytes(mb)),
        None => Box::new(NoUsageLimit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        let status = "Name:\tripple-scrape\nVmPeak:\t  900000 kB\nVmRSS:\t    1200 kB\nThreads:\t4\n";
        assert_eq!(parse_status_rss(status), Some(1200 * 1024));
        assert_eq!(parse_status_rss("Name:\tkthreadd\n"), None);
        assert_eq!(parse_status_rss("VmRSS:\tlots\n"), None);
        assert_eq!(parse_status_rss(""), None);
    }

    #[test]
    fn test_no_usage_limit() {
        assert!(NoUsageLimit.check().is_ok());
    }

    #[test]
    fn test_huge_limit_passes() {
        assert!(MemoryUsageCheck::new(u64::MAX).check().is_ok());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_tiny_limit_fails_on_linux() {
        let err = MemoryUsageCheck::new(1).check().unwrap_err();
        assert_eq!(err.resource, "memory");
        assert_eq!(err.limit, 1);
    }

    #[test]
    fn test_from_config() {
        let unlimited = usage_check_from_config(&UsageConfig::default());
        assert!(unlimited.check().is_ok());

        let generous = usage_check_from_config(&UsageConfig {
            max_memory_mb: Some(1024 * 1024),
        });
        assert!(generous.check().is_ok());
    }
}
