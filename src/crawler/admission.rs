//! Admission control for the scrape loop
//!
//! This module handles:
//! - Four independent rate-limit levels (project, proxy, domain, session)
//! - Round-robin proxy selection over the configured pool
//! - In-flight accounting for admitted resources
//! - Tick interval and completion detection for the orchestrator
//!
//! The manager is owned by the orchestrator's control loop and only mutated
//! from there, so it needs no locking.

use crate::config::{ConcurrencyConfig, LevelConfig};
use crate::resource::{Proxy, Resource};
use crate::state::{AdmissionLevel, LevelLimits, LevelState};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Shortest tick the orchestrator will run at
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Resolved limits for all four admission levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimits {
    pub project: LevelLimits,
    pub proxy: LevelLimits,
    pub domain: LevelLimits,
    pub session: LevelLimits,
}

impl ConcurrencyLimits {
    /// Resolves configured limits, filling in the defaults for absent levels
    ///
    /// # Defaults
    ///
    /// | Level | Default |
    /// |-------|---------|
    /// | domain | 1 request, 1000ms delay |
    /// | proxy | 1 request, 500ms delay |
    /// | project | proxy max requests × pool size |
    /// | session | unlimited |
    pub fn from_config(config: &ConcurrencyConfig, pool_size: usize) -> Self {
        let domain = config
            .domain
            .map(level_limits)
            .unwrap_or_else(|| LevelLimits::new(Some(1), Some(Duration::from_millis(1000))));
        let proxy = config
            .proxy
            .map(level_limits)
            .unwrap_or_else(|| LevelLimits::new(Some(1), Some(Duration::from_millis(500))));
        let session = config.session.map(level_limits).unwrap_or_default();

        let mut project = config.project.map(level_limits).unwrap_or_default();
        if project.max_requests.is_none() {
            let pool_size = u32::try_from(pool_size.max(1)).unwrap_or(u32::MAX);
            project.max_requests = proxy.max_requests.map(|max| max.saturating_mul(pool_size));
        }

        Self {
            project,
            proxy,
            domain,
            session,
        }
    }

    fn all(&self) -> [&LevelLimits; 4] {
        [&self.project, &self.proxy, &self.domain, &self.session]
    }
}

fn level_limits(config: LevelConfig) -> LevelLimits {
    LevelLimits::new(config.max_requests, config.delay.map(Duration::from_millis))
}

/// An approved resource: the proxy it runs through and its hostname
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub proxy: Proxy,
    pub hostname: String,
}

/// Decides whether, and through which proxy, a resource may be scraped now
#[derive(Debug)]
pub struct ConcurrencyManager {
    limits: ConcurrencyLimits,

    /// Proxy pool; never empty
    proxies: Vec<Proxy>,

    /// Index of the proxy used by the last admission
    last_proxy_idx: Option<usize>,

    project: LevelState,
    proxy_states: HashMap<Proxy, LevelState>,
    domain_states: HashMap<String, LevelState>,
    session_states: HashMap<(Proxy, String), LevelState>,

    check_interval_floor: Duration,
    completion_grace: Duration,
}

impl ConcurrencyManager {
    /// Creates a new manager
    ///
    /// # Arguments
    ///
    /// * `limits` - Resolved limits for the four levels
    /// * `proxies` - Proxy pool; an empty pool means direct connections only
    /// * `check_interval_floor` - Tick used when no level has a delay
    /// * `completion_grace` - Idle time before an empty run counts as complete
    pub fn new(
        limits: ConcurrencyLimits,
        proxies: Vec<Proxy>,
        check_interval_floor: Duration,
        completion_grace: Duration,
    ) -> Self {
        let proxies = if proxies.is_empty() {
            vec![Proxy::Direct]
        } else {
            proxies
        };

        Self {
            limits,
            proxies,
            last_proxy_idx: None,
            project: LevelState::new(),
            proxy_states: HashMap::new(),
            domain_states: HashMap::new(),
            session_states: HashMap::new(),
            check_interval_floor,
            completion_grace,
        }
    }

    /// Creates a manager from the concurrency section of a project config
    pub fn from_config(config: &ConcurrencyConfig, proxies: Vec<Proxy>) -> Self {
        let limits = ConcurrencyLimits::from_config(config, proxies.len());
        Self::new(
            limits,
            proxies,
            Duration::from_millis(config.check_interval_floor_ms),
            Duration::from_millis(config.completion_grace_ms),
        )
    }

    pub fn limits(&self) -> &ConcurrencyLimits {
        &self.limits
    }

    pub fn proxies(&self) -> &[Proxy] {
        &self.proxies
    }

    /// Checks whether `resource` may start now
    ///
    /// Levels are evaluated in order: project, proxy, domain, session. The
    /// first unmet level is returned as the rejection. Proxies are tried
    /// round-robin starting after the last one used; if the session level
    /// rejects that choice, a second pass looks for a proxy meeting both the
    /// proxy and session conditions.
    ///
    /// # Returns
    ///
    /// * `Ok(Admission)` - The resource may start through the returned proxy
    /// * `Err(AdmissionLevel)` - The level that blocked it
    pub fn check(&mut self, resource: &Resource, now: Instant) -> Result<Admission, AdmissionLevel> {
        if !self.project.can_request(&self.limits.project, now) {
            return Err(AdmissionLevel::Project);
        }

        let hostname = resource.hostname().unwrap_or_default();

        let mut idx = self
            .next_proxy(now, |_| true)
            .ok_or(AdmissionLevel::Proxy)?;

        if !level_open(&self.domain_states, &hostname, &self.limits.domain, now) {
            return Err(AdmissionLevel::Domain);
        }

        if !self.session_open(&self.proxies[idx], &hostname, now) {
            idx = self
                .next_proxy(now, |proxy| self.session_open(proxy, &hostname, now))
                .ok_or(AdmissionLevel::Session)?;
        }

        self.last_proxy_idx = Some(idx);
        Ok(Admission {
            proxy: self.proxies[idx].clone(),
            hostname,
        })
    }

    /// Records the start of an admitted resource at all four levels
    pub fn add_resource(&mut self, admission: &Admission, now: Instant) {
        self.project.record_start(now);
        self.proxy_states
            .entry(admission.proxy.clone())
            .or_default()
            .record_start(now);
        self.domain_states
            .entry(admission.hostname.clone())
            .or_default()
            .record_start(now);
        self.session_states
            .entry((admission.proxy.clone(), admission.hostname.clone()))
            .or_default()
            .record_start(now);
    }

    /// Records the end of an admitted resource at all four levels
    pub fn remove_resource(&mut self, admission: &Admission, now: Instant) {
        self.project.record_end(now);
        if let Some(state) = self.proxy_states.get_mut(&admission.proxy) {
            state.record_end(now);
        }
        if let Some(state) = self.domain_states.get_mut(&admission.hostname) {
            state.record_end(now);
        }
        if let Some(state) = self
            .session_states
            .get_mut(&(admission.proxy.clone(), admission.hostname.clone()))
        {
            state.record_end(now);
        }
    }

    /// Number of admitted resources that have not finished
    pub fn in_flight(&self) -> u32 {
        self.project.requests
    }

    /// Tick period for the orchestrator
    ///
    /// The smallest configured delay across all levels, or the floor when no
    /// level has one.
    pub fn check_interval(&self) -> Duration {
        self.limits
            .all()
            .iter()
            .filter_map(|limits| limits.delay)
            .min()
            .unwrap_or(self.check_interval_floor)
            .max(MIN_CHECK_INTERVAL)
    }

    /// Returns true when nothing is in flight and nothing is likely to be queued
    ///
    /// A run that never started a resource is complete right away. Otherwise
    /// the grace period must have passed since the last start or end, since a
    /// resource that just finished may still have queued new work elsewhere.
    pub fn is_scraping_complete(&self, now: Instant) -> bool {
        if self.project.requests > 0 {
            return false;
        }

        match self.project.last_start_time {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.completion_grace,
        }
    }

    /// Current state at one level for an admission's key
    pub fn level_state(&self, level: AdmissionLevel, admission: &Admission) -> Option<&LevelState> {
        match level {
            AdmissionLevel::Project => Some(&self.project),
            AdmissionLevel::Proxy => self.proxy_states.get(&admission.proxy),
            AdmissionLevel::Domain => self.domain_states.get(&admission.hostname),
            AdmissionLevel::Session => self
                .session_states
                .get(&(admission.proxy.clone(), admission.hostname.clone())),
        }
    }

    /// Finds the first proxy, round-robin after the last one used, that meets
    /// the proxy condition and `extra`
    fn next_proxy(&self, now: Instant, extra: impl Fn(&Proxy) -> bool) -> Option<usize> {
        let count = self.proxies.len();
        let start = self.last_proxy_idx.map(|idx| idx + 1).unwrap_or(0);

        (0..count).map(|offset| (start + offset) % count).find(|&idx| {
            let proxy = &self.proxies[idx];
            level_open(&self.proxy_states, proxy, &self.limits.proxy, now) && extra(proxy)
        })
    }

    fn session_open(&self, proxy: &Proxy, hostname: &str, now: Instant) -> bool {
        if self.limits.session.is_unbounded() {
            return true;
        }
        self.session_states
            .get(&(proxy.clone(), hostname.to_string()))
            .map(|state| state.can_request(&self.limits.session, now))
            .unwrap_or(true)
    }
}

/// Returns true if the level keyed by `key` admits another resource
fn level_open<K, Q>(
    states: &HashMap<K, LevelState>,
    key: &Q,
    limits: &LevelLimits,
    now: Instant,
) -> bool
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
{
    states
        .get(key)
        .map(|state| state.can_request(limits, now))
        .unwrap_or(true)
}
