use serde::Deserialize;

/// Main configuration structure for one scrape project
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub project: ProjectConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub proxies: Vec<ProxyEntry>,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub usage: UsageConfig,
    #[serde(default = "default_pipeline")]
    pub pipeline: Vec<StepEntry>,
}

/// Project identification, storage location and seeds
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectConfig {
    /// Name used in logs and events
    pub name: String,

    /// Path to the SQLite database holding the work queue and resources
    pub database_path: String,

    /// URLs inserted at depth 0 when the project starts
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Links deeper than this are not queued
    #[serde(default)]
    pub max_depth: Option<u32>,

    /// Only queue links on the same hostname as the page they were found on
    #[serde(default = "default_true")]
    pub same_domain: bool,
}

/// Admission control settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConcurrencyConfig {
    /// Tick period used when no level has a delay (milliseconds)
    #[serde(default = "default_check_interval_floor")]
    pub check_interval_floor_ms: u64,

    /// Idle time after the last resource start before the run is complete (milliseconds)
    #[serde(default = "default_completion_grace")]
    pub completion_grace_ms: u64,

    /// Lower bound for the local work buffer capacity
    #[serde(default = "default_buffer_min_capacity")]
    pub buffer_min_capacity: usize,

    #[serde(default)]
    pub project: Option<LevelConfig>,
    #[serde(default)]
    pub proxy: Option<LevelConfig>,
    #[serde(default)]
    pub domain: Option<LevelConfig>,
    #[serde(default)]
    pub session: Option<LevelConfig>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            check_interval_floor_ms: default_check_interval_floor(),
            completion_grace_ms: default_completion_grace(),
            buffer_min_capacity: default_buffer_min_capacity(),
            project: None,
            proxy: None,
            domain: None,
            session: None,
        }
    }
}

/// Limits for one admission level
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct LevelConfig {
    /// Maximum number of in-flight resources
    #[serde(default)]
    pub max_requests: Option<u32>,

    /// Minimum time between resource starts (milliseconds)
    #[serde(default)]
    pub delay: Option<u64>,
}

/// One proxy of the pool
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProxyEntry {
    pub host: String,
    pub port: u16,
}

/// HTTP client settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Request timeout (milliseconds)
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// The client can only run one task at a time (e.g. a single browser tab)
    #[serde(default)]
    pub single_task: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_ms: default_timeout(),
            single_task: false,
        }
    }
}

/// System resource thresholds; exceeding one skips scheduling ticks
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UsageConfig {
    #[serde(default)]
    pub max_memory_mb: Option<u64>,
}

/// One pipeline step, by registered name
#[derive(Debug, Clone, Deserialize)]
pub struct StepEntry {
    pub name: String,

    /// Step-specific settings
    #[serde(default)]
    pub options: toml::Table,
}

impl StepEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: toml::Table::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_check_interval_floor() -> u64 {
    1000
}

fn default_completion_grace() -> u64 {
    30_000
}

fn default_buffer_min_capacity() -> usize {
    10
}

fn default_user_agent() -> String {
    format!("ripple-scrape/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout() -> u64 {
    30_000
}

/// Fetch, discover links, queue them, persist the page
pub fn default_pipeline() -> Vec<StepEntry> {
    ["fetch", "extract-urls", "insert-resources", "upsert-resource"]
        .into_iter()
        .map(StepEntry::new)
        .collect()
}
