//! Configuration module
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use ripple_scrape::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("project.toml")).unwrap();
//! println!("Scraping project: {}", config.project.name);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    default_pipeline, ClientConfig, ConcurrencyConfig, Config, LevelConfig, ProjectConfig,
    ProxyEntry, StepEntry, UsageConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;
