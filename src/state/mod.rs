//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `QueueStatus`: Lifecycle of a work queue entry (eligible, in progress, terminal)
//! - `LevelState`: In-flight count and last start time for one admission level key
//! - `AdmissionLevel`: The four independent rate-limit scopes

mod level_state;
mod queue_status;

// Re-export main types
pub use level_state::{AdmissionLevel, LevelLimits, LevelState};
pub use queue_status::{QueueStatus, GENERIC_ERROR_STATUS, IN_PROGRESS_STATUS, SCRAPED_STATUS};
