//! URL handling module
//!
//! Normalization keeps the work queue free of trivially different spellings of
//! one URL; hostname extraction keys the domain and session admission levels.

mod domain;
mod normalize;

pub use domain::{extract_domain, same_domain};
pub use normalize::{normalize_url, resolve_link};
