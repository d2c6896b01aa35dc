//! Reference pipeline steps over a plain HTTP client
//!
//! This module provides:
//! - `HttpClient`, the client handle passed to every step
//! - `fetch`, `extract-urls`, `extract-content`, `insert-resources` and
//!   `upsert-resource`
//! - `register_defaults` to make them available to a `StepRegistry`

mod extract_content;
mod extract_urls;
mod fetch;
mod insert_resources;
mod upsert_resource;

pub use extract_content::ExtractContent;
pub use extract_urls::ExtractUrls;
pub use fetch::Fetch;
pub use insert_resources::InsertResources;
pub use upsert_resource::UpsertResource;

use crate::config::ClientConfig;
use crate::crawler::{Client, StepRegistry};
use crate::resource::Proxy;
use crate::{CrawlError, Result, StepError, StepResult};
use reqwest::redirect::Policy;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// HTTP client handle with one connection pool per proxy
///
/// Redirects are never followed by reqwest itself; the fetch step reports
/// them and the orchestrator records and follows them.
pub struct HttpClient {
    config: ClientConfig,
    clients: Mutex<HashMap<Proxy, reqwest::Client>>,
}

impl HttpClient {
    /// Builds the client, checking that a direct connection pool can be created
    ///
    /// # Returns
    ///
    /// * `Ok(HttpClient)` - Ready for use
    /// * `Err(CrawlError::Client)` - reqwest rejected the configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let direct = build_client(config, &Proxy::Direct)
            .map_err(|e| CrawlError::Client(e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            clients: Mutex::new(HashMap::from([(Proxy::Direct, direct)])),
        })
    }

    /// The reqwest client for a proxy, built on first use
    pub fn for_proxy(&self, proxy: Option<&Proxy>) -> StepResult<reqwest::Client> {
        let proxy = proxy.unwrap_or(&Proxy::Direct);
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| StepError::Other(anyhow::anyhow!("HTTP client cache lock poisoned")))?;

        if let Some(client) = clients.get(proxy) {
            return Ok(client.clone());
        }

        tracing::debug!(%proxy, "Building HTTP client for proxy");
        let client = build_client(&self.config, proxy)
            .map_err(|e| StepError::Other(anyhow::Error::new(e).context(format!("proxy {}", proxy))))?;
        clients.insert(proxy.clone(), client.clone());
        Ok(client)
    }
}

impl Client for HttpClient {
    fn single_task(&self) -> bool {
        self.config.single_task
    }
}

fn build_client(config: &ClientConfig, proxy: &Proxy) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_millis(config.timeout_ms))
        .connect_timeout(Duration::from_millis(config.timeout_ms.min(10_000)))
        .redirect(Policy::none())
        .gzip(true)
        .brotli(true);

    if let Some(url) = proxy.url() {
        builder = builder.proxy(reqwest::Proxy::all(url)?);
    }

    builder.build()
}

/// Registers every step in this module under its configured name
pub fn register_defaults(registry: &mut StepRegistry<HttpClient>) {
    registry.register(Fetch::NAME, |_| Ok(Box::new(Fetch)));
    registry.register(ExtractUrls::NAME, |_| Ok(Box::new(ExtractUrls)));
    registry.register(ExtractContent::NAME, |options| {
        Ok(Box::new(ExtractContent::from_options(options)?))
    });
    registry.register(InsertResources::NAME, |_| Ok(Box::new(InsertResources)));
    registry.register(UpsertResource::NAME, |_| Ok(Box::new(UpsertResource)));
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_pipeline, StepEntry};

    #[test]
    fn test_defaults_cover_default_pipeline() {
        let mut registry = StepRegistry::new();
        register_defaults(&mut registry);

        let pipeline = registry.build(&default_pipeline()).unwrap();
        assert_eq!(
            pipeline.step_names(),
            vec!["fetch", "extract-urls", "insert-resources", "upsert-resource"]
        );
    }

    #[test]
    fn test_extract_content_options_are_checked() {
        let mut registry = StepRegistry::new();
        register_defaults(&mut registry);

        assert!(registry.build(&[StepEntry::new("extract-content")]).is_err());
    }

    #[test]
    fn test_client_cache_per_proxy() {
        let client = test_support::client();
        client.for_proxy(None).unwrap();
        client
            .for_proxy(Some(&Proxy::http("127.0.0.1", 3128)))
            .unwrap();

        assert_eq!(client.clients.lock().unwrap().len(), 2);
        assert!(!client.single_task());
    }
}
