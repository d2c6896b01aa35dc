//! Resources and the partial updates pipeline steps produce for them
//!
//! A `Resource` is one crawlable unit: a page, an image, an API endpoint. Steps
//! never mutate a resource directly; they return a `PartialResource` which the
//! orchestrator merges into it before the next step runs.

mod content;

pub use content::Content;

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// An outbound proxy, or the sentinel "no proxy"
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Proxy {
    /// Connect directly
    Direct,
    /// Connect through an HTTP proxy
    Http { host: String, port: u16 },
}

impl Proxy {
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self::Http {
            host: host.into(),
            port,
        }
    }

    /// Proxy URL usable by an HTTP client, None for direct connections
    pub fn url(&self) -> Option<String> {
        match self {
            Self::Direct => None,
            Self::Http { host, port } => Some(format!("http://{}:{}", host, port)),
        }
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Http { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

/// Metadata about the link a resource was discovered through
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parent {
    /// Text of the anchor pointing to the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_text: Option<String>,

    /// Title of the page containing the anchor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A newly discovered resource, not yet in the work queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceStub {
    pub url: String,
    pub depth: u32,
    pub parent: Option<Parent>,
}

impl ResourceStub {
    pub fn new(url: impl Into<String>, depth: u32) -> Self {
        Self {
            url: url.into(),
            depth,
            parent: None,
        }
    }
}

/// One crawlable unit and its captured state
#[derive(Debug, Clone)]
pub struct Resource {
    pub url: Url,

    /// Distance from a seed URL; depth-0 seeds are re-scrape starting points
    pub depth: u32,

    /// Fetch status, None until a step sets it
    pub status: Option<u16>,

    pub content_type: Option<String>,

    /// Content extracted during the current pass
    pub content: Content,

    /// Opaque payload such as a response body or image bytes
    pub data: Option<Vec<u8>>,

    /// Dynamic interactions already applied, e.g. `scroll#1`
    pub actions: Vec<String>,

    /// Proxy assigned at admission time
    pub proxy: Option<Proxy>,

    /// Link back to the work queue entry
    pub queue_entry_id: Option<i64>,

    pub parent: Option<Parent>,

    /// Child resources discovered during the current pass
    pub resources_to_add: Vec<ResourceStub>,
}

impl Resource {
    pub fn new(url: Url, depth: u32) -> Self {
        Self {
            url,
            depth,
            status: None,
            content_type: None,
            content: Content::new(),
            data: None,
            actions: Vec::new(),
            proxy: None,
            queue_entry_id: None,
            parent: None,
            resources_to_add: Vec::new(),
        }
    }

    /// Returns true once the resource has been re-entered for dynamic content
    pub fn is_dynamic(&self) -> bool {
        !self.actions.is_empty()
    }

    /// Lowercase hostname of the resource URL
    pub fn hostname(&self) -> Option<String> {
        crate::url::extract_domain(&self.url)
    }

    /// Returns true if the content type denotes an HTML document
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false)
    }

    /// Builds the resource for the next dynamic pass
    ///
    /// Only what re-entry needs is carried forward; content, data and
    /// discovered children belong to the finished pass.
    pub fn derive_for_reentry(&self) -> Self {
        Self {
            url: self.url.clone(),
            depth: self.depth,
            status: self.status,
            content_type: self.content_type.clone(),
            content: Content::new(),
            data: None,
            actions: self.actions.clone(),
            proxy: self.proxy.clone(),
            queue_entry_id: self.queue_entry_id,
            parent: self.parent.clone(),
            resources_to_add: Vec::new(),
        }
    }

    /// Merges a step's partial result into this resource
    ///
    /// Scalar fields overwrite, list fields append without duplicates and
    /// content is merged against `captured` so a re-sampled page only
    /// contributes values not seen before.
    pub fn apply(&mut self, partial: PartialResource, captured: &mut Content) {
        if let Some(url) = partial.url {
            self.url = url;
        }
        if let Some(status) = partial.status {
            self.status = Some(status);
        }
        if let Some(content_type) = partial.content_type {
            self.content_type = Some(content_type);
        }
        if let Some(data) = partial.data {
            self.data = Some(data);
        }
        if let Some(parent) = partial.parent {
            self.parent = Some(parent);
        }
        if let Some(sample) = partial.content {
            let fresh = captured.merge_sample(&sample);
            self.content.append(&fresh);
        }
        for action in partial.actions {
            if !self.actions.contains(&action) {
                self.actions.push(action);
            }
        }
        for stub in partial.resources_to_add {
            if !self.resources_to_add.iter().any(|r| r.url == stub.url) {
                self.resources_to_add.push(stub);
            }
        }
    }
}

/// The update a pipeline step returns for a resource
#[derive(Debug, Clone, Default)]
pub struct PartialResource {
    pub url: Option<Url>,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub content: Option<Content>,
    pub data: Option<Vec<u8>>,
    pub parent: Option<Parent>,
    pub actions: Vec<String>,
    pub resources_to_add: Vec<ResourceStub>,
}

impl PartialResource {
    /// A redirect as surfaced by a fetch step
    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            resources_to_add: vec![ResourceStub::new(location, 0)],
            ..Default::default()
        }
    }

    /// Returns true if this update reports a 3xx status
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, Some(300..=399))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(url: &str) -> Resource {
        Resource::new(Url::parse(url).unwrap(), 0)
    }

    #[test]
    fn test_proxy_url() {
        assert_eq!(Proxy::Direct.url(), None);
        assert_eq!(
            Proxy::http("10.0.0.1", 3128).url(),
            Some("http://10.0.0.1:3128".to_string())
        );
        assert_eq!(Proxy::http("10.0.0.1", 3128).to_string(), "10.0.0.1:3128");
    }

    #[test]
    fn test_apply_overwrites_scalars() {
        let mut r = resource("https://example.com/");
        let mut captured = Content::new();
        r.apply(
            PartialResource {
                status: Some(200),
                content_type: Some("text/html".to_string()),
                data: Some(b"<html></html>".to_vec()),
                ..Default::default()
            },
            &mut captured,
        );

        assert_eq!(r.status, Some(200));
        assert!(r.is_html());
        assert_eq!(r.data.as_deref(), Some(&b"<html></html>"[..]));
    }

    #[test]
    fn test_apply_appends_lists_without_duplicates() {
        let mut r = resource("https://example.com/");
        let mut captured = Content::new();

        r.apply(
            PartialResource {
                actions: vec!["scroll#1".to_string()],
                resources_to_add: vec![ResourceStub::new("https://example.com/a", 1)],
                ..Default::default()
            },
            &mut captured,
        );
        r.apply(
            PartialResource {
                actions: vec!["scroll#1".to_string(), "scroll#2".to_string()],
                resources_to_add: vec![
                    ResourceStub::new("https://example.com/a", 1),
                    ResourceStub::new("https://example.com/b", 1),
                ],
                ..Default::default()
            },
            &mut captured,
        );

        assert_eq!(r.actions, vec!["scroll#1", "scroll#2"]);
        assert_eq!(r.resources_to_add.len(), 2);
        assert!(r.is_dynamic());
    }

    #[test]
    fn test_apply_merges_content_against_captured() {
        let mut r = resource("https://example.com/");
        let mut captured: Content = [("h1", vec!["A".to_string()])].into_iter().collect();

        r.apply(
            PartialResource {
                content: Some(
                    [("h1", vec!["A".to_string(), "B".to_string()])]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            &mut captured,
        );

        assert_eq!(r.content.get("h1").unwrap(), ["B"]);
        assert_eq!(captured.get("h1").unwrap(), ["A", "B"]);
    }

    #[test]
    fn test_derive_for_reentry_keeps_only_reentry_fields() {
        let mut r = resource("https://example.com/feed");
        r.depth = 2;
        r.status = Some(200);
        r.content_type = Some("text/html".to_string());
        r.actions = vec!["scroll#1".to_string()];
        r.proxy = Some(Proxy::http("p1", 80));
        r.queue_entry_id = Some(7);
        r.data = Some(vec![1, 2, 3]);
        r.content.insert("h1", vec!["A".to_string()]);
        r.resources_to_add
            .push(ResourceStub::new("https://example.com/x", 3));

        let next = r.derive_for_reentry();

        assert_eq!(next.url, r.url);
        assert_eq!(next.depth, 2);
        assert_eq!(next.status, Some(200));
        assert_eq!(next.actions, r.actions);
        assert_eq!(next.proxy, r.proxy);
        assert_eq!(next.queue_entry_id, Some(7));
        assert!(next.data.is_none());
        assert!(next.content.is_empty());
        assert!(next.resources_to_add.is_empty());
    }

    #[test]
    fn test_redirect_partial() {
        let partial = PartialResource::redirect(301, "https://a.com/new");
        assert!(partial.is_redirect());
        assert_eq!(partial.resources_to_add[0].url, "https://a.com/new");
        assert!(!PartialResource::default().is_redirect());
    }
}
