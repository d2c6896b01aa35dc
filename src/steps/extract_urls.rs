//! The `extract-urls` step: discovers links on fetched HTML pages
//!
//! # Link Extraction Rules
//!
//! **Include:**
//! - `<a href="...">` tags anywhere in the document
//!
//! **Exclude:**
//! - `<a href="..." download>`
//! - `javascript:`, `mailto:`, `tel:` and `data:` links, same-page anchors
//! - Links to other hostnames when the project is same-domain
//! - Everything when the children would exceed the project's max depth

use super::HttpClient;
use crate::crawler::{Project, Step};
use crate::resource::{Parent, PartialResource, Resource, ResourceStub};
use crate::url::{resolve_link, same_domain};
use crate::StepResult;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

pub struct ExtractUrls;

impl ExtractUrls {
    pub const NAME: &'static str = "extract-urls";
}

#[async_trait]
impl Step<HttpClient> for ExtractUrls {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn test(&self, _project: &Project, resource: &Resource) -> bool {
        resource.is_html() && resource.data.is_some()
    }

    async fn apply(
        &self,
        project: &Project,
        resource: &Resource,
        _client: &HttpClient,
    ) -> StepResult<Option<PartialResource>> {
        let depth = resource.depth + 1;
        if project.max_depth.is_some_and(|max| depth > max) {
            tracing::trace!(url = %resource.url, depth, "Max depth reached, not extracting");
            return Ok(None);
        }

        let Some(data) = resource.data.as_deref() else {
            return Ok(None);
        };
        let html = String::from_utf8_lossy(data);

        let stubs: Vec<ResourceStub> = extract_links(&html, &resource.url)
            .into_iter()
            .filter(|link| !project.same_domain || same_domain(&link.url, &resource.url))
            .map(|link| ResourceStub {
                url: link.url.to_string(),
                depth,
                parent: Some(Parent {
                    link_text: link.text,
                    title: link.title,
                }),
            })
            .collect();

        tracing::debug!(url = %resource.url, found = stubs.len(), "Extracted links");
        if stubs.is_empty() {
            return Ok(None);
        }

        Ok(Some(PartialResource {
            resources_to_add: stubs,
            ..Default::default()
        }))
    }
}

/// A crawlable link and what the page said about it
#[derive(Debug, Clone, PartialEq, Eq)]
struct Link {
    url: Url,
    text: Option<String>,
    title: Option<String>,
}

/// Extracts crawlable links in document order, first occurrence wins
fn extract_links(html: &str, base_url: &Url) -> Vec<Link> {
    let document = Html::parse_document(html);
    let title = extract_title(&document);

    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&anchors) {
        if element.value().attr("download").is_some() {
            continue;
        }
        let Some(url) = element
            .value()
            .attr("href")
            .and_then(|href| resolve_link(href, base_url))
        else {
            continue;
        };
        if url == *base_url || !seen.insert(url.to_string()) {
            continue;
        }

        let text = element.text().collect::<String>().trim().to_string();
        links.push(Link {
            url,
            text: Some(text).filter(|t| !t.is_empty()),
            title: title.clone(),
        });
    }

    links
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;

    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::test_support::{client, html_resource, project};

    fn base_url() -> Url {
        Url::parse("https://example.com/page").unwrap()
    }

    #[test]
    fn test_extract_relative_and_absolute() {
        let html = r#"<html><body>
            <a href="/other">Other</a>
            <a href="https://elsewhere.org/x">Elsewhere</a>
        </body></html>"#;
        let links = extract_links(html, &base_url());
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/other", "https://elsewhere.org/x"]);
    }

    #[test]
    fn test_skips_uncrawlable_links() {
        let html = r##"<html><body>
            <a href="javascript:void(0)">JS</a>
            <a href="mailto:test@example.com">Mail</a>
            <a href="tel:+1234567890">Call</a>
            <a href="#section">Jump</a>
            <a href="/file.pdf" download>Download</a>
            <a href="/page">Self</a>
        </body></html>"##;
        assert!(extract_links(html, &base_url()).is_empty());
    }

    #[test]
    fn test_duplicates_collapse_to_first() {
        let html = r#"<html><body>
            <a href="/a">First</a>
            <a href="/a#frag">Second</a>
        </body></html>"#;
        let links = extract_links(html, &base_url());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].text.as_deref(), Some("First"));
    }

    #[test]
    fn test_parent_metadata() {
        let html = r#"<html><head><title> Index </title></head>
            <body><a href="/a">  Chapter 1 </a><a href="/b"><img src="x.png"></a></body></html>"#;
        let links = extract_links(html, &base_url());
        assert_eq!(links[0].title.as_deref(), Some("Index"));
        assert_eq!(links[0].text.as_deref(), Some("Chapter 1"));
        assert_eq!(links[1].text, None);
    }

    #[tokio::test]
    async fn test_apply_filters_domain_and_sets_depth() {
        let (project, _queue) = project();
        let resource = html_resource(
            "https://example.com/",
            r#"<a href="/a">A</a><a href="https://www.example.com/b">B</a><a href="https://other.org/">C</a>"#,
        );

        let partial = ExtractUrls
            .apply(&project, &resource, &client())
            .await
            .unwrap()
            .unwrap();

        let urls: Vec<&str> = partial.resources_to_add.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/a", "https://www.example.com/b"]);
        assert!(partial.resources_to_add.iter().all(|s| s.depth == 1));
    }

    #[tokio::test]
    async fn test_apply_respects_max_depth() {
        let (mut project, _queue) = project();
        project.max_depth = Some(1);
        let mut resource = html_resource("https://example.com/", r#"<a href="/a">A</a>"#);
        resource.depth = 1;

        let partial = ExtractUrls.apply(&project, &resource, &client()).await.unwrap();
        assert!(partial.is_none());
    }

    #[tokio::test]
    async fn test_apply_cross_domain_when_allowed() {
        let (mut project, _queue) = project();
        project.same_domain = false;
        let resource = html_resource("https://example.com/", r#"<a href="https://other.org/">C</a>"#);

        let partial = ExtractUrls
            .apply(&project, &resource, &client())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(partial.resources_to_add[0].url, "https://other.org/");
    }

    #[test]
    fn test_only_html_resources() {
        let (project, _queue) = project();
        let mut resource = html_resource("https://example.com/", "");
        assert!(ExtractUrls.test(&project, &resource));

        resource.content_type = Some("image/png".to_string());
        assert!(!ExtractUrls.test(&project, &resource));
    }
}
