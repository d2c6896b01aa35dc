//! The `extract-content` step: text of configured CSS selectors
//!
//! ```toml
//! [[pipeline]]
//! name = "extract-content"
//! options = { selectors = ["h1", ".price"] }
//! ```

use super::HttpClient;
use crate::crawler::{Project, Step};
use crate::resource::{Content, PartialResource, Resource};
use crate::{ConfigError, ConfigResult, StepResult};
use async_trait::async_trait;
use scraper::{Html, Selector};

pub struct ExtractContent {
    /// Selectors in configured order; each one parses
    selectors: Vec<String>,
}

impl ExtractContent {
    pub const NAME: &'static str = "extract-content";

    /// Builds the step from its options table
    ///
    /// # Returns
    ///
    /// * `Ok(ExtractContent)` - `selectors` is a non-empty list of valid CSS selectors
    /// * `Err(ConfigError::StepOptions)` - Missing, empty or unparsable selectors
    pub fn from_options(options: &toml::Table) -> ConfigResult<Self> {
        let invalid = |message: String| ConfigError::StepOptions {
            step: Self::NAME.to_string(),
            message,
        };

        let values = options
            .get("selectors")
            .and_then(|v| v.as_array())
            .ok_or_else(|| invalid("`selectors` must be a list of CSS selectors".to_string()))?;

        let selectors = values
            .iter()
            .map(|value| {
                let selector = value
                    .as_str()
                    .ok_or_else(|| invalid(format!("selector {} is not a string", value)))?;
                Selector::parse(selector)
                    .map_err(|e| invalid(format!("invalid selector {:?}: {:?}", selector, e)))?;
                Ok(selector.to_string())
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        if selectors.is_empty() {
            return Err(invalid("`selectors` is empty".to_string()));
        }

        Ok(Self { selectors })
    }

    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }

    fn extract(&self, html: &str) -> Content {
        let document = Html::parse_document(html);

        self.selectors
            .iter()
            .filter_map(|css| {
                let selector = Selector::parse(css).ok()?;
                let values: Vec<String> = document
                    .select(&selector)
                    .map(|element| element.text().collect::<String>().trim().to_string())
                    .filter(|text| !text.is_empty())
                    .collect();
                Some((css.clone(), values))
            })
            .collect()
    }
}

#[async_trait]
impl Step<HttpClient> for ExtractContent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn test(&self, _project: &Project, resource: &Resource) -> bool {
        resource.is_html() && resource.data.is_some()
    }

    async fn apply(
        &self,
        _project: &Project,
        resource: &Resource,
        _client: &HttpClient,
    ) -> StepResult<Option<PartialResource>> {
        let Some(data) = resource.data.as_deref() else {
            return Ok(None);
        };

        let content = self.extract(&String::from_utf8_lossy(data));
        tracing::debug!(url = %resource.url, rows = content.row_count(), "Extracted content");

        Ok(Some(PartialResource {
            content: Some(content),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::test_support::{client, html_resource, project};

    fn step(selectors: &[&str]) -> ConfigResult<ExtractContent> {
        let mut options = toml::Table::new();
        options.insert(
            "selectors".to_string(),
            toml::Value::Array(selectors.iter().map(|s| toml::Value::from(*s)).collect()),
        );
        ExtractContent::from_options(&options)
    }

    #[test]
    fn test_options_validation() {
        assert!(ExtractContent::from_options(&toml::Table::new()).is_err());
        assert!(step(&[]).is_err());
        assert!(step(&["h1", "p >>> ["]).is_err());
        assert_eq!(step(&["h1", ".price"]).unwrap().selectors(), ["h1", ".price"]);
    }

    #[tokio::test]
    async fn test_extracts_text_per_selector() {
        let (project, _queue) = project();
        let resource = html_resource(
            "https://example.com/",
            r#"<h1> Title </h1><ul><li class="item">a</li><li class="item">b</li><li class="item"> </li></ul>"#,
        );

        let partial = step(&["h1", ".item", "h2"])
            .unwrap()
            .apply(&project, &resource, &client())
            .await
            .unwrap()
            .unwrap();

        let content = partial.content.unwrap();
        assert_eq!(content.get("h1"), Some(["Title".to_string()].as_slice()));
        assert_eq!(
            content.get(".item"),
            Some(["a".to_string(), "b".to_string()].as_slice())
        );
        assert_eq!(content.get("h2"), Some([].as_slice()));
    }
}
