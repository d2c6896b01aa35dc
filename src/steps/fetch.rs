//! The `fetch` step: a single GET through the admitted proxy
//!
//! | Response | Result |
//! |----------|--------|
//! | 2xx | status, content type and body |
//! | 3xx with Location | redirect partial for the orchestrator to follow |
//! | anything else | `StepError::Status` |
//! | no response | `StepError::Transport` |

use super::HttpClient;
use crate::crawler::{Project, Step};
use crate::resource::{PartialResource, Resource};
use crate::url::resolve_link;
use crate::{StepError, StepResult, UrlError};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};

pub struct Fetch;

impl Fetch {
    pub const NAME: &'static str = "fetch";
}

#[async_trait]
impl Step<HttpClient> for Fetch {
    fn name(&self) -> &str {
        Self::NAME
    }

    /// Dynamic passes reuse the first fetch
    fn test(&self, _project: &Project, resource: &Resource) -> bool {
        resource.actions.is_empty() && resource.status.is_none()
    }

    async fn apply(
        &self,
        _project: &Project,
        resource: &Resource,
        client: &HttpClient,
    ) -> StepResult<Option<PartialResource>> {
        let http = client.for_proxy(resource.proxy.as_ref())?;
        let url = resource.url.to_string();

        let response = http
            .get(resource.url.clone())
            .send()
            .await
            .map_err(|source| StepError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        tracing::debug!(url = %url, status = status.as_u16(), "Fetched");

        if status.is_redirection() {
            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
            else {
                return Err(StepError::Status {
                    url,
                    status: status.as_u16(),
                });
            };

            let target = resolve_link(location, &resource.url)
                .ok_or_else(|| UrlError::Malformed(location.to_string()))?;
            return Ok(Some(PartialResource::redirect(
                status.as_u16(),
                target.as_str(),
            )));
        }

        if !status.is_success() {
            return Err(StepError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let body = response
            .bytes()
            .await
            .map_err(|source| StepError::Transport { url, source })?;

        Ok(Some(PartialResource {
            status: Some(status.as_u16()),
            content_type,
            data: Some(body.to_vec()),
            ..Default::default()
        }))
    }
}
