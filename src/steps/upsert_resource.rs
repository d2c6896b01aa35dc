//! The `upsert-resource` step: persists the resource as scraped so far

use super::HttpClient;
use crate::crawler::{Project, Step};
use crate::resource::{PartialResource, Resource};
use crate::StepResult;
use async_trait::async_trait;

pub struct UpsertResource;

impl UpsertResource {
    pub const NAME: &'static str = "upsert-resource";
}

#[async_trait]
impl Step<HttpClient> for UpsertResource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn apply(
        &self,
        project: &Project,
        resource: &Resource,
        _client: &HttpClient,
    ) -> StepResult<Option<PartialResource>> {
        project.store.save_resource(resource).await?;
        tracing::trace!(url = %resource.url, "Saved resource");
        Ok(None)
    }
}
