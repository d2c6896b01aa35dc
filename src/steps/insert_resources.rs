//! The `insert-resources` step: queues discovered children

use super::HttpClient;
use crate::crawler::{Project, Step};
use crate::resource::{PartialResource, Resource};
use crate::storage::NewQueueEntry;
use crate::StepResult;
use async_trait::async_trait;

pub struct InsertResources;

impl InsertResources {
    pub const NAME: &'static str = "insert-resources";
}

#[async_trait]
impl Step<HttpClient> for InsertResources {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn test(&self, _project: &Project, resource: &Resource) -> bool {
        !resource.resources_to_add.is_empty()
    }

    /// Inserts every child as eligible; URLs already queued are left alone
    async fn apply(
        &self,
        project: &Project,
        resource: &Resource,
        _client: &HttpClient,
    ) -> StepResult<Option<PartialResource>> {
        let entries: Vec<NewQueueEntry> = resource
            .resources_to_add
            .iter()
            .map(NewQueueEntry::from)
            .collect();

        let inserted = project.queue.add(&entries).await?;
        tracing::debug!(
            url = %resource.url,
            discovered = entries.len(),
            queued = inserted.len(),
            "Queued child resources"
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceStub;
    use crate::state::QueueStatus;
    use crate::steps::test_support::{client, html_resource, project};
    use crate::storage::WorkQueue;

    #[tokio::test]
    async fn test_inserts_new_children_only() {
        let (project, queue) = project();
        queue
            .add(&[NewQueueEntry::eligible("https://example.com/a", 1)
                .with_status(QueueStatus::Terminal(200))])
            .await
            .unwrap();

        let mut resource = html_resource("https://example.com/", "");
        resource.resources_to_add = vec![
            ResourceStub::new("https://example.com/a", 1),
            ResourceStub::new("https://example.com/b", 1),
        ];
        assert!(InsertResources.test(&project, &resource));

        let partial = InsertResources
            .apply(&project, &resource, &client())
            .await
            .unwrap();
        assert!(partial.is_none());

        assert_eq!(queue.count().await.unwrap(), 2);
        let b = queue.find_entry("https://example.com/b").unwrap().unwrap();
        assert_eq!(b.status, QueueStatus::Eligible);
        assert_eq!(b.depth, 1);
        let a = queue.find_entry("https://example.com/a").unwrap().unwrap();
        assert_eq!(a.status, QueueStatus::Terminal(200));
    }

    #[test]
    fn test_skipped_without_children() {
        let (project, _queue) = project();
        let resource = html_resource("https://example.com/", "");
        assert!(!InsertResources.test(&project, &resource));
    }
}
