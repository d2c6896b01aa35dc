//! Pipeline steps and the registry that builds pipelines from config
//!
//! A step is one unit of per-resource work: fetching, extracting, persisting.
//! Steps are registered by name with a constructor taking the step's options
//! table, and a project's pipeline is the ordered list of configured names.

use crate::config::{Config, StepEntry};
use crate::resource::{PartialResource, Resource};
use crate::storage::{ResourceStore, WorkQueue};
use crate::{ConfigError, ConfigResult, CrawlError, StepResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Handle passed unchanged to every step, e.g. an HTTP client or a browser
#[async_trait]
pub trait Client: Send + Sync + 'static {
    /// The client can only work on one resource at a time
    fn single_task(&self) -> bool {
        false
    }

    /// The client can run steps inside a rendered page
    fn renders_pages(&self) -> bool {
        false
    }

    /// Called once before the first resource is scraped
    async fn open(&self) -> Result<(), CrawlError> {
        Ok(())
    }

    /// Called once after the run ends, successfully or not
    async fn close(&self) -> Result<(), CrawlError> {
        Ok(())
    }
}

/// A client for pipelines whose steps need none
impl Client for () {}

/// Shared project state every step can reach
#[derive(Clone)]
pub struct Project {
    pub name: String,
    pub queue: Arc<dyn WorkQueue>,
    pub store: Arc<dyn ResourceStore>,

    /// Links deeper than this are not queued
    pub max_depth: Option<u32>,

    /// Only queue links on the page's own hostname
    pub same_domain: bool,
}

impl Project {
    pub fn new(
        name: impl Into<String>,
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn ResourceStore>,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            store,
            max_depth: None,
            same_domain: true,
        }
    }

    pub fn from_config(
        config: &Config,
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn ResourceStore>,
    ) -> Self {
        Self {
            max_depth: config.project.max_depth,
            same_domain: config.project.same_domain,
            ..Self::new(config.project.name.clone(), queue, store)
        }
    }
}

impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("max_depth", &self.max_depth)
            .field("same_domain", &self.same_domain)
            .finish_non_exhaustive()
    }
}

/// One unit of per-resource processing
#[async_trait]
pub trait Step<C: Client>: Send + Sync {
    /// Registered name, used in logs
    fn name(&self) -> &str;

    /// Returns true if the step applies to `resource`
    fn test(&self, _project: &Project, _resource: &Resource) -> bool {
        true
    }

    /// Runs the step
    ///
    /// # Returns
    ///
    /// * `Ok(Some(partial))` - Fields to merge into the resource
    /// * `Ok(None)` - Nothing to merge
    /// * `Err(StepError)` - The resource's pipeline is aborted
    async fn apply(
        &self,
        project: &Project,
        resource: &Resource,
        client: &C,
    ) -> StepResult<Option<PartialResource>>;

    /// The step must run inside a rendered page
    fn run_in_page(&self) -> bool {
        false
    }
}

type StepConstructor<C> = Box<dyn Fn(&toml::Table) -> ConfigResult<Box<dyn Step<C>>> + Send + Sync>;

/// Maps step names to constructors
pub struct StepRegistry<C: Client> {
    constructors: BTreeMap<String, StepConstructor<C>>,
}

impl<C: Client> Default for StepRegistry<C> {
    fn default() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }
}

impl<C: Client> StepRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor under `name`, replacing any previous one
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&toml::Table) -> ConfigResult<Box<dyn Step<C>>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(|k| k.as_str()).collect()
    }

    /// Builds a pipeline from configured step entries
    ///
    /// # Returns
    ///
    /// * `Ok(Pipeline)` - Every entry named a registered step
    /// * `Err(ConfigError::UnknownStep)` - An entry named no registered step
    /// * `Err(ConfigError::StepOptions)` - A constructor rejected its options
    pub fn build(&self, entries: &[StepEntry]) -> ConfigResult<Pipeline<C>> {
        let steps = entries
            .iter()
            .map(|entry| {
                let constructor = self
                    .constructors
                    .get(&entry.name)
                    .ok_or_else(|| ConfigError::UnknownStep(entry.name.clone()))?;
                constructor(&entry.options)
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Pipeline::new(steps))
    }
}

/// Ordered steps run against every resource
pub struct Pipeline<C: Client> {
    steps: Vec<Box<dyn Step<C>>>,
}

impl<C: Client> Pipeline<C> {
    pub fn new(steps: Vec<Box<dyn Step<C>>>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Box<dyn Step<C>>] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
