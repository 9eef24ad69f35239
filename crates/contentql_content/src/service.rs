//! A ready-to-run content graph.

use crate::buffers::ContentBuffers;
use crate::config::{ConfigError, ContentConfig};
use crate::extension::ContentExtension;
use crate::storage::{AccessChecker, EntityStorage, RouteResolver, UrlGenerator};
use contentql_runtime::{Context, Executor, ExecutorConfig, Request, ResolverMap, Response};
use std::sync::Arc;
use tracing::debug;

type Registration = Box<dyn FnOnce(&mut ResolverMap) + Send>;

/// Executes requests against content.
pub struct ContentGraph {
    executor: Executor,
    storage: Arc<dyn EntityStorage>,
    config: ContentConfig,
}

impl std::fmt::Debug for ContentGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentGraph")
            .field("executor", &self.executor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ContentGraph {
    /// Creates a builder.
    pub fn builder() -> ContentGraphBuilder {
        ContentGraphBuilder::new()
    }

    /// A fresh request context with its own buffers.
    pub fn context(&self) -> Context {
        let mut ctx = Context::new();
        ctx.insert(ContentBuffers::new(
            Arc::clone(&self.storage),
            self.config.max_batch_size,
        ));
        ctx
    }

    /// Executes a request in a fresh context.
    pub async fn execute(&self, request: &Request) -> Response {
        let ctx = self.context();
        self.execute_in(request, &ctx).await
    }

    /// Executes a request in a given context.
    pub async fn execute_in(&self, request: &Request, ctx: &Context) -> Response {
        self.executor.execute(request, ctx).await
    }

    pub fn config(&self) -> &ContentConfig {
        &self.config
    }

    pub fn resolvers(&self) -> &ResolverMap {
        self.executor.resolvers()
    }
}

/// Builds a [`ContentGraph`].
#[derive(Default)]
pub struct ContentGraphBuilder {
    config: ContentConfig,
    executor_config: ExecutorConfig,
    storage: Option<Arc<dyn EntityStorage>>,
    routes: Option<Arc<dyn RouteResolver>>,
    access: Option<Arc<dyn AccessChecker>>,
    urls: Option<Arc<dyn UrlGenerator>>,
    registrations: Vec<Registration>,
}

impl ContentGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the content configuration.
    #[must_use]
    pub fn config(mut self, config: ContentConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the executor configuration.
    #[must_use]
    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn EntityStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn routes(mut self, routes: Arc<dyn RouteResolver>) -> Self {
        self.routes = Some(routes);
        self
    }

    #[must_use]
    pub fn access(mut self, access: Arc<dyn AccessChecker>) -> Self {
        self.access = Some(access);
        self
    }

    #[must_use]
    pub fn urls(mut self, urls: Arc<dyn UrlGenerator>) -> Self {
        self.urls = Some(urls);
        self
    }

    /// Uses one value for every collaborator.
    #[must_use]
    pub fn collaborators<T>(self, collaborators: Arc<T>) -> Self
    where
        T: EntityStorage + RouteResolver + AccessChecker + UrlGenerator + 'static,
    {
        self.storage(collaborators.clone())
            .routes(collaborators.clone())
            .access(collaborators.clone())
            .urls(collaborators)
    }

    /// Registers host resolvers before the content fields.
    #[must_use]
    pub fn register<F>(mut self, registration: F) -> Self
    where
        F: FnOnce(&mut ResolverMap) + Send + 'static,
    {
        self.registrations.push(Box::new(registration));
        self
    }

    /// Validates the configuration and the registry.
    pub fn build(self) -> Result<ContentGraph, ConfigError> {
        self.config.validate()?;
        let storage = self
            .storage
            .ok_or(ConfigError::MissingCollaborator("storage"))?;
        let routes = self
            .routes
            .ok_or(ConfigError::MissingCollaborator("routes"))?;
        let access = self
            .access
            .ok_or(ConfigError::MissingCollaborator("access"))?;
        let urls = self.urls.ok_or(ConfigError::MissingCollaborator("urls"))?;

        let mut resolvers = ResolverMap::new();
        for registration in self.registrations {
            registration(&mut resolvers);
        }
        let extension = ContentExtension::new(
            self.config.clone(),
            Arc::clone(&storage),
            routes,
            access,
            urls,
        );
        extension.register_resolvers(&mut resolvers);
        resolvers.validate()?;

        debug!(types = self.config.types.len(), "content graph built");
        Ok(ContentGraph {
            executor: Executor::new_with(self.executor_config, resolvers),
            storage,
            config: self.config,
        })
    }
}
