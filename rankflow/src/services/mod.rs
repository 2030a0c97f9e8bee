//! Services that back pipeline stages.
//!
//! Every stage is bound to exactly one named [`PipelineService`]. The
//! collaborator traits describe the external systems
//! rankflow consumes; the adapters turn them into pipeline services.

mod adapters;
mod collaborators;

pub use adapters::{DiscoveryService, ScoringService};
pub use collaborators::{
    CandidateSource, LoggingNotifier, Notifier, PersistenceSink, Score, Scorer, ScoringContext,
};

use crate::core::{PipelineRequest, StageData};
use crate::errors::ServiceError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// What a service receives for one invocation.
#[derive(Debug, Clone)]
pub struct StageInput {
    /// The request being served.
    pub request: Arc<PipelineRequest>,
    /// Output of the last stage that completed.
    pub carried: Arc<StageData>,
    /// Id of the stage making the call.
    pub stage_id: String,
}

impl StageInput {
    /// Creates an input.
    #[must_use]
    pub fn new(request: Arc<PipelineRequest>, carried: Arc<StageData>, stage_id: impl Into<String>) -> Self {
        Self {
            request,
            carried,
            stage_id: stage_id.into(),
        }
    }
}

/// A named backing service a stage can call.
#[async_trait]
pub trait PipelineService: Send + Sync + Debug {
    /// Registered name of the service.
    fn name(&self) -> &str;

    /// Handles one call.
    async fn invoke(&self, input: &StageInput) -> Result<StageData, ServiceError>;
}

/// An async closure-based service.
pub struct FnService<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageData, ServiceError>> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnService<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageData, ServiceError>> + Send,
{
    /// Creates a closure-based service.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for FnService<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageData, ServiceError>> + Send,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnService").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> PipelineService for FnService<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageData, ServiceError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: &StageInput) -> Result<StageData, ServiceError> {
        (self.func)(input.clone()).await
    }
}

/// Services by name. Assembled at startup, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn PipelineService>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service under its own name, replacing any previous one.
    pub fn register(&mut self, service: Arc<dyn PipelineService>) {
        let name = service.name().to_string();
        if self.services.insert(name.clone(), service).is_some() {
            tracing::warn!(service = %name, "Replacing registered service");
        }
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, service: Arc<dyn PipelineService>) -> Self {
        self.register(service);
        self
    }

    /// Looks up a service.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn PipelineService>> {
        self.services.get(name).cloned()
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CandidateItem, ScoredItem};
    use std::time::Duration;

    fn input() -> StageInput {
        StageInput::new(
            Arc::new(PipelineRequest::with_budget("tester", Duration::from_secs(5))),
            Arc::new(StageData::new()),
            "stage",
        )
    }

    #[tokio::test]
    async fn test_fn_service() {
        let service = FnService::new("echo", |input: StageInput| async move {
            Ok(StageData::from_items(vec![ScoredItem::unscored(CandidateItem::new(
                input.stage_id,
            ))]))
        });

        assert_eq!(service.name(), "echo");
        let out = service.invoke(&input()).await.unwrap();
        assert_eq!(out.items[0].id(), "stage");
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ServiceRegistry::new()
            .with(Arc::new(FnService::new("b", |_input: StageInput| async { Ok(StageData::new()) })))
            .with(Arc::new(FnService::new("a", |_input: StageInput| async { Ok(StageData::new()) })));

        assert!(registry.contains("a"));
        assert!(!registry.contains("c"));
        assert!(registry.get("b").is_some());
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.len(), 2);
    }
}
