//! Job Builder Registry
//!
//! Jobs arrive over the wire as a builder name plus a JSON spec. Each builder
//! is a named constructor registered at startup; there is no reflective
//! instantiation anywhere. Applications register builders for their own job
//! types next to the stock ones.

use crate::cluster::ClusterContext;
use crate::error::{ClusterJobError, Result};
use crate::job::Job;
use crate::server::work_server::{BatchWorkServer, WorkServerSpec};
use dashmap::DashMap;
use std::sync::Arc;

/// Named constructor: JSON spec + cluster context -> ready-to-register job.
pub type JobBuilder =
    Arc<dyn Fn(serde_json::Value, Arc<ClusterContext>) -> Result<Arc<dyn Job>> + Send + Sync>;

pub struct JobBuilderRegistry {
    builders: DashMap<String, JobBuilder>,
}

impl JobBuilderRegistry {
    pub fn new() -> Self {
        Self {
            builders: DashMap::new(),
        }
    }

    /// Registry pre-loaded with the stock job types.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register("batch_work_server", |spec, _ctx| {
            let spec: WorkServerSpec = serde_json::from_value(spec)?;
            Ok(Arc::new(BatchWorkServer::new(spec)) as Arc<dyn Job>)
        });
        registry
    }

    pub fn register<F>(&self, job_type: &str, builder: F)
    where
        F: Fn(serde_json::Value, Arc<ClusterContext>) -> Result<Arc<dyn Job>>
            + Send
            + Sync
            + 'static,
    {
        tracing::debug!("Registering job builder: {}", job_type);
        self.builders
            .insert(job_type.to_string(), Arc::new(builder));
    }

    pub fn build(
        &self,
        job_type: &str,
        spec: serde_json::Value,
        ctx: Arc<ClusterContext>,
    ) -> Result<Arc<dyn Job>> {
        let builder = self
            .builders
            .get(job_type)
            .map(|e| e.value().clone())
            .ok_or_else(|| {
                ClusterJobError::Registration(format!("unknown job type: {}", job_type))
            })?;
        builder(spec, ctx)
    }

    pub fn has_builder(&self, job_type: &str) -> bool {
        self.builders.contains_key(job_type)
    }

    pub fn builder_count(&self) -> usize {
        self.builders.len()
    }
}

impl Default for JobBuilderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
