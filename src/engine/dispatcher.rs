//! Engine selection and bounded dispatch of validated requests

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::conversation::ValidatedRequest;
use crate::error::{ChartsmithError, Result};
use crate::id::generate_run_id;
use crate::output::{Execution, ExecutionOutcome, ResultNormalizer};
use crate::tools::ToolDefinition;

use super::kind::EngineKind;
use super::pool::WorkerPool;
use super::process::Engine;

/// Choose the engine for a request
///
/// An explicit choice must be supported by the tool; otherwise the tool's first
/// declared engine is used. No other engine is ever substituted.
pub fn select_engine(tool: &ToolDefinition, requested: Option<EngineKind>) -> Result<EngineKind> {
    match requested {
        Some(engine) if tool.supports(engine) => Ok(engine),
        Some(engine) => Err(ChartsmithError::UnsupportedEngine {
            tool: tool.key(),
            engine,
        }),
        None => tool.default_engine().ok_or_else(|| ChartsmithError::InvalidState(format!(
            "tool {} declares no engines",
            tool.key()
        ))),
    }
}

/// Routes validated requests to backends through a shared worker pool
pub struct EngineDispatcher {
    engines: BTreeMap<EngineKind, Arc<dyn Engine>>,
    pool: WorkerPool,
    normalizer: ResultNormalizer,
}

impl EngineDispatcher {
    pub fn new(pool: WorkerPool, normalizer: ResultNormalizer) -> Self {
        Self {
            engines: BTreeMap::new(),
            pool,
            normalizer,
        }
    }

    /// Register a backend, replacing any previous one of the same kind
    pub fn with_engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engines.insert(engine.kind(), engine);
        self
    }

    pub fn engines(&self) -> Vec<EngineKind> {
        self.engines.keys().copied().collect()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Render a request and normalize its output
    pub async fn dispatch(&self, request: &ValidatedRequest) -> ExecutionOutcome {
        let tool = request.tool();
        let kind = select_engine(tool, request.request().engine)?;
        let engine = self
            .engines
            .get(&kind)
            .cloned()
            .ok_or_else(|| ChartsmithError::UnsupportedEngine {
                tool: tool.key(),
                engine: kind,
            })?;

        let run_id = generate_run_id(&tool.path.name);
        let permit = self.pool.acquire().await?;
        tracing::info!(run_id = %run_id, chart_type = %request.chart_type(), engine = %kind, "dispatching");

        let raw = match engine.render(request).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(run_id = %run_id, chart_type = %request.chart_type(), error = %e, "render failed");
                return Err(e.into());
            }
        };
        drop(permit);

        let payload = self.normalizer.normalize(&raw, tool)?;
        let elapsed_ms = u64::try_from(raw.elapsed.as_millis()).unwrap_or(u64::MAX);
        tracing::info!(run_id = %run_id, elapsed_ms, kinds = ?payload.kinds(), "render complete");

        Ok(Execution {
            run_id,
            chart_type: request.chart_type().to_string(),
            engine: kind,
            params_used: request.params().clone(),
            payload,
            elapsed_ms,
        })
    }
}
