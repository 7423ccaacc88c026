//! Stage bookkeeping shared by the orchestrator and the stages.

use std::future::Future;
use std::time::{Duration, Instant};

use enclave_core::AppError;
use serde::Serialize;
use thiserror::Error;
use tracing::Instrument;

/// The fixed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AccessResolution,
    IntentClassification,
    StrategyPlanning,
    Retrieval,
    Filtering,
    Synthesis,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::AccessResolution => "access_resolution",
            Stage::IntentClassification => "intent_classification",
            Stage::StrategyPlanning => "strategy_planning",
            Stage::Retrieval => "retrieval",
            Stage::Filtering => "filtering",
            Stage::Synthesis => "synthesis",
        }
    }
}

/// How a stage failed.
///
/// `Recoverable` means the orchestrator substitutes the stage's default
/// output and carries on. `Fatal` stops the pipeline.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("recoverable: {0}")]
    Recoverable(AppError),
    #[error("fatal: {0}")]
    Fatal(AppError),
}

impl StageError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StageError::Fatal(_))
    }

    pub fn into_inner(self) -> AppError {
        match self {
            StageError::Recoverable(e) | StageError::Fatal(e) => e,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    /// Failed recoverably; the default output was used
    Recovered,
    Failed,
}

/// One entry of the per-request stage log.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub duration_ms: u64,
    /// Error category, never the raw backend message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

/// Stage outcomes of a single request, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageLog {
    records: Vec<StageRecord>,
}

impl StageLog {
    pub fn push(
        &mut self,
        stage: Stage,
        status: StageStatus,
        duration: Duration,
        error_kind: Option<&'static str>,
    ) {
        self.records.push(StageRecord {
            stage,
            status,
            duration_ms: duration.as_millis() as u64,
            error_kind,
        });
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn status_of(&self, stage: Stage) -> Option<StageStatus> {
        self.records
            .iter()
            .rev()
            .find(|r| r.stage == stage)
            .map(|r| r.status)
    }

    pub fn any_failed(&self) -> bool {
        self.records.iter().any(|r| r.status == StageStatus::Failed)
    }
}

/// Coarse error category, safe to show in diagnostics.
pub fn error_kind(err: &AppError) -> &'static str {
    match err {
        AppError::Timeout { .. } => "timeout",
        AppError::Llm(_) => "llm",
        AppError::Identity(_) => "identity",
        AppError::Retrieval(_) => "retrieval",
        AppError::Prompt(_) => "prompt",
        AppError::Validation(_) => "validation",
        AppError::Serialization(_) => "parse",
        AppError::Config(_) => "config",
        AppError::Io(_) => "io",
        AppError::Other(_) => "other",
    }
}

/// Run one stage inside its tracing span, time it and record the outcome.
///
/// A recoverable failure is logged and replaced by `fallback()`; a fatal one
/// is returned to the caller.
pub(crate) async fn run_stage<T, F, D>(
    log: &mut StageLog,
    stage: Stage,
    fut: F,
    fallback: D,
) -> Result<T, AppError>
where
    F: Future<Output = Result<T, StageError>>,
    D: FnOnce() -> T,
{
    let span = tracing::info_span!("stage", name = stage.as_str());
    let start = Instant::now();
    let result = fut.instrument(span).await;
    let elapsed = start.elapsed();

    match result {
        Ok(value) => {
            tracing::debug!(stage = stage.as_str(), elapsed_ms = elapsed.as_millis() as u64, "stage ok");
            log.push(stage, StageStatus::Ok, elapsed, None);
            Ok(value)
        }
        Err(StageError::Recoverable(err)) => {
            tracing::warn!(
                stage = stage.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                error = %err,
                "stage degraded, using default"
            );
            log.push(stage, StageStatus::Recovered, elapsed, Some(error_kind(&err)));
            Ok(fallback())
        }
        Err(StageError::Fatal(err)) => {
            tracing::error!(
                stage = stage.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                error = %err,
                "stage failed"
            );
            log.push(stage, StageStatus::Failed, elapsed, Some(error_kind(&err)));
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recoverable_uses_fallback() {
        let mut log = StageLog::default();
        let value = run_stage(
            &mut log,
            Stage::IntentClassification,
            async { Err::<u32, _>(StageError::Recoverable(AppError::Llm("down".into()))) },
            || 7,
        )
        .await
        .unwrap();

        assert_eq!(value, 7);
        let record = &log.records()[0];
        assert_eq!(record.status, StageStatus::Recovered);
        assert_eq!(record.error_kind, Some("llm"));
    }

    #[tokio::test]
    async fn test_fatal_propagates() {
        let mut log = StageLog::default();
        let result = run_stage(
            &mut log,
            Stage::AccessResolution,
            async { Err::<u32, _>(StageError::Fatal(AppError::Identity("unreachable".into()))) },
            || 0,
        )
        .await;

        assert!(matches!(result, Err(AppError::Identity(_))));
        assert!(log.any_failed());
        assert_eq!(
            log.status_of(Stage::AccessResolution),
            Some(StageStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_ok_recorded_in_order() {
        let mut log = StageLog::default();
        run_stage(&mut log, Stage::StrategyPlanning, async { Ok::<_, StageError>(1) }, || 0)
            .await
            .unwrap();
        run_stage(&mut log, Stage::Filtering, async { Ok::<_, StageError>(2) }, || 0)
            .await
            .unwrap();

        let stages: Vec<Stage> = log.records().iter().map(|r| r.stage).collect();
        assert_eq!(stages, vec![Stage::StrategyPlanning, Stage::Filtering]);
        assert!(!log.any_failed());
    }
}
