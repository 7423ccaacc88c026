//! The query pipeline: access -> intent -> strategy -> retrieval -> filter
//! -> synthesis.

use std::sync::Arc;

use enclave_core::{AppError, AppResult};
use enclave_llm::LlmClient;
use enclave_prompt::PromptLibrary;
use serde::Serialize;
use tracing::Instrument;

use crate::access::{AccessResolver, IdentityStore};
use crate::config::{PipelineSettings, RouterConfig};
use crate::embeddings::EmbeddingProvider;
use crate::filter::filter_candidates;
use crate::history::HistoryStore;
use crate::index::{LexicalIndex, Reranker, VectorIndex};
use crate::intent::IntentClassifier;
use crate::rephrase::QueryRephraser;
use crate::retriever::HybridRetriever;
use crate::stage::{error_kind, run_stage, Stage, StageError, StageLog};
use crate::strategy::{default_strategy, plan};
use crate::synthesizer::{
    answer_confidence, error_message, select_mode, AnswerStream, AnswerSynthesizer, ResponseMode,
    SynthesisInput,
};
use crate::types::{AccessContext, CandidateDocument, IntentAnalysis, RetrievalStrategy, ANONYMOUS_ID};

/// Everything one request accumulated on its way through the stages.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineContext {
    pub request_id: String,
    pub query: String,
    pub session_id: Option<String>,
    pub access: AccessContext,
    pub intent: IntentAnalysis,
    pub strategy: RetrievalStrategy,
    /// Candidates returned by retrieval, before filtering
    pub raw_candidate_count: usize,
    pub candidates: Vec<CandidateDocument>,
    pub stages: StageLog,
}

impl PipelineContext {
    fn new(query: &str, session_id: Option<&str>) -> Self {
        let access = AccessContext::anonymous();
        let strategy = default_strategy(&access);
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            query: query.to_string(),
            session_id: session_id.map(str::to_string),
            access,
            intent: IntentAnalysis::unknown(),
            strategy,
            raw_candidate_count: 0,
            candidates: Vec::new(),
            stages: StageLog::default(),
        }
    }
}

/// Result of [`Pipeline::run`]. The answer is still streaming.
#[derive(Debug)]
pub struct RoutedQuery {
    pub context: PipelineContext,
    pub mode: ResponseMode,
    pub confidence: f32,
    pub answer: AnswerStream,
}

/// External services the pipeline is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityStore>,
    pub llm: Arc<dyn LlmClient>,
    pub prompts: Arc<PromptLibrary>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vector: Arc<dyn VectorIndex>,
    pub lexical: Option<Arc<dyn LexicalIndex>>,
    pub reranker: Option<Arc<dyn Reranker>>,
    pub history: Arc<dyn HistoryStore>,
}

/// Built once at startup and shared across requests.
pub struct Pipeline {
    access: AccessResolver,
    classifier: IntentClassifier,
    retriever: HybridRetriever,
    synthesizer: AnswerSynthesizer,
    settings: PipelineSettings,
}

impl Pipeline {
    /// `default_model` is used for every LLM task without an override in
    /// `config.models`.
    pub fn new(services: Collaborators, config: &RouterConfig, default_model: &str) -> Self {
        let timeouts = &config.timeouts;
        let model_for = |choice: &Option<String>| {
            choice.clone().unwrap_or_else(|| default_model.to_string())
        };

        let access = AccessResolver::new(services.identity, timeouts.identity());
        let classifier = IntentClassifier::new(
            services.llm.clone(),
            services.prompts.clone(),
            model_for(&config.models.classifier),
            timeouts.llm(),
        );

        let mut retriever = HybridRetriever::new(
            services.embedder,
            services.vector,
            config.retrieval.clone(),
            timeouts.clone(),
        )
        .with_rephraser(QueryRephraser::new(
            services.llm.clone(),
            services.prompts.clone(),
            model_for(&config.models.rephrase),
            timeouts.llm(),
        ));
        if let Some(lexical) = services.lexical {
            retriever = retriever.with_lexical(lexical);
        }
        if let Some(reranker) = services.reranker {
            retriever = retriever.with_reranker(reranker);
        }

        let synthesizer = AnswerSynthesizer::new(
            services.llm,
            services.prompts,
            services.history,
            model_for(&config.models.answer),
            timeouts.stream_open(),
            timeouts.stream_idle(),
            config.history.prompt_exchanges,
        );

        Self {
            access,
            classifier,
            retriever,
            synthesizer,
            settings: config.pipeline.clone(),
        }
    }

    /// Answer `query` for `identity` within `session_id`.
    ///
    /// Errors only on invalid input. Stage failures never surface as `Err`:
    /// recoverable ones are replaced by the stage default, a fatal one turns
    /// into an `Error` mode answer.
    pub async fn run(
        &self,
        query: &str,
        identity: Option<&str>,
        session_id: Option<&str>,
    ) -> AppResult<RoutedQuery> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::Validation("query must not be empty".to_string()));
        }
        let identity = identity.map(str::trim).filter(|id| !id.is_empty());
        if identity.is_none() && !self.settings.allow_anonymous {
            return Err(AppError::Validation(
                "an identity is required for this request".to_string(),
            ));
        }
        let session_id = session_id.map(str::trim).filter(|s| !s.is_empty());

        let mut ctx = PipelineContext::new(query, session_id);
        let span = tracing::info_span!(
            "query",
            request_id = %ctx.request_id,
            identity = identity.unwrap_or(ANONYMOUS_ID),
        );
        let (mode, answer) = self.execute(&mut ctx, identity).instrument(span).await;
        Ok(RoutedQuery {
            confidence: answer_confidence(mode, &ctx.candidates),
            mode,
            answer,
            context: ctx,
        })
    }

    async fn execute(
        &self,
        ctx: &mut PipelineContext,
        identity: Option<&str>,
    ) -> (ResponseMode, AnswerStream) {
        let fatal = self.run_stages(ctx, identity).await.err();
        if let Some(ref err) = fatal {
            tracing::error!(kind = error_kind(err), error = %err, "pipeline aborted");
        }

        let mode = select_mode(
            fatal.is_some(),
            &ctx.strategy,
            ctx.raw_candidate_count,
            &ctx.candidates,
        );

        let input = SynthesisInput {
            query: &ctx.query,
            session_id: ctx.session_id.as_deref(),
            access: &ctx.access,
            strategy: &ctx.strategy,
            candidates: &ctx.candidates,
        };
        let answer = run_stage(
            &mut ctx.stages,
            Stage::Synthesis,
            self.synthesizer.synthesize(mode, input),
            failure_answer,
        )
        .await
        .unwrap_or_else(|_| failure_answer());

        let mode = answer.mode();
        tracing::info!(
            mode = mode.as_str(),
            candidates = ctx.candidates.len(),
            degraded = ctx.stages.records().iter().filter(|r| r.error_kind.is_some()).count(),
            "query routed"
        );
        (mode, answer)
    }

    /// Stages up to filtering. `Err` means a stage failed fatally; whatever
    /// was filled in so far stays in `ctx`.
    async fn run_stages(&self, ctx: &mut PipelineContext, identity: Option<&str>) -> AppResult<()> {
        ctx.access = run_stage(
            &mut ctx.stages,
            Stage::AccessResolution,
            self.access.resolve(identity),
            AccessContext::anonymous,
        )
        .await?;

        let query = ctx.query.as_str();
        let access = &ctx.access;
        let classify = async {
            let departments = self.access.known_departments().await;
            self.classifier.classify(query, access, &departments).await
        };
        ctx.intent = run_stage(
            &mut ctx.stages,
            Stage::IntentClassification,
            classify,
            IntentAnalysis::unknown,
        )
        .await?;

        let intent = &ctx.intent;
        ctx.strategy = run_stage(
            &mut ctx.stages,
            Stage::StrategyPlanning,
            async { plan(access, intent, query) },
            || default_strategy(access),
        )
        .await?;

        let retrieved = run_stage(
            &mut ctx.stages,
            Stage::Retrieval,
            self.retriever.retrieve(query, &ctx.strategy),
            Vec::new,
        )
        .await?;
        ctx.raw_candidate_count = retrieved.len();

        let strategy = &ctx.strategy;
        ctx.candidates = run_stage(
            &mut ctx.stages,
            Stage::Filtering,
            async { Ok::<_, StageError>(filter_candidates(retrieved, strategy, access, &intent.keywords)) },
            Vec::new,
        )
        .await?;

        Ok(())
    }
}

fn failure_answer() -> AnswerStream {
    AnswerStream::templated(ResponseMode::Error, error_message())
}
