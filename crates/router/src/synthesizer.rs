//! Answer synthesis: pick a response mode and produce the answer stream.

use std::sync::Arc;
use std::time::Duration;

use enclave_core::{AppError, AppResult};
use enclave_llm::{LlmClient, LlmRequest, LlmStream};
use enclave_prompt::{ids, PromptLibrary};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;

use crate::history::HistoryStore;
use crate::stage::StageError;
use crate::types::{AccessContext, CandidateDocument, RetrievalStrategy};

/// Prepended to every general-knowledge answer.
pub const GENERAL_KNOWLEDGE_MARKER: &str =
    "💡 Source: AI general knowledge (not company documents)\n\n";

const DISCLAIMER: &str = "⚠️ This reply was generated automatically. Please confirm anything \
important with the responsible department.";

/// Characters of each document passed to the answer prompt.
const DOCUMENT_EXCERPT_CHARS: usize = 500;

const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_MAX_TOKENS: u32 = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    Grounded,
    GeneralKnowledge,
    PermissionDenied,
    NoRelevantDocument,
    Error,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Grounded => "grounded",
            ResponseMode::GeneralKnowledge => "general_knowledge",
            ResponseMode::PermissionDenied => "permission_denied",
            ResponseMode::NoRelevantDocument => "no_relevant_document",
            ResponseMode::Error => "error",
        }
    }

    /// Modes answered by the model rather than a fixed template.
    pub fn is_generated(&self) -> bool {
        matches!(self, ResponseMode::Grounded | ResponseMode::GeneralKnowledge)
    }
}

impl std::fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Choose the response mode from upstream results. Evaluated in order:
///
/// 1. a fatal upstream failure gives `Error`;
/// 2. surviving candidates for a detected scope give `Grounded`;
/// 3. nothing survived, a scope was detected and the caller lacks it: `PermissionDenied`;
/// 4. no scope detected: `GeneralKnowledge`, even if documents matched;
/// 5. retrieval found nothing at all (miss or outage): `GeneralKnowledge`;
/// 6. otherwise candidates existed but none passed the filter: `NoRelevantDocument`.
pub fn select_mode(
    fatal: bool,
    strategy: &RetrievalStrategy,
    raw_candidate_count: usize,
    candidates: &[CandidateDocument],
) -> ResponseMode {
    let detected = strategy.detected_scope.is_some();
    if fatal {
        ResponseMode::Error
    } else if !candidates.is_empty() && detected {
        ResponseMode::Grounded
    } else if detected && !strategy.has_permission {
        ResponseMode::PermissionDenied
    } else if !detected || raw_candidate_count == 0 {
        ResponseMode::GeneralKnowledge
    } else {
        ResponseMode::NoRelevantDocument
    }
}

/// Confidence reported alongside an answer.
pub fn answer_confidence(mode: ResponseMode, candidates: &[CandidateDocument]) -> f32 {
    match mode {
        ResponseMode::Grounded if !candidates.is_empty() => {
            let n = candidates.len() as f32;
            let avg = candidates.iter().map(|c| c.score).sum::<f32>() / n;
            let coverage = (n / 5.0).min(1.0);
            ((avg * 0.7 + coverage * 0.3) * 1000.0).round() / 1000.0
        }
        ResponseMode::GeneralKnowledge => 0.6,
        ResponseMode::PermissionDenied => 1.0,
        _ => 0.0,
    }
}

pub fn permission_denied_message(access: &AccessContext, blocked_scope: &str) -> String {
    format!(
        "Access notice\n\n\
         Your question concerns the '{blocked}' department, but you do not have access to its documents.\n\n\
         Your access\n\
         - Department: {department}\n\
         - Readable scopes: {scopes}\n\n\
         What you can do\n\
         1. Ask the head of '{blocked}' to grant you access\n\
         2. Look for related material in the public documents\n\
         3. Ask an administrator how access requests work\n\n\
         {disclaimer}",
        blocked = blocked_scope,
        department = access.department,
        scopes = access.permitted_scopes.join(", "),
        disclaimer = DISCLAIMER,
    )
}

pub fn no_relevant_document_message(access: &AccessContext, query: &str) -> String {
    format!(
        "No matching documents\n\n\
         Nothing in the documents you can read matched \"{query}\".\n\n\
         Searched scopes: {scopes}\n\n\
         What you can do\n\
         1. Rephrase the question with different keywords\n\
         2. Check that the topic belongs to one of the scopes above\n\
         3. Ask colleagues or an administrator in {department}\n\
         4. Request access if the documents belong to another department\n\n\
         {disclaimer}",
        query = query,
        scopes = access.permitted_scopes.join(", "),
        department = access.department,
        disclaimer = DISCLAIMER,
    )
}

pub fn error_message() -> String {
    "Sorry, something went wrong while answering your question. Please try again in a moment; \
     if the problem persists, contact your administrator."
        .to_string()
}

/// What the synthesizer needs from the earlier stages.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub query: &'a str,
    pub session_id: Option<&'a str>,
    pub access: &'a AccessContext,
    pub strategy: &'a RetrievalStrategy,
    pub candidates: &'a [CandidateDocument],
}

pub struct AnswerSynthesizer {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
    history: Arc<dyn HistoryStore>,
    model: String,
    stream_open_timeout: Duration,
    stream_idle_timeout: Duration,
    prompt_exchanges: usize,
}

impl AnswerSynthesizer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        prompts: Arc<PromptLibrary>,
        history: Arc<dyn HistoryStore>,
        model: impl Into<String>,
        stream_open_timeout: Duration,
        stream_idle_timeout: Duration,
        prompt_exchanges: usize,
    ) -> Self {
        Self {
            llm,
            prompts,
            history,
            model: model.into(),
            stream_open_timeout,
            stream_idle_timeout,
            prompt_exchanges,
        }
    }

    /// Produce the answer for `mode`.
    ///
    /// Templated modes never fail. For generated modes, failing to render
    /// the prompt or open the model stream is recoverable; the caller falls
    /// back to the error template.
    pub async fn synthesize(
        &self,
        mode: ResponseMode,
        input: SynthesisInput<'_>,
    ) -> Result<AnswerStream, StageError> {
        match mode {
            ResponseMode::Grounded | ResponseMode::GeneralKnowledge => self
                .generate(mode, input)
                .await
                .map_err(StageError::Recoverable),
            ResponseMode::PermissionDenied => {
                let blocked = input.strategy.detected_scope.as_deref().unwrap_or("unknown");
                Ok(AnswerStream::templated(
                    mode,
                    permission_denied_message(input.access, blocked),
                ))
            }
            ResponseMode::NoRelevantDocument => Ok(AnswerStream::templated(
                mode,
                no_relevant_document_message(input.access, input.query),
            )),
            ResponseMode::Error => Ok(AnswerStream::templated(mode, error_message())),
        }
    }

    async fn generate(&self, mode: ResponseMode, input: SynthesisInput<'_>) -> AppResult<AnswerStream> {
        let history = match input.session_id {
            Some(session) => self
                .history
                .recent(session, self.prompt_exchanges * 2)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "history unavailable, answering without it");
                    Vec::new()
                }),
            None => Vec::new(),
        };
        let history: Vec<_> = history
            .iter()
            .map(|t| json!({ "role": t.role.as_str(), "text": t.text }))
            .collect();

        let prompt = if mode == ResponseMode::Grounded {
            let documents: Vec<_> = input
                .candidates
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    json!({
                        "index": i + 1,
                        "title": c.title,
                        "scope": c.scope,
                        "score": format!("{:.2}", c.score),
                        "content": c.content.chars().take(DOCUMENT_EXCERPT_CHARS).collect::<String>(),
                    })
                })
                .collect();
            self.prompts.render(
                ids::ANSWER_GROUNDED,
                &json!({
                    "history": history,
                    "user": {
                        "department": input.access.department,
                        "role": input.access.role.as_str(),
                    },
                    "documents": documents,
                    "query": input.query,
                }),
            )?
        } else {
            self.prompts.render(
                ids::ANSWER_GENERAL,
                &json!({ "history": history, "query": input.query }),
            )?
        };

        let mut request = LlmRequest::new(prompt.user, self.model.as_str())
            .with_streaming()
            .with_temperature(prompt.params.temperature.unwrap_or(DEFAULT_TEMPERATURE))
            .with_max_tokens(prompt.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));
        if let Some(system) = prompt.system {
            request = request.with_system(system);
        }

        let stream = tokio::time::timeout(self.stream_open_timeout, self.llm.stream(&request))
            .await
            .map_err(|_| AppError::timeout("answer stream open", self.stream_open_timeout))??;

        let mut answer = AnswerStream::generated(mode, stream, self.stream_idle_timeout);
        if mode == ResponseMode::GeneralKnowledge {
            answer.prefix = Some(GENERAL_KNOWLEDGE_MARKER.to_string());
        }
        if let Some(session) = input.session_id {
            answer.commit = Some(PendingCommit {
                history: self.history.clone(),
                session_id: session.to_string(),
                user_text: input.query.to_string(),
            });
        }
        Ok(answer)
    }
}

struct PendingCommit {
    history: Arc<dyn HistoryStore>,
    session_id: String,
    user_text: String,
}

enum Source {
    Text(Option<String>),
    /// Model stream and the longest wait for its next chunk
    Model(LlmStream, Duration),
}

/// The answer, delivered piece by piece.
///
/// For generated modes the exchange is written to the session history once
/// the model stream ends normally. An error, or a model that stays silent
/// past the idle timeout, ends the stream without a commit; dropping it
/// early cancels generation and commits nothing.
pub struct AnswerStream {
    mode: ResponseMode,
    prefix: Option<String>,
    source: Source,
    text: String,
    commit: Option<PendingCommit>,
    finished: bool,
}

impl AnswerStream {
    /// A fixed answer; nothing is recorded in history.
    pub fn templated(mode: ResponseMode, text: String) -> Self {
        Self {
            mode,
            prefix: None,
            source: Source::Text(Some(text)),
            text: String::new(),
            commit: None,
            finished: false,
        }
    }

    fn generated(mode: ResponseMode, stream: LlmStream, idle_timeout: Duration) -> Self {
        Self {
            mode,
            prefix: None,
            source: Source::Model(stream, idle_timeout),
            text: String::new(),
            commit: None,
            finished: false,
        }
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    /// Everything yielded so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Next piece of the answer, `None` once complete.
    pub async fn next(&mut self) -> Option<AppResult<String>> {
        if self.finished {
            return None;
        }
        if let Some(prefix) = self.prefix.take() {
            self.text.push_str(&prefix);
            return Some(Ok(prefix));
        }

        loop {
            let next = match self.source {
                Source::Text(ref mut text) => text.take().map(|t| Ok((t, true))),
                Source::Model(ref mut stream, idle) => {
                    match tokio::time::timeout(idle, stream.next()).await {
                        Ok(chunk) => chunk.map(|chunk| chunk.map(|c| (c.content, c.done))),
                        Err(_) => Some(Err(AppError::timeout("answer stream", idle))),
                    }
                }
            };

            match next {
                None => break,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "answer stream failed");
                    self.finished = true;
                    self.commit = None;
                    // drops the model stream, cancelling generation
                    self.source = Source::Text(None);
                    return Some(Err(e));
                }
                Some(Ok((piece, done))) => {
                    if done {
                        self.source = Source::Text(None);
                    }
                    if piece.is_empty() {
                        continue;
                    }
                    self.text.push_str(&piece);
                    return Some(Ok(piece));
                }
            }
        }

        self.finish().await;
        None
    }

    async fn finish(&mut self) {
        self.finished = true;
        if let Some(commit) = self.commit.take() {
            if let Err(e) = commit
                .history
                .append_exchange(&commit.session_id, &commit.user_text, &self.text)
                .await
            {
                tracing::warn!(error = %e, session = %commit.session_id, "failed to record exchange");
            }
        }
    }

    /// Drain the stream into one string.
    pub async fn collect(mut self) -> AppResult<String> {
        while let Some(piece) = self.next().await {
            piece?;
        }
        Ok(self.text)
    }

    pub fn into_stream(self) -> impl Stream<Item = AppResult<String>> + Send {
        futures::stream::unfold(self, |mut answer| async move {
            answer.next().await.map(|item| (item, answer))
        })
    }
}

impl std::fmt::Debug for AnswerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerStream")
            .field("mode", &self.mode)
            .field("text", &self.text)
            .field("finished", &self.finished)
            .finish()
    }
}
