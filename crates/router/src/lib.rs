//! Permission-scoped question answering over departmental documents.
//!
//! A query goes through six stages:
//! 1. Access resolution (identity -> permitted scopes)
//! 2. Intent classification (which department the question is about)
//! 3. Strategy planning (which scopes to search, how many results)
//! 4. Hybrid retrieval (dense + lexical, optional rerank)
//! 5. Relevance and permission filtering
//! 6. Answer synthesis (grounded, general knowledge or templated)
//!
//! [`Pipeline`] wires them together. Backends (identity store, indexes,
//! reranker, history) are traits so deployments can plug in their own.

pub mod access;
pub mod chunker;
pub mod config;
pub mod corpus;
pub mod directory;
pub mod embeddings;
pub mod filter;
pub mod history;
pub mod index;
pub mod intent;
pub mod memory_index;
pub mod pipeline;
pub mod rephrase;
pub mod rerank;
pub mod retriever;
pub mod stage;
pub mod strategy;
pub mod synthesizer;
pub mod types;

pub use access::{AccessResolver, IdentityError, IdentityRecord, IdentityStore};
pub use config::RouterConfig;
pub use directory::DirectoryIdentityStore;
pub use history::{ConversationTurn, HistoryStore, MemoryHistoryStore, TurnRole};
pub use index::{LexicalHit, LexicalIndex, Reranker, VectorHit, VectorIndex};
pub use memory_index::{MemoryLexicalIndex, MemoryVectorIndex};
pub use pipeline::{Collaborators, Pipeline, PipelineContext, RoutedQuery};
pub use stage::{Stage, StageLog, StageRecord, StageStatus};
pub use synthesizer::{AnswerStream, ResponseMode};
pub use types::{
    AccessContext, CandidateDocument, IntentAnalysis, RetrievalStrategy, Role, ANONYMOUS_ID,
    PUBLIC_SCOPE,
};
